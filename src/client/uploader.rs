//! Upload orchestration: initiate, presign, fan out part PUTs, complete.

use crate::client::{
    api::{ApiError, CoordinatorClient},
    chunking::{CHUNK_SIZE, PartRange, object_key_for, part_ranges},
    progress::UploadProgress,
    source::SourceFile,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{StreamExt, stream};
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file selected")]
    NoFileSelected,
    #[error("file is empty")]
    EmptyFile,
    #[error("failed to initiate upload: {0}")]
    InitiationFailed(#[source] ApiError),
    #[error("failed to get presigned URLs: {0}")]
    PresignFailed(#[source] ApiError),
    #[error("failed to upload part {part_number}: {source}")]
    PartUploadFailed {
        part_number: u32,
        #[source]
        source: ApiError,
    },
    #[error("failed to complete upload: {0}")]
    CompletionFailed(#[source] ApiError),
    #[error("invalid uploader configuration: {0}")]
    InvalidConfig(String),
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Everything the uploader needs, passed in explicitly.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    /// Coordinator base, e.g. `http://localhost:3000/api`.
    pub api_base_url: String,
    pub token: String,
    pub chunk_size: u64,
    /// Per-request timeout; `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
    /// Extra attempts for a part after a retryable failure.
    pub part_retries: u32,
    /// Delay before the first retry; doubles with every further attempt.
    pub retry_backoff: Duration,
    /// Cap on parts in flight at once; `None` sends all parts together.
    pub max_concurrent_parts: Option<usize>,
}

impl UploaderConfig {
    pub fn new(api_base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            token: token.into(),
            chunk_size: CHUNK_SIZE,
            request_timeout: Some(Duration::from_secs(60)),
            part_retries: 2,
            retry_backoff: Duration::from_millis(200),
            max_concurrent_parts: None,
        }
    }
}

pub struct ChunkedUploader {
    api: CoordinatorClient,
    config: UploaderConfig,
    progress: Arc<UploadProgress>,
}

impl ChunkedUploader {
    pub fn new(config: UploaderConfig) -> Result<Self, UploadError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(UploadError::ClientBuild)?;
        Self::with_client(http, config)
    }

    pub fn with_client(http: Client, config: UploaderConfig) -> Result<Self, UploadError> {
        if config.chunk_size == 0 {
            return Err(UploadError::InvalidConfig(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if config.max_concurrent_parts == Some(0) {
            return Err(UploadError::InvalidConfig(
                "max_concurrent_parts must be greater than zero".to_string(),
            ));
        }
        let api = CoordinatorClient::new(http, &config.api_base_url, &config.token);
        Ok(Self {
            api,
            config,
            progress: Arc::new(UploadProgress::new()),
        })
    }

    /// Progress of the current upload, 0..=100.
    pub fn progress(&self) -> watch::Receiver<u8> {
        self.progress.subscribe()
    }

    /// Upload `file` and return its final location, or `None` on any failure.
    ///
    /// Failures are logged rather than returned.
    pub async fn upload_or_none(&self, file: Option<&SourceFile>) -> Option<String> {
        match self.upload(file).await {
            Ok(location) => Some(location),
            Err(UploadError::NoFileSelected) => {
                info!("Please select a file");
                None
            }
            Err(err) => {
                error!(error = %err, "Failed to upload file");
                None
            }
        }
    }

    /// Upload `file` and return the location the coordinator reports.
    ///
    /// Nothing is sent over the network for a missing or empty file. Once a
    /// session exists, any later failure aborts it before returning.
    pub async fn upload(&self, file: Option<&SourceFile>) -> Result<String, UploadError> {
        let file = file.ok_or(UploadError::NoFileSelected)?;
        if file.is_empty() {
            return Err(UploadError::EmptyFile);
        }

        let key = object_key_for(&file.name, Utc::now().timestamp_millis());
        let ranges = part_ranges(file.len(), self.config.chunk_size);
        self.progress.reset(ranges.len() as u32);

        let upload_id = self
            .api
            .initiate(&key, &file.content_type)
            .await
            .map_err(UploadError::InitiationFailed)?;
        info!(%upload_id, %key, parts = ranges.len(), "upload initiated");

        match self.send_parts_and_complete(file, &key, &upload_id, &ranges).await {
            Ok(location) => {
                info!(%upload_id, %location, "upload complete");
                Ok(location)
            }
            Err(err) => {
                self.abort_quietly(&key, &upload_id).await;
                Err(err)
            }
        }
    }

    async fn send_parts_and_complete(
        &self,
        file: &SourceFile,
        key: &str,
        upload_id: &str,
        ranges: &[PartRange],
    ) -> Result<String, UploadError> {
        let urls = self
            .api
            .generate_part_urls(key, upload_id, &file.content_type, ranges.len() as u32)
            .await
            .map_err(UploadError::PresignFailed)?;

        let in_flight = self
            .config
            .max_concurrent_parts
            .unwrap_or(ranges.len());

        // all parts settle before any failure is acted on
        let results: Vec<(u32, Result<(), ApiError>)> = stream::iter(ranges.iter().zip(&urls))
            .map(|(range, url)| self.send_part(url, &file.content_type, range, file.part(range)))
            .buffer_unordered(in_flight)
            .collect()
            .await;

        let mut failures: Vec<(u32, ApiError)> = results
            .into_iter()
            .filter_map(|(part_number, result)| result.err().map(|e| (part_number, e)))
            .collect();
        failures.sort_by_key(|(part_number, _)| *part_number);
        if let Some((part_number, source)) = failures.into_iter().next() {
            return Err(UploadError::PartUploadFailed {
                part_number,
                source,
            });
        }

        self.api
            .complete(key, upload_id)
            .await
            .map_err(UploadError::CompletionFailed)
    }

    /// PUT one part, retrying transient failures with exponential backoff.
    async fn send_part(
        &self,
        url: &str,
        content_type: &str,
        range: &PartRange,
        bytes: Bytes,
    ) -> (u32, Result<(), ApiError>) {
        let part_number = range.part_number;
        let mut attempt: u32 = 0;
        loop {
            match self.api.put_part(url, content_type, bytes.clone()).await {
                Ok(etag) => {
                    let percent = self.progress.record_part();
                    debug!(part_number, ?etag, percent, "part uploaded");
                    return (part_number, Ok(()));
                }
                Err(err) if attempt < self.config.part_retries && err.is_retryable() => {
                    let delay = self
                        .config
                        .retry_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    attempt += 1;
                    warn!(part_number, attempt, error = %err, ?delay, "retrying part");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(part_number, error = %err, "part upload failed");
                    return (part_number, Err(err));
                }
            }
        }
    }

    async fn abort_quietly(&self, key: &str, upload_id: &str) {
        if let Err(err) = self.api.abort(key, upload_id).await {
            warn!(%upload_id, error = %err, "could not abort upload");
        }
    }
}
