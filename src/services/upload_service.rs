//! Upload session coordinator.
//!
//! Brokers access to the object store for clients that upload directly with
//! presigned URLs: it opens multipart sessions, hands out one URL per part,
//! and finalizes (or aborts) the session once the client is done.

use crate::{
    models::multipart::MultipartUpload,
    services::{
        presign::Presigner,
        storage_service::{MAX_PARTS, StorageError, StorageService},
    },
};
use chrono::Utc;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Characters left as-is when an object key is turned into a URL path.
const KEY_PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(String),
    #[error("invalid upload session `{upload_id}`: {reason}")]
    InvalidSession { upload_id: String, reason: String },
    #[error("part URLs for upload `{0}` were already issued")]
    AlreadyPresigned(String),
    #[error("upload `{upload_id}` is missing parts {missing:?}")]
    IncompleteUpload { upload_id: String, missing: Vec<u32> },
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// What a successful completion hands back to the client.
#[derive(Debug, Clone, Serialize)]
pub struct CompletedUpload {
    #[serde(rename = "Location")]
    pub location: String,
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "ETag")]
    pub etag: String,
    #[serde(rename = "Size")]
    pub size: i64,
}

#[derive(Clone)]
pub struct UploadCoordinator {
    storage: StorageService,
    presigner: Presigner,
    public_url: String,
}

impl UploadCoordinator {
    pub fn new(storage: StorageService, presigner: Presigner, public_url: &str) -> Self {
        Self {
            storage,
            presigner,
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    /// Open a multipart session for `file_name`, which becomes the object key.
    pub async fn initiate(
        &self,
        file_name: &str,
        content_type: &str,
    ) -> SessionResult<MultipartUpload> {
        let file_name = require_non_empty("fileName", file_name)?;
        let content_type = require_non_empty("filetype", content_type)?;

        self.storage
            .create_multipart_upload(file_name, content_type)
            .await
            .map_err(|err| match err {
                StorageError::InvalidObjectKey => {
                    SessionError::Validation(format!("fileName `{}` is not a valid key", file_name))
                }
                other => storage_failure(other),
            })
    }

    /// Issue one presigned URL per part, in part-number order.
    ///
    /// URLs are issued once per session; `num_chunks` is recorded as the
    /// session's part count and checked again at completion.
    pub async fn generate_part_urls(
        &self,
        file_name: &str,
        upload_id: &str,
        content_type: &str,
        num_chunks: u32,
    ) -> SessionResult<Vec<String>> {
        if num_chunks == 0 || num_chunks > MAX_PARTS {
            return Err(SessionError::Validation(format!(
                "numChunks must be between 1 and {}",
                MAX_PARTS
            )));
        }
        let upload = self.open_session(file_name, upload_id).await?;
        if !content_type.trim().is_empty() && content_type != upload.content_type {
            // parts are always signed for the type recorded at initiation
            warn!(
                upload_id,
                requested = content_type,
                recorded = %upload.content_type,
                "content type differs from initiation"
            );
        }

        self.storage
            .set_part_count(upload_id, num_chunks)
            .await
            .map_err(|err| session_failure(upload_id, err))?;

        let now = Utc::now().timestamp();
        let urls: Vec<String> = (1..=num_chunks)
            .map(|part_number| {
                self.presigner
                    .presign_part(upload_id, part_number, &upload.content_type, now)
            })
            .collect();

        info!(
            upload_id,
            parts = num_chunks,
            ttl_secs = self.presigner.ttl().as_secs(),
            "issued part URLs"
        );
        Ok(urls)
    }

    /// Assemble the uploaded parts and return where the object now lives.
    pub async fn complete(&self, file_name: &str, upload_id: &str) -> SessionResult<CompletedUpload> {
        self.open_session(file_name, upload_id).await?;

        let object = self
            .storage
            .complete_multipart_upload(upload_id)
            .await
            .map_err(|err| session_failure(upload_id, err))?;

        Ok(CompletedUpload {
            location: self.object_location(&object.key),
            key: object.key,
            etag: object.etag,
            size: object.size_bytes,
        })
    }

    /// Discard an open session and everything uploaded for it so far.
    pub async fn abort(&self, file_name: &str, upload_id: &str) -> SessionResult<()> {
        self.open_session(file_name, upload_id).await?;
        self.storage
            .abort_multipart_upload(upload_id)
            .await
            .map_err(|err| session_failure(upload_id, err))
    }

    /// Durable URL of a completed object.
    pub fn object_location(&self, key: &str) -> String {
        format!(
            "{}/storage/objects/{}",
            self.public_url,
            utf8_percent_encode(key, KEY_PATH_ENCODE_SET)
        )
    }

    /// Look up an open session and check it belongs to `file_name`.
    async fn open_session(&self, file_name: &str, upload_id: &str) -> SessionResult<MultipartUpload> {
        let upload_id = require_non_empty("uploadId", upload_id)?;
        let upload = self
            .storage
            .fetch_upload(upload_id)
            .await
            .map_err(|err| session_failure(upload_id, err))?;

        if !upload.is_open() {
            return Err(invalid_session(upload_id, "upload is already completed"));
        }
        if upload.object_key != file_name {
            return Err(invalid_session(upload_id, "fileName does not match the upload"));
        }
        Ok(upload)
    }
}

fn require_non_empty<'a>(field: &str, value: &'a str) -> SessionResult<&'a str> {
    if value.trim().is_empty() {
        Err(SessionError::Validation(format!("{} must not be empty", field)))
    } else {
        Ok(value)
    }
}

fn invalid_session(upload_id: &str, reason: &str) -> SessionError {
    SessionError::InvalidSession {
        upload_id: upload_id.to_string(),
        reason: reason.to_string(),
    }
}

fn storage_failure(err: StorageError) -> SessionError {
    SessionError::StorageUnavailable(err.to_string())
}

/// Map a storage error raised while working on an existing session.
fn session_failure(upload_id: &str, err: StorageError) -> SessionError {
    match err {
        StorageError::UploadNotFound(_) => invalid_session(upload_id, "upload not found"),
        StorageError::UploadCompleted(_) => invalid_session(upload_id, "upload is already completed"),
        StorageError::PartCountAlreadySet(_) => SessionError::AlreadyPresigned(upload_id.to_string()),
        StorageError::PartCountUnset(_) => SessionError::IncompleteUpload {
            upload_id: upload_id.to_string(),
            missing: Vec::new(),
        },
        StorageError::IncompleteUpload { upload_id, missing } => {
            SessionError::IncompleteUpload { upload_id, missing }
        }
        StorageError::InvalidPartCount(n) => {
            SessionError::Validation(format!("numChunks {} is out of range", n))
        }
        other => storage_failure(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, services::presign::DEFAULT_PRESIGN_TTL};
    use bytes::Bytes;
    use futures::stream;
    use std::{io, sync::Arc};
    use tempfile::TempDir;

    const PUBLIC_URL: &str = "http://files.test";

    async fn coordinator() -> (UploadCoordinator, StorageService, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        let storage = StorageService::new(Arc::new(pool), dir.path());
        let presigner = Presigner::new("secret", PUBLIC_URL, DEFAULT_PRESIGN_TTL);
        (
            UploadCoordinator::new(storage.clone(), presigner, PUBLIC_URL),
            storage,
            dir,
        )
    }

    async fn put(storage: &StorageService, upload_id: &str, part: u32, data: &'static [u8]) {
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(data))]);
        storage.put_part(upload_id, part, body).await.unwrap();
    }

    #[tokio::test]
    async fn initiate_requires_name_and_type() {
        let (c, _, _dir) = coordinator().await;
        assert!(matches!(
            c.initiate("", "image/png").await,
            Err(SessionError::Validation(_))
        ));
        assert!(matches!(
            c.initiate("1_a.png", "  ").await,
            Err(SessionError::Validation(_))
        ));
        for key in ["../escape", ".", "a/", "./x", "a//b"] {
            assert!(
                matches!(c.initiate(key, "image/png").await, Err(SessionError::Validation(_))),
                "{key} was accepted"
            );
        }
    }

    #[tokio::test]
    async fn issues_one_url_per_part_in_order() {
        let (c, _, _dir) = coordinator().await;
        let upload = c.initiate("1_a.png", "image/png").await.unwrap();

        let urls = c
            .generate_part_urls("1_a.png", &upload.upload_id, "image/png", 3)
            .await
            .unwrap();

        assert_eq!(urls.len(), 3);
        for (i, url) in urls.iter().enumerate() {
            let expected = format!(
                "{}/storage/uploads/{}/parts/{}?",
                PUBLIC_URL,
                upload.upload_id,
                i + 1
            );
            assert!(url.starts_with(&expected), "{} does not start with {}", url, expected);
        }
    }

    #[tokio::test]
    async fn part_urls_are_issued_once() {
        let (c, _, _dir) = coordinator().await;
        let upload = c.initiate("1_a.png", "image/png").await.unwrap();
        c.generate_part_urls("1_a.png", &upload.upload_id, "image/png", 2)
            .await
            .unwrap();

        assert!(matches!(
            c.generate_part_urls("1_a.png", &upload.upload_id, "image/png", 2)
                .await,
            Err(SessionError::AlreadyPresigned(_))
        ));
    }

    #[tokio::test]
    async fn unknown_or_mismatched_sessions_are_invalid() {
        let (c, _, _dir) = coordinator().await;
        let upload = c.initiate("1_a.png", "image/png").await.unwrap();

        assert!(matches!(
            c.generate_part_urls("1_a.png", "nope", "image/png", 1).await,
            Err(SessionError::InvalidSession { .. })
        ));
        assert!(matches!(
            c.generate_part_urls("2_b.png", &upload.upload_id, "image/png", 1)
                .await,
            Err(SessionError::InvalidSession { .. })
        ));
        assert!(matches!(
            c.complete("1_a.png", "nope").await,
            Err(SessionError::InvalidSession { .. })
        ));
        assert!(matches!(
            c.generate_part_urls("1_a.png", &upload.upload_id, "image/png", 0)
                .await,
            Err(SessionError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn complete_returns_location_and_rejects_reuse() {
        let (c, storage, _dir) = coordinator().await;
        let upload = c.initiate("1_my photo.png", "image/png").await.unwrap();
        c.generate_part_urls("1_my photo.png", &upload.upload_id, "image/png", 2)
            .await
            .unwrap();
        put(&storage, &upload.upload_id, 1, b"abc").await;
        put(&storage, &upload.upload_id, 2, b"de").await;

        let done = c.complete("1_my photo.png", &upload.upload_id).await.unwrap();
        assert_eq!(done.location, "http://files.test/storage/objects/1_my%20photo.png");
        assert_eq!(done.size, 5);
        assert_eq!(done.key, "1_my photo.png");

        assert!(matches!(
            c.complete("1_my photo.png", &upload.upload_id).await,
            Err(SessionError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_completions_yield_one_location_and_one_invalid_session() {
        let (c, storage, _dir) = coordinator().await;
        let upload = c.initiate("1_big.bin", "application/octet-stream").await.unwrap();
        c.generate_part_urls("1_big.bin", &upload.upload_id, "", 100)
            .await
            .unwrap();
        for n in 1..=100 {
            put(&storage, &upload.upload_id, n, b"part").await;
        }

        let (a, b) = tokio::join!(
            c.complete("1_big.bin", &upload.upload_id),
            c.complete("1_big.bin", &upload.upload_id)
        );
        let (done, refused) = match (a, b) {
            (Ok(done), Err(err)) | (Err(err), Ok(done)) => (done, err),
            other => panic!("expected exactly one completion, got {:?}", other),
        };
        assert_eq!(done.size, 400);
        assert!(
            matches!(refused, SessionError::InvalidSession { .. }),
            "unexpected error: {:?}",
            refused
        );
    }

    #[tokio::test]
    async fn complete_with_missing_parts_is_incomplete() {
        let (c, storage, _dir) = coordinator().await;
        let upload = c.initiate("1_a.bin", "application/octet-stream").await.unwrap();
        c.generate_part_urls("1_a.bin", &upload.upload_id, "", 3)
            .await
            .unwrap();
        put(&storage, &upload.upload_id, 1, b"a").await;

        match c.complete("1_a.bin", &upload.upload_id).await {
            Err(SessionError::IncompleteUpload { missing, .. }) => assert_eq!(missing, vec![2, 3]),
            other => panic!("expected IncompleteUpload, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn abort_makes_session_unknown() {
        let (c, _, _dir) = coordinator().await;
        let upload = c.initiate("1_a.bin", "application/octet-stream").await.unwrap();
        c.abort("1_a.bin", &upload.upload_id).await.unwrap();

        assert!(matches!(
            c.complete("1_a.bin", &upload.upload_id).await,
            Err(SessionError::InvalidSession { .. })
        ));
    }
}
