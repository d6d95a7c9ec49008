//! HTTP client for the coordinator endpoints and presigned part PUTs.

use bytes::Bytes;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Whether sending the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Transport(_) => true,
            ApiError::Status { status, .. } => {
                status.is_server_error()
                    || *status == StatusCode::TOO_MANY_REQUESTS
                    || *status == StatusCode::REQUEST_TIMEOUT
            }
            ApiError::Malformed(_) => false,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InitiateBody<'a> {
    file_name: &'a str,
    filetype: &'a str,
}

#[derive(Deserialize)]
struct InitiateResponse {
    response: InitiatedUpload,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiatedUpload {
    upload_id: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresignBody<'a> {
    file_name: &'a str,
    upload_id: &'a str,
    filetype: &'a str,
    num_chunks: u32,
}

#[derive(Deserialize)]
struct PresignResponse {
    urls: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionBody<'a> {
    file_name: &'a str,
    upload_id: &'a str,
}

#[derive(Deserialize)]
struct CompleteResponse {
    success: bool,
    #[serde(default)]
    data: Option<CompleteData>,
}

#[derive(Deserialize)]
struct CompleteData {
    #[serde(rename = "Location")]
    location: Option<String>,
}

/// Talks to the coordinator on behalf of one caller.
///
/// Coordinator calls carry the bearer token; part PUTs go straight to the
/// presigned URL and carry nothing but the content type and bytes.
#[derive(Clone)]
pub struct CoordinatorClient {
    http: Client,
    base_url: String,
    token: String,
}

impl CoordinatorClient {
    pub fn new(http: Client, base_url: &str, token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn build_url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.build_url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ApiError::Status { status, body });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Malformed(e.to_string()))
    }

    /// Open a session; returns the upload id.
    pub async fn initiate(&self, file_name: &str, content_type: &str) -> Result<String, ApiError> {
        let resp: InitiateResponse = self
            .post_json(
                "/upload/initiate-upload",
                &InitiateBody {
                    file_name,
                    filetype: content_type,
                },
            )
            .await?;
        Ok(resp.response.upload_id)
    }

    /// Fetch one URL per part. Index `i` of the result is part `i + 1`.
    pub async fn generate_part_urls(
        &self,
        file_name: &str,
        upload_id: &str,
        content_type: &str,
        num_chunks: u32,
    ) -> Result<Vec<String>, ApiError> {
        let resp: PresignResponse = self
            .post_json(
                "/upload/generate-presigned-url",
                &PresignBody {
                    file_name,
                    upload_id,
                    filetype: content_type,
                    num_chunks,
                },
            )
            .await?;

        if resp.urls.len() != num_chunks as usize {
            return Err(ApiError::Malformed(format!(
                "expected {} part URLs, got {}",
                num_chunks,
                resp.urls.len()
            )));
        }
        Ok(resp.urls)
    }

    /// PUT one part to its presigned URL; returns the ETag storage reported.
    pub async fn put_part(
        &self,
        url: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<Option<String>, ApiError> {
        let response = self
            .http
            .put(url)
            .header(header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Status { status, body });
        }

        Ok(response
            .headers()
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string()))
    }

    /// Finalize the session; returns the object's location.
    pub async fn complete(&self, file_name: &str, upload_id: &str) -> Result<String, ApiError> {
        let resp: CompleteResponse = self
            .post_json(
                "/upload/complete-upload",
                &SessionBody {
                    file_name,
                    upload_id,
                },
            )
            .await?;

        match resp.data.and_then(|d| d.location) {
            Some(location) if resp.success => Ok(location),
            _ => Err(ApiError::Malformed(
                "completion did not report success and a Location".to_string(),
            )),
        }
    }

    /// Ask the coordinator to discard the session and its parts.
    pub async fn abort(&self, file_name: &str, upload_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .post_json(
                "/upload/abort-upload",
                &SessionBody {
                    file_name,
                    upload_id,
                },
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_transient_failures_are_retryable() {
        let status = |code: u16| ApiError::Status {
            status: StatusCode::from_u16(code).unwrap(),
            body: String::new(),
        };
        assert!(status(500).is_retryable());
        assert!(status(503).is_retryable());
        assert!(status(429).is_retryable());
        assert!(!status(403).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!ApiError::Malformed("x".into()).is_retryable());
    }
}
