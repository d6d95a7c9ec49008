//! Represents multipart upload sessions and parts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Lifecycle of an upload session.
///
/// There is no aborted state: an aborted session is deleted outright, and a
/// session that is never completed simply stays `Open`. `Completing` is held
/// only while one completion assembles the parts.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum UploadState {
    Open,
    Completing,
    Completed,
}

/// A multipart upload session, initiated before uploading large files in parts.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartUpload {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Opaque upload ID returned to the client.
    pub upload_id: String,

    /// Key the assembled object will be stored under. Never changes.
    pub object_key: String,

    /// MIME type given at initiation; every part must be sent with it.
    pub content_type: String,

    /// Number of parts, recorded when part URLs are issued.
    pub part_count: Option<i64>,

    pub state: UploadState,

    /// Timestamp when upload was initiated.
    pub initiated_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

impl MultipartUpload {
    pub fn is_open(&self) -> bool {
        self.state == UploadState::Open
    }
}

/// Represents a single uploaded part in a multipart upload session.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct MultipartPart {
    /// Parent upload session.
    pub upload_id: String,

    /// Part number (1-based).
    pub part_number: i64,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 of the part payload, hex encoded.
    pub etag: String,

    /// Timestamp when this part was uploaded.
    pub uploaded_at: DateTime<Utc>,
}
