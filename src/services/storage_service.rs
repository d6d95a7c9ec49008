//! src/services/storage_service.rs
//!
//! StorageService: the object store that part uploads land in. Multipart
//! session metadata lives in SQLite; part payloads are written beneath
//! `base_path/.multipart/{upload_id}/{part_number}` and assembled objects are
//! sharded beneath `base_path/{shard}/{shard}/{key}`.

use crate::models::{
    multipart::{MultipartPart, MultipartUpload, UploadState},
    object::Object,
};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use sqlx::SqlitePool;
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Largest single part accepted (5 GiB, the usual object-store ceiling).
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Largest number of parts a single upload may be split into.
pub const MAX_PARTS: u32 = 10_000;

const MAX_OBJECT_KEY_LEN: usize = 1024;
const MULTIPART_DIR: &str = ".multipart";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

const UPLOAD_COLUMNS: &str = "id, upload_id, object_key, content_type, part_count, state, \
                              initiated_at, completed_at";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("upload `{0}` not found")]
    UploadNotFound(String),
    #[error("upload `{0}` is already completed")]
    UploadCompleted(String),
    #[error("part count for upload `{0}` is already set")]
    PartCountAlreadySet(String),
    #[error("part count for upload `{0}` has not been set")]
    PartCountUnset(String),
    #[error("part count {0} must be between 1 and {max}", max = MAX_PARTS)]
    InvalidPartCount(u32),
    #[error("part {part_number} is outside 1..={part_count}")]
    PartOutOfRange { part_number: u32, part_count: i64 },
    #[error("part exceeds the maximum size of {max} bytes", max = MAX_PART_SIZE)]
    PartTooLarge,
    #[error("upload `{upload_id}` is missing parts {missing:?}")]
    IncompleteUpload { upload_id: String, missing: Vec<u32> },
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("invalid object key")]
    InvalidObjectKey,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// StorageService provides the multipart operations a client-driven upload
/// needs:
/// - Create a multipart upload session
/// - Store individual parts as they arrive
/// - Assemble all parts into a single object on completion
/// - Abort a session and discard its parts
/// - Read completed objects back
#[derive(Clone)]
pub struct StorageService {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where part and object payloads are stored.
    pub base_path: PathBuf,
}

impl StorageService {
    /// Create a new StorageService backed by the provided SQLite pool and
    /// using `base_path` as the root directory for payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    ///
    /// Rejects empty or overlong keys, keys containing `..`, backslashes or
    /// control characters, and keys with an empty or `.` path segment (which
    /// covers leading, trailing and doubled `/`). Every accepted key maps to a
    /// regular file and survives URL path normalization unchanged.
    pub fn ensure_key_safe(key: &str) -> StorageResult<()> {
        if key.is_empty() || key.len() > MAX_OBJECT_KEY_LEN {
            return Err(StorageError::InvalidObjectKey);
        }
        if key.contains("..") {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .split('/')
            .any(|segment| segment.is_empty() || segment == ".")
        {
            return Err(StorageError::InvalidObjectKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectKey);
        }
        Ok(())
    }

    /// Generate two-level shard identifiers for an object key.
    ///
    /// Uses MD5(key) and returns the first two bytes as lowercase hex.
    fn object_shards(key: &str) -> (String, String) {
        let digest = md5::compute(key);
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path for an assembled object.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Directory holding the parts of one upload session.
    fn parts_dir(&self, upload_id: &str) -> PathBuf {
        self.base_path.join(MULTIPART_DIR).join(upload_id)
    }

    fn part_path(&self, upload_id: &str, part_number: u32) -> PathBuf {
        self.parts_dir(upload_id).join(format!("{:05}", part_number))
    }

    /// Start a new multipart upload for `key`.
    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> StorageResult<MultipartUpload> {
        Self::ensure_key_safe(key)?;

        let upload = MultipartUpload {
            id: Uuid::new_v4(),
            upload_id: Uuid::new_v4().simple().to_string(),
            object_key: key.to_string(),
            content_type: content_type.to_string(),
            part_count: None,
            state: UploadState::Open,
            initiated_at: Utc::now(),
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO multipart_uploads
                 (id, upload_id, object_key, content_type, part_count, state, initiated_at, completed_at)
             VALUES (?, ?, ?, ?, NULL, 'OPEN', ?, NULL)",
        )
        .bind(upload.id)
        .bind(&upload.upload_id)
        .bind(&upload.object_key)
        .bind(&upload.content_type)
        .bind(upload.initiated_at)
        .execute(&*self.db)
        .await?;

        info!(upload_id = %upload.upload_id, key, "created multipart upload");
        Ok(upload)
    }

    /// Fetch an upload session regardless of its state.
    pub async fn fetch_upload(&self, upload_id: &str) -> StorageResult<MultipartUpload> {
        sqlx::query_as::<_, MultipartUpload>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM multipart_uploads WHERE upload_id = ?"
        ))
        .bind(upload_id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::UploadNotFound(upload_id.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    async fn fetch_open_upload(&self, upload_id: &str) -> StorageResult<MultipartUpload> {
        let upload = self.fetch_upload(upload_id).await?;
        if !upload.is_open() {
            return Err(StorageError::UploadCompleted(upload_id.to_string()));
        }
        Ok(upload)
    }

    /// Record how many parts the upload consists of. Can only happen once.
    pub async fn set_part_count(
        &self,
        upload_id: &str,
        part_count: u32,
    ) -> StorageResult<MultipartUpload> {
        if part_count == 0 || part_count > MAX_PARTS {
            return Err(StorageError::InvalidPartCount(part_count));
        }
        let mut upload = self.fetch_open_upload(upload_id).await?;
        if upload.part_count.is_some() {
            return Err(StorageError::PartCountAlreadySet(upload_id.to_string()));
        }

        let result = sqlx::query(
            "UPDATE multipart_uploads SET part_count = ?
             WHERE upload_id = ? AND state = 'OPEN' AND part_count IS NULL",
        )
        .bind(i64::from(part_count))
        .bind(upload_id)
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::PartCountAlreadySet(upload_id.to_string()));
        }

        upload.part_count = Some(i64::from(part_count));
        Ok(upload)
    }

    /// Stream one part to disk and record it.
    ///
    /// - Writes to a temporary file while computing size and MD5.
    /// - fsyncs and renames into the part slot, replacing any earlier attempt.
    /// - Upserts the part row.
    pub async fn put_part<S>(
        &self,
        upload_id: &str,
        part_number: u32,
        stream: S,
    ) -> StorageResult<MultipartPart>
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        let upload = self.fetch_open_upload(upload_id).await?;
        let part_count = upload
            .part_count
            .ok_or_else(|| StorageError::PartCountUnset(upload_id.to_string()))?;
        if part_number == 0 || i64::from(part_number) > part_count {
            return Err(StorageError::PartOutOfRange {
                part_number,
                part_count,
            });
        }

        let dir = self.parts_dir(upload_id);
        fs::create_dir_all(&dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let (size_bytes, digest) = write_stream_to_file(&tmp_path, stream).await?;

        let part_path = self.part_path(upload_id, part_number);
        replace_file(&tmp_path, &part_path).await?;

        let etag = format!("{:x}", digest);
        let part = self
            .record_part(upload_id, part_number, size_bytes, &etag)
            .await;
        match part {
            Ok(part) => {
                debug!(upload_id, part_number, size_bytes, "stored part");
                Ok(part)
            }
            Err(err) => {
                // the session was completed or aborted while the body streamed in
                self.discard_part_file(upload_id, &part_path).await;
                Err(err)
            }
        }
    }

    /// Upsert the part row, but only while the session is still OPEN.
    async fn record_part(
        &self,
        upload_id: &str,
        part_number: u32,
        size_bytes: i64,
        etag: &str,
    ) -> StorageResult<MultipartPart> {
        let part = sqlx::query_as::<_, MultipartPart>(
            r#"
            INSERT INTO multipart_parts (upload_id, part_number, size_bytes, etag, uploaded_at)
            SELECT ?, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM multipart_uploads WHERE upload_id = ? AND state = 'OPEN'
            )
            ON CONFLICT(upload_id, part_number) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                uploaded_at = excluded.uploaded_at
            RETURNING upload_id, part_number, size_bytes, etag, uploaded_at
            "#,
        )
        .bind(upload_id)
        .bind(i64::from(part_number))
        .bind(size_bytes)
        .bind(etag)
        .bind(Utc::now())
        .bind(upload_id)
        .fetch_optional(&*self.db)
        .await?;

        match part {
            Some(part) => Ok(part),
            None => {
                // tell a deleted session apart from one that left OPEN
                self.fetch_open_upload(upload_id).await?;
                Err(StorageError::UploadCompleted(upload_id.to_string()))
            }
        }
    }

    /// Remove a part payload that has no row, and its directory once the
    /// session no longer exists.
    async fn discard_part_file(&self, upload_id: &str, part_path: &Path) {
        if let Err(err) = fs::remove_file(part_path).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove part {}: {}", part_path.display(), err);
            }
        }
        match self.fetch_upload(upload_id).await {
            Ok(upload) if upload.is_open() => {}
            _ => self.remove_parts_dir(upload_id).await,
        }
    }

    /// List recorded parts in part-number order.
    pub async fn list_parts(&self, upload_id: &str) -> StorageResult<Vec<MultipartPart>> {
        let parts = sqlx::query_as::<_, MultipartPart>(
            "SELECT upload_id, part_number, size_bytes, etag, uploaded_at
             FROM multipart_parts WHERE upload_id = ? ORDER BY part_number ASC",
        )
        .bind(upload_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(parts)
    }

    /// Assemble every part into the final object.
    ///
    /// - Claims the session (`OPEN` to `COMPLETING`) so only one caller assembles it.
    /// - Requires parts `1..=part_count` to all be present.
    /// - Concatenates them in order into a temp file, then renames it into place.
    /// - Upserts the object row and marks the session completed in one transaction.
    /// - Removes the part payloads best-effort.
    ///
    /// On failure the claim is released and the session is `OPEN` again.
    pub async fn complete_multipart_upload(&self, upload_id: &str) -> StorageResult<Object> {
        let upload = self.fetch_open_upload(upload_id).await?;
        let part_count = upload
            .part_count
            .ok_or_else(|| StorageError::PartCountUnset(upload_id.to_string()))?;

        let claimed = sqlx::query(
            "UPDATE multipart_uploads SET state = 'COMPLETING'
             WHERE upload_id = ? AND state = 'OPEN'",
        )
        .bind(upload_id)
        .execute(&*self.db)
        .await?;
        if claimed.rows_affected() == 0 {
            return Err(StorageError::UploadCompleted(upload_id.to_string()));
        }

        match self.assemble_claimed(&upload, part_count).await {
            Ok(object) => Ok(object),
            Err(err) => {
                self.release_claim(upload_id).await;
                Err(err)
            }
        }
    }

    async fn release_claim(&self, upload_id: &str) {
        let released = sqlx::query(
            "UPDATE multipart_uploads SET state = 'OPEN'
             WHERE upload_id = ? AND state = 'COMPLETING'",
        )
        .bind(upload_id)
        .execute(&*self.db)
        .await;
        if let Err(err) = released {
            warn!(upload_id, error = %err, "failed to reopen upload after failed completion");
        }
    }

    async fn assemble_claimed(
        &self,
        upload: &MultipartUpload,
        part_count: i64,
    ) -> StorageResult<Object> {
        let upload_id = upload.upload_id.as_str();
        let parts = self.list_parts(upload_id).await?;
        let present: BTreeSet<i64> = parts.iter().map(|p| p.part_number).collect();
        let missing: Vec<u32> = (1..=part_count)
            .filter(|n| !present.contains(n))
            .filter_map(|n| u32::try_from(n).ok())
            .collect();
        if !missing.is_empty() {
            return Err(StorageError::IncompleteUpload {
                upload_id: upload_id.to_string(),
                missing,
            });
        }

        let file_path = self.object_path(&upload.object_key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let (size_bytes, etag) = match self.assemble_parts(upload_id, &parts, &tmp_path).await {
            Ok(assembled) => assembled,
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(err);
            }
        };
        replace_file(&tmp_path, &file_path).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let flipped = sqlx::query(
            "UPDATE multipart_uploads SET state = 'COMPLETED', completed_at = ?
             WHERE upload_id = ? AND state = 'COMPLETING'",
        )
        .bind(now)
        .bind(upload_id)
        .execute(&mut *tx)
        .await?;
        if flipped.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::UploadCompleted(upload_id.to_string()));
        }

        let object = sqlx::query_as::<_, Object>(
            r#"
            INSERT INTO objects (id, key, content_type, size_bytes, etag, last_modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING id, key, content_type, size_bytes, etag, last_modified
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&upload.object_key)
        .bind(Some(upload.content_type.clone()))
        .bind(size_bytes)
        .bind(&etag)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        self.remove_parts_dir(upload_id).await;
        info!(
            upload_id,
            key = %object.key,
            size_bytes,
            parts = parts.len(),
            "completed multipart upload"
        );
        Ok(object)
    }

    /// Concatenate parts into `dest`, returning the total size and multipart ETag.
    async fn assemble_parts(
        &self,
        upload_id: &str,
        parts: &[MultipartPart],
        dest: &Path,
    ) -> StorageResult<(i64, String)> {
        let mut out = File::create(dest).await?;
        let mut composite = Context::new();
        let mut size_bytes: i64 = 0;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];

        for part in parts {
            let part_number = u32::try_from(part.part_number).map_err(|_| {
                StorageError::Io(io::Error::new(ErrorKind::InvalidData, "bad part number"))
            })?;
            let mut input = File::open(self.part_path(upload_id, part_number)).await?;
            let mut part_digest = Context::new();
            loop {
                let n = input.read(&mut buf).await?;
                if n == 0 {
                    break;
                }
                part_digest.consume(&buf[..n]);
                out.write_all(&buf[..n]).await?;
                size_bytes += n as i64;
            }
            composite.consume(part_digest.compute().0);
        }

        out.flush().await?;
        out.sync_all().await?;

        let etag = format!("{:x}-{}", composite.compute(), parts.len());
        Ok((size_bytes, etag))
    }

    /// Discard an open upload and its parts.
    pub async fn abort_multipart_upload(&self, upload_id: &str) -> StorageResult<()> {
        self.fetch_open_upload(upload_id).await?;

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM multipart_parts WHERE upload_id = ?")
            .bind(upload_id)
            .execute(&mut *tx)
            .await?;
        let deleted =
            sqlx::query("DELETE FROM multipart_uploads WHERE upload_id = ? AND state = 'OPEN'")
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(StorageError::UploadCompleted(upload_id.to_string()));
        }
        tx.commit().await?;

        self.remove_parts_dir(upload_id).await;
        info!(upload_id, "aborted multipart upload");
        Ok(())
    }

    async fn remove_parts_dir(&self, upload_id: &str) {
        let dir = self.parts_dir(upload_id);
        if let Err(err) = fs::remove_dir_all(&dir).await {
            if err.kind() != ErrorKind::NotFound {
                debug!("failed to remove part directory {}: {}", dir.display(), err);
            }
        }
    }

    /// Fetch only object metadata.
    pub async fn get_object_metadata(&self, key: &str) -> StorageResult<Object> {
        Self::ensure_key_safe(key)?;
        sqlx::query_as::<_, Object>(
            "SELECT id, key, content_type, size_bytes, etag, last_modified
             FROM objects WHERE key = ?",
        )
        .bind(key)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound(key.to_string()),
            other => StorageError::Sqlx(other),
        })
    }

    /// Fetch an object for reading.
    ///
    /// Returns ObjectNotFound if metadata exists but the payload is missing.
    pub async fn get_object_reader(&self, key: &str) -> StorageResult<(Object, File)> {
        let object = self.get_object_metadata(key).await?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::ObjectNotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok((object, file))
    }
}

/// Drain `stream` into a new file at `path`, returning its size and MD5.
///
/// The file is fsynced on success and removed on any failure.
async fn write_stream_to_file<S>(path: &Path, stream: S) -> StorageResult<(i64, md5::Digest)>
where
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let mut file = File::create(path).await?;
    let mut size_bytes: u64 = 0;
    let mut digest = Context::new();

    pin_mut!(stream);
    while let Some(chunk_res) = stream.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                let _ = fs::remove_file(path).await;
                return Err(StorageError::Io(err));
            }
        };
        size_bytes += chunk.len() as u64;
        if size_bytes > MAX_PART_SIZE {
            let _ = fs::remove_file(path).await;
            return Err(StorageError::PartTooLarge);
        }
        digest.consume(&chunk);
        if let Err(err) = file.write_all(&chunk).await {
            let _ = fs::remove_file(path).await;
            return Err(StorageError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        let _ = fs::remove_file(path).await;
        return Err(StorageError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        let _ = fs::remove_file(path).await;
        return Err(StorageError::Io(err));
    }

    Ok((size_bytes as i64, digest.compute()))
}

/// Rename `tmp` over `dest`, cleaning up `tmp` if the rename fails.
async fn replace_file(tmp: &Path, dest: &Path) -> StorageResult<()> {
    if let Err(err) = fs::rename(tmp, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp, dest).await?;
        } else {
            let _ = fs::remove_file(tmp).await;
            return Err(StorageError::Io(err));
        }
    }
    Ok(())
}
