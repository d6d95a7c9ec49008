use crate::client::chunking::PartRange;
use bytes::Bytes;
use std::{io, path::Path};

/// A file held in memory, ready to be uploaded.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl SourceFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, naming it after its final path component.
    pub async fn from_path(path: impl AsRef<Path>, content_type: &str) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "path has no file name")
            })?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self::new(name, content_type, bytes))
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes of one part. Shares the underlying buffer.
    pub fn part(&self, range: &PartRange) -> Bytes {
        self.bytes.slice(range.start as usize..range.end as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::chunking::part_ranges;

    #[test]
    fn parts_reassemble_to_original() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let file = SourceFile::new("data.bin", "application/octet-stream", data.clone());

        let mut rebuilt = Vec::new();
        for range in part_ranges(file.len(), 3_000) {
            rebuilt.extend_from_slice(&file.part(&range));
        }
        assert_eq!(rebuilt, data);
    }

    #[tokio::test]
    async fn reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let file = SourceFile::from_path(&path, "text/plain").await.unwrap();
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.content_type, "text/plain");
        assert_eq!(file.len(), 5);
    }
}
