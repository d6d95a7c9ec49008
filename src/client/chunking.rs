//! Splitting a file into upload parts.

/// Fixed part size used by the uploader (5 MiB).
pub const CHUNK_SIZE: u64 = 5 * 1024 * 1024;

/// One contiguous byte range of the source file, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub part_number: u32,
    pub start: u64,
    pub end: u64,
}

impl PartRange {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// `ceil(size / chunk_size)`.
pub fn part_count(size: u64, chunk_size: u64) -> u64 {
    assert!(chunk_size > 0, "chunk size must be positive");
    size.div_ceil(chunk_size)
}

/// Contiguous, non-overlapping ranges covering `0..size`, numbered from 1.
/// Every range is `chunk_size` long except possibly the last.
pub fn part_ranges(size: u64, chunk_size: u64) -> Vec<PartRange> {
    (0..part_count(size, chunk_size))
        .map(|i| {
            let start = i * chunk_size;
            PartRange {
                part_number: (i + 1) as u32,
                start,
                end: (start + chunk_size).min(size),
            }
        })
        .collect()
}

/// Storage key for an upload: the original name prefixed with a millisecond
/// timestamp so repeated uploads of the same file do not collide.
pub fn object_key_for(file_name: &str, millis: i64) -> String {
    format!("{}_{}", millis, file_name)
}
