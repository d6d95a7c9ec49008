//! Chunked upload client.
//!
//! Splits an in-memory file into fixed-size parts, obtains presigned URLs
//! for them from the coordinator, PUTs every part straight to storage in
//! parallel, and asks the coordinator to assemble the result.

pub mod api;
pub mod chunking;
pub mod progress;
pub mod source;
pub mod uploader;

pub use api::{ApiError, CoordinatorClient};
pub use chunking::{CHUNK_SIZE, PartRange, object_key_for, part_count, part_ranges};
pub use progress::UploadProgress;
pub use source::SourceFile;
pub use uploader::{ChunkedUploader, UploadError, UploaderConfig};
