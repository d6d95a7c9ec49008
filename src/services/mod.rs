pub mod presign;
pub mod storage_service;
pub mod upload_service;
