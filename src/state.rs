//! Shared state handed to every handler.

use crate::{
    auth::JwtVerifier,
    services::{
        presign::Presigner, storage_service::StorageService, upload_service::UploadCoordinator,
    },
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: StorageService,
    pub presigner: Presigner,
    pub uploads: UploadCoordinator,
    pub verifier: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(
        storage: StorageService,
        presigner: Presigner,
        public_url: &str,
        verifier: JwtVerifier,
    ) -> Self {
        let uploads = UploadCoordinator::new(storage.clone(), presigner.clone(), public_url);
        Self {
            storage,
            presigner,
            uploads,
            verifier: Arc::new(verifier),
        }
    }
}
