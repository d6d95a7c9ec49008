//! Coordinator endpoints: initiate, presign, complete and abort.
//!
//! All four sit behind bearer-token auth and speak the JSON shapes the
//! upload client expects (`fileName`, `uploadId`, `filetype`, `numChunks`).

use crate::{auth::AuthUser, errors::AppError, state::AppState};
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiateUploadReq {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub filetype: String,
}

#[derive(Debug, Serialize)]
pub struct InitiateUploadResp {
    pub response: InitiatedUpload,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatedUpload {
    pub upload_id: String,
    pub key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresignPartsReq {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub upload_id: String,
    #[serde(default)]
    pub filetype: String,
    pub num_chunks: u32,
}

#[derive(Debug, Serialize)]
pub struct PresignPartsResp {
    pub urls: Vec<String>,
}

/// Body shared by complete and abort.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReq {
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub upload_id: String,
}

/// `POST /upload/initiate-upload`
pub async fn initiate_upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<InitiateUploadReq>,
) -> Result<Json<InitiateUploadResp>, AppError> {
    let upload = state.uploads.initiate(&req.file_name, &req.filetype).await?;
    info!(
        subject = %user.subject,
        upload_id = %upload.upload_id,
        key = %upload.object_key,
        "initiated upload"
    );

    Ok(Json(InitiateUploadResp {
        response: InitiatedUpload {
            upload_id: upload.upload_id,
            key: upload.object_key,
        },
    }))
}

/// `POST /upload/generate-presigned-url`
pub async fn generate_presigned_urls(
    State(state): State<AppState>,
    Json(req): Json<PresignPartsReq>,
) -> Result<Json<PresignPartsResp>, AppError> {
    let urls = state
        .uploads
        .generate_part_urls(&req.file_name, &req.upload_id, &req.filetype, req.num_chunks)
        .await?;
    Ok(Json(PresignPartsResp { urls }))
}

/// `POST /upload/complete-upload`
pub async fn complete_upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SessionReq>,
) -> Result<Json<Value>, AppError> {
    let completed = state.uploads.complete(&req.file_name, &req.upload_id).await?;
    info!(
        subject = %user.subject,
        upload_id = %req.upload_id,
        location = %completed.location,
        "completed upload"
    );
    Ok(Json(json!({ "success": true, "data": completed })))
}

/// `POST /upload/abort-upload`
pub async fn abort_upload(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<SessionReq>,
) -> Result<Json<Value>, AppError> {
    state.uploads.abort(&req.file_name, &req.upload_id).await?;
    info!(subject = %user.subject, upload_id = %req.upload_id, "aborted upload");
    Ok(Json(json!({ "success": true })))
}
