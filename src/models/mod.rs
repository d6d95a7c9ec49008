//! Core data models for the chunked upload service.
//!
//! These entities describe multipart upload sessions, their parts and the
//! objects they assemble into. They map to SQLite tables via `sqlx::FromRow`
//! and serialize as JSON via `serde`.

pub mod multipart;
pub mod object;
