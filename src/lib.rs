//! Client-driven chunked uploads through presigned URLs.
//!
//! The server half (`services`, `handlers`, `routes`) coordinates multipart
//! upload sessions in front of a local object store. The client half
//! (`client`) splits a file into parts and drives a session end to end.

pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
