//! Shared test infrastructure: a real server on an ephemeral port, backed by
//! in-memory SQLite and a temporary storage directory.

#![allow(dead_code)]

use chunked_upload::{
    auth::{Claims, JwtVerifier},
    db, routes,
    services::{presign::Presigner, storage_service::StorageService},
    state::AppState,
};
use jsonwebtoken::{EncodingKey, Header, encode};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Secret both for bearer tokens and presigned URLs in tests.
pub const JWT_SECRET: &str = "test-secret-key-for-jwt-tokens";

pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    _storage_dir: TempDir,
    _server_handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let storage_dir = tempfile::tempdir().expect("create storage dir");
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("local addr");
        let public_url = format!("http://{}", addr);

        let pool = db::connect("sqlite::memory:", 1)
            .await
            .expect("connect sqlite");
        db::run_migrations(&pool).await.expect("run migrations");

        let storage = StorageService::new(Arc::new(pool), storage_dir.path());
        let presigner = Presigner::new(JWT_SECRET, &public_url, Duration::from_secs(900));
        let verifier = JwtVerifier::new_hs256(JWT_SECRET);
        let app = routes::routes::routes(AppState::new(storage, presigner, &public_url, verifier));

        let server_handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("build client");

        Self {
            addr,
            client,
            _storage_dir: storage_dir,
            _server_handle: server_handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn api_url(&self) -> String {
        format!("{}/api", self.base_url())
    }

    /// POST a coordinator endpoint with a valid bearer token.
    pub async fn post_api(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.api_url(), path))
            .bearer_auth(mint_token("test-user"))
            .json(&body)
            .send()
            .await
            .expect("send coordinator request")
    }
}

/// HS256 token for `subject`, valid for an hour.
pub fn mint_token(subject: &str) -> String {
    let claims = Claims {
        sub: subject.to_string(),
        exp: (chrono::Utc::now().timestamp() + 3600) as usize,
        iat: Some(chrono::Utc::now().timestamp() as usize),
        iss: None,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("encode token")
}

/// Deterministic bytes so reassembly order is observable.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
