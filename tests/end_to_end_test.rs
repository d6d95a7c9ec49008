//! The chunked uploader driving a real coordinator and object store.

mod common;

use chunked_upload::client::{ChunkedUploader, SourceFile, UploadError, UploaderConfig};
use common::{TestServer, mint_token, patterned_bytes};
use reqwest::StatusCode;

fn uploader_for(server: &TestServer, token: String, chunk_size: u64) -> ChunkedUploader {
    let mut config = UploaderConfig::new(server.api_url(), token);
    config.chunk_size = chunk_size;
    ChunkedUploader::new(config).unwrap()
}

#[tokio::test]
async fn uploaded_file_is_served_back_intact() {
    let server = TestServer::start().await;
    let data = patterned_bytes(10_000);
    let file = SourceFile::new("holiday photo.jpg", "image/jpeg", data.clone());

    let uploader = uploader_for(&server, mint_token("alice"), 4096);
    let progress = uploader.progress();
    let location = uploader.upload(Some(&file)).await.unwrap();

    assert!(location.starts_with(&format!("{}/storage/objects/", server.base_url())));
    assert!(location.ends_with("_holiday%20photo.jpg"), "{location}");
    assert_eq!(*progress.borrow(), 100);

    let resp = server.client.get(&location).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "image/jpeg");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), data.as_slice());
}

#[tokio::test]
async fn single_part_file_round_trips() {
    let server = TestServer::start().await;
    let file = SourceFile::new("tiny.txt", "text/plain", b"hello".to_vec());

    let location = uploader_for(&server, mint_token("bob"), 4096)
        .upload_or_none(Some(&file))
        .await
        .expect("upload succeeds");

    let body = server
        .client
        .get(&location)
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello");
}

#[tokio::test]
async fn rejected_token_fails_at_initiation() {
    let server = TestServer::start().await;
    let file = SourceFile::new("tiny.txt", "text/plain", b"hello".to_vec());

    let err = uploader_for(&server, "bogus".into(), 4096)
        .upload(Some(&file))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::InitiationFailed(_)));
}
