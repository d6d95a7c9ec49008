//! Command-line chunked upload client.

use anyhow::{Context, Result, bail};
use chunked_upload::client::{ChunkedUploader, SourceFile, UploaderConfig};
use clap::Parser;
use std::{env, path::PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Upload a file in parts through presigned URLs")]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Coordinator API base, e.g. http://localhost:3000/api (overrides CHUNKED_UPLOAD_API_URL)
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token (overrides CHUNKED_UPLOAD_TOKEN)
    #[arg(long)]
    token: Option<String>,

    /// MIME type sent for the object and every part
    #[arg(long, default_value = "application/octet-stream")]
    content_type: String,

    /// Retries per part after a transient failure
    #[arg(long, default_value_t = 2)]
    part_retries: u32,

    /// Upper bound on parts in flight at once (default: all)
    #[arg(long)]
    max_concurrent_parts: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let api_url = args
        .api_url
        .or_else(|| env::var("CHUNKED_UPLOAD_API_URL").ok())
        .unwrap_or_else(|| "http://127.0.0.1:3000/api".into());
    let token = match args.token.or_else(|| env::var("CHUNKED_UPLOAD_TOKEN").ok()) {
        Some(token) if !token.is_empty() => token,
        _ => bail!("a bearer token is required (--token or CHUNKED_UPLOAD_TOKEN)"),
    };

    let file = SourceFile::from_path(&args.file, &args.content_type)
        .await
        .with_context(|| format!("reading {}", args.file.display()))?;

    let mut config = UploaderConfig::new(api_url, token);
    config.part_retries = args.part_retries;
    config.max_concurrent_parts = args.max_concurrent_parts;
    let uploader = ChunkedUploader::new(config).context("configuring uploader")?;

    let mut progress = uploader.progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let percent = *progress.borrow_and_update();
            eprintln!("{}%", percent);
        }
    });

    let result = uploader.upload(Some(&file)).await;
    drop(uploader);
    let _ = reporter.await;

    let location = result.context("Failed to upload file")?;
    println!("{}", location);
    Ok(())
}
