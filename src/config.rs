use crate::services::presign::MAX_PRESIGN_TTL;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Base URL clients use to reach this server; presigned part URLs and
    /// object locations are built from it.
    pub public_url: String,
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,
    pub presign_secret: String,
    pub presign_ttl: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Chunked upload coordinator and object store")]
pub struct Args {
    /// Host to bind to (overrides CHUNKED_UPLOAD_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CHUNKED_UPLOAD_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where parts and objects are stored (overrides CHUNKED_UPLOAD_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides CHUNKED_UPLOAD_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Externally reachable base URL (overrides CHUNKED_UPLOAD_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,

    /// Secret used to verify bearer tokens (overrides CHUNKED_UPLOAD_JWT_SECRET)
    #[arg(long)]
    pub jwt_secret: Option<String>,

    /// Required `iss` claim on bearer tokens (overrides CHUNKED_UPLOAD_JWT_ISSUER)
    #[arg(long)]
    pub jwt_issuer: Option<String>,

    /// Secret used to sign part URLs (overrides CHUNKED_UPLOAD_PRESIGN_SECRET)
    #[arg(long)]
    pub presign_secret: Option<String>,

    /// Lifetime of presigned part URLs in seconds (overrides CHUNKED_UPLOAD_PRESIGN_TTL_SECS)
    #[arg(long)]
    pub presign_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::from_args(args)?, migrate))
    }

    /// Merge already-parsed CLI args over the environment.
    pub fn from_args(args: Args) -> Result<Self> {
        let host = args
            .host
            .unwrap_or_else(|| env_or("CHUNKED_UPLOAD_HOST", "0.0.0.0"));
        let port = match args.port {
            Some(port) => port,
            None => env_parse("CHUNKED_UPLOAD_PORT", 3000)?,
        };
        let storage_dir = args
            .storage_dir
            .unwrap_or_else(|| env_or("CHUNKED_UPLOAD_STORAGE_DIR", "./data/objects"));
        let database_url = args.database_url.unwrap_or_else(|| {
            env_or(
                "CHUNKED_UPLOAD_DATABASE_URL",
                "sqlite://./data/meta/uploads.db",
            )
        });
        let public_url = args
            .public_url
            .or_else(|| env::var("CHUNKED_UPLOAD_PUBLIC_URL").ok())
            .unwrap_or_else(|| default_public_url(&host, port));

        let jwt_secret = match args
            .jwt_secret
            .or_else(|| env::var("CHUNKED_UPLOAD_JWT_SECRET").ok())
        {
            Some(secret) if !secret.is_empty() => secret,
            _ => bail!("a JWT secret is required (--jwt-secret or CHUNKED_UPLOAD_JWT_SECRET)"),
        };
        let jwt_issuer = args
            .jwt_issuer
            .or_else(|| env::var("CHUNKED_UPLOAD_JWT_ISSUER").ok());
        let presign_secret = args
            .presign_secret
            .or_else(|| env::var("CHUNKED_UPLOAD_PRESIGN_SECRET").ok())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| jwt_secret.clone());
        let presign_ttl_secs = match args.presign_ttl_secs {
            Some(secs) => secs,
            None => env_parse("CHUNKED_UPLOAD_PRESIGN_TTL_SECS", 900)?,
        };
        if presign_ttl_secs == 0 || presign_ttl_secs > MAX_PRESIGN_TTL.as_secs() {
            bail!(
                "presign TTL must be between 1 and {} seconds, got {}",
                MAX_PRESIGN_TTL.as_secs(),
                presign_ttl_secs
            );
        }

        Ok(Self {
            host,
            port,
            storage_dir,
            database_url,
            public_url,
            jwt_secret,
            jwt_issuer,
            presign_secret,
            presign_ttl: Duration::from_secs(presign_ttl_secs),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Wildcard bind addresses are not reachable, so point clients at loopback.
fn default_public_url(host: &str, port: u16) -> String {
    let host = match host {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    format!("http://{}:{}", host, port)
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_parse<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_hosts_map_to_loopback() {
        assert_eq!(default_public_url("0.0.0.0", 3000), "http://127.0.0.1:3000");
        assert_eq!(default_public_url("::", 8080), "http://127.0.0.1:8080");
        assert_eq!(
            default_public_url("files.internal", 80),
            "http://files.internal:80"
        );
    }

    #[test]
    fn cli_args_take_precedence() {
        let cfg = AppConfig::from_args(Args {
            host: Some("127.0.0.1".into()),
            port: Some(4000),
            storage_dir: Some("/tmp/objects".into()),
            database_url: Some("sqlite::memory:".into()),
            public_url: Some("https://uploads.example.com".into()),
            jwt_secret: Some("jwt".into()),
            jwt_issuer: None,
            presign_secret: Some("presign".into()),
            presign_ttl_secs: Some(60),
            migrate: false,
        })
        .unwrap();

        assert_eq!(cfg.addr(), "127.0.0.1:4000");
        assert_eq!(cfg.public_url, "https://uploads.example.com");
        assert_eq!(cfg.presign_secret, "presign");
        assert_eq!(cfg.presign_ttl, Duration::from_secs(60));
    }

    #[test]
    fn presign_ttl_is_bounded() {
        let args = |ttl| Args {
            jwt_secret: Some("jwt".into()),
            presign_ttl_secs: Some(ttl),
            ..Args::default()
        };
        assert!(AppConfig::from_args(args(u64::MAX)).is_err());
        assert!(AppConfig::from_args(args(MAX_PRESIGN_TTL.as_secs() + 1)).is_err());
        assert!(AppConfig::from_args(args(0)).is_err());
        assert_eq!(
            AppConfig::from_args(args(MAX_PRESIGN_TTL.as_secs()))
                .unwrap()
                .presign_ttl,
            MAX_PRESIGN_TTL
        );
    }
}
