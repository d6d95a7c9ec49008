//! Presigned part URLs.
//!
//! A presigned URL lets a client PUT exactly one part of exactly one upload
//! without holding a bearer token. The capability is an HMAC-SHA256 over the
//! method, upload id, part number, content type and expiry, so a URL issued
//! for one session or part cannot be replayed against another.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// How long an issued part URL stays valid unless configured otherwise.
pub const DEFAULT_PRESIGN_TTL: Duration = Duration::from_secs(15 * 60);

/// Longest lifetime a part URL may be configured with (seven days).
pub const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PresignError {
    #[error("presigned URL has expired")]
    Expired,
    #[error("presigned URL signature does not match")]
    BadSignature,
}

#[derive(Clone)]
pub struct Presigner {
    secret: Vec<u8>,
    public_url: String,
    ttl: Duration,
}

impl Presigner {
    pub fn new(secret: impl AsRef<[u8]>, public_url: &str, ttl: Duration) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            public_url: public_url.trim_end_matches('/').to_string(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue the URL for one part. `now` is seconds since the Unix epoch.
    pub fn presign_part(
        &self,
        upload_id: &str,
        part_number: u32,
        content_type: &str,
        now: i64,
    ) -> String {
        let ttl = i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX);
        let expires = now.saturating_add(ttl);
        let signature = self.sign(upload_id, part_number, content_type, expires);
        format!(
            "{}/storage/uploads/{}/parts/{}?expires={}&signature={}",
            self.public_url, upload_id, part_number, expires, signature
        )
    }

    /// Check a part PUT against the signature it carries.
    pub fn verify(
        &self,
        upload_id: &str,
        part_number: u32,
        content_type: &str,
        expires: i64,
        signature: &str,
        now: i64,
    ) -> Result<(), PresignError> {
        if now > expires {
            return Err(PresignError::Expired);
        }
        let expected = self.sign(upload_id, part_number, content_type, expires);
        if expected.as_bytes().ct_eq(signature.as_bytes()).into() {
            Ok(())
        } else {
            Err(PresignError::BadSignature)
        }
    }

    fn sign(&self, upload_id: &str, part_number: u32, content_type: &str, expires: i64) -> String {
        let message = format!(
            "PUT\n{}\n{}\n{}\n{}",
            upload_id, part_number, content_type, expires
        );
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000;

    fn presigner() -> Presigner {
        Presigner::new("presign-secret", "http://localhost:3000/", DEFAULT_PRESIGN_TTL)
    }

    fn signature_of(url: &str) -> (i64, String) {
        let query = url.split_once('?').map(|(_, q)| q).unwrap();
        let mut expires = 0;
        let mut signature = String::new();
        for pair in query.split('&') {
            match pair.split_once('=') {
                Some(("expires", v)) => expires = v.parse().unwrap(),
                Some(("signature", v)) => signature = v.to_string(),
                _ => {}
            }
        }
        (expires, signature)
    }

    #[test]
    fn url_points_at_part_slot() {
        let url = presigner().presign_part("abc123", 2, "image/png", NOW);
        assert!(url.starts_with("http://localhost:3000/storage/uploads/abc123/parts/2?"));
        let (expires, _) = signature_of(&url);
        assert_eq!(expires, NOW + 900);
    }

    #[test]
    fn issued_url_verifies() {
        let p = presigner();
        let url = p.presign_part("abc123", 1, "image/png", NOW);
        let (expires, sig) = signature_of(&url);
        assert_eq!(p.verify("abc123", 1, "image/png", expires, &sig, NOW + 10), Ok(()));
    }

    #[test]
    fn url_is_scoped_to_part_session_and_type() {
        let p = presigner();
        let (expires, sig) = signature_of(&p.presign_part("abc123", 1, "image/png", NOW));

        assert_eq!(
            p.verify("abc123", 2, "image/png", expires, &sig, NOW),
            Err(PresignError::BadSignature)
        );
        assert_eq!(
            p.verify("other", 1, "image/png", expires, &sig, NOW),
            Err(PresignError::BadSignature)
        );
        assert_eq!(
            p.verify("abc123", 1, "text/plain", expires, &sig, NOW),
            Err(PresignError::BadSignature)
        );
        assert_eq!(
            p.verify("abc123", 1, "image/png", expires + 60, &sig, NOW),
            Err(PresignError::BadSignature)
        );
    }

    #[test]
    fn expired_url_is_rejected() {
        let p = presigner();
        let (expires, sig) = signature_of(&p.presign_part("abc123", 1, "image/png", NOW));
        assert_eq!(
            p.verify("abc123", 1, "image/png", expires, &sig, expires + 1),
            Err(PresignError::Expired)
        );
    }

    #[test]
    fn huge_ttl_saturates_instead_of_wrapping() {
        let p = Presigner::new("presign-secret", "http://localhost:3000", Duration::MAX);
        let (expires, sig) = signature_of(&p.presign_part("abc123", 1, "image/png", NOW));
        assert_eq!(expires, i64::MAX);
        assert_eq!(p.verify("abc123", 1, "image/png", expires, &sig, NOW), Ok(()));
    }

    #[test]
    fn different_secret_does_not_verify() {
        let (expires, sig) = signature_of(&presigner().presign_part("abc123", 1, "a/b", NOW));
        let other = Presigner::new("another", "http://localhost:3000", DEFAULT_PRESIGN_TTL);
        assert_eq!(
            other.verify("abc123", 1, "a/b", expires, &sig, NOW),
            Err(PresignError::BadSignature)
        );
    }
}
