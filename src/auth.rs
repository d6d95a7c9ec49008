//! Bearer-token authentication for the coordinator endpoints.
//!
//! Tokens are HS256 JWTs issued elsewhere; this module only verifies them.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

/// JWT claims the service cares about.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    #[serde(default)]
    pub iat: Option<usize>,
    #[serde(default)]
    pub iss: Option<String>,
}

/// The authenticated caller, available to handlers as an extension.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub subject: String,
}

pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Verifier for tokens signed with a shared secret (HS256).
    pub fn new_hs256(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Require tokens to carry this `iss` claim.
    #[must_use]
    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;
        Ok(AuthUser {
            subject: data.claims.sub,
        })
    }

    /// Pull the token out of an `Authorization: Bearer ...` header value.
    pub fn bearer_token(header_value: Option<&str>) -> Result<&str, AuthError> {
        header_value
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)
    }
}

/// Middleware guarding the coordinator routes.
pub async fn require_bearer(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let user = JwtVerifier::bearer_token(header_value)
        .and_then(|token| state.verifier.verify(token))
        .map_err(|err| {
            tracing::debug!(path = %request.uri().path(), "rejected request: {}", err);
            AppError::new(StatusCode::UNAUTHORIZED, err.to_string())
        })?;

    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(secret: &str, exp_offset: i64, iss: Option<&str>) -> String {
        let claims = Claims {
            sub: "user-1".into(),
            exp: (chrono::Utc::now().timestamp() + exp_offset) as usize,
            iat: None,
            iss: iss.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_valid_token() {
        let verifier = JwtVerifier::new_hs256("secret");
        let user = verifier.verify(&token("secret", 3600, None)).unwrap();
        assert_eq!(user.subject, "user-1");
    }

    #[test]
    fn rejects_expired_and_foreign_tokens() {
        let verifier = JwtVerifier::new_hs256("secret");
        assert_eq!(
            verifier.verify(&token("secret", -3600, None)).unwrap_err(),
            AuthError::TokenExpired
        );
        assert!(matches!(
            verifier.verify(&token("other", 3600, None)),
            Err(AuthError::InvalidToken(_))
        ));
        assert!(matches!(
            verifier.verify("not-a-jwt"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn enforces_issuer_when_configured() {
        let verifier = JwtVerifier::new_hs256("secret").with_issuer("tasks-api");
        assert!(verifier.verify(&token("secret", 3600, Some("tasks-api"))).is_ok());
        assert!(verifier.verify(&token("secret", 3600, Some("elsewhere"))).is_err());
    }

    #[test]
    fn extracts_bearer_token() {
        assert_eq!(JwtVerifier::bearer_token(Some("Bearer abc")), Ok("abc"));
        assert_eq!(
            JwtVerifier::bearer_token(Some("Basic abc")),
            Err(AuthError::MissingToken)
        );
        assert_eq!(
            JwtVerifier::bearer_token(Some("Bearer ")),
            Err(AuthError::MissingToken)
        );
        assert_eq!(JwtVerifier::bearer_token(None), Err(AuthError::MissingToken));
    }
}
