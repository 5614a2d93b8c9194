//! Session credential verification for realtime admission and HTTP routes.
//!
//! The main API issues an HS256 JWT carried in the `authToken` cookie. This
//! service verifies it against the shared secret, checks the revocation list,
//! and resolves the user row. Ban status is deliberately not checked here:
//! banned accounts keep their chat access.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::Config;
use crate::error::ApiError;
use crate::store::{Store, UserRecord};

/// Claims carried by the session token. Older tokens used `id` instead of
/// `userId`; both are accepted.
#[derive(Debug, Deserialize)]
struct SessionClaims {
    #[serde(rename = "userId", alias = "id")]
    user_id: i64,
    #[allow(dead_code)]
    exp: i64,
}

/// Why a connection attempt was rejected before admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    MissingCredential,
    InvalidCredential,
    RevokedCredential,
    UnknownUser,
    StoreUnavailable,
}

impl AdmissionError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingCredential => "No authentication token",
            Self::InvalidCredential => "Authentication error",
            Self::RevokedCredential => "Token has been invalidated",
            Self::UnknownUser => "User not found",
            Self::StoreUnavailable => "Authentication check failed",
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::StoreUnavailable => ApiError::internal(err.reason()),
            _ => ApiError::unauthorized(err.reason()),
        }
    }
}

/// Sha256 hex digest of the raw token, the key used by the revocation list.
pub fn token_hash(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Pull the `authToken` value out of a `Cookie` header.
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "authToken").then_some(value)
    })
}

/// Verify a raw session token and resolve the user it belongs to.
pub async fn authenticate_token(
    config: &Config,
    store: &dyn Store,
    token: &str,
) -> Result<UserRecord, AdmissionError> {
    let revoked = store
        .is_token_revoked(&token_hash(token))
        .await
        .map_err(|_| AdmissionError::StoreUnavailable)?;
    if revoked {
        return Err(AdmissionError::RevokedCredential);
    }

    let key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<SessionClaims>(token, &key, &validation)
        .map_err(|e| {
            tracing::debug!(?e, "session token verification failed");
            AdmissionError::InvalidCredential
        })?;

    let user = store
        .user_by_id(data.claims.user_id)
        .await
        .map_err(|_| AdmissionError::StoreUnavailable)?
        .ok_or(AdmissionError::UnknownUser)?;

    Ok(user)
}

/// Authenticate a realtime handshake from its `Cookie` header.
pub async fn authenticate_handshake(
    config: &Config,
    store: &dyn Store,
    cookie_header: Option<&str>,
) -> Result<UserRecord, AdmissionError> {
    let token = cookie_header
        .and_then(token_from_cookie_header)
        .ok_or(AdmissionError::MissingCredential)?;
    authenticate_token(config, store, token).await
}
