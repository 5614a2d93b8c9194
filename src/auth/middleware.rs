//! Session extraction for HTTP routes.

use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;

use crate::auth::session;
use crate::error::ApiError;
use crate::store::UserRecord;
use crate::AppState;

/// Authenticated user resolved from the `authToken` cookie, or from an
/// `Authorization: Bearer <token>` header for non-browser callers.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user: UserRecord,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let cookie_token = parts
            .headers
            .get(COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(session::token_from_cookie_header);

        let token = bearer
            .or(cookie_token)
            .ok_or_else(|| ApiError::unauthorized("No token"))?;

        let user = session::authenticate_token(&state.config, state.store.as_ref(), token)
            .await
            .map_err(ApiError::from)?;

        Ok(AuthUser { user })
    }
}
