//! Bearer token extraction.
//!
//! When the server is configured with `AUTH_TOKEN`, a request without a token
//! is unauthorized (401) and a request with a different token is forbidden
//! (403). The sync runtime dead-letters either answer instead of retrying.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Caller that passed the token check.
#[derive(Debug, Clone)]
pub struct AuthUser {
    /// The presented bearer token, or `anonymous` when auth is off
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, AppError> {
        let bearer = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty());

        let Some(expected) = state.config.auth_token.as_deref() else {
            return Ok(AuthUser {
                token: bearer.unwrap_or("anonymous").to_string(),
            });
        };

        match bearer {
            None => Err(AppError::Unauthorized),
            Some(token) if token == expected => Ok(AuthUser {
                token: token.to_string(),
            }),
            Some(_) => {
                tracing::warn!("rejected request with unknown token");
                Err(AppError::Forbidden)
            }
        }
    }
}
