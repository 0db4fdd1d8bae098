//! Session-token extraction for Axum handlers.
//!
//! Mirrors the teacher's `FromRequestParts`-based extractor family (`AccessToken` &
//! friends in the upstream gateway) adapted to this system's token model: an opaque
//! 64-byte string carried as a query parameter or cookie, not a JWT.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts, Query};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::identity::{User, DEBUG_UUID};
use crate::http::HttpError;
use crate::AppState;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn token_from_cookie(parts: &Parts) -> Option<String> {
    let header = parts.headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    header.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "token").then(|| value.to_owned())
    })
}

/// A request's session token, validated against its peer IP. Carries the resolved
/// [`User`] so handlers never need to look it up again.
pub struct SessionUser(pub User);

impl FromRequestParts<AppState> for SessionUser {
    type Rejection = HttpError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let Query(TokenQuery { token }) = Query::<TokenQuery>::from_request_parts(parts, state)
            .await
            .unwrap_or(Query(TokenQuery { token: None }));

        let token = token.or_else(|| token_from_cookie(parts)).ok_or(crate::auth::AuthError::TokenMissing)?;

        let ConnectInfo(addr) = ConnectInfo::<SocketAddr>::from_request_parts(parts, state)
            .await
            .map_err(HttpError::internal().err())?;

        let uuid = state.sessions.validate_checked(&token, addr.ip()).await?;

        if uuid == DEBUG_UUID {
            return Ok(Self(crate::identity::debug_user()));
        }

        let user = state
            .users
            .find_by_uuid(uuid)
            .await
            .map_err(crate::auth::AuthError::from)?
            .ok_or(crate::auth::AuthError::UserNotFound)?;

        Ok(Self(user))
    }
}
