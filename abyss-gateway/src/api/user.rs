//! Thin REST adapters over C3 (`crate::auth::SessionService`). Status mapping and the
//! exact request/response shapes are external-adapter concerns (spec.md §1); these
//! handlers wire the canonical verbs from spec.md §6 onto the C3 contracts.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::header;
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::auth::AuthError;
use crate::http::HttpError;
use crate::identity::ROOT_UUID;
use crate::AppState;

#[derive(Deserialize)]
pub struct VerifyBody {
    response: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    token: String,
}

pub async fn get_challenge(State(state): State<AppState>, Path(username): Path<String>) -> Result<String, HttpError> {
    state.sessions.challenge(&username).await?.ok_or_else(|| AuthError::UserNotFound.into())
}

pub async fn post_verify(
    State(state): State<AppState>,
    Path(username): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(body): Json<VerifyBody>,
) -> Result<impl IntoResponse, HttpError> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(&body.response)
        .map_err(|_| AuthError::SignatureInvalid)?;

    let token = state.sessions.verify(&username, &signature, addr.ip()).await?;

    let cookie = format!("token={token}; Path=/; HttpOnly");
    Ok((AppendHeaders([(header::SET_COOKIE, cookie)]), Json(TokenResponse { token })))
}

#[derive(Deserialize)]
pub struct UpdateBody {
    response: String,
    name: String,
    privilege: i64,
    #[serde(rename = "publicKey")]
    public_key: String,
}

pub async fn patch_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(body): Json<UpdateBody>,
) -> Result<&'static str, HttpError> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(&body.response)
        .map_err(|_| AuthError::SignatureInvalid)?;
    let public_key: [u8; 32] = base64::engine::general_purpose::STANDARD
        .decode(&body.public_key)
        .map_err(|_| AuthError::SignatureInvalid)?
        .try_into()
        .map_err(|_| AuthError::SignatureInvalid)?;

    state.sessions.update_user(&username, &signature, &body.name, body.privilege, public_key).await?;
    Ok("updated")
}

#[derive(Deserialize)]
pub struct TokenQuery {
    token: String,
}

pub async fn post_validate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<TokenQuery>,
) -> Result<String, HttpError> {
    let uuid = state.sessions.validate_checked(&query.token, addr.ip()).await?;
    Ok(uuid.to_string())
}

pub async fn post_destroy(State(state): State<AppState>, Query(query): Query<TokenQuery>) -> &'static str {
    state.sessions.destroy(&query.token);
    "destroyed"
}

#[derive(Deserialize)]
pub struct OpenQuery {
    token: String,
    #[serde(rename = "bindIp")]
    bind_ip: std::net::IpAddr,
}

/// `GET /api/User/{user}/open` — mints a 1h delegated token bound to `bindIp`, gated
/// on the caller presenting a valid root token.
pub async fn get_open(
    State(state): State<AppState>,
    Path(username): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<OpenQuery>,
) -> Result<Json<TokenResponse>, HttpError> {
    let caller_uuid = state.sessions.validate_checked(&query.token, addr.ip()).await?;
    if caller_uuid != ROOT_UUID {
        return Err(AuthError::PrivilegeExceeded.into());
    }

    let target = state
        .users
        .find_by_name(&username)
        .await
        .map_err(AuthError::from)?
        .ok_or(AuthError::UserNotFound)?;

    let token = state.sessions.create_delegated_token(target.uuid, query.bind_ip);
    Ok(Json(TokenResponse { token }))
}
