//! Thin REST adapters over C4's root-only batch operations.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Query, State};
use camino::Utf8PathBuf;
use serde::Deserialize;

use crate::authz::Permission;
use crate::extract::SessionUser;
use crate::http::HttpError;
use crate::AppState;

#[derive(Deserialize)]
pub struct ChmodQuery {
    path: Utf8PathBuf,
    permission: String,
    #[serde(default)]
    recursive: bool,
}

pub async fn post_chmod(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Query(query): Query<ChmodQuery>,
) -> Result<String, HttpError> {
    let permission = Permission::parse(&query.permission)?;
    let updated = state.attributes.chmod(&query.path, &requester, permission, query.recursive).await?;
    Ok(updated.to_string())
}

#[derive(Deserialize)]
pub struct ChownQuery {
    path: Utf8PathBuf,
    #[serde(rename = "newOwner")]
    new_owner: i64,
    #[serde(default)]
    recursive: bool,
}

pub async fn post_chown(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Query(query): Query<ChownQuery>,
) -> Result<String, HttpError> {
    let updated = state.attributes.chown(&query.path, &requester, query.new_owner, query.recursive).await?;
    Ok(updated.to_string())
}

#[derive(Deserialize)]
pub struct InitQuery {
    path: Utf8PathBuf,
    owner: i64,
}

pub async fn post_init(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Query(query): Query<InitQuery>,
) -> Result<String, HttpError> {
    let inserted = state.attributes.initialize(&query.path, &requester, query.owner).await?;
    Ok(inserted.to_string())
}

#[derive(Deserialize)]
pub struct LsQuery {
    path: Utf8PathBuf,
}

/// Renders each listed child as `(permission, owner_id, uid, name)` per spec.md §6.
pub async fn get_ls(
    State(state): State<AppState>,
    SessionUser(requester): SessionUser,
    Query(query): Query<LsQuery>,
    ConnectInfo(_addr): ConnectInfo<SocketAddr>,
) -> Result<String, HttpError> {
    let children = state.attributes.query_children(&query.path, &requester).await?;

    let mut lines = Vec::with_capacity(children.len());
    for name in children {
        let child_path = query.path.join(&name);
        if let Some(attribute) = state.attributes.get_attribute(&child_path).await? {
            lines.push(format!("({}, {}, {}, {name})", attribute.permission.render(), attribute.owner, attribute.uid));
        }
    }

    Ok(lines.join("\n"))
}
