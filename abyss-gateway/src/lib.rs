#[macro_use]
extern crate tracing;

pub mod admin;
pub mod api;
pub mod auth;
pub mod authz;
pub mod cache;
pub mod config;
pub mod db;
pub mod extract;
pub mod http;
pub mod identity;
pub mod listener;
pub mod log;
pub mod middleware;
pub mod tunnel;

use std::sync::Arc;

use crate::auth::SessionService;
use crate::authz::AttributeStore;
use crate::config::Conf;
use crate::identity::UserStore;

/// Shared application state handed to every Axum handler and to the admin socket and
/// tunnel listener tasks.
///
/// Cheap to clone: everything behind an `Arc`, mirroring how the gateway's own
/// `DgwState` is passed around.
#[derive(Clone)]
pub struct AppState {
    pub conf: Arc<Conf>,
    pub users: Arc<UserStore>,
    pub sessions: Arc<SessionService>,
    pub attributes: Arc<AttributeStore>,
    /// One-time confirmation token for `admin::handle_init`'s human-in-the-loop
    /// bootstrap gate (spec.md §4.2); `None` when no root-bootstrap is pending.
    pub pending_init: Arc<parking_lot::Mutex<Option<String>>>,
}
