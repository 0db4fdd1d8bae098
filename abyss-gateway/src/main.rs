#[macro_use]
extern crate tracing;

use std::net::SocketAddr;
use std::sync::Arc;

use abyss_gateway::admin::AdminListener;
use abyss_gateway::auth::SessionService;
use abyss_gateway::authz::AttributeStore;
use abyss_gateway::cache::ExpiringCache;
use abyss_gateway::config::Conf;
use abyss_gateway::identity::UserStore;
use abyss_gateway::listener::TunnelListener;
use abyss_gateway::log::AbyssLog;
use abyss_gateway::{api, db, AppState};
use abyss_task::{ShutdownHandle, Task as _};
use anyhow::Context as _;

fn main() -> anyhow::Result<()> {
    let conf = Conf::from_env().context("failed to load configuration")?;

    let _log_guard = abyss_log::init::<AbyssLog>(&conf.log_dir, "info", std::env::var("ABYSS_LOG").ok().as_deref())
        .context("failed to initialize logging")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the async runtime")?;

    runtime.block_on(run(conf))
}

async fn run(conf: Conf) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(&conf.data_dir).await.context("failed to create data directory")?;
    tokio::fs::create_dir_all(&conf.media_root).await.context("failed to create media root")?;

    let conn = db::open(&conf.libsql_path()).await.context("failed to open the persistence layer")?;

    let conf = Arc::new(conf);
    let users = Arc::new(UserStore::new(conn.clone()));
    let attributes = Arc::new(AttributeStore::new(conn, users.clone(), conf.media_root.clone()));
    let sessions = Arc::new(SessionService::new(Arc::new(ExpiringCache::new()), users.clone(), conf.debug_mode));

    let state = AppState { conf: conf.clone(), users, sessions, attributes, pending_init: Arc::new(parking_lot::Mutex::new(None)) };

    let (shutdown_handle, shutdown_signal) = ShutdownHandle::new();

    let tunnel_listener = TunnelListener::bind(state.clone()).await.context("failed to bind the tunnel listener")?;
    let admin_listener =
        AdminListener::bind(&conf.admin_socket_path(), state.clone()).await.context("failed to bind the admin socket")?;

    let tunnel_task = abyss_task::spawn_task(tunnel_listener, shutdown_signal.clone());
    let admin_task = abyss_task::spawn_task(admin_listener, shutdown_signal.clone());

    let router = api::make_router()
        .layer(axum::middleware::from_fn(abyss_gateway::middleware::log::log_middleware))
        .layer(abyss_gateway::middleware::cors::make_middleware())
        .with_state(state);
    let http_listener = tokio::net::TcpListener::bind(("0.0.0.0", 8080)).await.context("failed to bind the HTTP listener")?;
    info!("HTTP API listening on 0.0.0.0:8080");

    let mut http_shutdown_signal = shutdown_signal.clone();
    let serve = axum::serve(http_listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move { http_shutdown_signal.wait().await });

    tokio::select! {
        result = serve => result.context("HTTP server failed")?,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    shutdown_handle.signal();
    tunnel_task.join().await.context("tunnel listener task panicked")??;
    admin_task.join().await.context("admin listener task panicked")??;

    Ok(())
}
