//! Proxy listener: accepts TCP connections on the fixed tunnel port and runs the
//! handshake + CONNECT loop on each, one task per connection (spec.md §5).

use abyss_task::{ShutdownSignal, Task};
use tokio::net::TcpListener;

use crate::config::TUNNEL_PORT;
use crate::AppState;

pub struct TunnelListener {
    listener: TcpListener,
    state: AppState,
}

impl TunnelListener {
    pub async fn bind(state: AppState) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", TUNNEL_PORT)).await?;
        info!(port = TUNNEL_PORT, "Tunnel proxy listening");
        Ok(Self { listener, state })
    }
}

#[async_trait::async_trait]
impl Task for TunnelListener {
    type Output = anyhow::Result<()>;

    const NAME: &'static str = "tunnel_listener";

    async fn run(self, mut shutdown_signal: ShutdownSignal) -> Self::Output {
        let Self { listener, state } = self;

        loop {
            let accepted = tokio::select! {
                accepted = listener.accept() => accepted,
                () = shutdown_signal.wait() => return Ok(()),
            };

            let (socket, peer_addr) = match accepted {
                Ok(pair) => pair,
                Err(error) => {
                    warn!(%error, "Failed to accept tunnel connection");
                    continue;
                }
            };

            let sessions = state.sessions.clone();
            let allowed_ports = state.conf.allowed_ports.clone();

            tokio::spawn(async move {
                if let Err(error) = crate::tunnel::serve_connection(socket, &sessions, &allowed_ports).await {
                    debug!(%peer_addr, %error, "Tunnel connection ended with an error");
                }
            });
        }
    }
}
