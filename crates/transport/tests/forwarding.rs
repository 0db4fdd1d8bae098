#![expect(clippy::unwrap_used, reason = "Test code can panic on errors")]

use anyhow::Context as _;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};

async fn client(payload: &[u8], port: u16) -> anyhow::Result<()> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.context("connect")?;
    stream.write_all(payload).await.context("write payload")?;
    stream.shutdown().await.context("shutdown")?;

    let mut echoed = Vec::new();
    stream.read_to_end(&mut echoed).await.context("read echo")?;
    assert_eq!(echoed, payload);

    Ok(())
}

async fn relay_one_shot(listener: TcpListener, upstream_port: u16) -> anyhow::Result<()> {
    let (downstream, _) = listener.accept().await.context("accept downstream")?;
    let upstream = TcpStream::connect(("127.0.0.1", upstream_port))
        .await
        .context("connect upstream")?;

    transport::forward_bidirectional(downstream, upstream).await?;

    Ok(())
}

async fn echo_server(listener: TcpListener) -> anyhow::Result<()> {
    let (mut stream, _) = listener.accept().await.context("accept")?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await.context("read")?;
    stream.write_all(&buf).await.context("write")?;
    stream.shutdown().await.context("shutdown")?;
    Ok(())
}

#[tokio::test]
async fn forwards_bytes_through_an_intermediate_relay() {
    let upstream_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let upstream_port = upstream_listener.local_addr().unwrap().port();

    let relay_listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let relay_port = relay_listener.local_addr().unwrap().port();

    let payload = b"hello through the relay".to_vec();

    let echo = tokio::spawn(echo_server(upstream_listener));
    let relay = tokio::spawn(relay_one_shot(relay_listener, upstream_port));
    let result = client(&payload, relay_port).await;

    relay.await.unwrap().unwrap();
    echo.await.unwrap().unwrap();
    result.unwrap();
}
