//! Post-handshake CONNECT proxy loop (spec.md §4.5 "Proxy semantics").

use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;

use super::handshake::handshake;
use super::stream::{wrap, AeadStream};
use super::TunnelError;
use crate::auth::SessionService;

const MAX_REQUEST_HEAD_LEN: usize = 8 * 1024;

pub async fn serve_connection(
    mut socket: TcpStream,
    sessions: &SessionService,
    allowed_ports: &[u16],
) -> Result<(), TunnelError> {
    let keys = handshake(&mut socket, sessions).await?;
    let mut stream = wrap(socket, keys);

    let head = read_request_head(&mut stream).await?;
    let Some(port) = parse_connect_port(&head) else {
        write_response(&mut stream, "HTTP/1.1 405 Method Not Allowed\r\n\r\n").await?;
        return Ok(());
    };

    if !allowed_ports.contains(&port) {
        write_response(&mut stream, "HTTP/1.1 403 Forbidden\r\n\r\n").await?;
        return Ok(());
    }

    let upstream = match TcpStream::connect(("127.0.0.1", port)).await {
        Ok(upstream) => upstream,
        Err(_) => {
            write_response(&mut stream, "HTTP/1.1 502 Bad Gateway\r\n\r\n").await?;
            return Ok(());
        }
    };

    write_response(&mut stream, "HTTP/1.1 200 Connection established\r\n\r\n").await?;

    if let Err(err) = transport::forward_bidirectional(stream, upstream).await {
        warn!(error = %err, "Tunnel forwarding ended with an error");
    }

    Ok(())
}

async fn write_response(stream: &mut AeadStream, response: &str) -> Result<(), TunnelError> {
    stream.write_all(response.as_bytes()).await?;
    Ok(())
}

/// Reads up to the blank line terminating the request's header block. No crate
/// parses the request — the grammar this proxy actually needs is "first line only".
async fn read_request_head(stream: &mut AeadStream) -> Result<String, TunnelError> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        if buf.len() >= MAX_REQUEST_HEAD_LEN {
            return Err(TunnelError::CryptoFailure);
        }

        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }

        buf.push(byte[0]);
        if buf.ends_with(b"\r\n\r\n") {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// `None` unless the request line is `CONNECT <anything>:<port> HTTP/1.x`; only the
/// `:port` suffix is honored, per spec.md §4.5.
fn parse_connect_port(head: &str) -> Option<u16> {
    let request_line = head.lines().next()?;
    let mut parts = request_line.split_whitespace();

    let method = parts.next()?;
    if !method.eq_ignore_ascii_case("CONNECT") {
        return None;
    }

    let target = parts.next()?;
    let (_, port) = target.rsplit_once(':')?;
    port.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_request_yields_its_port() {
        assert_eq!(parse_connect_port("CONNECT 127.0.0.1:8443 HTTP/1.1\r\nHost: x\r\n\r\n"), Some(8443));
    }

    #[test]
    fn connect_request_with_hostname_yields_its_port() {
        assert_eq!(parse_connect_port("CONNECT media.internal:443 HTTP/1.1\r\n\r\n"), Some(443));
    }

    #[test]
    fn non_connect_method_is_rejected() {
        assert_eq!(parse_connect_port("GET / HTTP/1.1\r\n\r\n"), None);
    }

    #[test]
    fn malformed_target_is_rejected() {
        assert_eq!(parse_connect_port("CONNECT no-port-here HTTP/1.1\r\n\r\n"), None);
    }

    #[test]
    fn blank_head_is_rejected() {
        assert_eq!(parse_connect_port(""), None);
    }
}
