//! C5 — encrypted framed transport and HTTP-CONNECT tunnel proxy.

mod frame;
mod handshake;
mod proxy;
mod stream;

pub use frame::MAX_CHUNK_LEN;
pub use handshake::handshake;
pub use proxy::serve_connection;
pub use stream::AeadStream;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("peer's handshake signature did not verify against any known user")]
    AuthFailure,
    #[error("AEAD tag mismatch or malformed frame")]
    CryptoFailure,
    #[error("nonce counter exhausted")]
    CounterExhausted,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Auth(#[from] crate::auth::AuthError),
}
