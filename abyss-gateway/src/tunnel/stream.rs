//! Turns an authenticated TCP socket into a plaintext, bidirectional, AEAD-protected
//! byte stream.
//!
//! Two background tasks pump bytes in each direction — encrypt-and-send, receive-and-
//! decrypt — between the raw socket and a [`tokio::io::duplex`] pair; the application
//! (the CONNECT proxy loop) only ever sees the plaintext end, which implements
//! `AsyncRead + AsyncWrite` and can be handed to [`transport::forward_bidirectional`]
//! like any other stream. This mirrors spec.md §5's "task per direction" concurrency
//! model directly instead of multiplexing both directions on one task.

use chacha20poly1305::aead::AeadInPlace;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _, DuplexStream};
use tokio::net::TcpStream;
use zeroize::Zeroizing;

use super::frame::{read_frame, write_frame, MAX_CHUNK_LEN};

const DUPLEX_BUF_LEN: usize = 128 * 1024;

pub struct AeadKeys {
    pub key: Zeroizing<[u8; 32]>,
    pub send_salt: [u8; 4],
    pub recv_salt: [u8; 4],
}

/// A cipher plus its monotonic nonce counter, guarded together so a counter bump
/// always corresponds to exactly one AEAD operation under the same key.
struct DirectionState {
    cipher: ChaCha20Poly1305,
    salt: [u8; 4],
    counter: u64,
}

impl DirectionState {
    fn next_nonce(&mut self) -> Result<Nonce, super::TunnelError> {
        let counter = self.counter;
        self.counter = self.counter.checked_add(1).ok_or(super::TunnelError::CounterExhausted)?;

        let mut nonce = [0u8; 12];
        nonce[..4].copy_from_slice(&self.salt);
        nonce[4..].copy_from_slice(&counter.to_be_bytes());
        Ok(Nonce::from(nonce))
    }
}

pub type AeadStream = DuplexStream;

/// Spawns the send/recv pump tasks and returns the plaintext-facing end.
pub fn wrap(socket: TcpStream, keys: AeadKeys) -> AeadStream {
    let (app_side, pump_side) = tokio::io::duplex(DUPLEX_BUF_LEN);
    let (mut pump_reader, mut pump_writer) = tokio::io::split(pump_side);
    let (mut sock_reader, mut sock_writer) = socket.into_split();

    let cipher = ChaCha20Poly1305::new((&*keys.key).into());
    let send_state = Mutex::new(DirectionState { cipher: cipher.clone(), salt: keys.send_salt, counter: 0 });
    let recv_state = Mutex::new(DirectionState { cipher, salt: keys.recv_salt, counter: 0 });

    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_CHUNK_LEN];
        loop {
            let n = match pump_reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };

            let mut chunk = buf[..n].to_vec();
            let encrypted = {
                let mut state = send_state.lock();
                let Ok(nonce) = state.next_nonce() else { break };
                state.cipher.encrypt_in_place(&nonce, b"", &mut chunk).is_ok()
            };

            if !encrypted || write_frame(&mut sock_writer, &chunk).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        loop {
            let mut sealed = match read_frame(&mut sock_reader).await {
                Ok(sealed) => sealed,
                Err(_) => break,
            };

            let decrypted = {
                let mut state = recv_state.lock();
                let Ok(nonce) = state.next_nonce() else { break };
                state.cipher.decrypt_in_place(&nonce, b"", &mut sealed).is_ok()
            };

            if !decrypted || pump_writer.write_all(&sealed).await.is_err() {
                break;
            }
        }
    });

    app_side
}
