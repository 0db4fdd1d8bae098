//! X25519 + signature-bound handshake (spec.md §4.5).

use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::TcpStream;
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use super::stream::AeadKeys;
use super::TunnelError;
use crate::auth::SessionService;

pub async fn handshake(socket: &mut TcpStream, sessions: &SessionService) -> Result<AeadKeys, TunnelError> {
    let local_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
    let local_public = PublicKey::from(&local_secret);

    socket.write_all(local_public.as_bytes()).await?;

    let mut peer_public_bytes = [0u8; 32];
    socket.read_exact(&mut peer_public_bytes).await?;
    let peer_public = PublicKey::from(peer_public_bytes);

    let challenge = random_ascii_challenge();
    socket.write_all(&challenge).await?;

    let mut signature = [0u8; 64];
    socket.read_exact(&mut signature).await?;

    if !sessions.verify_any(&challenge, &signature).await? {
        return Err(TunnelError::AuthFailure);
    }

    let mut ack_nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut ack_nonce);
    socket.write_all(&ack_nonce).await?;

    let shared_secret = local_secret.diffie_hellman(&peer_public);
    let (key, salt_a, salt_b) = derive_keys(shared_secret.as_bytes());

    // The lexicographically-smaller public key sends under salt_A and receives under
    // salt_B; the other side mirrors this so both ends agree without out-of-band
    // negotiation (spec.md §4.5 step 7 — never derive this from timing or socket role).
    let (send_salt, recv_salt) = if local_public.as_bytes().as_slice() < peer_public_bytes.as_slice() {
        (salt_a, salt_b)
    } else {
        (salt_b, salt_a)
    };

    Ok(AeadKeys { key, send_salt, recv_salt })
}

fn derive_keys(shared_secret: &[u8; 32]) -> (Zeroizing<[u8; 32]>, [u8; 4], [u8; 4]) {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);

    let mut key = Zeroizing::new([0u8; 32]);
    hk.expand(b"Abyss-AEAD-Key", &mut *key).expect("32 bytes is a valid HKDF-SHA256 output length");

    let mut salt_a = [0u8; 4];
    hk.expand(b"Abyss-Nonce-Salt-A", &mut salt_a).expect("4 bytes is a valid HKDF-SHA256 output length");

    let mut salt_b = [0u8; 4];
    hk.expand(b"Abyss-Nonce-Salt-B", &mut salt_b).expect("4 bytes is a valid HKDF-SHA256 output length");

    (key, salt_a, salt_b)
}

fn random_ascii_challenge() -> [u8; 32] {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut out = [0u8; 32];
    let mut rng = rand::thread_rng();
    for byte in &mut out {
        *byte = ALPHABET[(rng.next_u32() as usize) % ALPHABET.len()];
    }
    out
}
