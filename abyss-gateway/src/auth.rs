//! C3 — session & auth service: challenge issuance, signature verification, token
//! lifecycle, and delegated-user creation.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use rand::RngCore;
use thiserror::Error;

use crate::cache::ExpiringCache;
use crate::identity::{StoreError, User, UserStore, DEBUG_UUID};

const CHALLENGE_TTL: Duration = Duration::from_secs(60);
const TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const DELEGATED_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Internal debug token unlocked by `DEBUG_MODE=Debug`, bound to loopback (spec.md §6).
pub const DEBUG_TOKEN: &str = "abyss";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user not found")]
    UserNotFound,
    #[error("no outstanding challenge for this user")]
    ChallengeMissing,
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("token not found")]
    TokenMissing,
    #[error("token is bound to a different ip")]
    IpMismatch,
    #[error("requested privilege exceeds creator's privilege")]
    PrivilegeExceeded,
    #[error("username must be ascii alphanumeric")]
    UsernameInvalid,
    #[error("username already in use")]
    DuplicateUser,
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct UserCreating {
    pub username: String,
    pub public_key: [u8; 32],
    pub privilege: i64,
}

pub struct SessionService {
    cache: Arc<ExpiringCache>,
    users: Arc<UserStore>,
    debug_mode: bool,
}

impl SessionService {
    pub fn new(cache: Arc<ExpiringCache>, users: Arc<UserStore>, debug_mode: bool) -> Self {
        Self { cache, users, debug_mode }
    }

    /// `None` if `username` does not resolve to a user; otherwise replaces any prior
    /// challenge and returns the fresh one.
    pub async fn challenge(&self, username: &str) -> Result<Option<String>, AuthError> {
        let Some(user) = self.users.find_by_name(username).await? else {
            return Ok(None);
        };

        let challenge = random_challenge();
        self.cache.put(challenge_key(user.uuid), challenge.clone(), CHALLENGE_TTL);

        Ok(Some(challenge))
    }

    /// Verifies `response` (a signature) against the outstanding challenge for
    /// `username`, mints a token bound to `ip` on success, and poisons the challenge
    /// on failure so it cannot be retried within its remaining window.
    pub async fn verify(&self, username: &str, response: &[u8], ip: IpAddr) -> Result<String, AuthError> {
        let user = self.users.find_by_name(username).await?.ok_or(AuthError::UserNotFound)?;

        let key = challenge_key(user.uuid);
        let pending = self.cache.get(&key).ok_or(AuthError::ChallengeMissing)?;

        if is_poisoned(&pending) {
            return Err(AuthError::ChallengeMissing);
        }

        if !verify_signature(&user.public_key, pending.as_bytes(), response) {
            self.cache.put(key, poisoned(), CHALLENGE_TTL);
            return Err(AuthError::SignatureInvalid);
        }

        self.cache.remove(&key);

        Ok(self.create_token(user.uuid, ip, TOKEN_TTL))
    }

    /// Verifies `response` against the user's outstanding challenge (same contract as
    /// [`Self::verify`]) and, on success, applies the requested field changes in place.
    pub async fn update_user(
        &self,
        username: &str,
        response: &[u8],
        new_name: &str,
        privilege: i64,
        public_key: [u8; 32],
    ) -> Result<(), AuthError> {
        let user = self.users.find_by_name(username).await?.ok_or(AuthError::UserNotFound)?;

        let key = challenge_key(user.uuid);
        let pending = self.cache.get(&key).ok_or(AuthError::ChallengeMissing)?;

        if is_poisoned(&pending) {
            return Err(AuthError::ChallengeMissing);
        }

        if !verify_signature(&user.public_key, pending.as_bytes(), response) {
            self.cache.put(key, poisoned(), CHALLENGE_TTL);
            return Err(AuthError::SignatureInvalid);
        }

        self.cache.remove(&key);
        self.users.update(user.uuid, new_name, privilege, public_key).await?;
        Ok(())
    }

    /// `-1` covers every failure mode the spec lumps together (missing, expired,
    /// IP-mismatched token); callers that need the distinction use [`Self::validate_checked`].
    pub async fn validate(&self, token: &str, ip: IpAddr) -> i64 {
        self.validate_checked(token, ip).await.unwrap_or(-1)
    }

    pub async fn validate_checked(&self, token: &str, ip: IpAddr) -> Result<i64, AuthError> {
        if self.debug_mode && token == DEBUG_TOKEN && ip.is_loopback() {
            return Ok(DEBUG_UUID);
        }

        let bound = self.cache.get(token).ok_or(AuthError::TokenMissing)?;
        let (uuid, bound_ip) = parse_token_value(&bound).ok_or(AuthError::TokenMissing)?;

        if bound_ip == ip {
            Ok(uuid)
        } else {
            self.cache.remove(token);
            Err(AuthError::IpMismatch)
        }
    }

    pub fn destroy(&self, token: &str) {
        self.cache.remove(token);
    }

    pub fn create_token(&self, uuid: i64, ip: IpAddr, ttl: Duration) -> String {
        let token = random_token();
        self.cache.put(token.clone(), format!("{uuid}@{ip}"), ttl);
        token
    }

    pub fn create_delegated_token(&self, uuid: i64, ip: IpAddr) -> String {
        self.create_token(uuid, ip, DELEGATED_TOKEN_TTL)
    }

    /// Enforces: creator token valid, username well-formed, no existing user with that
    /// name, and `new.privilege <= creator.privilege`. Destroys the creator's token on
    /// success to force a re-login under the freshly created identity's own session.
    pub async fn create_user(&self, creator_token: &str, ip: IpAddr, new: UserCreating) -> Result<User, AuthError> {
        let creator_uuid = self.validate_checked(creator_token, ip).await?;
        let creator = self.users.find_by_uuid(creator_uuid).await?.ok_or(AuthError::UserNotFound)?;

        if !new.username.chars().all(|c| c.is_ascii_alphanumeric()) || new.username.is_empty() {
            return Err(AuthError::UsernameInvalid);
        }

        if self.users.find_by_name(&new.username).await?.is_some() {
            return Err(AuthError::DuplicateUser);
        }

        if new.privilege > creator.privilege {
            return Err(AuthError::PrivilegeExceeded);
        }

        let uuid = self.users.next_uuid().await?;
        let user = User {
            uuid,
            username: new.username,
            parent_id: creator.uuid,
            public_key: new.public_key,
            privilege: new.privilege,
        };

        self.users.insert(&user).await?;
        self.destroy(creator_token);

        Ok(user)
    }

    /// Iterates every stored public key and accepts if any verifies `signature` over
    /// `data`; used by the transport handshake (C5), which has no username to look up.
    pub async fn verify_any(&self, data: &[u8], signature: &[u8]) -> Result<bool, AuthError> {
        let keys = self.users.all_public_keys().await?;
        Ok(keys.iter().any(|key| verify_signature(key, data, signature)))
    }
}

fn challenge_key(uuid: i64) -> String {
    format!("challenge:{uuid}")
}

fn random_challenge() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn random_token() -> String {
    let mut bytes = [0u8; 48];
    rand::thread_rng().fill_bytes(&mut bytes);
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    encoded.chars().take(64).collect()
}

fn poisoned() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("failed : {}", base64::engine::general_purpose::STANDARD.encode(bytes))
}

fn is_poisoned(value: &str) -> bool {
    value.starts_with("failed : ")
}

fn parse_token_value(value: &str) -> Option<(i64, IpAddr)> {
    let (uuid, ip) = value.split_once('@')?;
    Some((uuid.parse().ok()?, ip.parse().ok()?))
}

fn verify_signature(public_key: &[u8; 32], data: &[u8], signature: &[u8]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(signature) else {
        return false;
    };
    verifying_key.verify(data, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use ed25519_dalek::{Signer, SigningKey};

    use super::*;

    async fn service_with_user() -> (SessionService, SigningKey, String) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("abyss.db")).expect("utf8 path");
        let conn = crate::db::open(&path).await.expect("open db");
        std::mem::forget(dir);

        let users = Arc::new(UserStore::new(conn));
        let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);

        users
            .insert(&User {
                uuid: 1,
                username: "root".to_owned(),
                parent_id: 0,
                public_key: signing_key.verifying_key().to_bytes(),
                privilege: 100,
            })
            .await
            .expect("insert root");

        let cache = Arc::new(ExpiringCache::new());
        let service = SessionService::new(cache, users, false);

        (service, signing_key, "root".to_owned())
    }

    #[tokio::test]
    async fn challenge_changes_between_calls() {
        let (service, _key, name) = service_with_user().await;
        let c1 = service.challenge(&name).await.expect("challenge 1").expect("some");
        let c2 = service.challenge(&name).await.expect("challenge 2").expect("some");
        assert_ne!(c1, c2);
    }

    #[tokio::test]
    async fn unknown_user_has_no_challenge() {
        let (service, ..) = service_with_user().await;
        assert_eq!(service.challenge("nobody").await.expect("challenge"), None);
    }

    #[tokio::test]
    async fn verify_succeeds_with_correct_signature_and_poisons_on_bad_one() {
        let (service, key, name) = service_with_user().await;
        let ip: IpAddr = "203.0.113.5".parse().expect("ip");

        let challenge = service.challenge(&name).await.expect("challenge").expect("some");
        let bad_sig = key.sign(b"wrong data");
        let err = service.verify(&name, &bad_sig.to_bytes(), ip).await.expect_err("bad sig rejected");
        assert!(matches!(err, AuthError::SignatureInvalid));

        // Challenge is now poisoned; even the correct signature over the original
        // challenge must fail until it expires.
        let challenge_bytes = base64::engine::general_purpose::STANDARD.decode(&challenge).expect("decode");
        let good_sig = key.sign(&challenge_bytes);
        let err = service.verify(&name, &good_sig.to_bytes(), ip).await.expect_err("poisoned challenge");
        assert!(matches!(err, AuthError::ChallengeMissing));
    }

    #[tokio::test]
    async fn token_is_bound_to_its_issuing_ip() {
        let (service, key, name) = service_with_user().await;
        let ip_a: IpAddr = "203.0.113.5".parse().expect("ip a");
        let ip_b: IpAddr = "198.51.100.9".parse().expect("ip b");

        let challenge = service.challenge(&name).await.expect("challenge").expect("some");
        let challenge_bytes = base64::engine::general_purpose::STANDARD.decode(&challenge).expect("decode");
        let sig = key.sign(&challenge_bytes);
        let token = service.verify(&name, &sig.to_bytes(), ip_a).await.expect("verify");

        assert_eq!(service.validate(&token, ip_b).await, -1);
        assert_eq!(service.validate(&token, ip_a).await, -1, "token destroyed after the mismatch");
    }
}
