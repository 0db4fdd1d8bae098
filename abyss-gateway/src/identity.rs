//! C2 — persistent identity store.
//!
//! Backed by the same libSQL connection [`crate::db::open`] hands out. One row per
//! user; `username` is unique, `uuid` is the primary key with `1` reserved for root.

use libsql::Connection;
use thiserror::Error;

/// Reserved uuid for the root user; must exist before any other user (spec invariant).
pub const ROOT_UUID: i64 = 1;

/// Synthetic uuid bound to the `DEBUG_MODE` loopback token (spec.md §6: "bypasses
/// root-check on Initialize"). Never allocated by [`UserStore::next_uuid`] (which
/// starts at `1`) and never stored as a row, so it can't collide with a real user.
pub const DEBUG_UUID: i64 = -1;

/// The identity [`crate::auth::SessionService::validate_checked`] resolves the debug
/// token to. Carries max privilege so every C4 decision and `require_root` check
/// passes for it, mirroring [`crate::admin::admin_identity`]'s trust-the-boundary
/// pattern — here the boundary is "loopback + `DEBUG_MODE=Debug`" instead of the
/// admin socket's filesystem permissions.
pub fn debug_user() -> User {
    User { uuid: DEBUG_UUID, username: "debug".to_owned(), parent_id: 0, public_key: [0u8; 32], privilege: i64::MAX }
}

#[derive(Debug, Clone)]
pub struct User {
    pub uuid: i64,
    pub username: String,
    pub parent_id: i64,
    pub public_key: [u8; 32],
    pub privilege: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already taken")]
    Duplicate,
    #[error("database error")]
    Sql(#[from] libsql::Error),
    #[error("malformed row: {0}")]
    Decode(&'static str),
}

pub struct UserStore {
    conn: Connection,
}

impl UserStore {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub async fn is_empty(&self) -> Result<bool, StoreError> {
        let mut rows = self.conn.query("SELECT COUNT(*) FROM users", ()).await?;
        let row = rows.next().await?.ok_or(StoreError::Decode("no row returned by COUNT(*)"))?;
        let count: i64 = row.get(0)?;
        Ok(count == 0)
    }

    /// Idempotent by unique `username`; a duplicate insert fails with `Duplicate`
    /// rather than overwriting the existing row.
    pub async fn insert(&self, user: &User) -> Result<(), StoreError> {
        let outcome = self
            .conn
            .execute(
                "INSERT INTO users (uuid, username, parent_id, public_key, privilege) VALUES (?1, ?2, ?3, ?4, ?5)",
                libsql::params![
                    user.uuid,
                    user.username.as_str(),
                    user.parent_id,
                    user.public_key.to_vec(),
                    user.privilege,
                ],
            )
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(libsql::Error::SqliteFailure(_, msg)) if msg.contains("UNIQUE") => Err(StoreError::Duplicate),
            Err(err) => Err(StoreError::Sql(err)),
        }
    }

    pub async fn find_by_uuid(&self, uuid: i64) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT uuid, username, parent_id, public_key, privilege FROM users WHERE uuid = ?1",
                libsql::params![uuid],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn find_by_name(&self, username: &str) -> Result<Option<User>, StoreError> {
        let mut rows = self
            .conn
            .query(
                "SELECT uuid, username, parent_id, public_key, privilege FROM users WHERE username = ?1",
                libsql::params![username],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_user(&row)?)),
            None => Ok(None),
        }
    }

    /// Allocates the next uuid after the current maximum (root, at `1`, is always the
    /// floor since it is inserted first).
    pub async fn next_uuid(&self) -> Result<i64, StoreError> {
        let mut rows = self.conn.query("SELECT COALESCE(MAX(uuid), 0) FROM users", ()).await?;
        let row = rows.next().await?.ok_or(StoreError::Decode("no row returned by MAX(uuid)"))?;
        let max: i64 = row.get(0)?;
        Ok(max + 1)
    }

    /// Updates the mutable fields of an existing user in place; `uuid` and `parent_id`
    /// never change after creation.
    pub async fn update(&self, uuid: i64, username: &str, privilege: i64, public_key: [u8; 32]) -> Result<(), StoreError> {
        let outcome = self
            .conn
            .execute(
                "UPDATE users SET username = ?1, privilege = ?2, public_key = ?3 WHERE uuid = ?4",
                libsql::params![username, privilege, public_key.to_vec(), uuid],
            )
            .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(libsql::Error::SqliteFailure(_, msg)) if msg.contains("UNIQUE") => Err(StoreError::Duplicate),
            Err(err) => Err(StoreError::Sql(err)),
        }
    }

    /// Every stored public key, for [`crate::auth::SessionService::verify_any`]. A
    /// dedicated projection so the transport handshake's hot path never materializes
    /// full `User` rows it does not need.
    pub async fn all_public_keys(&self) -> Result<Vec<[u8; 32]>, StoreError> {
        let mut rows = self.conn.query("SELECT public_key FROM users", ()).await?;
        let mut keys = Vec::new();

        while let Some(row) = rows.next().await? {
            let raw: Vec<u8> = row.get(0)?;
            let key: [u8; 32] = raw.try_into().map_err(|_| StoreError::Decode("public_key is not 32 bytes"))?;
            keys.push(key);
        }

        Ok(keys)
    }
}

fn row_to_user(row: &libsql::Row) -> Result<User, StoreError> {
    let public_key: Vec<u8> = row.get(3)?;
    let public_key: [u8; 32] = public_key.try_into().map_err(|_| StoreError::Decode("public_key is not 32 bytes"))?;

    Ok(User {
        uuid: row.get(0)?,
        username: row.get(1)?,
        parent_id: row.get(2)?,
        public_key,
        privilege: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    async fn store() -> UserStore {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("abyss.db")).expect("utf8 path");
        let conn = crate::db::open(&path).await.expect("open db");
        std::mem::forget(dir);
        UserStore::new(conn)
    }

    fn user(uuid: i64, name: &str) -> User {
        User { uuid, username: name.to_owned(), parent_id: 0, public_key: [7u8; 32], privilege: 0 }
    }

    #[tokio::test]
    async fn empty_store_reports_empty() {
        let store = store().await;
        assert!(store.is_empty().await.expect("is_empty"));
    }

    #[tokio::test]
    async fn duplicate_username_is_rejected() {
        let store = store().await;
        store.insert(&user(1, "root")).await.expect("first insert");
        let err = store.insert(&user(2, "root")).await.expect_err("duplicate insert");
        assert!(matches!(err, StoreError::Duplicate));
    }

    #[tokio::test]
    async fn round_trips_by_uuid_and_name() {
        let store = store().await;
        store.insert(&user(1, "root")).await.expect("insert");

        let by_uuid = store.find_by_uuid(1).await.expect("find_by_uuid").expect("present");
        let by_name = store.find_by_name("root").await.expect("find_by_name").expect("present");

        assert_eq!(by_uuid.username, "root");
        assert_eq!(by_name.uuid, 1);
    }
}
