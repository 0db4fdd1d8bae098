//! C4 — resource authorization engine: path-based, attribute-driven permission
//! decisions, plus the bulk ownership/permission operations built on top of them.

use std::collections::HashMap;

use base64::Engine as _;
use camino::{Utf8Path, Utf8PathBuf};
use libsql::Connection;
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_128_with_seed;

use crate::identity::{StoreError, User, UserStore};

/// Hash seed for the `uid` derivation; fixed so a database produced by one run of
/// this code is readable by another.
const UID_SEED: u64 = 0x1145_1419;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Write,
    Security,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Owner,
    Peer,
    Other,
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("path escapes the media root")]
    PathTraversal,
    #[error("no attribute recorded for this path")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("permission string is malformed")]
    MalformedPermission,
    #[error("an attribute already exists for this path")]
    Conflict,
    #[error("owner user does not exist")]
    UserNotFound,
    #[error("database error")]
    Sql(#[from] libsql::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("filesystem error")]
    Io(#[from] std::io::Error),
}

/// Outcome of a single-path attribute check, keeping "no attribute recorded" distinct
/// from "an attribute recorded but denies the op" (spec.md §7: `NotFound` vs
/// `PermissionDenied` are different error kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Allowed,
    Denied,
    Missing,
}

impl CheckOutcome {
    fn is_allowed(self) -> bool {
        self == CheckOutcome::Allowed
    }
}

/// One `(r/-, w/-)` pair of a permission triplet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermPair {
    pub read: bool,
    pub write: bool,
}

impl PermPair {
    fn parse(pair: &str) -> Result<Self, AuthzError> {
        let mut chars = pair.chars();
        let (Some(r), Some(w), None) = (chars.next(), chars.next(), chars.next()) else {
            return Err(AuthzError::MalformedPermission);
        };

        let read = match r {
            'r' => true,
            '-' => false,
            _ => return Err(AuthzError::MalformedPermission),
        };
        let write = match w {
            'w' => true,
            '-' => false,
            _ => return Err(AuthzError::MalformedPermission),
        };

        Ok(Self { read, write })
    }

    fn render(self) -> String {
        format!("{}{}", if self.read { 'r' } else { '-' }, if self.write { 'w' } else { '-' })
    }
}

/// Parsed `"oo,pp,tt"` permission triplet: owner / same-privilege peer / other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permission {
    pub owner: PermPair,
    pub peer: PermPair,
    pub other: PermPair,
}

impl Permission {
    pub fn parse(raw: &str) -> Result<Self, AuthzError> {
        let mut parts = raw.split(',');
        let (Some(o), Some(p), Some(t), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
            return Err(AuthzError::MalformedPermission);
        };

        Ok(Self { owner: PermPair::parse(o)?, peer: PermPair::parse(p)?, other: PermPair::parse(t)? })
    }

    pub fn render(self) -> String {
        format!("{},{},{}", self.owner.render(), self.peer.render(), self.other.render())
    }

    fn pair_for(self, role: Role) -> PermPair {
        match role {
            Role::Owner => self.owner,
            Role::Peer => self.peer,
            Role::Other => self.other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResourceAttribute {
    pub uid: String,
    pub owner: i64,
    pub permission: Permission,
}

/// `base64(XxHash128(utf8(relative_path), seed))`, never the plaintext path.
pub fn compute_uid(relative_path: &Utf8Path) -> String {
    let digest = xxh3_128_with_seed(relative_path.as_str().as_bytes(), UID_SEED);
    base64::engine::general_purpose::STANDARD.encode(digest.to_be_bytes())
}

/// Resolves `U`'s relationship to the attribute owner `O` per spec.md §4.4 step 2.
fn resolve_role(requester: &User, owner: &User) -> Role {
    if requester.uuid == owner.uuid {
        Role::Owner
    } else if requester.privilege == owner.privilege {
        Role::Peer
    } else {
        Role::Other
    }
}

/// Grants per spec.md §4.4 steps 4-6.
struct Decision {
    read: bool,
    write: bool,
    security: bool,
}

fn decide(requester: &User, owner: &User, attr: &ResourceAttribute) -> Decision {
    let role = resolve_role(requester, owner);
    let pair = attr.permission.pair_for(role);
    let override_ = requester.privilege > owner.privilege;

    Decision {
        read: pair.read || override_,
        write: pair.write || override_,
        security: (role == Role::Owner && pair.write) || requester.uuid == crate::identity::ROOT_UUID,
    }
}

impl Decision {
    fn allows(&self, op: Op) -> bool {
        match op {
            Op::Read => self.read,
            Op::Write => self.write,
            Op::Security => self.security,
        }
    }
}

pub struct AttributeStore {
    conn: Connection,
    users: std::sync::Arc<UserStore>,
    media_root: Utf8PathBuf,
}

impl AttributeStore {
    pub fn new(conn: Connection, users: std::sync::Arc<UserStore>, media_root: Utf8PathBuf) -> Self {
        Self { conn, users, media_root }
    }

    /// Normalizes `path` (which may be absolute or relative) to a path relative to
    /// `$MEDIA_ROOT`, rejecting `..` components and anything the root doesn't prefix.
    pub fn relativize(&self, path: &Utf8Path) -> Result<Utf8PathBuf, AuthzError> {
        if path.components().any(|c| c.as_str() == "..") {
            return Err(AuthzError::PathTraversal);
        }

        let relative = if path.is_absolute() {
            path.strip_prefix(&self.media_root).map_err(|_| AuthzError::PathTraversal)?
        } else {
            path
        };

        Ok(relative.to_path_buf())
    }

    pub fn full_path(&self, relative: &Utf8Path) -> Utf8PathBuf {
        self.media_root.join(relative)
    }

    async fn attribute_by_uid(&self, uid: &str) -> Result<Option<ResourceAttribute>, AuthzError> {
        let mut rows = self
            .conn
            .query("SELECT uid, owner, permission FROM resource_attributes WHERE uid = ?1", libsql::params![uid])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let uid: String = row.get(0)?;
        let owner: i64 = row.get(1)?;
        let permission_raw: String = row.get(2)?;

        Ok(Some(ResourceAttribute { uid, owner, permission: Permission::parse(&permission_raw)? }))
    }

    pub async fn get_attribute(&self, path: &Utf8Path) -> Result<Option<ResourceAttribute>, AuthzError> {
        let relative = self.relativize(path)?;
        self.attribute_by_uid(&compute_uid(&relative)).await
    }

    pub async fn exists(&self, path: &Utf8Path) -> Result<bool, AuthzError> {
        Ok(self.get_attribute(path).await?.is_some())
    }

    /// Every strict prefix of `relative` requires Read; the path itself is included so
    /// the caller can pair it with whatever op was actually requested for the leaf.
    fn ancestors_and_self(relative: &Utf8Path) -> Vec<Utf8PathBuf> {
        let mut out = Vec::new();
        let mut acc = Utf8PathBuf::new();
        for component in relative.components() {
            acc.push(component.as_str());
            out.push(acc.clone());
        }
        out
    }

    /// Path-walk rule (spec.md §4.4): every strict prefix needs Read, the target needs
    /// `op`. All required `(uid, op)` attributes are batch-fetched once.
    ///
    /// Distinguishes "no attribute recorded for the path that stopped the walk"
    /// (`CheckOutcome::Missing`, surfaced as 404 per spec.md §7) from "an attribute is
    /// recorded but denies `op`" (`CheckOutcome::Denied`, surfaced as 403) — the two
    /// error kinds the spec lists separately under `NotFound`/`PermissionDenied`.
    async fn authorize_one(&self, requester: &User, relative: &Utf8Path, op: Op) -> Result<CheckOutcome, AuthzError> {
        let chain = Self::ancestors_and_self(relative);
        if chain.is_empty() {
            return Ok(CheckOutcome::Allowed);
        }

        let last = chain.len() - 1;
        for (index, prefix) in chain.iter().enumerate() {
            let required_op = if index == last { op } else { Op::Read };
            match self.check(requester, prefix, required_op).await? {
                CheckOutcome::Allowed => continue,
                other => return Ok(other),
            }
        }

        Ok(CheckOutcome::Allowed)
    }

    async fn check(&self, requester: &User, relative: &Utf8Path, op: Op) -> Result<CheckOutcome, AuthzError> {
        let Some(attr) = self.attribute_by_uid(&compute_uid(relative)).await? else {
            return Ok(CheckOutcome::Missing);
        };
        let Some(owner) = self.users.find_by_uuid(attr.owner).await? else {
            // Attribute row exists but its owner reference is dangling; treat as a
            // denial rather than "not found" since the path itself is managed.
            return Ok(CheckOutcome::Denied);
        };

        if decide(requester, &owner, &attr).allows(op) {
            Ok(CheckOutcome::Allowed)
        } else {
            Ok(CheckOutcome::Denied)
        }
    }

    async fn require(&self, requester: &User, path: &Utf8Path, op: Op) -> Result<Utf8PathBuf, AuthzError> {
        let relative = self.relativize(path)?;
        match self.authorize_one(requester, &relative, op).await? {
            CheckOutcome::Allowed => Ok(relative),
            CheckOutcome::Denied => Err(AuthzError::PermissionDenied),
            CheckOutcome::Missing => Err(AuthzError::NotFound),
        }
    }

    /// Authorizes `op` on `path` and resolves it to a filesystem path, for callers that
    /// need to stream file contents rather than read them as UTF-8 (C4 `Get`).
    pub async fn authorized_full_path(&self, path: &Utf8Path, requester: &User, op: Op) -> Result<Utf8PathBuf, AuthzError> {
        let relative = self.require(requester, path, op).await?;
        Ok(self.full_path(&relative))
    }

    pub async fn query_children(&self, path: &Utf8Path, requester: &User) -> Result<Vec<String>, AuthzError> {
        let relative = self.require(requester, path, Op::Read).await?;
        let full = self.full_path(&relative);

        let mut entries = tokio::fs::read_dir(&full).await?;
        let mut allowed = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let child_relative = relative.join(name);
            let readable = self.check(requester, &child_relative, Op::Read).await.map(CheckOutcome::is_allowed).unwrap_or(false);
            if readable {
                allowed.push(name.to_owned());
            }
        }

        Ok(allowed)
    }

    pub async fn get_string(&self, path: &Utf8Path, requester: &User) -> Result<String, AuthzError> {
        let relative = self.require(requester, path, Op::Read).await?;
        Ok(tokio::fs::read_to_string(self.full_path(&relative)).await?)
    }

    /// Never fails for an individual path; unauthorized or unreadable paths map to
    /// `None` in the result.
    pub async fn get_all_string(
        &self,
        paths: &[Utf8PathBuf],
        requester: &User,
    ) -> HashMap<Utf8PathBuf, Option<String>> {
        let mut out = HashMap::new();
        for path in paths {
            let text = self.get_string(path, requester).await.ok();
            out.insert(path.clone(), text);
        }
        out
    }

    pub async fn update_string(&self, path: &Utf8Path, requester: &User, body: &str) -> Result<(), AuthzError> {
        let relative = self.require(requester, path, Op::Write).await?;
        tokio::fs::write(self.full_path(&relative), body).await?;
        Ok(())
    }

    /// Root-only; recursively enumerates `root_path` and inserts one attribute per new
    /// path owned by `owner` with `"rw,--,--"`, skipping paths that already have one.
    /// Applying twice yields the same attribute count as applying once.
    pub async fn initialize(&self, root_path: &Utf8Path, requester: &User, owner: i64) -> Result<usize, AuthzError> {
        self.require_root(requester)?;
        self.users.find_by_uuid(owner).await?.ok_or(AuthzError::UserNotFound)?;

        let relative_root = self.relativize(root_path)?;
        let full_root = self.full_path(&relative_root);

        let mut inserted = 0;
        let mut stack = vec![relative_root];

        while let Some(relative) = stack.pop() {
            if self.attribute_by_uid(&compute_uid(&relative)).await?.is_none() {
                self.insert_attribute(&relative, owner, Permission::parse("rw,--,--")?).await?;
                inserted += 1;
            }

            let full = self.full_path(&relative);
            if full.is_dir() {
                let mut entries = tokio::fs::read_dir(&full).await?;
                while let Some(entry) = entries.next_entry().await? {
                    if let Some(name) = entry.file_name().to_str() {
                        stack.push(relative.join(name));
                    }
                }
            }
        }

        let _ = full_root;
        Ok(inserted)
    }

    /// Writes (or overwrites) the attribute for one of the reserved bootstrap
    /// subtrees (`Tasks/`, `Live/`), which the engine re-applies idempotently on every
    /// startup rather than erroring on a rerun like [`Self::include`] does.
    pub async fn bootstrap_reserved(&self, relative: &Utf8Path, owner: i64, permission: Permission) -> Result<(), AuthzError> {
        let uid = compute_uid(relative);
        let rendered = permission.render();

        self.conn
            .execute(
                "INSERT INTO resource_attributes (uid, owner, permission) VALUES (?1, ?2, ?3)
                 ON CONFLICT(uid) DO UPDATE SET owner = excluded.owner, permission = excluded.permission",
                libsql::params![uid, owner, rendered],
            )
            .await?;

        Ok(())
    }

    /// Inserts one attribute at `path`, erroring `Conflict` if one already exists
    /// there (spec.md §7: "duplicate attribute on Include"). When `recursive`, also
    /// walks every descendant and inserts an attribute for any that doesn't have one
    /// yet — modeled on [`Self::initialize`]'s DFS, but skip-on-existing rather than
    /// erroring, since a recursive Include is meant to extend coverage under a path,
    /// not demand every descendant be previously unmanaged.
    pub async fn include(
        &self,
        path: &Utf8Path,
        requester: &User,
        owner: i64,
        permission: Permission,
        recursive: bool,
    ) -> Result<usize, AuthzError> {
        self.require_root(requester)?;
        self.users.find_by_uuid(owner).await?.ok_or(AuthzError::UserNotFound)?;
        let relative = self.relativize(path)?;

        if self.attribute_by_uid(&compute_uid(&relative)).await?.is_some() {
            return Err(AuthzError::Conflict);
        }

        self.insert_attribute(&relative, owner, permission).await?;
        let mut inserted = 1;

        if recursive {
            let mut stack = vec![relative.clone()];

            while let Some(current) = stack.pop() {
                let full_current = self.full_path(&current);
                if !full_current.is_dir() {
                    continue;
                }

                let mut entries = tokio::fs::read_dir(&full_current).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
                    let child = current.join(&name);

                    if self.attribute_by_uid(&compute_uid(&child)).await?.is_none() {
                        self.insert_attribute(&child, owner, permission).await?;
                        inserted += 1;
                    }

                    stack.push(child);
                }
            }
        }

        Ok(inserted)
    }

    pub async fn exclude(&self, path: &Utf8Path, requester: &User) -> Result<(), AuthzError> {
        self.require_root(requester)?;
        let relative = self.relativize(path)?;
        let uid = compute_uid(&relative);

        self.conn.execute("DELETE FROM resource_attributes WHERE uid = ?1", libsql::params![uid]).await?;
        Ok(())
    }

    /// Authorizes Security on `path` (and every descendant when `recursive`), then
    /// updates permissions in bulk. Returns the number of rows touched; per spec.md
    /// §9 Open Question (b), a nonzero count is reported as success even if some rows
    /// in the walked set had no attribute to begin with.
    pub async fn chmod(
        &self,
        path: &Utf8Path,
        requester: &User,
        permission: Permission,
        recursive: bool,
    ) -> Result<usize, AuthzError> {
        let targets = self.security_targets(path, requester, recursive).await?;
        let rendered = permission.render();
        let mut updated = 0;

        for uid in targets {
            let changes = self
                .conn
                .execute("UPDATE resource_attributes SET permission = ?1 WHERE uid = ?2", libsql::params![
                    rendered.as_str(),
                    uid.as_str()
                ])
                .await?;
            updated += usize::try_from(changes).unwrap_or(0);
        }

        Ok(updated)
    }

    pub async fn chown(
        &self,
        path: &Utf8Path,
        requester: &User,
        new_owner: i64,
        recursive: bool,
    ) -> Result<usize, AuthzError> {
        self.users.find_by_uuid(new_owner).await?.ok_or(AuthzError::UserNotFound)?;

        let targets = self.security_targets(path, requester, recursive).await?;
        let mut updated = 0;

        for uid in targets {
            let changes = self
                .conn
                .execute("UPDATE resource_attributes SET owner = ?1 WHERE uid = ?2", libsql::params![
                    new_owner,
                    uid.as_str()
                ])
                .await?;
            updated += usize::try_from(changes).unwrap_or(0);
        }

        Ok(updated)
    }

    /// Authorization precondition for chmod/chown: every target in the walked set must
    /// grant Security before any row is touched (spec.md §7 partial-failure policy).
    async fn security_targets(
        &self,
        path: &Utf8Path,
        requester: &User,
        recursive: bool,
    ) -> Result<Vec<String>, AuthzError> {
        let relative = self.require(requester, path, Op::Security).await?;
        let mut targets = vec![compute_uid(&relative)];

        if recursive {
            let full = self.full_path(&relative);
            let mut stack = vec![relative];

            while let Some(current) = stack.pop() {
                let full_current = self.full_path(&current);
                if !full_current.is_dir() {
                    continue;
                }

                let mut entries = tokio::fs::read_dir(&full_current).await?;
                while let Some(entry) = entries.next_entry().await? {
                    let Some(name) = entry.file_name().to_str().map(str::to_owned) else { continue };
                    let child = current.join(&name);

                    match self.authorize_one(requester, &child, Op::Security).await? {
                        CheckOutcome::Allowed => {}
                        CheckOutcome::Denied => return Err(AuthzError::PermissionDenied),
                        CheckOutcome::Missing => return Err(AuthzError::NotFound),
                    }

                    targets.push(compute_uid(&child));
                    stack.push(child);
                }
            }

            let _ = full;
        }

        Ok(targets)
    }

    /// Root-only gate for `Initialize`/`Include`/`Exclude`. Also passes the
    /// `DEBUG_MODE` loopback identity ([`crate::identity::debug_user`]), per spec.md
    /// §6 ("bypasses root-check on Initialize") — extended uniformly to the other
    /// root-only operations here rather than re-deriving the bypass at each call site.
    fn require_root(&self, requester: &User) -> Result<(), AuthzError> {
        if requester.uuid == crate::identity::ROOT_UUID || requester.uuid == crate::identity::DEBUG_UUID {
            Ok(())
        } else {
            Err(AuthzError::PermissionDenied)
        }
    }

    async fn insert_attribute(&self, relative: &Utf8Path, owner: i64, permission: Permission) -> Result<(), AuthzError> {
        let uid = compute_uid(relative);
        let rendered = permission.render();

        self.conn
            .execute("INSERT INTO resource_attributes (uid, owner, permission) VALUES (?1, ?2, ?3)", libsql::params![
                uid,
                owner,
                rendered
            ])
            .await?;

        Ok(())
    }

    /// Batch Read check; unmanaged or malformed paths map to `false` without failing
    /// the batch. Deduplicates `(uid, op)` pairs within the call.
    pub async fn valid_any(&self, paths: &[Utf8PathBuf], requester: &User, op: Op) -> HashMap<Utf8PathBuf, bool> {
        let mut cache: HashMap<String, bool> = HashMap::new();
        let mut out = HashMap::new();

        for path in paths {
            let allowed = match self.relativize(path) {
                Ok(relative) => self.authorize_one_cached(requester, &relative, op, &mut cache).await.unwrap_or(false),
                Err(_) => false,
            };
            out.insert(path.clone(), allowed);
        }

        out
    }

    /// Short-circuits to `false` on the first denial.
    pub async fn valid_all(&self, paths: &[Utf8PathBuf], requester: &User, op: Op) -> bool {
        let mut cache: HashMap<String, bool> = HashMap::new();

        for path in paths {
            let allowed = match self.relativize(path) {
                Ok(relative) => self.authorize_one_cached(requester, &relative, op, &mut cache).await.unwrap_or(false),
                Err(_) => false,
            };
            if !allowed {
                return false;
            }
        }

        true
    }

    async fn authorize_one_cached(
        &self,
        requester: &User,
        relative: &Utf8Path,
        op: Op,
        cache: &mut HashMap<String, bool>,
    ) -> Result<bool, AuthzError> {
        let chain = Self::ancestors_and_self(relative);
        let last = chain.len().saturating_sub(1);

        for (index, prefix) in chain.iter().enumerate() {
            let required_op = if index == last { op } else { Op::Read };
            let cache_key = format!("{prefix}:{required_op:?}");

            let allowed = match cache.get(&cache_key) {
                Some(value) => *value,
                None => {
                    let value = self.check(requester, prefix, required_op).await?.is_allowed();
                    cache.insert(cache_key, value);
                    value
                }
            };

            if !allowed {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn user(uuid: i64, privilege: i64) -> User {
        User { uuid, username: format!("u{uuid}"), parent_id: 0, public_key: [0u8; 32], privilege }
    }

    fn attr(owner: i64, permission: &str) -> ResourceAttribute {
        ResourceAttribute { uid: "x".into(), owner, permission: Permission::parse(permission).expect("valid") }
    }

    #[rstest]
    #[case::owner_rw(1, 1, 5, 5, "rw,--,--", true, true)]
    #[case::owner_ro(1, 1, 5, 5, "r-,--,--", true, false)]
    #[case::peer_same_privilege(2, 1, 5, 5, "--,rw,--", true, true)]
    #[case::other_no_access(3, 1, 5, 5, "--,--,--", false, false)]
    #[case::other_privilege_override(3, 1, 1, 5, "--,--,--", true, true)]
    fn role_algebra(
        #[case] requester_uuid: i64,
        #[case] owner_uuid: i64,
        #[case] owner_privilege: i64,
        #[case] requester_privilege: i64,
        #[case] permission: &str,
        #[case] expect_read: bool,
        #[case] expect_write: bool,
    ) {
        let requester = user(requester_uuid, requester_privilege);
        let owner = user(owner_uuid, owner_privilege);
        let attribute = attr(owner_uuid, permission);

        let decision = decide(&requester, &owner, &attribute);
        assert_eq!(decision.allows(Op::Read), expect_read);
        assert_eq!(decision.allows(Op::Write), expect_write);
    }

    #[test]
    fn security_is_owner_or_root_only() {
        let root = user(1, 0);
        let owner = user(2, 10);
        let peer = user(3, 10);

        let attribute = attr(2, "rw,rw,rw");

        assert!(decide(&owner, &owner, &attribute).allows(Op::Security));
        assert!(decide(&root, &owner, &attribute).allows(Op::Security));
        assert!(!decide(&peer, &owner, &attribute).allows(Op::Security));
    }

    #[test]
    fn permission_round_trips_through_render() {
        let permission = Permission::parse("rw,r-,--").expect("parse");
        assert_eq!(permission.render(), "rw,r-,--");
    }

    #[test]
    fn malformed_permission_is_rejected() {
        assert!(Permission::parse("rw,r-").is_err());
        assert!(Permission::parse("xy,r-,--").is_err());
    }

    #[test]
    fn uid_is_stable_for_the_same_path() {
        let path = Utf8PathBuf::from("Videos/Show/1/video.mp4");
        assert_eq!(compute_uid(&path), compute_uid(&path));
    }
}
