//! Shared embedded-database bootstrap for [`crate::identity`] and [`crate::authz`].
//!
//! Both components share a single libSQL connection backed by one SQLite file under
//! the data directory; they disagree about schema but agree about the connection and
//! the migration machinery, so that machinery lives here.

use anyhow::Context as _;
use camino::Utf8Path;
use libsql::Connection;

/// Applied in order; `PRAGMA user_version` records how many have run, the same
/// approach `job-queue-libsql` uses to avoid a separate migrations table.
const MIGRATIONS: &[&str] = &[
    // 0 -> 1
    "
    CREATE TABLE users (
        uuid        INTEGER PRIMARY KEY,
        username    TEXT NOT NULL UNIQUE,
        parent_id   INTEGER NOT NULL,
        public_key  BLOB NOT NULL,
        privilege   INTEGER NOT NULL
    );

    CREATE TABLE resource_attributes (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        uid         TEXT NOT NULL UNIQUE,
        owner       INTEGER NOT NULL,
        permission  TEXT NOT NULL
    );

    -- Adjacency-list directory graph. Built by the original system but not read by
    -- any flow covered here (see DESIGN.md, Open Question (a)); kept for schema
    -- compatibility only.
    CREATE TABLE directory_index (
        node_id     INTEGER PRIMARY KEY,
        parent_id   INTEGER,
        name        TEXT NOT NULL
    );
    ",
];

pub async fn open(path: &Utf8Path) -> anyhow::Result<Connection> {
    let conn = libsql::Builder::new_local(path.as_str())
        .build()
        .await
        .context("failed to open libSQL database")?
        .connect()
        .context("failed to connect to libSQL database")?;

    apply_pragmas(&conn).await?;
    migrate(&conn).await?;

    Ok(conn)
}

async fn apply_pragmas(conn: &Connection) -> anyhow::Result<()> {
    const PRAGMAS: &str = "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 15000;
        PRAGMA foreign_keys = ON;
    ";

    conn.execute_batch(PRAGMAS)
        .await
        .context("failed to apply PRAGMAs")?;

    Ok(())
}

async fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let user_version = query_user_version(conn).await?;

    let Some(remaining) = MIGRATIONS.get(user_version..) else {
        warn!(user_version, "user_version is set to an unexpected value");
        return Ok(());
    };

    if remaining.is_empty() {
        debug!(user_version, "Database is already up to date");
        return Ok(());
    }

    info!(user_version, pending = remaining.len(), "Applying migrations");

    for (offset, sql_query) in remaining.iter().enumerate() {
        let migration_id = user_version + offset;

        conn.execute_batch(sql_query)
            .await
            .with_context(|| format!("failed to apply migration {migration_id}"))?;

        update_user_version(conn, migration_id + 1).await?;
    }

    Ok(())
}

async fn query_user_version(conn: &Connection) -> anyhow::Result<usize> {
    let row = conn
        .query("PRAGMA user_version", ())
        .await
        .context("failed to query user_version")?
        .next()
        .await
        .context("failed to read row")?
        .context("no row returned for PRAGMA user_version")?;

    let value: u64 = row.get(0).context("failed to read user_version value")?;

    Ok(usize::try_from(value).expect("user_version never exceeds usize range"))
}

async fn update_user_version(conn: &Connection, value: usize) -> anyhow::Result<()> {
    let value = u64::try_from(value).expect("migration count never exceeds u64 range");

    conn.execute(&format!("PRAGMA user_version = {value}"), ())
        .await
        .context("failed to update user_version")?;

    Ok(())
}
