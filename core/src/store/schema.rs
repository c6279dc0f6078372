//! Schema definition and migrations, tracked via `PRAGMA user_version`.

use super::Result;
use super::StoreError;
use super::in_transaction;
use rusqlite::Connection;
use rusqlite::TransactionBehavior;

pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS projects (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    identifier TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project_id INTEGER NOT NULL REFERENCES projects(id),
    backend TEXT NOT NULL,
    identifier TEXT,
    url TEXT NOT NULL,
    root_url TEXT,
    username TEXT,
    password_cipher TEXT,
    path_encoding TEXT,
    log_encoding TEXT,
    is_default INTEGER NOT NULL DEFAULT 0,
    extra_info TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_repositories_project_identifier
    ON repositories(project_id, identifier);

CREATE TABLE IF NOT EXISTS changesets (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id INTEGER NOT NULL REFERENCES repositories(id),
    revision TEXT NOT NULL,
    committer TEXT NOT NULL DEFAULT '',
    user_id INTEGER,
    committed_at INTEGER NOT NULL,
    message TEXT NOT NULL DEFAULT '',
    UNIQUE (repository_id, revision)
);

CREATE INDEX IF NOT EXISTS idx_changesets_committed
    ON changesets(repository_id, committed_at DESC, id DESC);
CREATE INDEX IF NOT EXISTS idx_changesets_committer
    ON changesets(repository_id, committer);

CREATE TABLE IF NOT EXISTS changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    action TEXT NOT NULL,
    path TEXT NOT NULL,
    from_path TEXT
);

CREATE INDEX IF NOT EXISTS idx_changes_changeset ON changes(changeset_id);
CREATE INDEX IF NOT EXISTS idx_changes_path ON changes(path);

CREATE TABLE IF NOT EXISTS changeset_parents (
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    parent_id INTEGER NOT NULL REFERENCES changesets(id),
    seq INTEGER NOT NULL,
    PRIMARY KEY (changeset_id, seq)
);

CREATE INDEX IF NOT EXISTS idx_changeset_parents_parent
    ON changeset_parents(parent_id);

CREATE TABLE IF NOT EXISTS changeset_work_items (
    changeset_id INTEGER NOT NULL REFERENCES changesets(id),
    work_item TEXT NOT NULL,
    PRIMARY KEY (changeset_id, work_item)
);

CREATE INDEX IF NOT EXISTS idx_changeset_work_items_item
    ON changeset_work_items(work_item);
";

/// Bring the database at `conn` up to the current schema version.
pub(crate) fn migrate(conn: &mut Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| StoreError::Migration(e.to_string()))?;
    if version > SCHEMA_VERSION {
        return Err(StoreError::Migration(format!(
            "database schema version {version} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }
    in_transaction(conn, TransactionBehavior::Immediate, |tx| {
        if version < 1 {
            tx.execute_batch(SCHEMA_SQL)?;
        }
        tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(())
    })
    .map_err(|e| match e {
        StoreError::Migration(_) => e,
        other => StoreError::Migration(other.to_string()),
    })
}
