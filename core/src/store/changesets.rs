//! Mirrored changesets, their file changes, parent links and work
//! item references.

use super::Result;
use super::Store;
use super::StoreError;
use super::in_transaction;
use crate::model::Change;
use crate::model::Changeset;
use crate::model::ChangesetId;
use crate::model::RepositoryId;
use crate::model::UserId;
use chrono::DateTime;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::TransactionBehavior;
use rusqlite::params;
use scmsync_adapters::ChangeAction;
use scmsync_adapters::Commit;

const CHANGESET_COLUMNS: &str =
    "id, repository_id, revision, committer, user_id, committed_at, message";

fn row_to_changeset(row: &Row<'_>) -> rusqlite::Result<Changeset> {
    Ok(Changeset {
        id: ChangesetId(row.get(0)?),
        repository_id: RepositoryId(row.get(1)?),
        revision: row.get(2)?,
        committer: row.get(3)?,
        user_id: row.get::<_, Option<i64>>(4)?.map(UserId),
        committed_at: DateTime::from_timestamp(row.get(5)?, 0).unwrap_or_default(),
        message: row.get(6)?,
    })
}

fn row_to_change(row: &Row<'_>) -> rusqlite::Result<Change> {
    let code: String = row.get(2)?;
    let action = ChangeAction::from_code(&code).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown change action {code:?}").into(),
        )
    })?;
    Ok(Change {
        id: row.get(0)?,
        changeset_id: ChangesetId(row.get(1)?),
        action,
        path: row.get(3)?,
        from_path: row.get(4)?,
    })
}

/// Paths are stored rooted at the repository, with a leading slash.
fn with_leading_slash(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

impl Store {
    /// Revision of the newest mirrored changeset, by insertion order.
    /// This is the marker handed to the adapter on the next sync pass.
    pub async fn sync_marker(&self, repository_id: RepositoryId) -> Result<Option<String>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT revision FROM changesets WHERE repository_id = ?1 \
                     ORDER BY id DESC LIMIT 1",
                    params![repository_id.0],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    /// Store one commit with its changes and parent links.
    ///
    /// Returns `None` when the revision is already mirrored; the
    /// existing row is left untouched. Parents that are not mirrored
    /// yet are skipped, which only happens when history arrives out of
    /// topological order.
    pub async fn ingest_commit(
        &self,
        repository_id: RepositoryId,
        commit: Commit,
        user_id: Option<UserId>,
    ) -> Result<Option<ChangesetId>> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO changesets \
                     (repository_id, revision, committer, user_id, committed_at, message) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        repository_id.0,
                        commit.revision,
                        commit.committer,
                        user_id.map(|u| u.0),
                        commit.committed_at.timestamp(),
                        commit.message,
                    ],
                )?;
                if inserted == 0 {
                    return Ok(None);
                }
                let changeset_id = ChangesetId(tx.last_insert_rowid());

                for change in &commit.changes {
                    tx.execute(
                        "INSERT INTO changes (changeset_id, action, path, from_path) \
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            changeset_id.0,
                            change.action.code(),
                            with_leading_slash(&change.path),
                            change.from_path.as_deref().map(with_leading_slash),
                        ],
                    )?;
                }

                for (seq, parent) in commit.parents.iter().enumerate() {
                    let parent_id: Option<i64> = tx
                        .query_row(
                            "SELECT id FROM changesets \
                             WHERE repository_id = ?1 AND revision = ?2",
                            params![repository_id.0, parent],
                            |row| row.get(0),
                        )
                        .optional()?;
                    if let Some(parent_id) = parent_id {
                        tx.execute(
                            "INSERT OR IGNORE INTO changeset_parents \
                             (changeset_id, parent_id, seq) VALUES (?1, ?2, ?3)",
                            params![changeset_id.0, parent_id, seq as i64],
                        )?;
                    }
                }

                Ok(Some(changeset_id))
            })
        })
        .await
    }

    pub async fn changeset_count(&self, repository_id: RepositoryId) -> Result<i64> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM changesets WHERE repository_id = ?1",
                params![repository_id.0],
                |row| row.get(0),
            )?)
        })
        .await
    }

    pub async fn find_changeset_by_revision(
        &self,
        repository_id: RepositoryId,
        revision: &str,
    ) -> Result<Option<Changeset>> {
        let revision = revision.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {CHANGESET_COLUMNS} FROM changesets \
                         WHERE repository_id = ?1 AND revision = ?2"
                    ),
                    params![repository_id.0, revision],
                    row_to_changeset,
                )
                .optional()?)
        })
        .await
    }

    /// Look up a changeset by a user-supplied token. All-digit tokens
    /// match the revision exactly; anything else is a prefix match
    /// with the newest changeset winning.
    pub async fn find_changeset(
        &self,
        repository_id: RepositoryId,
        token: &str,
    ) -> Result<Option<Changeset>> {
        let token = token.trim().to_string();
        if token.is_empty() {
            return Ok(None);
        }
        if token.bytes().all(|b| b.is_ascii_digit()) {
            return self.find_changeset_by_revision(repository_id, &token).await;
        }
        self.with_conn(move |conn| {
            let pattern = format!("{}%", escape_like(&token));
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {CHANGESET_COLUMNS} FROM changesets \
                         WHERE repository_id = ?1 AND revision LIKE ?2 ESCAPE '\\' \
                         ORDER BY committed_at DESC, id DESC LIMIT 1"
                    ),
                    params![repository_id.0, pattern],
                    row_to_changeset,
                )
                .optional()?)
        })
        .await
    }

    /// Newest changesets, optionally restricted to those touching
    /// `path`. An empty path means no filter.
    pub async fn latest_changesets(
        &self,
        repository_id: RepositoryId,
        path: &str,
        limit: usize,
    ) -> Result<Vec<Changeset>> {
        let path = path.trim().to_string();
        self.with_conn(move |conn| {
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            let changesets = if path.is_empty() {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {CHANGESET_COLUMNS} FROM changesets \
                     WHERE repository_id = ?1 \
                     ORDER BY committed_at DESC, id DESC LIMIT ?2"
                ))?;
                stmt.query_map(params![repository_id.0, limit], row_to_changeset)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                let path = with_leading_slash(&path);
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT cs.id, cs.repository_id, cs.revision, cs.committer, \
                     cs.user_id, cs.committed_at, cs.message \
                     FROM changesets cs JOIN changes ch ON ch.changeset_id = cs.id \
                     WHERE cs.repository_id = ?1 AND ch.path = ?2 \
                     ORDER BY cs.committed_at DESC, cs.id DESC LIMIT ?3",
                )?;
                stmt.query_map(params![repository_id.0, path, limit], row_to_changeset)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            Ok(changesets)
        })
        .await
    }

    /// File changes of a changeset, ordered by path.
    pub async fn changes_of(&self, changeset_id: ChangesetId) -> Result<Vec<Change>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, changeset_id, action, path, from_path FROM changes \
                 WHERE changeset_id = ?1 ORDER BY path",
            )?;
            let changes = stmt
                .query_map(params![changeset_id.0], row_to_change)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(changes)
        })
        .await
    }

    /// Parent revisions of a changeset in recorded order.
    pub async fn parents_of(&self, changeset_id: ChangesetId) -> Result<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT p.revision FROM changeset_parents cp \
                 JOIN changesets p ON p.id = cp.parent_id \
                 WHERE cp.changeset_id = ?1 ORDER BY cp.seq",
            )?;
            let revisions = stmt
                .query_map(params![changeset_id.0], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(revisions)
        })
        .await
    }

    /// Distinct committer strings with the user each one currently
    /// maps to.
    pub async fn committers(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<(String, Option<UserId>)>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT committer, user_id FROM changesets \
                 WHERE repository_id = ?1 ORDER BY committer, user_id",
            )?;
            let committers = stmt
                .query_map(params![repository_id.0], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<i64>>(1)?.map(UserId),
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(committers)
        })
        .await
    }

    /// Rewrite the stored user for every changeset of each listed
    /// committer. All updates run in one transaction; returns the
    /// number of changesets touched.
    pub async fn apply_committer_mapping(
        &self,
        repository_id: RepositoryId,
        mappings: Vec<(String, Option<UserId>)>,
    ) -> Result<usize> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                let mut touched = 0;
                for (committer, user_id) in &mappings {
                    touched += tx.execute(
                        "UPDATE changesets SET user_id = ?1 \
                         WHERE repository_id = ?2 AND committer = ?3",
                        params![user_id.map(|u| u.0), repository_id.0, committer],
                    )?;
                }
                Ok(touched)
            })
        })
        .await
    }

    /// User recorded on the newest changeset of `committer`, if any.
    pub async fn latest_user_for_committer(
        &self,
        repository_id: RepositoryId,
        committer: &str,
    ) -> Result<Option<UserId>> {
        let committer = committer.to_string();
        self.with_conn(move |conn| {
            let user: Option<Option<i64>> = conn
                .query_row(
                    "SELECT user_id FROM changesets \
                     WHERE repository_id = ?1 AND committer = ?2 \
                     ORDER BY committed_at DESC, id DESC LIMIT 1",
                    params![repository_id.0, committer],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(user.flatten().map(UserId))
        })
        .await
    }

    /// Attach work item references to a changeset, ignoring ones
    /// already present.
    pub async fn link_work_items(
        &self,
        changeset_id: ChangesetId,
        items: Vec<String>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                for item in &items {
                    tx.execute(
                        "INSERT OR IGNORE INTO changeset_work_items \
                         (changeset_id, work_item) VALUES (?1, ?2)",
                        params![changeset_id.0, item],
                    )?;
                }
                Ok(())
            })
        })
        .await
    }

    /// Replace the work item references of a changeset with `items`.
    pub async fn replace_work_items(
        &self,
        changeset_id: ChangesetId,
        items: Vec<String>,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                tx.execute(
                    "DELETE FROM changeset_work_items WHERE changeset_id = ?1",
                    params![changeset_id.0],
                )?;
                for item in &items {
                    tx.execute(
                        "INSERT OR IGNORE INTO changeset_work_items \
                         (changeset_id, work_item) VALUES (?1, ?2)",
                        params![changeset_id.0, item],
                    )?;
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn work_items(&self, changeset_id: ChangesetId) -> Result<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT work_item FROM changeset_work_items \
                 WHERE changeset_id = ?1 ORDER BY work_item",
            )?;
            let items = stmt
                .query_map(params![changeset_id.0], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<String>>>()?;
            Ok(items)
        })
        .await
    }

    /// Changesets referencing a work item, newest first, across all
    /// repositories.
    pub async fn changesets_for_work_item(&self, work_item: &str) -> Result<Vec<Changeset>> {
        let work_item = work_item.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT cs.id, cs.repository_id, cs.revision, cs.committer, \
                 cs.user_id, cs.committed_at, cs.message \
                 FROM changesets cs \
                 JOIN changeset_work_items wi ON wi.changeset_id = cs.id \
                 WHERE wi.work_item = ?1 \
                 ORDER BY cs.committed_at DESC, cs.id DESC",
            )?;
            let changesets = stmt
                .query_map(params![work_item], row_to_changeset)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(changesets)
        })
        .await
    }

    /// Every changeset id and message of a repository, oldest first.
    /// Feeds full reference rescans.
    pub async fn changeset_messages(
        &self,
        repository_id: RepositoryId,
    ) -> Result<Vec<(ChangesetId, String)>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, message FROM changesets WHERE repository_id = ?1 ORDER BY id",
            )?;
            let messages = stmt
                .query_map(params![repository_id.0], |row| {
                    Ok((ChangesetId(row.get(0)?), row.get(1)?))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(messages)
        })
        .await
    }
}
