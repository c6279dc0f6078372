//! Project and repository rows.

use super::Result;
use super::Store;
use super::StoreError;
use super::constraint_error;
use super::in_transaction;
use crate::model::Project;
use crate::model::ProjectId;
use crate::model::Repository;
use crate::model::RepositoryId;
use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::TransactionBehavior;
use rusqlite::params;

const REPOSITORY_COLUMNS: &str = "id, project_id, backend, identifier, url, root_url, \
     username, password_cipher, path_encoding, log_encoding, is_default, extra_info";

/// Pre-validated repository row, produced by the registry after
/// validation and credential encryption.
#[derive(Debug, Clone)]
pub struct InsertRepository {
    pub project_id: ProjectId,
    pub backend: String,
    pub identifier: Option<String>,
    pub url: String,
    pub root_url: Option<String>,
    pub username: Option<String>,
    pub password_cipher: Option<String>,
    pub path_encoding: Option<String>,
    pub log_encoding: Option<String>,
    pub is_default: bool,
}

fn row_to_project(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: ProjectId(row.get(0)?),
        identifier: row.get(1)?,
        name: row.get(2)?,
        is_active: row.get(3)?,
    })
}

fn row_to_repository(row: &Row<'_>) -> rusqlite::Result<Repository> {
    let extra: Option<String> = row.get(11)?;
    Ok(Repository {
        id: RepositoryId(row.get(0)?),
        project_id: ProjectId(row.get(1)?),
        backend: row.get(2)?,
        identifier: row.get(3)?,
        url: row.get(4)?,
        root_url: row.get(5)?,
        username: row.get(6)?,
        password_cipher: row.get(7)?,
        path_encoding: row.get(8)?,
        log_encoding: row.get(9)?,
        is_default: row.get(10)?,
        extra_info: extra
            .and_then(|text| serde_json::from_str(&text).ok())
            .unwrap_or_default(),
    })
}

fn repository_in_tx(tx: &Transaction<'_>, id: RepositoryId) -> Result<Repository> {
    tx.query_row(
        &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
        params![id.0],
        row_to_repository,
    )
    .optional()?
    .ok_or(StoreError::NotFound("repository"))
}

impl Store {
    pub async fn create_project(&self, identifier: String, name: String) -> Result<Project> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO projects (identifier, name, is_active) VALUES (?1, ?2, 1)",
                params![identifier, name],
            )
            .map_err(|e| constraint_error(e, "project identifier already in use"))?;
            let id = conn.last_insert_rowid();
            Ok(Project {
                id: ProjectId(id),
                identifier,
                name,
                is_active: true,
            })
        })
        .await
    }

    pub async fn find_project(&self, id: ProjectId) -> Result<Option<Project>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, identifier, name, is_active FROM projects WHERE id = ?1",
                    params![id.0],
                    row_to_project,
                )
                .optional()?)
        })
        .await
    }

    pub async fn find_project_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Project>> {
        let identifier = identifier.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, identifier, name, is_active FROM projects \
                     WHERE identifier = ?1",
                    params![identifier],
                    row_to_project,
                )
                .optional()?)
        })
        .await
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, identifier, name, is_active FROM projects ORDER BY identifier",
            )?;
            let projects = stmt
                .query_map([], row_to_project)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(projects)
        })
        .await
    }

    pub async fn active_projects(&self) -> Result<Vec<Project>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, identifier, name, is_active FROM projects \
                 WHERE is_active = 1 ORDER BY identifier",
            )?;
            let projects = stmt
                .query_map([], row_to_project)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(projects)
        })
        .await
    }

    pub async fn set_project_active(&self, id: ProjectId, active: bool) -> Result<()> {
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "UPDATE projects SET is_active = ?1 WHERE id = ?2",
                params![active, id.0],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("project"));
            }
            Ok(())
        })
        .await
    }

    /// Insert a repository row. When the row is flagged as default, any
    /// previous default of the project is cleared in the same
    /// transaction.
    pub async fn insert_repository(&self, rec: InsertRepository) -> Result<Repository> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                if rec.is_default {
                    tx.execute(
                        "UPDATE repositories SET is_default = 0 WHERE project_id = ?1",
                        params![rec.project_id.0],
                    )?;
                }
                tx.execute(
                    "INSERT INTO repositories (project_id, backend, identifier, url, \
                     root_url, username, password_cipher, path_encoding, log_encoding, \
                     is_default, extra_info) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL)",
                    params![
                        rec.project_id.0,
                        rec.backend,
                        rec.identifier,
                        rec.url,
                        rec.root_url,
                        rec.username,
                        rec.password_cipher,
                        rec.path_encoding,
                        rec.log_encoding,
                        rec.is_default,
                    ],
                )
                .map_err(|e| {
                    constraint_error(e, "repository identifier already used in this project")
                })?;
                let id = RepositoryId(tx.last_insert_rowid());
                repository_in_tx(tx, id)
            })
        })
        .await
    }

    pub async fn find_repository(&self, id: RepositoryId) -> Result<Option<Repository>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {REPOSITORY_COLUMNS} FROM repositories WHERE id = ?1"),
                    params![id.0],
                    row_to_repository,
                )
                .optional()?)
        })
        .await
    }

    pub async fn find_repository_by_identifier(
        &self,
        project_id: ProjectId,
        identifier: &str,
    ) -> Result<Option<Repository>> {
        let identifier = identifier.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {REPOSITORY_COLUMNS} FROM repositories \
                         WHERE project_id = ?1 AND identifier = ?2"
                    ),
                    params![project_id.0, identifier],
                    row_to_repository,
                )
                .optional()?)
        })
        .await
    }

    pub async fn default_repository(
        &self,
        project_id: ProjectId,
    ) -> Result<Option<Repository>> {
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {REPOSITORY_COLUMNS} FROM repositories \
                         WHERE project_id = ?1 AND is_default = 1"
                    ),
                    params![project_id.0],
                    row_to_repository,
                )
                .optional()?)
        })
        .await
    }

    /// Repositories of a project, default first, then by identifier.
    pub async fn repositories_of(&self, project_id: ProjectId) -> Result<Vec<Repository>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {REPOSITORY_COLUMNS} FROM repositories \
                 WHERE project_id = ?1 ORDER BY is_default DESC, identifier"
            ))?;
            let repos = stmt
                .query_map(params![project_id.0], row_to_repository)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(repos)
        })
        .await
    }

    pub async fn count_repositories(&self, project_id: ProjectId) -> Result<i64> {
        self.with_conn(move |conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM repositories WHERE project_id = ?1",
                params![project_id.0],
                |row| row.get(0),
            )?)
        })
        .await
    }

    /// Make `id` the single default repository of `project_id`.
    pub async fn set_default_repository(
        &self,
        project_id: ProjectId,
        id: RepositoryId,
    ) -> Result<()> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                tx.execute(
                    "UPDATE repositories SET is_default = 0 \
                     WHERE project_id = ?1 AND id <> ?2",
                    params![project_id.0, id.0],
                )?;
                let affected = tx.execute(
                    "UPDATE repositories SET is_default = 1 \
                     WHERE project_id = ?1 AND id = ?2",
                    params![project_id.0, id.0],
                )?;
                if affected == 0 {
                    return Err(StoreError::NotFound("repository"));
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn update_root_url(&self, id: RepositoryId, root_url: String) -> Result<()> {
        self.with_conn(move |conn| {
            let affected = conn.execute(
                "UPDATE repositories SET root_url = ?1 WHERE id = ?2",
                params![root_url, id.0],
            )?;
            if affected == 0 {
                return Err(StoreError::NotFound("repository"));
            }
            Ok(())
        })
        .await
    }

    /// Shallow-merge `patch` into the stored extra info blob: top-level
    /// keys overwrite, everything else is preserved. Returns the
    /// updated repository.
    pub async fn merge_extra_info(
        &self,
        id: RepositoryId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Repository> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                let mut merged = repository_in_tx(tx, id)?.extra_info;
                for (key, value) in patch {
                    merged.insert(key, value);
                }
                let blob =
                    serde_json::to_string(&merged).unwrap_or_else(|_| "{}".to_string());
                tx.execute(
                    "UPDATE repositories SET extra_info = ?1 WHERE id = ?2",
                    params![blob, id.0],
                )?;
                repository_in_tx(tx, id)
            })
        })
        .await
    }

    /// Remove a repository and all mirrored state. Bulk deletes run
    /// child tables first so foreign keys are never dangling.
    pub async fn delete_repository(&self, id: RepositoryId) -> Result<()> {
        self.with_conn(move |conn| {
            in_transaction(conn, TransactionBehavior::Immediate, |tx| {
                tx.execute(
                    "DELETE FROM changes WHERE changeset_id IN \
                     (SELECT id FROM changesets WHERE repository_id = ?1)",
                    params![id.0],
                )?;
                tx.execute(
                    "DELETE FROM changeset_work_items WHERE changeset_id IN \
                     (SELECT id FROM changesets WHERE repository_id = ?1)",
                    params![id.0],
                )?;
                tx.execute(
                    "DELETE FROM changeset_parents WHERE changeset_id IN \
                     (SELECT id FROM changesets WHERE repository_id = ?1)",
                    params![id.0],
                )?;
                tx.execute(
                    "DELETE FROM changesets WHERE repository_id = ?1",
                    params![id.0],
                )?;
                let affected =
                    tx.execute("DELETE FROM repositories WHERE id = ?1", params![id.0])?;
                if affected == 0 {
                    return Err(StoreError::NotFound("repository"));
                }
                Ok(())
            })
        })
        .await
    }
}
