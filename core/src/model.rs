//! Persistent domain model shared by the store, registry and engine.

use chrono::DateTime;
use chrono::Utc;
use scmsync_adapters::ChangeAction;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            Serialize,
            Deserialize,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw)
            }
        }
    };
}

id_type!(
    /// Row id of a project.
    ProjectId
);
id_type!(
    /// Row id of a repository.
    RepositoryId
);
id_type!(
    /// Row id of a changeset.
    ChangesetId
);
id_type!(
    /// Identifier of a user in the external user directory.
    UserId
);

/// A project groups repositories; only active projects are synced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: ProjectId,
    pub identifier: String,
    pub name: String,
    pub is_active: bool,
}

/// A registered repository mirror.
///
/// `password_cipher` holds the credential exactly as stored, which is
/// either ciphertext produced by [`crate::CredentialCipher`] or a
/// plaintext value written before a secret was configured. Use the
/// cipher to recover the plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub id: RepositoryId,
    pub project_id: ProjectId,
    pub backend: String,
    /// Unique within the project; absent only for the default repository.
    pub identifier: Option<String>,
    pub url: String,
    pub root_url: Option<String>,
    pub username: Option<String>,
    pub password_cipher: Option<String>,
    pub path_encoding: Option<String>,
    pub log_encoding: Option<String>,
    pub is_default: bool,
    pub extra_info: serde_json::Map<String, serde_json::Value>,
}

impl Repository {
    /// Encoding of commit messages, falling back to UTF-8 when unset.
    pub fn log_encoding(&self) -> &str {
        match self.log_encoding.as_deref().map(str::trim) {
            Some(enc) if !enc.is_empty() => enc,
            _ => "UTF-8",
        }
    }

    /// Human-readable name: the identifier when present, a fixed label
    /// for the anonymous default repository, otherwise the backend name.
    pub fn display_name(&self) -> String {
        if let Some(identifier) = self.identifier.as_deref() {
            if !identifier.is_empty() {
                return identifier.to_string();
            }
        }
        if self.is_default {
            return "default".to_string();
        }
        self.backend.clone()
    }
}

/// Input for registering a repository; validation and credential
/// encryption happen in [`crate::RepositoryRegistry::create_repository`].
#[derive(Debug, Clone, Default)]
pub struct NewRepository {
    pub backend: String,
    pub identifier: Option<String>,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub path_encoding: Option<String>,
    pub log_encoding: Option<String>,
    pub is_default: bool,
}

impl NewRepository {
    pub fn new(backend: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            url: url.into(),
            ..Self::default()
        }
    }
}

/// A mirrored commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub id: ChangesetId,
    pub repository_id: RepositoryId,
    pub revision: String,
    pub committer: String,
    /// Resolved user, if committer identity resolution found one.
    pub user_id: Option<UserId>,
    pub committed_at: DateTime<Utc>,
    pub message: String,
}

impl Changeset {
    /// Short form of the revision for display, mirroring the
    /// abbreviation commonly used for long hashes.
    pub fn short_revision(&self) -> &str {
        match self.revision.char_indices().nth(8) {
            Some((idx, _)) => &self.revision[..idx],
            None => &self.revision,
        }
    }
}

/// A path touched by a changeset. Paths are stored with a leading
/// slash regardless of how the adapter reported them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub id: i64,
    pub changeset_id: ChangesetId,
    pub action: ChangeAction,
    pub path: String,
    pub from_path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn repository() -> Repository {
        Repository {
            id: RepositoryId(1),
            project_id: ProjectId(1),
            backend: "git".to_string(),
            identifier: Some("main".to_string()),
            url: "/srv/git/main.git".to_string(),
            root_url: None,
            username: None,
            password_cipher: None,
            path_encoding: None,
            log_encoding: None,
            is_default: false,
            extra_info: serde_json::Map::new(),
        }
    }

    #[test]
    fn log_encoding_defaults_to_utf8() {
        let mut repo = repository();
        assert_eq!(repo.log_encoding(), "UTF-8");
        repo.log_encoding = Some("  ".to_string());
        assert_eq!(repo.log_encoding(), "UTF-8");
        repo.log_encoding = Some("ISO-8859-1".to_string());
        assert_eq!(repo.log_encoding(), "ISO-8859-1");
    }

    #[test]
    fn display_name_prefers_identifier() {
        let mut repo = repository();
        assert_eq!(repo.display_name(), "main");
        repo.identifier = None;
        repo.is_default = true;
        assert_eq!(repo.display_name(), "default");
        repo.is_default = false;
        assert_eq!(repo.display_name(), "git");
    }

    #[test]
    fn short_revision_truncates_long_hashes() {
        let changeset = Changeset {
            id: ChangesetId(1),
            repository_id: RepositoryId(1),
            revision: "83ca5fd546063a3c7dc2e568ba3355661a9e2b2c".to_string(),
            committer: "jsmith".to_string(),
            user_id: None,
            committed_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            message: String::new(),
        };
        assert_eq!(changeset.short_revision(), "83ca5fd5");

        let numeric = Changeset {
            revision: "1234".to_string(),
            ..changeset
        };
        assert_eq!(numeric.short_revision(), "1234");
    }

    #[test]
    fn id_types_display_their_raw_value() {
        assert_eq!(RepositoryId(42).to_string(), "42");
        assert_eq!(UserId::from(7), UserId(7));
    }
}
