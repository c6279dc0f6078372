//! Data carried across the adapter boundary.

use std::fmt;

use chrono::DateTime;
use chrono::Utc;
use futures::stream::BoxStream;

use crate::error::ScmResult;

/// One commit as reported by a backend, oldest-first in a revision stream.
///
/// `revision` is whatever token the backend uses to identify the commit (a
/// hash for git, a number for subversion-like systems). `parents` lists the
/// revisions of the commit's parents in backend order; parents that are not
/// mirrored locally are simply skipped at ingest time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub revision: String,
    /// Raw committer string, typically `Jane Doe <jane@example.com>`.
    pub committer: String,
    pub committed_at: DateTime<Utc>,
    pub message: String,
    pub parents: Vec<String>,
    pub changes: Vec<FileChange>,
}

/// A single path touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub action: ChangeAction,
    pub path: String,
    /// Source path for copies and renames.
    pub from_path: Option<String>,
}

/// What happened to a path in a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Added,
    Modified,
    Deleted,
    Copied,
    Renamed,
}

impl ChangeAction {
    /// Single-letter code used in persistent storage and log output.
    pub fn code(self) -> &'static str {
        match self {
            Self::Added => "A",
            Self::Modified => "M",
            Self::Deleted => "D",
            Self::Copied => "C",
            Self::Renamed => "R",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(Self::Added),
            "M" => Some(Self::Modified),
            "D" => Some(Self::Deleted),
            "C" => Some(Self::Copied),
            "R" => Some(Self::Renamed),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Final path component.
    pub name: String,
    /// Repository-relative path.
    pub path: String,
    pub kind: EntryKind,
    /// File size in bytes where the backend reports one.
    pub size: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

/// Optional backend features callers must probe before relying on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    Cat,
    Annotate,
    Branches,
    Tags,
    RevisionGraph,
    DirectoryRevisions,
}

/// Everything an adapter needs to reach one repository.
///
/// For filesystem-backed backends such as git, `url` is the repository path.
/// The encodings are hints for backends whose history is not UTF-8; adapters
/// that do not transcode may ignore them.
#[derive(Clone)]
pub struct ConnectionSettings {
    pub url: String,
    pub root_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub path_encoding: Option<String>,
    pub log_encoding: Option<String>,
}

impl ConnectionSettings {
    pub fn for_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            root_url: None,
            username: None,
            password: None,
            path_encoding: None,
            log_encoding: None,
        }
    }
}

// Keeps credentials out of log output.
impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("url", &self.url)
            .field("root_url", &self.root_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("path_encoding", &self.path_encoding)
            .field("log_encoding", &self.log_encoding)
            .finish()
    }
}

/// Lazy, finite stream of commits, oldest first.
pub type RevisionStream = BoxStream<'static, ScmResult<Commit>>;
