//! Committer-to-user identity resolution.
//!
//! A committer string like `"John Smith <js@example.net>"` is mapped
//! to a user in three steps: reuse the user recorded on that
//! committer's newest mirrored changeset, then try the directory by
//! login, then by email. Results, including misses, are cached for the
//! lifetime of the resolver, which the engine scopes to a single sync
//! pass so explicit remappings are picked up by the next one.

use crate::model::RepositoryId;
use crate::model::UserId;
use crate::store::Result;
use crate::store::Store;
use std::collections::HashMap;
use std::sync::Mutex;

/// Read-only view of the user directory the mirror runs next to.
pub trait UserDirectory: Send + Sync {
    fn find_by_login(&self, login: &str) -> Option<UserId>;
    fn find_by_email(&self, email: &str) -> Option<UserId>;
}

/// Directory backed by the configured user list. Login and email
/// lookups are case-insensitive.
#[derive(Debug, Default)]
pub struct StaticUserDirectory {
    by_login: HashMap<String, UserId>,
    by_email: HashMap<String, UserId>,
}

impl StaticUserDirectory {
    pub fn new(users: &[crate::config::UserEntry]) -> Self {
        let mut by_login = HashMap::new();
        let mut by_email = HashMap::new();
        for user in users {
            let id = UserId(user.id);
            if !user.login.trim().is_empty() {
                by_login.insert(user.login.trim().to_lowercase(), id);
            }
            if let Some(email) = user.email.as_deref() {
                if !email.trim().is_empty() {
                    by_email.insert(email.trim().to_lowercase(), id);
                }
            }
        }
        Self { by_login, by_email }
    }
}

impl UserDirectory for StaticUserDirectory {
    fn find_by_login(&self, login: &str) -> Option<UserId> {
        self.by_login.get(&login.trim().to_lowercase()).copied()
    }

    fn find_by_email(&self, email: &str) -> Option<UserId> {
        self.by_email.get(&email.trim().to_lowercase()).copied()
    }
}

/// Split a committer string into name and optional email.
///
/// Returns `None` for blank input, for a missing name before `<`, and
/// for an opening `<` that is never closed.
pub fn parse_committer(committer: &str) -> Option<(String, Option<String>)> {
    let trimmed = committer.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.split_once('<') {
        None => Some((trimmed.to_string(), None)),
        Some((name, rest)) => {
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            let email = rest.trim_end().strip_suffix('>')?.trim();
            let email = if email.is_empty() {
                None
            } else {
                Some(email.to_string())
            };
            Some((name.to_string(), email))
        }
    }
}

/// Per-pass resolution cache over the store and a [`UserDirectory`].
#[derive(Default)]
pub struct CommitterResolver {
    cache: Mutex<HashMap<String, Option<UserId>>>,
}

impl CommitterResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn resolve(
        &self,
        store: &Store,
        directory: &dyn UserDirectory,
        repository_id: RepositoryId,
        committer: &str,
    ) -> Result<Option<UserId>> {
        if committer.trim().is_empty() {
            return Ok(None);
        }
        if let Some(cached) = self.cached(committer) {
            return Ok(cached);
        }

        let resolved = match store
            .latest_user_for_committer(repository_id, committer)
            .await?
        {
            Some(user) => Some(user),
            None => resolve_via_directory(directory, committer),
        };

        self.remember(committer, resolved);
        Ok(resolved)
    }

    /// Drop cached lookups, forcing the next resolve to hit the store
    /// and directory again.
    pub fn invalidate(&self) {
        self.lock().clear();
    }

    fn cached(&self, committer: &str) -> Option<Option<UserId>> {
        self.lock().get(committer).copied()
    }

    fn remember(&self, committer: &str, user: Option<UserId>) {
        self.lock().insert(committer.to_string(), user);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Option<UserId>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn resolve_via_directory(directory: &dyn UserDirectory, committer: &str) -> Option<UserId> {
    let (name, email) = parse_committer(committer)?;
    if let Some(user) = directory.find_by_login(&name) {
        return Some(user);
    }
    directory.find_by_email(email.as_deref()?)
}
