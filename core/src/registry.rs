//! Repository registration and administration.
//!
//! The registry is the write surface for projects and repositories:
//! it validates identifiers, encrypts credentials before they reach
//! the store, keeps the single-default invariant, and builds
//! configured adapters for the sync engine.

use crate::cipher::CipherError;
use crate::cipher::CredentialCipher;
use crate::model::NewRepository;
use crate::model::Project;
use crate::model::ProjectId;
use crate::model::Repository;
use crate::model::RepositoryId;
use crate::model::UserId;
use crate::store::InsertRepository;
use crate::store::Store;
use crate::store::StoreError;
use scmsync_adapters::AdapterRegistry;
use scmsync_adapters::ConnectionSettings;
use scmsync_adapters::ScmAdapter;
use scmsync_adapters::ScmError;
use std::sync::Arc;
use tracing::info;

pub const MAX_IDENTIFIER_LEN: usize = 255;
pub const MAX_PASSWORD_LEN: usize = 255;

/// Identifiers that collide with revision-browsing routes.
const RESERVED_IDENTIFIERS: &[&str] = &[
    "show", "entry", "raw", "changes", "annotate", "diff", "stats", "graph",
];

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error(transparent)]
    Scm(#[from] ScmError),

    #[error("project {0} not found")]
    ProjectNotFound(ProjectId),

    #[error("repository {0} not found")]
    RepositoryNotFound(RepositoryId),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("identifier may only contain lowercase letters, digits and dashes")]
    IdentifierCharset,

    #[error("identifier must not consist solely of digits")]
    IdentifierNumeric,

    #[error("identifier {0:?} is reserved")]
    IdentifierReserved(String),

    #[error("identifier is longer than {MAX_IDENTIFIER_LEN} characters")]
    IdentifierTooLong,

    #[error("identifier is already used by a repository of this project")]
    IdentifierTaken,

    #[error("a non-default repository requires an identifier")]
    IdentifierRequired,

    #[error("the current default repository has no identifier and cannot be demoted")]
    DefaultNotDemotable,

    #[error("url must not be blank")]
    UrlBlank,

    #[error("backend {0:?} is not enabled")]
    BackendDisabled(String),

    #[error("password is longer than {MAX_PASSWORD_LEN} characters")]
    PasswordTooLong,
}

/// Validate a repository or project identifier.
pub fn validate_identifier(identifier: &str) -> Result<(), ValidationError> {
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ValidationError::IdentifierTooLong);
    }
    if !identifier
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return Err(ValidationError::IdentifierCharset);
    }
    if !identifier.is_empty() && identifier.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::IdentifierNumeric);
    }
    if RESERVED_IDENTIFIERS.contains(&identifier) {
        return Err(ValidationError::IdentifierReserved(identifier.to_string()));
    }
    Ok(())
}

#[derive(Clone)]
pub struct RepositoryRegistry {
    store: Store,
    cipher: CredentialCipher,
    adapters: Arc<AdapterRegistry>,
    enabled_backends: Vec<String>,
}

impl RepositoryRegistry {
    pub fn new(
        store: Store,
        cipher: CredentialCipher,
        adapters: Arc<AdapterRegistry>,
        enabled_backends: Vec<String>,
    ) -> Self {
        Self {
            store,
            cipher,
            adapters,
            enabled_backends,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn cipher(&self) -> &CredentialCipher {
        &self.cipher
    }

    pub async fn create_project(
        &self,
        identifier: &str,
        name: &str,
    ) -> Result<Project, RegistryError> {
        let identifier = identifier.trim().to_string();
        if identifier.is_empty() {
            return Err(ValidationError::IdentifierRequired.into());
        }
        validate_identifier(&identifier)?;
        let name = name.trim();
        let name = if name.is_empty() {
            identifier.clone()
        } else {
            name.to_string()
        };
        let project = self.store.create_project(identifier, name).await?;
        info!(project = %project.identifier, "project created");
        Ok(project)
    }

    pub async fn find_project(&self, identifier: &str) -> Result<Option<Project>, RegistryError> {
        Ok(self.store.find_project_by_identifier(identifier).await?)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, RegistryError> {
        Ok(self.store.list_projects().await?)
    }

    pub async fn set_project_active(
        &self,
        id: ProjectId,
        active: bool,
    ) -> Result<(), RegistryError> {
        Ok(self.store.set_project_active(id, active).await?)
    }

    /// Register a repository. The first repository of a project
    /// becomes its default even when not requested; an explicit
    /// default demotes the previous one, provided the previous one
    /// carries an identifier.
    pub async fn create_repository(
        &self,
        project_id: ProjectId,
        new: NewRepository,
    ) -> Result<Repository, RegistryError> {
        if self.store.find_project(project_id).await?.is_none() {
            return Err(RegistryError::ProjectNotFound(project_id));
        }

        let url = new.url.trim().to_string();
        if url.is_empty() {
            return Err(ValidationError::UrlBlank.into());
        }

        let backend = new.backend.trim().to_string();
        if !self.enabled_backends.iter().any(|b| b == &backend) {
            return Err(ValidationError::BackendDisabled(backend).into());
        }

        let identifier = new
            .identifier
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        if let Some(identifier) = &identifier {
            validate_identifier(identifier)?;
            if self
                .store
                .find_repository_by_identifier(project_id, identifier)
                .await?
                .is_some()
            {
                return Err(ValidationError::IdentifierTaken.into());
            }
        }

        let is_default =
            new.is_default || self.store.count_repositories(project_id).await? == 0;
        if identifier.is_none() && !is_default {
            return Err(ValidationError::IdentifierRequired.into());
        }
        // A demoted repository keeps its identifier requirement, so a
        // default without one must stay the default.
        if is_default {
            if let Some(current) = self.store.default_repository(project_id).await? {
                if current.identifier.is_none() {
                    return Err(ValidationError::DefaultNotDemotable.into());
                }
            }
        }

        let password_cipher = match new.password.as_deref() {
            Some(password) if !password.is_empty() => {
                if password.len() > MAX_PASSWORD_LEN {
                    return Err(ValidationError::PasswordTooLong.into());
                }
                Some(self.cipher.encrypt(password)?)
            }
            _ => None,
        };

        let repository = self
            .store
            .insert_repository(InsertRepository {
                project_id,
                backend,
                identifier,
                url,
                root_url: None,
                username: new.username.filter(|u| !u.trim().is_empty()),
                password_cipher,
                path_encoding: new.path_encoding.filter(|e| !e.trim().is_empty()),
                log_encoding: new.log_encoding.filter(|e| !e.trim().is_empty()),
                is_default,
            })
            .await?;
        info!(
            repository = %repository.display_name(),
            backend = %repository.backend,
            is_default = repository.is_default,
            "repository registered"
        );
        Ok(repository)
    }

    pub async fn repository(&self, id: RepositoryId) -> Result<Repository, RegistryError> {
        self.store
            .find_repository(id)
            .await?
            .ok_or(RegistryError::RepositoryNotFound(id))
    }

    pub async fn repositories_of(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<Repository>, RegistryError> {
        Ok(self.store.repositories_of(project_id).await?)
    }

    /// Resolve a route parameter: all-digit parameters are row ids,
    /// anything else is an identifier within the project.
    pub async fn find_by_identifier_param(
        &self,
        project_id: ProjectId,
        param: &str,
    ) -> Result<Option<Repository>, RegistryError> {
        let param = param.trim();
        if param.is_empty() {
            return Ok(None);
        }
        if param.bytes().all(|b| b.is_ascii_digit()) {
            let id = param.parse::<i64>().map(RepositoryId).ok();
            let Some(id) = id else { return Ok(None) };
            let found = self.store.find_repository(id).await?;
            return Ok(found.filter(|repo| repo.project_id == project_id));
        }
        Ok(self
            .store
            .find_repository_by_identifier(project_id, param)
            .await?)
    }

    pub async fn set_default(&self, id: RepositoryId) -> Result<(), RegistryError> {
        let repository = self.repository(id).await?;
        if let Some(current) = self.store.default_repository(repository.project_id).await? {
            if current.id != id && current.identifier.is_none() {
                return Err(ValidationError::DefaultNotDemotable.into());
            }
        }
        self.store
            .set_default_repository(repository.project_id, id)
            .await?;
        info!(repository = %repository.display_name(), "repository set as default");
        Ok(())
    }

    pub async fn merge_extra_info(
        &self,
        id: RepositoryId,
        patch: serde_json::Map<String, serde_json::Value>,
    ) -> Result<Repository, RegistryError> {
        Ok(self.store.merge_extra_info(id, patch).await?)
    }

    pub async fn update_root_url(
        &self,
        id: RepositoryId,
        root_url: &str,
    ) -> Result<(), RegistryError> {
        Ok(self
            .store
            .update_root_url(id, root_url.trim().to_string())
            .await?)
    }

    /// Remove a repository together with every mirrored changeset,
    /// change, parent link and work item reference.
    pub async fn delete_repository(&self, id: RepositoryId) -> Result<(), RegistryError> {
        let repository = self.repository(id).await?;
        self.store.delete_repository(id).await?;
        info!(repository = %repository.display_name(), "repository deleted");
        Ok(())
    }

    pub async fn committers(
        &self,
        id: RepositoryId,
    ) -> Result<Vec<(String, Option<UserId>)>, RegistryError> {
        Ok(self.store.committers(id).await?)
    }

    /// Apply committer-to-user mappings across mirrored history.
    pub async fn apply_committer_mapping(
        &self,
        id: RepositoryId,
        mappings: Vec<(String, Option<UserId>)>,
    ) -> Result<usize, RegistryError> {
        let touched = self.store.apply_committer_mapping(id, mappings).await?;
        info!(repository = %id, touched, "committer mapping applied");
        Ok(touched)
    }

    /// Build the adapter for a repository, decrypting its stored
    /// credential.
    pub async fn adapter_for(
        &self,
        repository: &Repository,
    ) -> Result<Box<dyn ScmAdapter>, RegistryError> {
        let password = repository
            .password_cipher
            .as_deref()
            .map(|stored| self.cipher.decrypt(stored))
            .transpose()?;
        let settings = ConnectionSettings {
            url: repository.url.clone(),
            root_url: repository.root_url.clone(),
            username: repository.username.clone(),
            password,
            path_encoding: repository.path_encoding.clone(),
            log_encoding: Some(repository.log_encoding().to_string()),
        };
        Ok(self.adapters.create(&repository.backend, &settings)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn registry(dir: &TempDir) -> RepositoryRegistry {
        let store = Store::open(dir.path().join("scmsync.db")).unwrap();
        RepositoryRegistry::new(
            store,
            CredentialCipher::new("test-secret"),
            Arc::new(AdapterRegistry::builtin()),
            vec!["git".to_string()],
        )
    }

    async fn project(registry: &RepositoryRegistry) -> ProjectId {
        registry.create_project("demo", "Demo").await.unwrap().id
    }

    fn git_repo(identifier: Option<&str>) -> NewRepository {
        NewRepository {
            identifier: identifier.map(str::to_string),
            ..NewRepository::new("git", "/srv/git/demo.git")
        }
    }

    #[test]
    fn identifier_rules() {
        assert!(validate_identifier("main-mirror").is_ok());
        assert!(validate_identifier("v2").is_ok());
        assert_eq!(
            validate_identifier("Main"),
            Err(ValidationError::IdentifierCharset)
        );
        assert_eq!(
            validate_identifier("with space"),
            Err(ValidationError::IdentifierCharset)
        );
        assert_eq!(
            validate_identifier("12345"),
            Err(ValidationError::IdentifierNumeric)
        );
        assert_eq!(
            validate_identifier("diff"),
            Err(ValidationError::IdentifierReserved("diff".to_string()))
        );
        assert_eq!(
            validate_identifier(&"a".repeat(256)),
            Err(ValidationError::IdentifierTooLong)
        );
    }

    #[tokio::test]
    async fn first_repository_becomes_default() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;

        let repo = registry
            .create_repository(project_id, git_repo(None))
            .await
            .unwrap();
        assert!(repo.is_default);
        assert!(repo.identifier.is_none());

        let second = registry
            .create_repository(project_id, git_repo(Some("mirror")))
            .await
            .unwrap();
        assert!(!second.is_default);
    }

    #[tokio::test]
    async fn non_default_repository_requires_identifier() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;
        registry
            .create_repository(project_id, git_repo(None))
            .await
            .unwrap();

        let err = registry
            .create_repository(project_id, git_repo(None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::IdentifierRequired)
        ));
    }

    #[tokio::test]
    async fn anonymous_default_is_never_demoted() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;
        let anonymous = registry
            .create_repository(project_id, git_repo(None))
            .await
            .unwrap();
        assert!(anonymous.is_default);
        assert!(anonymous.identifier.is_none());

        let err = registry
            .create_repository(
                project_id,
                NewRepository {
                    is_default: true,
                    ..git_repo(Some("mirror"))
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::DefaultNotDemotable)
        ));

        let mirror = registry
            .create_repository(project_id, git_repo(Some("mirror")))
            .await
            .unwrap();
        let err = registry.set_default(mirror.id).await.unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::DefaultNotDemotable)
        ));
        // Confirming the standing default is not a demotion.
        registry.set_default(anonymous.id).await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_identifier_is_rejected_before_insert() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;
        registry
            .create_repository(project_id, git_repo(Some("main")))
            .await
            .unwrap();
        let err = registry
            .create_repository(project_id, git_repo(Some("main")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::IdentifierTaken)
        ));
    }

    #[tokio::test]
    async fn disabled_backend_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;
        let err = registry
            .create_repository(project_id, NewRepository::new("svn", "https://svn/r"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::BackendDisabled(_))
        ));
    }

    #[tokio::test]
    async fn blank_url_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;
        let err = registry
            .create_repository(project_id, NewRepository::new("git", "   "))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RegistryError::Validation(ValidationError::UrlBlank)
        ));
    }

    #[tokio::test]
    async fn passwords_are_encrypted_at_rest() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;

        let mut new = git_repo(Some("main"));
        new.username = Some("sync".to_string());
        new.password = Some("hunter2".to_string());
        let repo = registry.create_repository(project_id, new).await.unwrap();

        let stored = repo.password_cipher.as_deref().unwrap();
        assert!(stored.starts_with("aesgcm:"));
        assert!(!stored.contains("hunter2"));
    }

    #[tokio::test]
    async fn find_by_identifier_param_accepts_ids_and_identifiers() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let project_id = project(&registry).await;
        let repo = registry
            .create_repository(project_id, git_repo(Some("main")))
            .await
            .unwrap();

        let by_identifier = registry
            .find_by_identifier_param(project_id, "main")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_identifier.id, repo.id);

        let by_id = registry
            .find_by_identifier_param(project_id, &repo.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, repo.id);

        // Ids of other projects do not leak through.
        let other = registry.create_project("other", "Other").await.unwrap();
        assert!(registry
            .find_by_identifier_param(other.id, &repo.id.to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn deleting_a_missing_repository_reports_not_found() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir);
        let err = registry
            .delete_repository(RepositoryId(404))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RepositoryNotFound(_)));
    }
}
