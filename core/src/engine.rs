//! Incremental sync engine.
//!
//! A sync pass asks the repository's adapter for revisions newer than
//! the stored marker, resolves committers, stores each commit in its
//! own transaction and finally links work item references found in the
//! new messages. Batch runs cover every repository of every active
//! project with bounded concurrency; one repository failing never
//! aborts the batch, and a repository already being synced is skipped
//! rather than synced twice.

use crate::identity::CommitterResolver;
use crate::identity::UserDirectory;
use crate::model::ChangesetId;
use crate::model::Repository;
use crate::model::RepositoryId;
use crate::refscan::ReferenceScanner;
use crate::registry::RegistryError;
use crate::registry::RepositoryRegistry;
use crate::store::Store;
use crate::store::StoreError;
use futures::StreamExt;
use futures::TryStreamExt;
use futures::stream;
use scmsync_adapters::ScmError;
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Where a repository currently is in its sync lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Fetching,
    Ingesting,
    ScanningReferences,
    Done,
    Failed,
}

/// Result of one repository's sync pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Done { ingested: usize },
    Skipped,
    Failed { error: String },
}

/// Per-repository outcomes of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<(RepositoryId, SyncOutcome)>,
}

impl BatchReport {
    pub fn synced(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Done { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Skipped))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Failed { .. }))
            .count()
    }

    pub fn ingested(&self) -> usize {
        self.outcomes
            .iter()
            .map(|(_, o)| match o {
                SyncOutcome::Done { ingested } => *ingested,
                _ => 0,
            })
            .sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("repository {0} not found")]
    RepositoryNotFound(RepositoryId),
}

/// Failures surfaced as a per-repository [`SyncOutcome::Failed`].
#[derive(Debug, thiserror::Error)]
enum PassError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scm(#[from] ScmError),
}

#[derive(Default)]
struct ActiveSet {
    inner: Mutex<HashSet<RepositoryId>>,
}

impl ActiveSet {
    async fn try_insert(&self, id: RepositoryId) -> bool {
        self.inner.lock().await.insert(id)
    }

    async fn release(&self, id: RepositoryId) {
        self.inner.lock().await.remove(&id);
    }
}

pub struct SyncEngine {
    store: Store,
    registry: RepositoryRegistry,
    directory: Arc<dyn UserDirectory>,
    scanner: ReferenceScanner,
    workers: usize,
    active: ActiveSet,
    phases: Mutex<HashMap<RepositoryId, SyncPhase>>,
}

impl SyncEngine {
    pub fn new(
        registry: RepositoryRegistry,
        directory: Arc<dyn UserDirectory>,
        scanner: ReferenceScanner,
        workers: usize,
    ) -> Self {
        Self {
            store: registry.store().clone(),
            registry,
            directory,
            scanner,
            workers: workers.max(1),
            active: ActiveSet::default(),
            phases: Mutex::new(HashMap::new()),
        }
    }

    pub async fn phase(&self, id: RepositoryId) -> SyncPhase {
        self.phases
            .lock()
            .await
            .get(&id)
            .copied()
            .unwrap_or(SyncPhase::Idle)
    }

    async fn set_phase(&self, id: RepositoryId, phase: SyncPhase) {
        self.phases.lock().await.insert(id, phase);
    }

    /// Sync one repository by id.
    pub async fn sync(&self, id: RepositoryId) -> Result<SyncOutcome, SyncError> {
        let repository = self
            .store
            .find_repository(id)
            .await?
            .ok_or(SyncError::RepositoryNotFound(id))?;
        Ok(self.sync_repository(&repository).await)
    }

    /// Sync every repository of every active project. Failures are
    /// reported per repository; the batch itself only errors when the
    /// store cannot even enumerate them.
    pub async fn sync_all(&self) -> Result<BatchReport, SyncError> {
        let mut repositories = Vec::new();
        for project in self.store.active_projects().await? {
            repositories.extend(self.store.repositories_of(project.id).await?);
        }
        let outcomes = stream::iter(repositories)
            .map(|repository| async move {
                let outcome = self.sync_repository(&repository).await;
                (repository.id, outcome)
            })
            .buffer_unordered(self.workers)
            .collect::<Vec<_>>()
            .await;
        Ok(BatchReport { outcomes })
    }

    /// Sync a repository, skipping when a pass is already running.
    pub async fn sync_repository(&self, repository: &Repository) -> SyncOutcome {
        if !self.active.try_insert(repository.id).await {
            info!(
                repository = %repository.display_name(),
                "sync already running, skipped"
            );
            return SyncOutcome::Skipped;
        }
        self.set_phase(repository.id, SyncPhase::Fetching).await;
        let outcome = match self.mirror_new_revisions(repository).await {
            Ok(ingested) => {
                self.set_phase(repository.id, SyncPhase::Done).await;
                info!(
                    repository = %repository.display_name(),
                    ingested,
                    "sync finished"
                );
                SyncOutcome::Done { ingested }
            }
            Err(err) => {
                self.set_phase(repository.id, SyncPhase::Failed).await;
                error!(
                    repository = %repository.display_name(),
                    error = %err,
                    "sync failed"
                );
                SyncOutcome::Failed {
                    error: err.to_string(),
                }
            }
        };
        self.active.release(repository.id).await;
        outcome
    }

    async fn mirror_new_revisions(&self, repository: &Repository) -> Result<usize, PassError> {
        let adapter = self.registry.adapter_for(repository).await?;

        // First successful contact fills in the root URL.
        if repository.root_url.is_none() {
            match adapter.root_url().await {
                Ok(Some(root)) => {
                    self.registry.update_root_url(repository.id, &root).await?;
                }
                Ok(None) | Err(ScmError::Unsupported { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        let marker = self.store.sync_marker(repository.id).await?;
        let mut revisions = adapter.revisions_since(marker.as_deref()).await?;

        self.set_phase(repository.id, SyncPhase::Ingesting).await;
        let resolver = CommitterResolver::new();
        let mut ingested = 0usize;
        let mut pending_scan: Vec<(ChangesetId, String)> = Vec::new();
        while let Some(commit) = revisions.try_next().await? {
            let user = resolver
                .resolve(
                    &self.store,
                    self.directory.as_ref(),
                    repository.id,
                    &commit.committer,
                )
                .await?;
            let message = commit.message.clone();
            if let Some(changeset_id) = self
                .store
                .ingest_commit(repository.id, commit, user)
                .await?
            {
                ingested += 1;
                pending_scan.push((changeset_id, message));
            }
        }

        self.set_phase(repository.id, SyncPhase::ScanningReferences)
            .await;
        for (changeset_id, message) in pending_scan {
            let items = self.scanner.scan(&message);
            if let Err(err) = self.store.link_work_items(changeset_id, items).await {
                warn!(
                    repository = %repository.display_name(),
                    changeset = %changeset_id,
                    error = %err,
                    "work item linking failed"
                );
            }
        }

        Ok(ingested)
    }

    /// Rebuild the work item links of every mirrored changeset from
    /// its message. Returns the number of changesets scanned.
    pub async fn rescan_references(&self, id: RepositoryId) -> Result<usize, SyncError> {
        let repository = self
            .store
            .find_repository(id)
            .await?
            .ok_or(SyncError::RepositoryNotFound(id))?;
        let messages = self.store.changeset_messages(id).await?;
        let mut scanned = 0usize;
        for (changeset_id, message) in messages {
            let items = self.scanner.scan(&message);
            self.store.replace_work_items(changeset_id, items).await?;
            scanned += 1;
        }
        info!(
            repository = %repository.display_name(),
            scanned,
            "reference rescan finished"
        );
        Ok(scanned)
    }
}
