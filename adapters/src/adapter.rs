//! The adapter contract and the factory registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ScmError;
use crate::error::ScmResult;
use crate::git::GitFactory;
use crate::types::Capability;
use crate::types::ConnectionSettings;
use crate::types::Entry;
use crate::types::RevisionStream;

/// Uniform surface over one version-control backend.
///
/// Implementations are expected to be cheap to construct; nothing talks to
/// the backend until an operation runs. All operations may be called
/// concurrently.
#[async_trait]
pub trait ScmAdapter: Send + Sync {
    /// Stable backend tag, e.g. `"git"`.
    fn backend(&self) -> &'static str;

    /// Whether the backend supports an optional feature. Callers must check
    /// before invoking the corresponding operation.
    fn supports(&self, capability: Capability) -> bool;

    /// Canonical root URL of the repository, if the backend can discover one.
    /// The caller decides whether to persist it; this call never writes.
    async fn root_url(&self) -> ScmResult<Option<String>>;

    /// Directory listing at `path`, ordered the way the backend orders
    /// entries. `rev` of `None` means the latest revision. An unknown path
    /// yields an empty listing.
    async fn entries(&self, path: &str, rev: Option<&str>) -> ScmResult<Vec<Entry>>;

    /// Raw file content. Fails with [`ScmError::NotFound`] when the path does
    /// not exist at the revision.
    async fn cat(&self, path: &str, rev: Option<&str>) -> ScmResult<Vec<u8>>;

    /// Textual diff between two revisions, optionally scoped to one path.
    /// With `rev_to` of `None`, the diff is the change introduced by
    /// `rev_from` itself.
    async fn diff(
        &self,
        path: Option<&str>,
        rev_from: &str,
        rev_to: Option<&str>,
    ) -> ScmResult<String>;

    /// Branch names. Empty for backends without the concept.
    async fn branches(&self) -> ScmResult<Vec<String>>;

    /// Tag names. Empty for backends without the concept.
    async fn tags(&self) -> ScmResult<Vec<String>>;

    /// Stream of commits strictly newer than `marker`, oldest first, parents
    /// before children. `None` streams the entire history. Backends with
    /// branching history may re-emit commits that are not descendants of the
    /// marker; consumers deduplicate.
    async fn revisions_since(&self, marker: Option<&str>) -> ScmResult<RevisionStream>;
}

impl std::fmt::Debug for dyn ScmAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScmAdapter")
            .field("backend", &self.backend())
            .finish_non_exhaustive()
    }
}

/// Builds adapters for one backend and probes the client installation.
pub trait AdapterFactory: Send + Sync {
    fn backend(&self) -> &'static str;

    /// Whether the backend's client tooling is usable on this host.
    fn client_available(&self) -> bool;

    /// Client version string for diagnostics, when obtainable.
    fn client_version(&self) -> Option<String>;

    fn create(&self, settings: &ConnectionSettings) -> ScmResult<Box<dyn ScmAdapter>>;
}

/// Registry of adapter factories keyed by backend tag.
pub struct AdapterRegistry {
    factories: BTreeMap<&'static str, Arc<dyn AdapterFactory>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in backend registered.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GitFactory));
        registry
    }

    pub fn register(&mut self, factory: Arc<dyn AdapterFactory>) {
        self.factories.insert(factory.backend(), factory);
    }

    pub fn factory(&self, backend: &str) -> Option<Arc<dyn AdapterFactory>> {
        self.factories.get(backend).cloned()
    }

    /// Registered backend tags, sorted.
    pub fn backends(&self) -> Vec<&'static str> {
        self.factories.keys().copied().collect()
    }

    pub fn create(
        &self,
        backend: &str,
        settings: &ConnectionSettings,
    ) -> ScmResult<Box<dyn ScmAdapter>> {
        match self.factories.get(backend) {
            Some(factory) => factory.create(settings),
            None => Err(ScmError::unavailable(
                backend,
                "no adapter factory registered",
            )),
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
