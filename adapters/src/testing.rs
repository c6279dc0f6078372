//! Scripted in-memory adapters for exercising sync and browse flows without
//! a real backend.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;

use crate::adapter::AdapterFactory;
use crate::adapter::ScmAdapter;
use crate::error::ScmError;
use crate::error::ScmResult;
use crate::types::Capability;
use crate::types::ChangeAction;
use crate::types::Commit;
use crate::types::ConnectionSettings;
use crate::types::Entry;
use crate::types::FileChange;
use crate::types::RevisionStream;

/// Adapter whose behavior is fully scripted up front.
///
/// `revisions_since` honors the marker contract the way a branchy backend
/// would: an unknown marker replays the whole script, which is exactly the
/// re-emission case consumers must tolerate.
#[derive(Clone)]
pub struct ScriptedAdapter {
    backend: &'static str,
    commits: Vec<Commit>,
    root: Option<String>,
    branch_names: Vec<String>,
    tag_names: Vec<String>,
    files: BTreeMap<String, Vec<u8>>,
    entry_list: Vec<Entry>,
    diff_text: String,
    unsupported: BTreeSet<Capability>,
    fetch_failure: Option<String>,
    fail_after: Option<usize>,
}

impl ScriptedAdapter {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            commits: Vec::new(),
            root: None,
            branch_names: Vec::new(),
            tag_names: Vec::new(),
            files: BTreeMap::new(),
            entry_list: Vec::new(),
            diff_text: String::new(),
            unsupported: BTreeSet::new(),
            fetch_failure: None,
            fail_after: None,
        }
    }

    pub fn with_commits(mut self, commits: Vec<Commit>) -> Self {
        self.commits = commits;
        self
    }

    pub fn with_root_url(mut self, root: impl Into<String>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn with_branches(mut self, names: Vec<String>) -> Self {
        self.branch_names = names;
        self
    }

    pub fn with_tags(mut self, names: Vec<String>) -> Self {
        self.tag_names = names;
        self
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn with_entries(mut self, entries: Vec<Entry>) -> Self {
        self.entry_list = entries;
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff_text = diff.into();
        self
    }

    pub fn without(mut self, capability: Capability) -> Self {
        self.unsupported.insert(capability);
        self
    }

    /// Every `revisions_since` call fails with a backend error.
    pub fn failing(mut self, reason: impl Into<String>) -> Self {
        self.fetch_failure = Some(reason.into());
        self
    }

    /// The revision stream yields `n` commits and then a backend error.
    pub fn failing_after(mut self, n: usize, reason: impl Into<String>) -> Self {
        self.fail_after = Some(n);
        self.fetch_failure = Some(reason.into());
        self
    }
}

#[async_trait]
impl ScmAdapter for ScriptedAdapter {
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn supports(&self, capability: Capability) -> bool {
        !self.unsupported.contains(&capability)
    }

    async fn root_url(&self) -> ScmResult<Option<String>> {
        Ok(self.root.clone())
    }

    async fn entries(&self, _path: &str, _rev: Option<&str>) -> ScmResult<Vec<Entry>> {
        Ok(self.entry_list.clone())
    }

    async fn cat(&self, path: &str, rev: Option<&str>) -> ScmResult<Vec<u8>> {
        match self.files.get(path.trim_start_matches('/')) {
            Some(content) => Ok(content.clone()),
            None => Err(ScmError::NotFound {
                path: path.to_string(),
                revision: rev.map(str::to_string),
            }),
        }
    }

    async fn diff(
        &self,
        _path: Option<&str>,
        _rev_from: &str,
        _rev_to: Option<&str>,
    ) -> ScmResult<String> {
        Ok(self.diff_text.clone())
    }

    async fn branches(&self) -> ScmResult<Vec<String>> {
        Ok(self.branch_names.clone())
    }

    async fn tags(&self) -> ScmResult<Vec<String>> {
        Ok(self.tag_names.clone())
    }

    async fn revisions_since(&self, marker: Option<&str>) -> ScmResult<RevisionStream> {
        if self.fail_after.is_none() {
            if let Some(reason) = &self.fetch_failure {
                return Err(ScmError::backend(self.backend, reason.clone()));
            }
        }
        let start = match marker {
            None => 0,
            Some(marker) => self
                .commits
                .iter()
                .position(|c| c.revision == marker)
                .map(|i| i + 1)
                .unwrap_or(0),
        };
        let mut items: Vec<ScmResult<Commit>> =
            self.commits[start..].iter().cloned().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            let reason = self
                .fetch_failure
                .clone()
                .unwrap_or_else(|| "scripted failure".to_string());
            items.push(Err(ScmError::backend(self.backend, reason)));
        }
        Ok(stream::iter(items).boxed())
    }
}

/// Factory returning scripted adapters keyed by connection URL.
pub struct ScriptedFactory {
    backend: &'static str,
    available: bool,
    version: Option<String>,
    scripts: Mutex<BTreeMap<String, ScriptedAdapter>>,
}

impl ScriptedFactory {
    pub fn new(backend: &'static str) -> Self {
        Self {
            backend,
            available: true,
            version: Some("scripted 1.0".to_string()),
            scripts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Factory whose client probe reports the backend tooling as missing.
    pub fn unavailable(backend: &'static str) -> Self {
        Self {
            backend,
            available: false,
            version: None,
            scripts: Mutex::new(BTreeMap::new()),
        }
    }

    /// Scripts the adapter handed out for `url`. URLs without a script get an
    /// empty adapter.
    pub fn script(&self, url: impl Into<String>, adapter: ScriptedAdapter) {
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        scripts.insert(url.into(), adapter);
    }
}

impl AdapterFactory for ScriptedFactory {
    fn backend(&self) -> &'static str {
        self.backend
    }

    fn client_available(&self) -> bool {
        self.available
    }

    fn client_version(&self) -> Option<String> {
        self.version.clone()
    }

    fn create(&self, settings: &ConnectionSettings) -> ScmResult<Box<dyn ScmAdapter>> {
        let scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        let adapter = scripts
            .get(&settings.url)
            .cloned()
            .unwrap_or_else(|| ScriptedAdapter::new(self.backend));
        Ok(Box::new(adapter))
    }
}

/// Commit literal for tests; `minutes` offsets a fixed base timestamp so
/// relative ordering is easy to read.
pub fn make_commit(revision: &str, committer: &str, minutes: i64, message: &str) -> Commit {
    Commit {
        revision: revision.to_string(),
        committer: committer.to_string(),
        committed_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + minutes * 60, 0)
            .unwrap_or_default(),
        message: message.to_string(),
        parents: Vec::new(),
        changes: Vec::new(),
    }
}

pub fn make_change(action: ChangeAction, path: &str) -> FileChange {
    FileChange {
        action,
        path: path.to_string(),
        from_path: None,
    }
}
