//! Git adapter driving the installed `git` client.
//!
//! The adapter shells out to `git -C <repo>` for every operation, so it works
//! against any local clone or bare repository without linking libgit2.
//! Revision streaming parses `git log` output framed with control characters
//! (`%x01` record start, `%x02` field separator, `%x03` header end) so commit
//! messages may contain anything short of the record-start byte itself.

use std::ffi::OsStr;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tokio::process::ChildStderr;
use tokio::process::ChildStdout;
use tokio::process::Command;
use tracing::warn;

use crate::adapter::AdapterFactory;
use crate::adapter::ScmAdapter;
use crate::error::ScmError;
use crate::error::ScmResult;
use crate::types::Capability;
use crate::types::ChangeAction;
use crate::types::Commit;
use crate::types::ConnectionSettings;
use crate::types::Entry;
use crate::types::EntryKind;
use crate::types::FileChange;
use crate::types::RevisionStream;

const GIT: &str = "git";

const RECORD_START: u8 = 0x01;
const FIELD_SEP: char = '\u{2}';
const HEADER_END: char = '\u{3}';
const LOG_FORMAT: &str = "%x01%H%x02%an <%ae>%x02%ct%x02%P%x02%B%x03";

/// Adapter for one git repository. `settings.url` is the repository path.
pub struct GitAdapter {
    settings: ConnectionSettings,
}

impl GitAdapter {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new("git");
        cmd.arg("-C")
            .arg(&self.settings.url)
            .arg("-c")
            .arg("core.quotepath=false")
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }

    async fn run<I, S>(&self, args: I) -> ScmResult<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let output = self.command(args).output().await.map_err(spawn_error)?;
        if !output.status.success() {
            return Err(exit_error(&output));
        }
        Ok(output.stdout)
    }

    async fn run_text<I, S>(&self, args: I) -> ScmResult<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let bytes = self.run(args).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn revision_exists(&self, rev: &str) -> ScmResult<bool> {
        let spec = format!("{rev}^{{commit}}");
        let output = self
            .command(["rev-parse", "--verify", "--quiet", spec.as_str()])
            .output()
            .await
            .map_err(spawn_error)?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl ScmAdapter for GitAdapter {
    fn backend(&self) -> &'static str {
        GIT
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn root_url(&self) -> ScmResult<Option<String>> {
        // Bare repositories have no work tree, so fall back to the git dir.
        let text = match self.run_text(["rev-parse", "--show-toplevel"]).await {
            Ok(text) => text,
            Err(_) => self.run_text(["rev-parse", "--absolute-git-dir"]).await?,
        };
        Ok(Some(text.trim().to_string()))
    }

    async fn entries(&self, path: &str, rev: Option<&str>) -> ScmResult<Vec<Entry>> {
        let treeish = rev.unwrap_or("HEAD");
        let rel = path.trim_start_matches('/');
        let mut args = vec!["ls-tree".to_string(), "-l".to_string(), treeish.to_string()];
        if !rel.is_empty() {
            let mut spec = rel.to_string();
            if !spec.ends_with('/') {
                spec.push('/');
            }
            args.push("--".to_string());
            args.push(spec);
        }
        let text = self.run_text(args).await?;
        Ok(parse_entries(&text))
    }

    async fn cat(&self, path: &str, rev: Option<&str>) -> ScmResult<Vec<u8>> {
        let treeish = rev.unwrap_or("HEAD");
        let rel = path.trim_start_matches('/');
        let spec = format!("{treeish}:{rel}");
        let output = self
            .command(["show", spec.as_str()])
            .output()
            .await
            .map_err(spawn_error)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("does not exist in")
                || stderr.contains("but not in")
                || stderr.contains("invalid object name")
            {
                return Err(ScmError::NotFound {
                    path: path.to_string(),
                    revision: rev.map(str::to_string),
                });
            }
            return Err(exit_error(&output));
        }
        Ok(output.stdout)
    }

    async fn diff(
        &self,
        path: Option<&str>,
        rev_from: &str,
        rev_to: Option<&str>,
    ) -> ScmResult<String> {
        let mut args: Vec<String> = match rev_to {
            Some(to) => vec![
                "diff".to_string(),
                "--no-color".to_string(),
                format!("{rev_from}..{to}"),
            ],
            None => vec![
                "diff-tree".to_string(),
                "--no-commit-id".to_string(),
                "-p".to_string(),
                "--root".to_string(),
                rev_from.to_string(),
            ],
        };
        if let Some(path) = path {
            args.push("--".to_string());
            args.push(path.trim_start_matches('/').to_string());
        }
        self.run_text(args).await
    }

    async fn branches(&self) -> ScmResult<Vec<String>> {
        let text = self
            .run_text(["for-each-ref", "--format=%(refname:short)", "refs/heads"])
            .await?;
        Ok(text.lines().map(str::to_string).collect())
    }

    async fn tags(&self) -> ScmResult<Vec<String>> {
        let text = self
            .run_text(["for-each-ref", "--format=%(refname:short)", "refs/tags"])
            .await?;
        Ok(text.lines().map(str::to_string).collect())
    }

    async fn revisions_since(&self, marker: Option<&str>) -> ScmResult<RevisionStream> {
        let mut args: Vec<String> = vec![
            "log".to_string(),
            "--reverse".to_string(),
            "--date-order".to_string(),
            "--name-status".to_string(),
            "--no-color".to_string(),
            "--find-renames".to_string(),
            "--find-copies".to_string(),
            "--encoding=UTF-8".to_string(),
            format!("--pretty=format:{LOG_FORMAT}"),
            "--all".to_string(),
        ];
        if let Some(marker) = marker {
            // A marker that no longer resolves means upstream history was
            // rewritten; re-reading everything is safe because ingestion
            // deduplicates on revision.
            if self.revision_exists(marker).await? {
                args.push(format!("^{marker}"));
            } else {
                warn!(
                    url = %self.settings.url,
                    marker,
                    "sync marker no longer resolves, re-reading full history"
                );
            }
        }

        let mut cmd = self.command(&args);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ScmError::backend(GIT, "child stdout was not captured"))?;
        let stderr = child.stderr.take();
        let reader = LogReader {
            child,
            stdout,
            stderr,
            buf: Vec::new(),
            eof: false,
            finished: false,
        };
        let stream = stream::try_unfold(reader, |mut reader| async move {
            match reader.next_commit().await {
                Ok(Some(commit)) => Ok(Some((commit, reader))),
                Ok(None) => Ok(None),
                Err(err) => Err(err),
            }
        });
        Ok(stream.boxed())
    }
}

/// Factory for [`GitAdapter`] instances plus client probes.
pub struct GitFactory;

impl AdapterFactory for GitFactory {
    fn backend(&self) -> &'static str {
        GIT
    }

    fn client_available(&self) -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    fn client_version(&self) -> Option<String> {
        let output = std::process::Command::new("git")
            .arg("--version")
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let text = String::from_utf8_lossy(&output.stdout);
        let line = text.lines().next()?.trim();
        Some(line.strip_prefix("git version ").unwrap_or(line).to_string())
    }

    fn create(&self, settings: &ConnectionSettings) -> ScmResult<Box<dyn ScmAdapter>> {
        Ok(Box::new(GitAdapter::new(settings.clone())))
    }
}

// ── log streaming ──────────────────────────────────────────────────────────

struct LogReader {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<ChildStderr>,
    buf: Vec<u8>,
    eof: bool,
    finished: bool,
}

impl LogReader {
    async fn next_commit(&mut self) -> ScmResult<Option<Commit>> {
        loop {
            if let Some(record) = drain_record(&mut self.buf, self.eof) {
                return parse_record(&record).map(Some);
            }
            if self.eof {
                return self.finish().await;
            }
            let mut chunk = [0u8; 8192];
            let n = self
                .stdout
                .read(&mut chunk)
                .await
                .map_err(|e| ScmError::backend(GIT, format!("reading git log output: {e}")))?;
            if n == 0 {
                self.eof = true;
            } else {
                self.buf.extend_from_slice(&chunk[..n]);
            }
        }
    }

    async fn finish(&mut self) -> ScmResult<Option<Commit>> {
        self.buf.clear();
        if self.finished {
            return Ok(None);
        }
        self.finished = true;
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| ScmError::backend(GIT, format!("waiting for git log: {e}")))?;
        if status.success() {
            return Ok(None);
        }
        let mut stderr_text = String::new();
        if let Some(mut stderr) = self.stderr.take() {
            let mut bytes = Vec::new();
            if stderr.read_to_end(&mut bytes).await.is_ok() {
                stderr_text = String::from_utf8_lossy(&bytes).into_owned();
            }
        }
        // A repository with no commits yet is an empty stream, not an error.
        if stderr_text.contains("does not have any commits") {
            return Ok(None);
        }
        let reason = format!("git log exited with {status}: {}", stderr_text.trim());
        Err(classify_failure(&stderr_text, reason))
    }
}

/// Removes and returns the next complete record from `buf`.
///
/// A record spans from one `RECORD_START` byte to the next; the final record
/// is only complete once `eof` is set. The returned bytes exclude the leading
/// `RECORD_START`.
fn drain_record(buf: &mut Vec<u8>, eof: bool) -> Option<Vec<u8>> {
    let start = buf.iter().position(|&b| b == RECORD_START)?;
    if start > 0 {
        buf.drain(..start);
    }
    match buf[1..].iter().position(|&b| b == RECORD_START) {
        Some(next) => {
            let record: Vec<u8> = buf.drain(..next + 1).collect();
            Some(record[1..].to_vec())
        }
        None if eof => {
            let record = std::mem::take(buf);
            Some(record[1..].to_vec())
        }
        None => None,
    }
}

fn parse_record(record: &[u8]) -> ScmResult<Commit> {
    let text = String::from_utf8_lossy(record);
    // The message (%B) may itself contain the header-end byte; git quotes
    // control characters in name-status paths, so the last occurrence is
    // always the real terminator.
    let (header, tail) = text
        .rsplit_once(HEADER_END)
        .ok_or_else(|| malformed("missing header terminator"))?;
    let fields: Vec<&str> = header.splitn(5, FIELD_SEP).collect();
    let [revision, committer, epoch, parents, message] = fields.as_slice() else {
        return Err(malformed("wrong header field count"));
    };
    let committed_at = epoch
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| malformed("bad commit timestamp"))?;
    Ok(Commit {
        revision: revision.trim().to_string(),
        committer: committer.trim().to_string(),
        committed_at,
        message: message.trim_end().to_string(),
        parents: parents.split_whitespace().map(str::to_string).collect(),
        changes: tail.lines().filter_map(parse_name_status).collect(),
    })
}

fn parse_name_status(line: &str) -> Option<FileChange> {
    let line = line.trim_end_matches('\r');
    if line.is_empty() {
        return None;
    }
    let mut parts = line.split('\t');
    let status = parts.next()?;
    let kind = status.chars().next()?;
    match kind {
        'A' => Some(FileChange {
            action: ChangeAction::Added,
            path: parts.next()?.to_string(),
            from_path: None,
        }),
        // Type changes (regular file to symlink and similar) are surfaced as
        // modifications.
        'M' | 'T' => Some(FileChange {
            action: ChangeAction::Modified,
            path: parts.next()?.to_string(),
            from_path: None,
        }),
        'D' => Some(FileChange {
            action: ChangeAction::Deleted,
            path: parts.next()?.to_string(),
            from_path: None,
        }),
        'R' => {
            let from = parts.next()?;
            let to = parts.next()?;
            Some(FileChange {
                action: ChangeAction::Renamed,
                path: to.to_string(),
                from_path: Some(from.to_string()),
            })
        }
        'C' => {
            let from = parts.next()?;
            let to = parts.next()?;
            Some(FileChange {
                action: ChangeAction::Copied,
                path: to.to_string(),
                from_path: Some(from.to_string()),
            })
        }
        _ => None,
    }
}

fn parse_entries(text: &str) -> Vec<Entry> {
    text.lines()
        .filter_map(|line| {
            let (meta, path) = line.split_once('\t')?;
            let fields: Vec<&str> = meta.split_whitespace().collect();
            let [_mode, kind, _oid, size] = fields.as_slice() else {
                return None;
            };
            let kind = match *kind {
                "blob" => EntryKind::File,
                // Submodules show up as commit entries; treat them as
                // directories for browsing purposes.
                "tree" | "commit" => EntryKind::Dir,
                _ => return None,
            };
            let name = path.rsplit('/').next().unwrap_or(path);
            Some(Entry {
                name: name.to_string(),
                path: path.to_string(),
                kind,
                size: size.parse().ok(),
            })
        })
        .collect()
}

fn malformed(detail: &str) -> ScmError {
    ScmError::backend(GIT, format!("malformed git log record: {detail}"))
}

fn spawn_error(err: io::Error) -> ScmError {
    if err.kind() == io::ErrorKind::NotFound {
        ScmError::unavailable(GIT, "git client not found on PATH")
    } else {
        ScmError::unavailable(GIT, err.to_string())
    }
}

fn exit_error(output: &std::process::Output) -> ScmError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let reason = format!("git exited with {}: {}", output.status, stderr.trim());
    classify_failure(&stderr, reason)
}

fn classify_failure(stderr: &str, reason: String) -> ScmError {
    if stderr.contains("not a git repository") || stderr.contains("cannot change to") {
        ScmError::unavailable(GIT, reason)
    } else {
        ScmError::backend(GIT, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record(header: &str, tail: &str) -> Vec<u8> {
        format!("{header}\u{3}{tail}").into_bytes()
    }

    #[test]
    fn parse_record_reads_all_fields() {
        let bytes = record(
            "a1b2c3\u{2}Jane Doe <jane@example.com>\u{2}1700000000\u{2}parent1 parent2\u{2}Fix the frobnicator\n\nLonger body.\n",
            "\nM\tsrc/main.rs\nA\tsrc/frob.rs\n",
        );
        let commit = parse_record(&bytes).unwrap();
        assert_eq!(commit.revision, "a1b2c3");
        assert_eq!(commit.committer, "Jane Doe <jane@example.com>");
        assert_eq!(commit.committed_at.timestamp(), 1_700_000_000);
        assert_eq!(commit.message, "Fix the frobnicator\n\nLonger body.");
        assert_eq!(commit.parents, vec!["parent1", "parent2"]);
        assert_eq!(commit.changes.len(), 2);
        assert_eq!(commit.changes[0].action, ChangeAction::Modified);
        assert_eq!(commit.changes[0].path, "src/main.rs");
    }

    #[test]
    fn parse_record_with_no_parents_or_changes() {
        let bytes = record(
            "root1\u{2}Jane <j@example.com>\u{2}1600000000\u{2}\u{2}Initial",
            "",
        );
        let commit = parse_record(&bytes).unwrap();
        assert!(commit.parents.is_empty());
        assert!(commit.changes.is_empty());
    }

    #[test]
    fn parse_record_keeps_framing_bytes_in_message() {
        let bytes = record(
            "rev9\u{2}Jane <j@example.com>\u{2}1700000001\u{2}\u{2}Body with \u{3} and \u{2} bytes",
            "\nM\tsrc/lib.rs\n",
        );
        let commit = parse_record(&bytes).unwrap();
        assert_eq!(commit.message, "Body with \u{3} and \u{2} bytes");
        assert_eq!(commit.changes.len(), 1);
        assert_eq!(commit.changes[0].path, "src/lib.rs");
    }

    #[test]
    fn parse_record_rejects_garbage() {
        assert!(parse_record(b"no separators here").is_err());
        let bytes = record("only\u{2}three\u{2}fields", "");
        assert!(parse_record(&bytes).is_err());
        let bytes = record("rev\u{2}who\u{2}not-a-number\u{2}\u{2}msg", "");
        assert!(parse_record(&bytes).is_err());
    }

    #[test]
    fn parse_name_status_variants() {
        let change = parse_name_status("A\tdocs/new.md").unwrap();
        assert_eq!(change.action, ChangeAction::Added);
        assert_eq!(change.path, "docs/new.md");
        assert_eq!(change.from_path, None);

        let change = parse_name_status("R087\told name.rs\tnew name.rs").unwrap();
        assert_eq!(change.action, ChangeAction::Renamed);
        assert_eq!(change.path, "new name.rs");
        assert_eq!(change.from_path.as_deref(), Some("old name.rs"));

        let change = parse_name_status("C100\tsrc/a.rs\tsrc/b.rs").unwrap();
        assert_eq!(change.action, ChangeAction::Copied);

        let change = parse_name_status("T\tlink").unwrap();
        assert_eq!(change.action, ChangeAction::Modified);

        assert!(parse_name_status("").is_none());
        assert!(parse_name_status("U\tconflicted").is_none());
    }

    #[test]
    fn drain_record_frames_on_record_start() {
        let mut buf = Vec::new();
        buf.push(RECORD_START);
        buf.extend_from_slice(b"first");
        buf.push(RECORD_START);
        buf.extend_from_slice(b"second");

        let record = drain_record(&mut buf, false).unwrap();
        assert_eq!(record, b"first");
        // Second record is incomplete until EOF.
        assert_eq!(drain_record(&mut buf, false), None);
        let record = drain_record(&mut buf, true).unwrap();
        assert_eq!(record, b"second");
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_record_skips_leading_noise() {
        let mut buf = b"\n\n".to_vec();
        buf.push(RECORD_START);
        buf.extend_from_slice(b"payload");
        let record = drain_record(&mut buf, true).unwrap();
        assert_eq!(record, b"payload");
    }

    #[test]
    fn drain_record_without_start_byte_is_none() {
        let mut buf = b"stray output".to_vec();
        assert_eq!(drain_record(&mut buf, true), None);
    }

    #[test]
    fn parse_entries_reads_ls_tree_long_format() {
        let text = "100644 blob 8f941393493b2ea0a0eed2b5d5ea9dbc2b4b4e5c    1090\tREADME.md\n\
                    040000 tree 9bdc1e731e23b71bbd74b7dbb3cf1b6541f6d360       -\tsrc\n";
        let entries = parse_entries(text);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "README.md");
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[0].size, Some(1090));
        assert_eq!(entries[1].name, "src");
        assert_eq!(entries[1].kind, EntryKind::Dir);
        assert_eq!(entries[1].size, None);
    }

    #[test]
    fn parse_entries_uses_final_path_component_as_name() {
        let text = "100644 blob aaaa    12\tsrc/nested/mod.rs\n";
        let entries = parse_entries(text);
        assert_eq!(entries[0].name, "mod.rs");
        assert_eq!(entries[0].path, "src/nested/mod.rs");
    }
}
