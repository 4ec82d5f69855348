//! Content-addressed snapshot of servable files and its lazy rebuild.
//!
//! A [`FileIndex`] is never mutated in place: a rebuild produces a fresh one and
//! swaps it in under the exclusive side of [`SharedIndex`]. Sessions hold the
//! shared side for their whole exchange, so a rebuild waits for in-flight
//! sessions and never pre-empts one.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use regex::RegexSet;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::identity::IdentityLog;
use crate::integrity;
use crate::protocol::HASH_LEN;

/// One file the server can serve, keyed by its client-visible path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedFile {
    pub client_path: String,
    pub serv_path: PathBuf,
    pub content_hash: [u8; HASH_LEN],
    /// Once a client has reported any version of this path, never overwrite it.
    pub should_not_replace: bool,
}

/// File the scanner wants served; the index builder assigns its hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub client_path: String,
    pub serv_path: PathBuf,
    pub should_not_replace: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error("rebuild task failed: {0}")]
    Join(String),
}

/// Produces the candidate files for an index rebuild.
pub trait Scanner: Send + Sync {
    fn scan(&self) -> Result<Vec<Candidate>, IndexError>;
}

/// Client path -> indexed file. At most one entry per client path.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    files: HashMap<String, IndexedFile>,
}

impl FileIndex {
    /// Hash every candidate. A later candidate for the same client path replaces
    /// an earlier one.
    pub fn build(candidates: Vec<Candidate>) -> Result<Self, IndexError> {
        let mut files = HashMap::with_capacity(candidates.len());
        for c in candidates {
            let content_hash = integrity::hash_file(&c.serv_path).map_err(|source| {
                IndexError::Read {
                    path: c.serv_path.clone(),
                    source,
                }
            })?;
            if let Some(prev) = files.insert(
                c.client_path.clone(),
                IndexedFile {
                    client_path: c.client_path,
                    serv_path: c.serv_path,
                    content_hash,
                    should_not_replace: c.should_not_replace,
                },
            ) {
                warn!(path = %prev.client_path, "duplicate client path in scan, keeping last");
            }
        }
        Ok(Self { files })
    }

    /// Scan and hash in one step.
    pub fn from_scanner(scanner: &dyn Scanner) -> Result<Self, IndexError> {
        Self::build(scanner.scan()?)
    }

    pub fn get(&self, client_path: &str) -> Option<&IndexedFile> {
        self.files.get(client_path)
    }

    /// True iff the path is indexed with exactly this content hash.
    pub fn contains(&self, client_path: &str, hash: &[u8; HASH_LEN]) -> bool {
        self.files
            .get(client_path)
            .is_some_and(|f| f.content_hash == *hash)
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FromIterator<IndexedFile> for FileIndex {
    fn from_iter<I: IntoIterator<Item = IndexedFile>>(iter: I) -> Self {
        Self {
            files: iter
                .into_iter()
                .map(|f| (f.client_path.clone(), f))
                .collect(),
        }
    }
}

/// Walks a served root. Client paths are root-relative with `/` separators;
/// paths matching any `protected` pattern are flagged should-not-replace.
pub struct DirectoryScanner {
    root: PathBuf,
    protected: RegexSet,
}

impl DirectoryScanner {
    pub fn new<I, S>(root: impl Into<PathBuf>, protected: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            root: root.into(),
            protected: RegexSet::new(protected)?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Root-relative path rendered with `/` separators, as clients report it.
pub fn client_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

impl Scanner for DirectoryScanner {
    fn scan(&self) -> Result<Vec<Candidate>, IndexError> {
        debug!(root = %self.root.display(), "scanning served files");
        let mut out = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1).follow_links(true) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(client_path) = client_path(&self.root, entry.path()) else {
                continue;
            };
            out.push(Candidate {
                should_not_replace: self.protected.is_match(&client_path),
                client_path,
                serv_path: entry.into_path(),
            });
        }
        Ok(out)
    }
}

/// Process-wide index: shared read for sessions, exclusive for rebuilds, plus
/// the externally raised pending-rebuild flag.
pub struct SharedIndex {
    current: RwLock<FileIndex>,
    pending: AtomicBool,
    scanner: Arc<dyn Scanner>,
}

impl SharedIndex {
    pub fn new(initial: FileIndex, scanner: Arc<dyn Scanner>) -> Self {
        Self {
            current: RwLock::new(initial),
            pending: AtomicBool::new(false),
            scanner,
        }
    }

    /// Build the initial snapshot synchronously (startup, before serving).
    pub fn load(scanner: Arc<dyn Scanner>) -> Result<Self, IndexError> {
        let initial = FileIndex::from_scanner(scanner.as_ref())?;
        info!(files = initial.len(), "file index built");
        Ok(Self::new(initial, scanner))
    }

    /// Raise the pending-rebuild flag. The rebuild itself happens lazily
    /// between sessions.
    pub fn request_rebuild(&self) {
        self.pending.store(true, Ordering::SeqCst);
    }

    pub fn rebuild_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Shared section for a whole session.
    pub async fn read(&self) -> RwLockReadGuard<'_, FileIndex> {
        self.current.read().await
    }

    /// If a rebuild is pending, wait for in-flight sessions to release the
    /// index, rebuild it, start a new dedup epoch and clear the flag. On scan
    /// failure the previous snapshot stays and the flag stays raised.
    /// Returns true if a new snapshot was swapped in.
    pub async fn refresh_if_pending(&self, identities: &IdentityLog) -> bool {
        if !self.rebuild_pending() {
            return false;
        }
        let mut guard = self.current.write().await;
        // Another session may have rebuilt while we waited. Clearing before the
        // scan keeps any request raised during it for the next session.
        if !self.pending.swap(false, Ordering::SeqCst) {
            return false;
        }
        info!("reindexing files");
        let scanner = self.scanner.clone();
        let built = tokio::task::spawn_blocking(move || FileIndex::from_scanner(scanner.as_ref()))
            .await
            .map_err(|e| IndexError::Join(e.to_string()))
            .and_then(|r| r);
        match built {
            Ok(fresh) => {
                *guard = fresh;
                identities.reset();
                info!(files = guard.len(), "reindexing done");
                true
            }
            Err(e) => {
                warn!(error = %e, "reindex failed, keeping previous snapshot");
                self.request_rebuild();
                false
            }
        }
    }
}
