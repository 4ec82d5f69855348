//! Local install indexing: which files the client has, and their content hashes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::RegexSet;
use ss_core::index::{client_path, IndexError};
use ss_core::integrity;
use ss_core::protocol::HASH_LEN;
use tracing::debug;
use walkdir::WalkDir;

/// Paths the updater never looks at. Unanchored: a pattern matching anywhere in
/// the root-relative path excludes it.
pub const DEFAULT_EXCLUDES: &[&str] = &["/?ignored_*", "assets", "screenshots", "saves", "library"];

pub struct Indexer {
    root: PathBuf,
    exclude: RegexSet,
}

impl Indexer {
    pub fn new<I, S>(root: impl Into<PathBuf>, exclude: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(Self {
            root: root.into(),
            exclude: RegexSet::new(exclude)?,
        })
    }

    pub fn with_default_excludes(root: impl Into<PathBuf>) -> Result<Self, IndexError> {
        Self::new(root, DEFAULT_EXCLUDES)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_excluded(&self, client_path: &str) -> bool {
        self.exclude.is_match(client_path)
    }

    /// Client path -> content hash for every file not excluded. An excluded
    /// directory is pruned without descending.
    pub fn scan(&self) -> Result<BTreeMap<String, [u8; HASH_LEN]>, IndexError> {
        let mut out = BTreeMap::new();
        let walk = WalkDir::new(&self.root)
            .min_depth(1)
            .into_iter()
            .filter_entry(|e| match client_path(&self.root, e.path()) {
                Some(p) => !self.is_excluded(&p),
                None => true,
            });
        for entry in walk {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(path) = client_path(&self.root, entry.path()) else {
                continue;
            };
            let hash = integrity::hash_file(entry.path()).map_err(|source| IndexError::Read {
                path: entry.path().to_path_buf(),
                source,
            })?;
            out.insert(path, hash);
        }
        debug!(root = %self.root.display(), files = out.len(), "local index built");
        Ok(out)
    }
}
