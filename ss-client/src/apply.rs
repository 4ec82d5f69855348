//! Writing received files into the install directory.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("refusing unsafe path {0:?}")]
    UnsafePath(String),
    #[error("failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Map a server-supplied client path under `root`. Only plain relative
/// `/`-separated segments are accepted.
pub fn resolve(root: &Path, client_path: &str) -> Result<PathBuf, ApplyError> {
    let unsafe_path = || ApplyError::UnsafePath(client_path.to_string());
    if client_path.is_empty() || client_path.starts_with('/') {
        return Err(unsafe_path());
    }
    let mut out = root.to_path_buf();
    for seg in client_path.split('/') {
        if seg.is_empty() || seg == "." || seg == ".." || seg.contains(['\\', ':', '\0']) {
            return Err(unsafe_path());
        }
        out.push(seg);
    }
    Ok(out)
}

/// Write one verified file, replacing any existing one. Data goes to a sibling
/// temp file first and is renamed into place.
pub async fn apply(root: &Path, client_path: &str, blob: &[u8]) -> Result<PathBuf, ApplyError> {
    let target = resolve(root, client_path)?;
    let io_err = |source: io::Error| ApplyError::Io {
        path: target.clone(),
        source,
    };
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let mut tmp = target.clone().into_os_string();
    tmp.push(".sspart");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, blob).await.map_err(io_err)?;
    tokio::fs::rename(&tmp, &target).await.map_err(io_err)?;
    Ok(target)
}
