//! Per-install identifier: 32 random bytes, generated once and kept on disk.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use ss_core::protocol::ID_LEN;
use ss_core::InstallId;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identifier file {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("identifier file {path} holds {len} bytes, expected 32")]
    WrongLength { path: PathBuf, len: usize },
}

/// Read the stored identifier, or create one if the file does not exist.
pub fn load_or_create(path: &Path) -> Result<InstallId, IdentityError> {
    let io_err = |source: io::Error| IdentityError::Io {
        path: path.to_path_buf(),
        source,
    };
    match std::fs::read(path) {
        Ok(bytes) => {
            let id: [u8; ID_LEN] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| IdentityError::WrongLength {
                    path: path.to_path_buf(),
                    len: bytes.len(),
                })?;
            Ok(InstallId(id))
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let mut id = [0u8; ID_LEN];
            OsRng.fill_bytes(&mut id);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            write_private(path, &id).map_err(io_err)?;
            info!(path = %path.display(), "generated install identifier");
            Ok(InstallId(id))
        }
        Err(e) => Err(io_err(e)),
    }
}

/// Owner read/write only on unix; fails if the file already exists.
fn write_private(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts.open(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}
