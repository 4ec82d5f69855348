//! The server's update signing key: loaded at startup, or generated once with
//! `--gen-signing-key`.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use rand::rngs::OsRng;
use ss_core::integrity::keyfile;
use ss_core::SigningKey;
use tracing::info;

pub fn load(path: &Path) -> anyhow::Result<SigningKey> {
    let key = keyfile::load_signing_key(path)?;
    info!(
        path = %path.display(),
        public = %keyfile::encode(key.verifying_key().as_bytes()),
        "signing key loaded"
    );
    Ok(key)
}

/// Write a fresh seed to `path` (refusing to overwrite) and return the public
/// key in the text form clients ship.
pub fn generate(path: &Path) -> anyhow::Result<String> {
    let key = SigningKey::generate(&mut OsRng);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    write_private(path, keyfile::encode(key.seed()).as_bytes())
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(keyfile::encode(key.verifying_key().as_bytes()))
}

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
    f.write_all(b"\n")?;
    f.sync_all()
}
