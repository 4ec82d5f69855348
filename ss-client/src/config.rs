//! Client configuration: file, then environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use ss_core::Limits;

use crate::indexer::DEFAULT_EXCLUDES;

/// File: ./ssproto-client.toml unless `--config` names one. Env overrides:
/// SSPROTO_TARGET_HOST, SSPROTO_INSTALL_DIR, SSPROTO_CA_CERT_PATH,
/// SSPROTO_VERIFYING_KEY_PATH.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// `host:port` of the update server.
    #[serde(default = "default_target_host")]
    pub target_host: String,
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,
    /// The only CA the client trusts.
    #[serde(default = "default_ca_cert_path")]
    pub ca_cert_path: PathBuf,
    /// Base64 public key; every received file must carry its signature.
    #[serde(default = "default_verifying_key_path")]
    pub verifying_key_path: PathBuf,
    /// Relative paths resolve against `install_dir`.
    #[serde(default = "default_id_path")]
    pub id_path: PathBuf,
    #[serde(default = "default_max_blob_len")]
    pub max_blob_len: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_exclude")]
    pub exclude: Vec<String>,
}

fn default_target_host() -> String {
    format!("localhost:{}", crate::tls::DEFAULT_PORT)
}
fn default_install_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_ca_cert_path() -> PathBuf {
    PathBuf::from("certs/ca.crt")
}
fn default_verifying_key_path() -> PathBuf {
    PathBuf::from("certs/signing.pub")
}
fn default_id_path() -> PathBuf {
    PathBuf::from("config/uuid.bin")
}
fn default_max_blob_len() -> u64 {
    Limits::default().max_blob_len
}
fn default_timeout_secs() -> u64 {
    300
}
fn default_exclude() -> Vec<String> {
    DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_host: default_target_host(),
            install_dir: default_install_dir(),
            ca_cert_path: default_ca_cert_path(),
            verifying_key_path: default_verifying_key_path(),
            id_path: default_id_path(),
            max_blob_len: default_max_blob_len(),
            timeout_secs: default_timeout_secs(),
            exclude: default_exclude(),
        }
    }
}

impl Config {
    pub fn limits(&self) -> Limits {
        Limits {
            max_blob_len: self.max_blob_len,
            ..Limits::default()
        }
    }

    pub fn id_file(&self) -> PathBuf {
        self.install_dir.join(&self.id_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let default_path = Path::new("ssproto-client.toml");
    let mut c = match explicit {
        Some(p) => parse_file(p)?,
        None if default_path.exists() => parse_file(default_path)?,
        None => Config::default(),
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}

fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(h) = var("SSPROTO_TARGET_HOST") {
        c.target_host = h;
    }
    if let Some(p) = var("SSPROTO_INSTALL_DIR") {
        c.install_dir = PathBuf::from(p);
    }
    if let Some(p) = var("SSPROTO_CA_CERT_PATH") {
        c.ca_cert_path = PathBuf::from(p);
    }
    if let Some(p) = var("SSPROTO_VERIFYING_KEY_PATH") {
        c.verifying_key_path = PathBuf::from(p);
    }
}
