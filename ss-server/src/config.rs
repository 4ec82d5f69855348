//! Load config from file and environment.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use ss_core::Limits;

/// Server configuration. File: ./ssproto-server.toml or /etc/ssproto/server.toml,
/// unless `--config` names one. Env overrides: SSPROTO_LISTEN_ADDR,
/// SSPROTO_SERVED_ROOT, SSPROTO_CERT_PATH, SSPROTO_KEY_PATH,
/// SSPROTO_SIGNING_KEY_PATH, SSPROTO_SESSION_TIMEOUT_SECS, SSPROTO_REINDEX_INTERVAL_SECS.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// TLS listen address (default 0.0.0.0:48879).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
    /// Directory whose files are served.
    #[serde(default = "default_served_root")]
    pub served_root: PathBuf,
    /// Regexes over client paths; matches are never overwritten once a client has them.
    #[serde(default)]
    pub protected: Vec<String>,
    #[serde(default = "default_cert_path")]
    pub cert_path: PathBuf,
    #[serde(default = "default_key_path")]
    pub key_path: PathBuf,
    /// Base64 seed of the key that signs every transferred file.
    #[serde(default = "default_signing_key_path")]
    pub signing_key_path: PathBuf,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,
    /// 0 disables the periodic reindex; SIGHUP still works.
    #[serde(default = "default_reindex_interval_secs")]
    pub reindex_interval_secs: u64,
    #[serde(default = "default_max_path_len")]
    pub max_path_len: u64,
    #[serde(default = "default_max_telemetry_len")]
    pub max_telemetry_len: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 48879))
}
fn default_served_root() -> PathBuf {
    PathBuf::from("served")
}
fn default_cert_path() -> PathBuf {
    PathBuf::from("certs/server.crt")
}
fn default_key_path() -> PathBuf {
    PathBuf::from("certs/server.key")
}
fn default_signing_key_path() -> PathBuf {
    PathBuf::from("certs/signing.key")
}
fn default_session_timeout_secs() -> u64 {
    300
}
fn default_handshake_timeout_secs() -> u64 {
    30
}
fn default_reindex_interval_secs() -> u64 {
    24 * 60 * 60
}
fn default_max_path_len() -> u64 {
    Limits::default().max_path_len
}
fn default_max_telemetry_len() -> u64 {
    Limits::default().max_telemetry_len
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            served_root: default_served_root(),
            protected: Vec::new(),
            cert_path: default_cert_path(),
            key_path: default_key_path(),
            signing_key_path: default_signing_key_path(),
            session_timeout_secs: default_session_timeout_secs(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            reindex_interval_secs: default_reindex_interval_secs(),
            max_path_len: default_max_path_len(),
            max_telemetry_len: default_max_telemetry_len(),
        }
    }
}

impl Config {
    pub fn limits(&self) -> Limits {
        Limits {
            max_path_len: self.max_path_len,
            max_telemetry_len: self.max_telemetry_len,
            ..Limits::default()
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn reindex_interval(&self) -> Option<Duration> {
        (self.reindex_interval_secs > 0).then(|| Duration::from_secs(self.reindex_interval_secs))
    }
}

/// Load config: default, then the config file, then env vars. An explicit
/// path must exist and parse; the default locations are optional.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
    let mut c = match explicit {
        Some(p) => parse_file(p)?,
        None => match config_paths().into_iter().find(|p| p.exists()) {
            Some(p) => parse_file(&p)?,
            None => Config::default(),
        },
    };
    apply_env(&mut c, |k| std::env::var(k).ok());
    Ok(c)
}

fn config_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("ssproto-server.toml"),
        PathBuf::from("/etc/ssproto/server.toml"),
    ]
}

fn parse_file(path: &Path) -> anyhow::Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&s).with_context(|| format!("parsing config {}", path.display()))
}

/// Unparseable values are ignored and the file/default value is kept.
fn apply_env(c: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(a) = var("SSPROTO_LISTEN_ADDR").and_then(|s| s.parse().ok()) {
        c.listen_addr = a;
    }
    if let Some(p) = var("SSPROTO_SERVED_ROOT") {
        c.served_root = PathBuf::from(p);
    }
    if let Some(p) = var("SSPROTO_CERT_PATH") {
        c.cert_path = PathBuf::from(p);
    }
    if let Some(p) = var("SSPROTO_KEY_PATH") {
        c.key_path = PathBuf::from(p);
    }
    if let Some(p) = var("SSPROTO_SIGNING_KEY_PATH") {
        c.signing_key_path = PathBuf::from(p);
    }
    if let Some(n) = var("SSPROTO_SESSION_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
        c.session_timeout_secs = n;
    }
    if let Some(n) = var("SSPROTO_REINDEX_INTERVAL_SECS").and_then(|s| s.parse().ok()) {
        c.reindex_interval_secs = n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_to_missing_fields() {
        let c: Config = toml::from_str("served_root = \"/srv/pack\"").unwrap();
        assert_eq!(c.served_root, PathBuf::from("/srv/pack"));
        assert_eq!(c.listen_addr.port(), 48879);
        assert_eq!(c.session_timeout(), Duration::from_secs(300));
        assert_eq!(c.reindex_interval(), Some(Duration::from_secs(86400)));
        assert!(c.protected.is_empty());
    }

    #[test]
    fn unknown_field_rejected() {
        assert!(toml::from_str::<Config>("listen_port = 1").is_err());
    }

    #[test]
    fn zero_interval_disables_reindex_timer() {
        let c: Config = toml::from_str("reindex_interval_secs = 0").unwrap();
        assert_eq!(c.reindex_interval(), None);
    }

    #[test]
    fn limits_follow_config() {
        let c: Config = toml::from_str("max_path_len = 128\nmax_telemetry_len = 10").unwrap();
        let l = c.limits();
        assert_eq!((l.max_path_len, l.max_telemetry_len), (128, 10));
        assert_eq!(l.max_blob_len, Limits::default().max_blob_len);
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            ("SSPROTO_LISTEN_ADDR", "127.0.0.1:9000"),
            ("SSPROTO_SERVED_ROOT", "/data"),
            ("SSPROTO_SIGNING_KEY_PATH", "/keys/sign.key"),
            ("SSPROTO_SESSION_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();
        let mut c = Config::default();
        apply_env(&mut c, |k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.listen_addr, "127.0.0.1:9000".parse().unwrap());
        assert_eq!(c.served_root, PathBuf::from("/data"));
        assert_eq!(c.signing_key_path, PathBuf::from("/keys/sign.key"));
        assert_eq!(c.session_timeout_secs, 300);
    }

    #[test]
    fn explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(Some(&dir.path().join("missing.toml"))).is_err());
        let p = dir.path().join("server.toml");
        std::fs::write(&p, "protected = [\"^config/\"]\n").unwrap();
        let c = parse_file(&p).unwrap();
        assert_eq!(c.protected, ["^config/"]);
    }
}
