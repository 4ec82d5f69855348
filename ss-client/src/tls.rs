//! TLS connector that trusts exactly the CA shipped with the client.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

pub const DEFAULT_PORT: u16 = 48879;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("malformed PEM: {0}")]
    Pem(io::Error),
    #[error("no CA certificate found")]
    NoCertificate,
    #[error("invalid server name {0:?}")]
    ServerName(String),
    #[error("tls config: {0}")]
    Rustls(#[from] rustls::Error),
    #[error("connecting to {addr}: {source}")]
    Connect { addr: String, source: io::Error },
    #[error("connecting to {0} timed out")]
    Timeout(String),
}

pub fn load_connector(ca_path: &Path) -> Result<TlsConnector, TlsError> {
    let pem = std::fs::read(ca_path).map_err(|source| TlsError::Read {
        path: ca_path.to_path_buf(),
        source,
    })?;
    connector_from_pem(&pem)
}

/// Trust anchors come only from `ca_pem`; the platform store is not consulted.
pub fn connector_from_pem(ca_pem: &[u8]) -> Result<TlsConnector, TlsError> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut &ca_pem[..]) {
        roots.add(cert.map_err(TlsError::Pem)?)?;
    }
    if roots.is_empty() {
        return Err(TlsError::NoCertificate);
    }
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(roots)
    .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Split `host[:port]` (IPv6 in brackets) into the name to verify and the
/// address to dial. A port, when given, must be a non-empty decimal u16.
pub fn split_target(target: &str) -> Result<(ServerName<'static>, String), TlsError> {
    let bad = || TlsError::ServerName(target.to_string());
    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(bad)?;
        match tail.strip_prefix(':') {
            Some(port) => (host, Some(port)),
            None if tail.is_empty() => (host, None),
            None => return Err(bad()),
        }
    } else {
        match target.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (target, None),
        }
    };
    let port = match port {
        Some(p) if !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()) => {
            p.parse::<u16>().map_err(|_| bad())?
        }
        Some(_) => return Err(bad()),
        None => DEFAULT_PORT,
    };
    let addr = if target.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };
    if host.is_empty() {
        return Err(bad());
    }
    let name = ServerName::try_from(host.to_string()).map_err(|_| bad())?;
    Ok((name, addr))
}

pub async fn connect(
    connector: &TlsConnector,
    target: &str,
    timeout: Duration,
) -> Result<TlsStream<TcpStream>, TlsError> {
    let (name, addr) = split_target(target)?;
    let dial = async {
        let tcp = TcpStream::connect(&addr).await?;
        connector.connect(name, tcp).await
    };
    match tokio::time::timeout(timeout, dial).await {
        Ok(Ok(s)) => Ok(s),
        Ok(Err(source)) => Err(TlsError::Connect { addr, source }),
        Err(_) => Err(TlsError::Timeout(addr)),
    }
}
