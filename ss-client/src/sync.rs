//! Client side of one protocol session.
//!
//! [`ClientSession`] exposes each step so tests can stop anywhere; [`sync`]
//! runs the whole exchange, checks every received packet against the shipped
//! verifying key and writes it into the install dir.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ss_core::packet::{self, Packet};
use ss_core::protocol::{Limits, END_OF_LIST, HASH_LEN, PROTOCOL_VERSION};
use ss_core::wire::{self, FramingError};
use ss_core::{InstallId, VerifyError, VerifyingKey};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::apply::{self, ApplyError};

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("protocol error: {0}")]
    Framing(#[from] FramingError),
    /// A received file failed its hash or signature check; nothing of it was written.
    #[error("untrusted data for {path}: {source}")]
    Crypto { path: String, source: VerifyError },
    #[error(transparent)]
    Apply(#[from] ApplyError),
}

pub struct ClientSession<S> {
    stream: S,
    limits: Limits,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ClientSession<S> {
    pub fn new(stream: S, limits: Limits) -> Self {
        Self { stream, limits }
    }

    /// Send our version and return the one the server echoes.
    pub async fn exchange_version(&mut self, version: u8) -> Result<u8, SyncError> {
        wire::write_u8(&mut self.stream, version).await?;
        wire::flush(&mut self.stream).await?;
        Ok(wire::read_u8(&mut self.stream).await?)
    }

    /// False means the server already served this install since its last reindex.
    pub async fn identify(&mut self, id: &InstallId) -> Result<bool, SyncError> {
        wire::write_array(&mut self.stream, id.as_bytes()).await?;
        wire::flush(&mut self.stream).await?;
        Ok(wire::read_bool(&mut self.stream).await?)
    }

    pub async fn send_telemetry(&mut self, payload: &[u8]) -> Result<(), SyncError> {
        wire::write_bytes(&mut self.stream, payload).await?;
        Ok(())
    }

    /// Report every local file and terminate the list. Returns the paths the
    /// server confirmed as current.
    pub async fn negotiate(
        &mut self,
        hashes: &BTreeMap<String, [u8; HASH_LEN]>,
    ) -> Result<Vec<String>, SyncError> {
        let mut confirmed = Vec::new();
        for (path, hash) in hashes {
            wire::write_array(&mut self.stream, hash).await?;
            wire::write_bytes(&mut self.stream, path.as_bytes()).await?;
            wire::flush(&mut self.stream).await?;
            if wire::read_bool(&mut self.stream).await? {
                confirmed.push(path.clone());
            }
        }
        wire::write_array(&mut self.stream, &END_OF_LIST).await?;
        wire::flush(&mut self.stream).await?;
        Ok(confirmed)
    }

    /// Next transferred packet, or `None` once the server has closed the stream.
    /// Not yet verified.
    pub async fn next_packet(&mut self) -> Result<Option<Packet>, SyncError> {
        Ok(packet::read_next_packet(&mut self.stream, &self.limits).await?)
    }
}

/// What this install sends in one session.
pub struct Request<'a> {
    pub id: &'a InstallId,
    pub telemetry: &'a [u8],
    pub hashes: &'a BTreeMap<String, [u8; HASH_LEN]>,
    /// Every transferred file must be signed by this key.
    pub key: &'a VerifyingKey,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Served earlier in this server epoch; nothing was exchanged.
    AlreadyServed,
    Updated(SyncReport),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub server_version: u8,
    pub confirmed: Vec<String>,
    pub written: Vec<PathBuf>,
    pub bytes: u64,
}

/// Run one session and apply every received file under `install_dir`.
pub async fn sync<S>(
    stream: S,
    limits: Limits,
    request: &Request<'_>,
    install_dir: &Path,
) -> Result<SyncOutcome, SyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = ClientSession::new(stream, limits);
    let server_version = session.exchange_version(PROTOCOL_VERSION).await?;
    if server_version != PROTOCOL_VERSION {
        debug!(server_version, "server speaks a different version");
    }
    if !session.identify(request.id).await? {
        info!("server already served this install; nothing to do");
        return Ok(SyncOutcome::AlreadyServed);
    }
    session.send_telemetry(request.telemetry).await?;
    let confirmed = session.negotiate(request.hashes).await?;
    debug!(reported = request.hashes.len(), confirmed = confirmed.len(), "hash list sent");

    let mut report = SyncReport {
        server_version,
        confirmed,
        ..SyncReport::default()
    };
    while let Some(packet) = session.next_packet().await? {
        if let Err(source) = packet.verify(request.key) {
            warn!(path = %packet.file_path, error = %source, "rejecting unsigned or altered file");
            return Err(SyncError::Crypto {
                path: packet.file_path,
                source,
            });
        }
        let written = apply::apply(install_dir, &packet.file_path, &packet.blob).await?;
        debug!(path = %packet.file_path, bytes = packet.blob.len(), "updated");
        report.bytes += packet.blob.len() as u64;
        report.written.push(written);
    }
    info!(files = report.written.len(), bytes = report.bytes, "update complete");
    Ok(SyncOutcome::Updated(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ss_core::index::{Candidate, IndexError, Scanner};
    use ss_core::integrity::{self, SEED_LEN};
    use ss_core::telemetry::MemorySink;
    use ss_core::{serve, Outcome, ServerContext, SharedIndex, Signature, SigningKey};
    use tokio::io::duplex;

    use crate::indexer::Indexer;

    struct Fixed(Vec<Candidate>);

    fn signer() -> SigningKey {
        SigningKey::from_seed([21u8; SEED_LEN])
    }

    impl Scanner for Fixed {
        fn scan(&self) -> Result<Vec<Candidate>, IndexError> {
            Ok(self.0.clone())
        }
    }

    fn served(root: &Path, files: &[(&str, &str, bool)]) -> Arc<ServerContext> {
        let candidates = files
            .iter()
            .map(|(path, data, protected)| {
                let serv_path = root.join(path);
                std::fs::create_dir_all(serv_path.parent().unwrap()).unwrap();
                std::fs::write(&serv_path, data).unwrap();
                Candidate {
                    client_path: path.to_string(),
                    serv_path,
                    should_not_replace: *protected,
                }
            })
            .collect();
        let index = SharedIndex::load(Arc::new(Fixed(candidates))).unwrap();
        Arc::new(ServerContext::new(
            index,
            Arc::new(signer()),
            Arc::new(MemorySink::default()),
        ))
    }

    async fn run(
        ctx: &Arc<ServerContext>,
        install: &Path,
        id: InstallId,
    ) -> (Outcome, SyncOutcome) {
        let hashes = Indexer::with_default_excludes(install).unwrap().scan().unwrap();
        let (c, mut s) = duplex(64 * 1024);
        let server_ctx = ctx.clone();
        let server = tokio::spawn(async move { serve(&server_ctx, &mut s).await });
        let key = signer();
        let request = Request {
            id: &id,
            telemetry: b"{}",
            hashes: &hashes,
            key: key.verifying_key(),
        };
        let client = sync(c, Limits::default(), &request, install).await.unwrap();
        (server.await.unwrap().unwrap(), client)
    }

    #[tokio::test]
    async fn client_converges_with_server_tree() {
        let srv = tempfile::tempdir().unwrap();
        let ctx = served(
            srv.path(),
            &[
                ("mods/a.jar", "new-a", false),
                ("mods/b.jar", "b", false),
                ("options.txt", "defaults", true),
            ],
        );
        let install = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(install.path().join("mods")).unwrap();
        std::fs::write(install.path().join("mods/a.jar"), "old-a").unwrap();
        std::fs::write(install.path().join("mods/b.jar"), "b").unwrap();
        std::fs::write(install.path().join("options.txt"), "mine").unwrap();

        let (server, client) = run(&ctx, install.path(), InstallId([1; 32])).await;
        assert!(matches!(server, Outcome::Served(_)));
        let SyncOutcome::Updated(report) = client else {
            panic!("expected update");
        };
        assert_eq!(report.server_version, PROTOCOL_VERSION);
        assert_eq!(report.confirmed, ["mods/b.jar"]);
        assert_eq!(report.written, [install.path().join("mods/a.jar")]);
        assert_eq!(std::fs::read_to_string(install.path().join("mods/a.jar")).unwrap(), "new-a");
        // Protected file the client already has is left alone.
        assert_eq!(std::fs::read_to_string(install.path().join("options.txt")).unwrap(), "mine");
    }

    #[tokio::test]
    async fn second_session_is_rejected_until_reindex() {
        let srv = tempfile::tempdir().unwrap();
        let ctx = served(srv.path(), &[("a.txt", "a", false)]);
        let install = tempfile::tempdir().unwrap();
        let id = InstallId([2; 32]);

        let (_, first) = run(&ctx, install.path(), id).await;
        assert!(matches!(first, SyncOutcome::Updated(_)));
        let (server, second) = run(&ctx, install.path(), id).await;
        assert_eq!(server, Outcome::Rejected);
        assert_eq!(second, SyncOutcome::AlreadyServed);

        ctx.index.request_rebuild();
        let (_, third) = run(&ctx, install.path(), id).await;
        let SyncOutcome::Updated(report) = third else {
            panic!("expected update after reindex");
        };
        assert_eq!(report.confirmed, ["a.txt"]);
        assert!(report.written.is_empty());
    }

    #[tokio::test]
    async fn excluded_local_files_are_never_reported() {
        let srv = tempfile::tempdir().unwrap();
        let ctx = served(srv.path(), &[("saves/w.dat", "server", false)]);
        let install = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(install.path().join("saves")).unwrap();
        std::fs::write(install.path().join("saves/w.dat"), "server").unwrap();

        let (server, _) = run(&ctx, install.path(), InstallId([3; 32])).await;
        // Same contents, but the client never reported it, so it is sent again.
        match server {
            Outcome::Served(s) => assert_eq!((s.reported, s.files_sent), (0, 1)),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(install.path().join("saves/w.dat")).unwrap(), "server");
    }

    /// Stand-in server that accepts, drains the client's messages and then
    /// streams `packets` as the transfer.
    async fn scripted_server(mut s: tokio::io::DuplexStream, packets: Vec<Packet>) {
        wire::read_u8(&mut s).await.unwrap();
        wire::write_u8(&mut s, PROTOCOL_VERSION).await.unwrap();
        wire::read_array::<_, 32>(&mut s).await.unwrap();
        wire::write_bool(&mut s, true).await.unwrap();
        wire::read_bytes(&mut s, 1024).await.unwrap();
        wire::read_array::<_, 32>(&mut s).await.unwrap();
        for p in &packets {
            packet::write_packet(&mut s, p).await.unwrap();
        }
        wire::close(&mut s).await.unwrap();
    }

    async fn sync_against(packets: Vec<Packet>, install: &Path) -> Result<SyncOutcome, SyncError> {
        let (c, s) = duplex(64 * 1024);
        let server = tokio::spawn(scripted_server(s, packets));
        let hashes = BTreeMap::new();
        let id = InstallId([4; 32]);
        let key = signer();
        let request = Request {
            id: &id,
            telemetry: b"",
            hashes: &hashes,
            key: key.verifying_key(),
        };
        let out = sync(c, Limits::default(), &request, install).await;
        server.await.unwrap();
        out
    }

    #[tokio::test]
    async fn unsafe_path_from_server_aborts() {
        let install = tempfile::tempdir().unwrap();
        let evil = Packet::seal("../escape", b"x".to_vec(), &signer());
        let err = sync_against(vec![evil], install.path()).await.unwrap_err();
        assert!(matches!(err, SyncError::Apply(ApplyError::UnsafePath(_))));
    }

    #[tokio::test]
    async fn unsigned_file_is_never_written() {
        let install = tempfile::tempdir().unwrap();
        let blob = b"not signed".to_vec();
        let forged = Packet {
            hash: integrity::hash_content(&blob),
            signature: Signature::from_bytes([0; 112]),
            file_path: "mods/evil.jar".into(),
            blob,
        };
        let err = sync_against(vec![forged], install.path()).await.unwrap_err();
        assert!(matches!(
            err,
            SyncError::Crypto { ref path, source: VerifyError::BadSignature } if path == "mods/evil.jar"
        ));
        assert!(!install.path().join("mods/evil.jar").exists());
        assert!(!install.path().join("mods").exists());
    }

    #[tokio::test]
    async fn file_signed_by_another_key_is_rejected() {
        let install = tempfile::tempdir().unwrap();
        let stranger = SigningKey::from_seed([99u8; SEED_LEN]);
        let good = Packet::seal("a.txt", b"fine".to_vec(), &signer());
        let bad = Packet::seal("b.txt", b"imposter".to_vec(), &stranger);
        let err = sync_against(vec![good, bad], install.path()).await.unwrap_err();
        assert!(matches!(err, SyncError::Crypto { source: VerifyError::BadSignature, .. }));
        assert_eq!(std::fs::read_to_string(install.path().join("a.txt")).unwrap(), "fine");
        assert!(!install.path().join("b.txt").exists());
    }

    #[tokio::test]
    async fn blob_not_matching_its_hash_is_rejected() {
        let install = tempfile::tempdir().unwrap();
        let mut altered = Packet::seal("cfg.txt", b"original".to_vec(), &signer());
        altered.blob = b"swapped!".to_vec();
        let err = sync_against(vec![altered], install.path()).await.unwrap_err();
        assert!(matches!(err, SyncError::Crypto { source: VerifyError::HashMismatch, .. }));
        assert!(!install.path().join("cfg.txt").exists());
    }
}
