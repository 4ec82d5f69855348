//! Per-connection protocol state machine.
//!
//! VersionExchange -> IdentityCheck -> TelemetryReceive -> HashNegotiation ->
//! DiffCompute -> DiffTransfer -> Complete. Any read/write failure or the
//! session deadline ends the session at the current state; nothing is resumable.

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::identity::{IdentityLog, InstallId};
use crate::index::{FileIndex, IndexedFile, SharedIndex};
use crate::integrity::SigningKey;
use crate::packet::{self, Packet};
use crate::protocol::{Limits, DEFAULT_SESSION_TIMEOUT, END_OF_LIST, HASH_LEN, ID_LEN, PROTOCOL_VERSION};
use crate::telemetry::TelemetrySink;
use crate::wire::{self, FramingError};

/// Process-wide state shared by every connection task. Each field carries its
/// own synchronisation.
pub struct ServerContext {
    pub index: SharedIndex,
    pub identities: IdentityLog,
    pub telemetry: Arc<dyn TelemetrySink>,
    /// Signs every transferred file.
    pub signer: Arc<SigningKey>,
    pub limits: Limits,
    pub version: u8,
    pub session_timeout: Duration,
}

impl ServerContext {
    pub fn new(
        index: SharedIndex,
        signer: Arc<SigningKey>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            index,
            identities: IdentityLog::new(),
            telemetry,
            signer,
            limits: Limits::default(),
            version: PROTOCOL_VERSION,
            session_timeout: DEFAULT_SESSION_TIMEOUT,
        }
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.session_timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    VersionExchange,
    IdentityCheck,
    TelemetryReceive,
    HashNegotiation,
    DiffCompute,
    DiffTransfer,
    Complete,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    /// A file the index promised could not be read. Ends this session only.
    #[error("failed to read {path}: {source}")]
    Backing { path: PathBuf, source: io::Error },
    #[error("session deadline exceeded")]
    DeadlineExceeded,
}

/// How a session that did not fail ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Identifier already served (or being served) this epoch.
    Rejected,
    Served(Summary),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub reported: usize,
    pub confirmed: usize,
    pub files_sent: usize,
    pub bytes_sent: u64,
}

/// What the client told us during HashNegotiation.
#[derive(Debug, Default)]
pub struct Negotiated {
    /// Every path the client reported, whatever its hash.
    pub reported: HashSet<String>,
    /// Paths whose reported hash matched the index.
    pub confirmed: HashSet<String>,
}

/// Files to transfer: everything not confirmed present, minus protected files
/// the client has reported in any version. Sorted by client path; peers must
/// not rely on the order.
pub fn diff<'a>(index: &'a FileIndex, negotiated: &Negotiated) -> Vec<&'a IndexedFile> {
    let mut out: Vec<&IndexedFile> = index
        .iter()
        .filter(|f| !negotiated.confirmed.contains(&f.client_path))
        .filter(|f| !(f.should_not_replace && negotiated.reported.contains(&f.client_path)))
        .collect();
    out.sort_by(|a, b| a.client_path.cmp(&b.client_path));
    out
}

/// Drive one session, giving it the context's timeout from now.
pub async fn serve<S>(ctx: &ServerContext, stream: &mut S) -> Result<Outcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    serve_until(ctx, stream, Instant::now() + ctx.session_timeout).await
}

/// Drive one session that must finish by `deadline`. Hosts pass the accept
/// time plus the session timeout so any transport handshake counts against it.
pub async fn serve_until<S>(
    ctx: &ServerContext,
    stream: &mut S,
    deadline: Instant,
) -> Result<Outcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = State::VersionExchange;
    let timed = tokio::time::timeout_at(deadline, run(ctx, stream, &mut state)).await;
    let result = timed.unwrap_or(Err(SessionError::DeadlineExceeded));
    if let Err(e) = &result {
        warn!(%state, error = %e, "session aborted");
    }
    result
}

async fn run<S>(
    ctx: &ServerContext,
    stream: &mut S,
    state: &mut State,
) -> Result<Outcome, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    *state = State::VersionExchange;
    let client_version = wire::read_u8(stream).await?;
    wire::write_u8(stream, ctx.version).await?;
    wire::flush(stream).await?;
    if client_version != ctx.version {
        debug!(client_version, server_version = ctx.version, "version differs, echoing ours");
    }

    // Rebuild only between sessions, so the hashes we compare against match the
    // files we would send.
    ctx.index.refresh_if_pending(&ctx.identities).await;
    let index = ctx.index.read().await;

    *state = State::IdentityCheck;
    let id = InstallId(wire::read_array::<_, ID_LEN>(stream).await?);
    let Some(claim) = ctx.identities.try_claim(&id) else {
        info!(%id, "rejecting: already served this epoch");
        wire::write_bool(stream, false).await?;
        wire::close(stream).await?;
        return Ok(Outcome::Rejected);
    };
    wire::write_bool(stream, true).await?;
    wire::flush(stream).await?;

    *state = State::TelemetryReceive;
    let telemetry = wire::read_bytes(stream, ctx.limits.max_telemetry_len).await?;

    *state = State::HashNegotiation;
    let negotiated = negotiate(&index, stream, &ctx.limits).await?;

    *state = State::DiffCompute;
    let plan = diff(&index, &negotiated);
    debug!(%id, files = plan.len(), "diff computed");

    *state = State::DiffTransfer;
    let mut summary = Summary {
        reported: negotiated.reported.len(),
        confirmed: negotiated.confirmed.len(),
        ..Summary::default()
    };
    for file in plan {
        let blob = tokio::fs::read(&file.serv_path)
            .await
            .map_err(|source| SessionError::Backing {
                path: file.serv_path.clone(),
                source,
            })?;
        summary.files_sent += 1;
        summary.bytes_sent += blob.len() as u64;
        let sealed = Packet::seal(file.client_path.as_str(), blob, &ctx.signer);
        packet::write_packet(stream, &sealed).await?;
    }
    wire::close(stream).await?;

    *state = State::Complete;
    claim.complete();
    ctx.telemetry.record(&id, &telemetry);
    info!(
        %id,
        reported = summary.reported,
        confirmed = summary.confirmed,
        files = summary.files_sent,
        bytes = summary.bytes_sent,
        "session complete"
    );
    Ok(Outcome::Served(summary))
}

/// Read `hash || path` pairs until the all-zero hash, answering each with
/// whether the index holds that path with that hash.
async fn negotiate<S>(
    index: &FileIndex,
    stream: &mut S,
    limits: &Limits,
) -> Result<Negotiated, SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut out = Negotiated::default();
    loop {
        let hash = wire::read_array::<_, HASH_LEN>(stream).await?;
        if hash == END_OF_LIST {
            return Ok(out);
        }
        let path = wire::read_string(stream, limits.max_path_len).await?;
        let contains = index.contains(&path, &hash);
        wire::write_bool(stream, contains).await?;
        wire::flush(stream).await?;
        if contains {
            out.confirmed.insert(path.clone());
        }
        out.reported.insert(path);
    }
}
