//! Accept loop: TLS handshake per connection, then one protocol session.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ss_core::session::{self, Outcome, ServerContext};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::Instant;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, info_span, warn, Instrument};

/// Failure below the protocol layer; the session never starts.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("tls handshake failed: {0}")]
    Handshake(io::Error),
    #[error("tls handshake timed out")]
    HandshakeTimeout,
}

pub struct Listener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
    handshake_timeout: Duration,
}

impl Listener {
    pub fn new(
        tcp: TcpListener,
        acceptor: TlsAcceptor,
        ctx: Arc<ServerContext>,
        handshake_timeout: Duration,
    ) -> Self {
        Self {
            tcp,
            acceptor,
            ctx,
            handshake_timeout,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Accept forever, one task per connection. Sessions share nothing but the context.
    pub async fn run(self) {
        loop {
            match self.tcp.accept().await {
                Ok((stream, peer)) => {
                    let accepted_at = Instant::now();
                    let acceptor = self.acceptor.clone();
                    let ctx = self.ctx.clone();
                    let timeout = self.handshake_timeout;
                    tokio::spawn(
                        handle_connection(stream, acceptor, ctx, timeout, accepted_at)
                            .instrument(info_span!("conn", %peer)),
                    );
                }
                Err(e) => {
                    // Usually fd exhaustion; back off instead of spinning.
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
    handshake_timeout: Duration,
    accepted_at: Instant,
) {
    // One budget from accept covers the handshake and the whole session.
    let deadline = accepted_at + ctx.session_timeout;
    let handshake_deadline = (accepted_at + handshake_timeout).min(deadline);
    let mut tls = match accept_tls(stream, &acceptor, handshake_deadline).await {
        Ok(s) => s,
        Err(e) => {
            debug!(error = %e, "dropping connection");
            return;
        }
    };
    match session::serve_until(&ctx, &mut tls, deadline).await {
        Ok(Outcome::Served(summary)) => debug!(?summary, "session served"),
        Ok(Outcome::Rejected) => debug!("session rejected"),
        // serve() already logged the state it failed in.
        Err(_) => {}
    }
}

pub async fn accept_tls(
    stream: TcpStream,
    acceptor: &TlsAcceptor,
    deadline: Instant,
) -> Result<TlsStream<TcpStream>, TransportError> {
    match tokio::time::timeout_at(deadline, acceptor.accept(stream)).await {
        Ok(Ok(s)) => Ok(s),
        Ok(Err(e)) => Err(TransportError::Handshake(e)),
        Err(_) => Err(TransportError::HandshakeTimeout),
    }
}

/// Bind and log the address actually bound (port 0 resolves here).
pub async fn bind(
    addr: SocketAddr,
    acceptor: TlsAcceptor,
    ctx: Arc<ServerContext>,
    handshake_timeout: Duration,
) -> io::Result<Listener> {
    let tcp = TcpListener::bind(addr).await?;
    let listener = Listener::new(tcp, acceptor, ctx, handshake_timeout);
    info!(addr = %listener.local_addr()?, "listening");
    Ok(listener)
}
