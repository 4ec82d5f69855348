// SSProto server daemon: serves one directory tree to update clients over TLS.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use ss_core::{DirectoryScanner, LogSink, ServerContext, SharedIndex};
use ss_server::{config, listener, reindex, signing, tls, Config};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ss-server {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                config_path = Some(args.next().context("--config needs a path")?.into());
            }
            "--gen-signing-key" => {
                let path = PathBuf::from(args.next().context("--gen-signing-key needs a path")?);
                let public = signing::generate(&path)?;
                println!("{public}");
                return Ok(());
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load(config_path.as_deref())?;
    let acceptor = tls::load_acceptor(&cfg.cert_path, &cfg.key_path).context("loading TLS identity")?;
    let signer = signing::load(&cfg.signing_key_path).context("loading update signing key")?;
    let scanner = DirectoryScanner::new(&cfg.served_root, &cfg.protected)
        .context("compiling protected patterns")?;
    let index = SharedIndex::load(Arc::new(scanner))
        .with_context(|| format!("indexing {}", cfg.served_root.display()))?;

    let ctx = Arc::new(
        ServerContext::new(index, Arc::new(signer), Arc::new(LogSink))
            .with_limits(cfg.limits())
            .with_session_timeout(cfg.session_timeout()),
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(serve(cfg, acceptor, ctx))
}

async fn serve(
    cfg: Config,
    acceptor: tokio_rustls::TlsAcceptor,
    ctx: Arc<ServerContext>,
) -> anyhow::Result<()> {
    let listener = listener::bind(cfg.listen_addr, acceptor, ctx.clone(), cfg.handshake_timeout())
        .await
        .with_context(|| format!("binding {}", cfg.listen_addr))?;

    if let Some(every) = cfg.reindex_interval() {
        tokio::spawn(reindex::on_interval(ctx.clone(), every));
    }
    #[cfg(unix)]
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = reindex::on_sighup(ctx).await {
                warn!(error = %e, "SIGHUP handler unavailable");
            }
        });
    }

    tokio::select! {
        _ = listener.run() => {}
        r = shutdown_signal() => r?,
    }
    // In-flight sessions are dropped with the runtime.
    info!("shutting down");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
