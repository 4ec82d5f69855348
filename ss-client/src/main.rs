// SSProto client: bring the local install in line with the update server.

use std::path::PathBuf;

use anyhow::{bail, Context};
use ss_client::telemetry::MachineInfo;
use ss_client::{config, install_id, tls, Indexer, Request, SyncOutcome};
use ss_core::integrity::keyfile;
use tracing::info;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut config_path: Option<PathBuf> = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ss-client {}", VERSION);
                return Ok(());
            }
            "--config" | "-c" => {
                config_path = Some(args.next().context("--config needs a path")?.into());
            }
            other => bail!("unknown argument: {other}"),
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg = config::load(config_path.as_deref())?;
    let id = install_id::load_or_create(&cfg.id_file())?;
    let hashes = Indexer::new(&cfg.install_dir, &cfg.exclude)
        .context("compiling exclude patterns")?
        .scan()
        .with_context(|| format!("indexing {}", cfg.install_dir.display()))?;
    let telemetry = MachineInfo::current().to_payload()?;
    let connector = tls::load_connector(&cfg.ca_cert_path)?;
    let key = keyfile::load_verifying_key(&cfg.verifying_key_path)
        .context("loading update signing key")?;

    let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    // One budget covers connecting, the handshake and the session.
    let outcome = rt.block_on(async {
        let session = async {
            let stream = tls::connect(&connector, &cfg.target_host, cfg.timeout())
                .await
                .context("connecting to update server")?;
            let request = Request {
                id: &id,
                telemetry: &telemetry,
                hashes: &hashes,
                key: &key,
            };
            ss_client::sync(stream, cfg.limits(), &request, &cfg.install_dir)
                .await
                .context("update session failed")
        };
        tokio::time::timeout(cfg.timeout(), session)
            .await
            .context("session timed out")?
    })?;

    match outcome {
        SyncOutcome::AlreadyServed => info!("already up to date for this server epoch"),
        SyncOutcome::Updated(r) => info!(
            confirmed = r.confirmed.len(),
            files = r.written.len(),
            bytes = r.bytes,
            "install updated"
        ),
    }
    Ok(())
}
