//! Reindex triggers. Both only raise the pending flag; the next session to
//! pass version exchange performs the rebuild.

use std::sync::Arc;
use std::time::Duration;

use ss_core::ServerContext;
use tracing::info;

pub async fn on_interval(ctx: Arc<ServerContext>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    // First tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        info!("scheduled reindex requested");
        ctx.index.request_rebuild();
    }
}

#[cfg(unix)]
pub async fn on_sighup(ctx: Arc<ServerContext>) -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut hup = signal(SignalKind::hangup())?;
    while hup.recv().await.is_some() {
        info!("SIGHUP: reindex requested");
        ctx.index.request_rebuild();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ss_core::index::{Candidate, IndexError, Scanner};
    use ss_core::integrity::SEED_LEN;
    use ss_core::telemetry::MemorySink;
    use ss_core::{FileIndex, SharedIndex, SigningKey};

    struct Empty;

    impl Scanner for Empty {
        fn scan(&self) -> Result<Vec<Candidate>, IndexError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn interval_raises_flag_after_period() {
        let index = SharedIndex::new(FileIndex::default(), Arc::new(Empty));
        let signer = Arc::new(SigningKey::from_seed([0u8; SEED_LEN]));
        let ctx = Arc::new(ServerContext::new(index, signer, Arc::new(MemorySink::default())));
        let task = tokio::spawn(on_interval(ctx.clone(), Duration::from_secs(60)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!ctx.index.rebuild_pending());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(ctx.index.rebuild_pending());
        task.abort();
    }
}
