//! Telemetry sink: receives each served install's opaque payload, unparsed.

use parking_lot::Mutex;
use tracing::info;

use crate::identity::InstallId;

pub trait TelemetrySink: Send + Sync {
    fn record(&self, id: &InstallId, payload: &[u8]);
}

/// Writes payloads to the log under the `telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, id: &InstallId, payload: &[u8]) {
        info!(
            target: "telemetry",
            id = %id,
            payload = %String::from_utf8_lossy(payload),
            "hwinfo"
        );
    }
}

/// Keeps records in memory, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(InstallId, Vec<u8>)>>,
}

impl MemorySink {
    pub fn records(&self) -> Vec<(InstallId, Vec<u8>)> {
        self.records.lock().clone()
    }
}

impl TelemetrySink for MemorySink {
    fn record(&self, id: &InstallId, payload: &[u8]) {
        self.records.lock().push((*id, payload.to_vec()));
    }
}
