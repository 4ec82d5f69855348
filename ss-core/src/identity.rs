//! Per-install identifiers and the dedup log of installs served in the current
//! indexing epoch.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;

use crate::protocol::ID_LEN;

/// Opaque 32-byte identifier, unique per client install.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstallId(pub [u8; ID_LEN]);

impl InstallId {
    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Stable string key (standard base64) used by the dedup log and telemetry.
    pub fn key(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Display for InstallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

impl fmt::Debug for InstallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstallId({})", self.key())
    }
}

#[derive(Default)]
struct Epoch {
    number: u64,
    seen: HashSet<String>,
    in_flight: HashSet<String>,
}

/// Identifiers served since the last index rebuild. Locked independently of
/// the file index and never held across a suspension point.
#[derive(Clone, Default)]
pub struct IdentityLog {
    inner: Arc<Mutex<Epoch>>,
}

impl IdentityLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check and reserve `id`. Returns `None` if it was already
    /// served this epoch or another session currently holds it.
    pub fn try_claim(&self, id: &InstallId) -> Option<IdentityClaim> {
        let key = id.key();
        let mut epoch = self.inner.lock();
        if epoch.seen.contains(&key) || epoch.in_flight.contains(&key) {
            return None;
        }
        epoch.in_flight.insert(key.clone());
        Some(IdentityClaim {
            log: self.clone(),
            key,
            epoch: epoch.number,
            done: false,
        })
    }

    pub fn contains(&self, id: &InstallId) -> bool {
        self.inner.lock().seen.contains(&id.key())
    }

    /// Start a new epoch: every identifier may be served again.
    pub fn reset(&self) {
        let mut epoch = self.inner.lock();
        epoch.number += 1;
        epoch.seen.clear();
        epoch.in_flight.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reservation held by one session from IdentityCheck to Complete. Dropping it
/// without [`IdentityClaim::complete`] releases the identifier.
pub struct IdentityClaim {
    log: IdentityLog,
    key: String,
    epoch: u64,
    done: bool,
}

impl IdentityClaim {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Record the identifier as served. A claim from an epoch that has since
    /// been reset records nothing.
    pub fn complete(mut self) {
        let mut epoch = self.log.inner.lock();
        if epoch.number == self.epoch {
            epoch.in_flight.remove(&self.key);
            epoch.seen.insert(self.key.clone());
        }
        self.done = true;
    }
}

impl Drop for IdentityClaim {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let mut epoch = self.log.inner.lock();
        if epoch.number == self.epoch {
            epoch.in_flight.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> InstallId {
        InstallId([b; ID_LEN])
    }

    #[test]
    fn key_is_standard_base64() {
        assert_eq!(
            id(0).key(),
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="
        );
        assert_eq!(id(0xfb).key().len(), 44);
    }

    #[test]
    fn second_claim_rejected_after_completion() {
        let log = IdentityLog::new();
        log.try_claim(&id(1)).unwrap().complete();
        assert!(log.contains(&id(1)));
        assert!(log.try_claim(&id(1)).is_none());
        assert!(log.try_claim(&id(2)).is_some());
    }

    #[test]
    fn concurrent_claim_rejected_while_in_flight() {
        let log = IdentityLog::new();
        let first = log.try_claim(&id(1)).unwrap();
        assert!(log.try_claim(&id(1)).is_none());
        drop(first);
        assert!(!log.contains(&id(1)));
        assert!(log.try_claim(&id(1)).is_some());
    }

    #[test]
    fn reset_starts_new_epoch() {
        let log = IdentityLog::new();
        log.try_claim(&id(1)).unwrap().complete();
        log.reset();
        assert!(log.is_empty());
        assert!(log.try_claim(&id(1)).is_some());
    }

    #[test]
    fn stale_claim_does_not_leak_into_new_epoch() {
        let log = IdentityLog::new();
        let claim = log.try_claim(&id(1)).unwrap();
        log.reset();
        let fresh = log.try_claim(&id(1)).unwrap();
        claim.complete();
        assert!(!log.contains(&id(1)));
        fresh.complete();
        assert!(log.contains(&id(1)));
    }

    #[test]
    fn claims_across_threads_admit_one() {
        let log = IdentityLog::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let log = log.clone();
                std::thread::spawn(move || log.try_claim(&id(7)).map(|c| c.complete()).is_some())
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
    }
}
