//! Tamper-evident audit log (§4.10): every administrative and lifecycle
//! action is appended as an [`AuditEvent`] whose `chain_hash` commits to
//! the event data and the previous entry's hash, so any retroactive edit
//! or reorder breaks the chain at the edited point. Adapted from the
//! source codebase's Merkle-chained `reasoning::critic_audit::AuditChain`,
//! dropped down to a hash-only chain (no per-entry signing key).

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::types::{AuditEvent, TelemetryError};

/// An [`AuditEvent`] together with the chain hash committing it to its
/// predecessor.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChainedAuditEvent {
    pub event: AuditEvent,
    pub chain_hash: String,
}

/// Append-only, in-memory audit chain. Durable persistence is left to
/// whatever sink wraps this (e.g. periodically flushing `entries()` to the
/// configured telemetry file exporter or an external log store).
pub struct AuditLog {
    entries: Mutex<Vec<ChainedAuditEvent>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self { entries: Mutex::new(Vec::new()) }
    }

    /// Appends `event`, computing its chain hash from the previous entry's
    /// hash (or the genesis hash, for the first entry).
    pub fn append(&self, event: AuditEvent) -> ChainedAuditEvent {
        let mut entries = self.entries.lock();
        let prev_hash = entries.last().map(|e| e.chain_hash.clone()).unwrap_or_else(genesis_hash);
        let chain_hash = chain_hash(&prev_hash, &event);
        let chained = ChainedAuditEvent { event, chain_hash };
        entries.push(chained.clone());
        chained
    }

    pub fn entries(&self) -> Vec<ChainedAuditEvent> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Recomputes the chain from the first entry and compares it against
    /// the stored hashes, returning the index of the first mismatch.
    pub fn verify(&self) -> Result<(), TelemetryError> {
        verify_chain(&self.entries.lock())
    }
}

/// Verifies an externally supplied chain (e.g. loaded back from a file
/// exporter snapshot) without requiring an [`AuditLog`] instance.
pub fn verify_chain(entries: &[ChainedAuditEvent]) -> Result<(), TelemetryError> {
    let mut expected_prev = genesis_hash();
    for entry in entries {
        let expected = chain_hash(&expected_prev, &entry.event);
        if expected != entry.chain_hash {
            return Err(TelemetryError::ChainBroken(entry.event.event_id.0.to_string()));
        }
        expected_prev = entry.chain_hash.clone();
    }
    Ok(())
}

fn chain_hash(prev_hash: &str, event: &AuditEvent) -> String {
    let entry_data = format!(
        "{}|{}|{}|{}|{}|{}",
        event.event_id.0,
        event.ts.to_rfc3339(),
        event.actor,
        event.subject,
        event.action,
        event.details,
    );
    sha256_hex(format!("{prev_hash}{entry_data}").as_bytes())
}

fn genesis_hash() -> String {
    sha256_hex(b"genesis")
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(action: &str) -> AuditEvent {
        AuditEvent::new("operator-1", "task-123", action, json!({"note": action}))
    }

    #[test]
    fn chain_verifies_after_several_appends() {
        let log = AuditLog::new();
        log.append(event("control.pause"));
        log.append(event("control.resume"));
        log.append(event("control.scale"));
        assert_eq!(log.len(), 3);
        assert!(log.verify().is_ok());
    }

    #[test]
    fn tampering_with_an_entry_breaks_the_chain_from_that_point() {
        let log = AuditLog::new();
        log.append(event("control.pause"));
        log.append(event("control.resume"));

        let mut tampered = log.entries();
        tampered[0].event.action = "control.scale".to_string();

        let result = verify_chain(&tampered);
        assert!(result.is_err());
    }

    #[test]
    fn empty_chain_verifies() {
        let log = AuditLog::new();
        assert!(log.is_empty());
        assert!(log.verify().is_ok());
    }

    #[test]
    fn reordering_entries_breaks_the_chain() {
        let log = AuditLog::new();
        log.append(event("first"));
        log.append(event("second"));

        let mut swapped = log.entries();
        swapped.swap(0, 1);

        assert!(verify_chain(&swapped).is_err());
    }
}
