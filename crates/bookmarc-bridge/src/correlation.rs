//! Pending request/response correlation entries.

use dashmap::DashMap;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::trace;
use uuid::Uuid;

use bookmarc_bus::Envelope;

struct PendingEntry {
    responder: oneshot::Sender<Envelope>,
    created_at: Instant,
}

/// Outstanding correlated requests awaiting their response envelope.
///
/// An entry lives until [`complete`](CorrelationMap::complete) consumes it
/// or the requester's timeout path [`cancel`](CorrelationMap::cancel)s it,
/// whichever happens first.
#[derive(Default)]
pub struct CorrelationMap {
    pending: DashMap<Uuid, PendingEntry>,
}

impl CorrelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request and return the receiver its response
    /// will arrive on. A duplicate id replaces (and thereby drops) the
    /// previous entry.
    pub fn register(&self, correlation_id: Uuid) -> oneshot::Receiver<Envelope> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            correlation_id,
            PendingEntry {
                responder: tx,
                created_at: Instant::now(),
            },
        );
        trace!(%correlation_id, "registered pending correlation");
        rx
    }

    /// Resolve a pending request with its response. Returns false when no
    /// entry matches (already timed out, or the envelope is not a
    /// response at all).
    pub fn complete(&self, correlation_id: Uuid, envelope: Envelope) -> bool {
        let Some((_, entry)) = self.pending.remove(&correlation_id) else {
            return false;
        };
        trace!(
            %correlation_id,
            waited_ms = entry.created_at.elapsed().as_millis() as u64,
            "completing pending correlation"
        );
        // A send failure means the requester gave up; the envelope is
        // dropped either way.
        entry.responder.send(envelope).is_ok()
    }

    /// Drop a pending entry after the requester stopped waiting.
    pub fn cancel(&self, correlation_id: Uuid) {
        self.pending.remove(&correlation_id);
    }

    /// Outstanding request count.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_register_and_complete() {
        let map = CorrelationMap::new();
        let id = Uuid::new_v4();
        let rx = map.register(id);
        assert_eq!(map.pending_count(), 1);

        assert!(map.complete(id, Envelope::new("STATE.RESPONSE", json!({ "ok": true }))));
        assert_eq!(map.pending_count(), 0);

        let envelope = rx.await.unwrap();
        assert_eq!(envelope.event_type(), "STATE.RESPONSE");
    }

    #[tokio::test]
    async fn test_complete_unknown_id() {
        let map = CorrelationMap::new();
        assert!(!map.complete(Uuid::new_v4(), Envelope::new("X", json!(null))));
    }

    #[tokio::test]
    async fn test_cancel_drops_entry() {
        let map = CorrelationMap::new();
        let id = Uuid::new_v4();
        let rx = map.register(id);

        map.cancel(id);
        assert_eq!(map.pending_count(), 0);
        assert!(!map.complete(id, Envelope::new("X", json!(null))));
        assert!(rx.await.is_err());
    }
}
