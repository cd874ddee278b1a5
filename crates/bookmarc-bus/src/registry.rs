//! Listener registry: event-type keyed handler registrations.
//!
//! Registrations are keyed by event type and held in priority order
//! (insertion order as the tiebreak). The internal map is never exposed;
//! callers observe it only through `has_listener` / `listener_count` and
//! the per-registration stats snapshots.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::handler::Handler;

/// Counter for generating unique registration IDs.
static REGISTRATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique handle for one listener registration.
///
/// IDs are monotonically increasing and never reused within a process
/// lifetime, so they double as the insertion-order tiebreak when two
/// registrations share a priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// Mint the next unique ID. Handles only ever leave the crate through
    /// `subscribe`.
    pub(crate) fn new() -> Self {
        Self(REGISTRATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "registration-{}", self.0)
    }
}

/// Per-registration invocation counters, updated by the dispatcher.
#[derive(Debug, Default)]
pub struct RegistrationStats {
    invocations: AtomicU64,
    last_duration_us: AtomicU64,
    total_duration_us: AtomicU64,
}

impl RegistrationStats {
    /// Record one invocation of the handler.
    pub(crate) fn record(&self, duration: Duration) {
        let us = duration.as_micros() as u64;
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.last_duration_us.store(us, Ordering::Relaxed);
        self.total_duration_us.fetch_add(us, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot.
    pub fn snapshot(&self) -> RegistrationStatsSnapshot {
        let invocations = self.invocations.load(Ordering::Relaxed);
        let total_us = self.total_duration_us.load(Ordering::Relaxed);
        RegistrationStatsSnapshot {
            invocations,
            last_duration: Duration::from_micros(self.last_duration_us.load(Ordering::Relaxed)),
            avg_duration: if invocations == 0 {
                Duration::ZERO
            } else {
                Duration::from_micros(total_us / invocations)
            },
        }
    }
}

/// Read-only view of a registration's invocation stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationStatsSnapshot {
    /// Number of times the handler has been invoked.
    pub invocations: u64,
    /// Duration of the most recent invocation.
    pub last_duration: Duration,
    /// Mean invocation duration.
    pub avg_duration: Duration,
}

/// One listener registration. Lifecycle: created by `subscribe`, mutable
/// only via `set_enabled`, destroyed by `unsubscribe`.
pub(crate) struct Registration {
    pub(crate) id: RegistrationId,
    pub(crate) handler: Arc<dyn Handler>,
    pub(crate) priority: i32,
    pub(crate) enabled: AtomicBool,
    pub(crate) stats: RegistrationStats,
}

impl Registration {
    pub(crate) fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }
}

/// Thread-safe registry mapping event types to ordered listener sets.
#[derive(Default)]
pub struct ListenerRegistry {
    /// Map from event type -> registrations sorted by (priority, id).
    listeners: RwLock<HashMap<String, Vec<Arc<Registration>>>>,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for an event type.
    ///
    /// Idempotent per `(event_type, handler name)`: re-subscribing the same
    /// handler name returns the existing handle. Event types are not
    /// pre-declared; any string is accepted.
    pub fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn Handler>,
        priority: i32,
    ) -> RegistrationId {
        let mut listeners = self.listeners.write();
        let entries = listeners.entry(event_type.to_string()).or_default();

        if let Some(existing) = entries.iter().find(|r| r.handler.name() == handler.name()) {
            debug!(
                event_type,
                handler = handler.name(),
                id = %existing.id,
                "subscribe is idempotent, returning existing registration"
            );
            return existing.id;
        }

        let registration = Arc::new(Registration {
            id: RegistrationId::new(),
            handler,
            priority,
            enabled: AtomicBool::new(true),
            stats: RegistrationStats::default(),
        });
        let id = registration.id;
        entries.push(registration);
        // Stable order: priority ascending, then insertion (id) ascending.
        entries.sort_by_key(|r| (r.priority, r.id));

        debug!(event_type, %id, priority, "listener registered");
        id
    }

    /// Remove a registration. Returns false if it was already removed.
    pub fn unsubscribe(&self, id: RegistrationId) -> bool {
        let mut listeners = self.listeners.write();
        let mut removed = false;
        listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|r| r.id != id);
            removed |= entries.len() < before;
            !entries.is_empty()
        });
        if removed {
            debug!(%id, "listener unregistered");
        }
        removed
    }

    /// Enable or disable a registration without removing it.
    ///
    /// Disabled registrations are skipped by dispatch but keep their stats.
    pub fn set_enabled(&self, id: RegistrationId, enabled: bool) -> bool {
        let listeners = self.listeners.read();
        for entries in listeners.values() {
            if let Some(r) = entries.iter().find(|r| r.id == id) {
                r.enabled.store(enabled, Ordering::Relaxed);
                return true;
            }
        }
        false
    }

    /// Enabled registrations for an event type, in dispatch order.
    pub(crate) fn listeners_for(&self, event_type: &str) -> Vec<Arc<Registration>> {
        let listeners = self.listeners.read();
        listeners
            .get(event_type)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|r| r.is_enabled())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Check whether any enabled listener matches the event type.
    pub fn has_listener(&self, event_type: &str) -> bool {
        let listeners = self.listeners.read();
        listeners
            .get(event_type)
            .is_some_and(|entries| entries.iter().any(|r| r.is_enabled()))
    }

    /// Count enabled listeners for an event type.
    pub fn listener_count(&self, event_type: &str) -> usize {
        let listeners = self.listeners.read();
        listeners
            .get(event_type)
            .map(|entries| entries.iter().filter(|r| r.is_enabled()).count())
            .unwrap_or(0)
    }

    /// Number of event types with at least one registration.
    pub fn event_type_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Total registrations across all event types.
    pub fn total_listeners(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Stats snapshot for one registration, if it still exists.
    pub fn stats_for(&self, id: RegistrationId) -> Option<RegistrationStatsSnapshot> {
        let listeners = self.listeners.read();
        listeners
            .values()
            .flat_map(|entries| entries.iter())
            .find(|r| r.id == id)
            .map(|r| r.stats.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::FnHandler;
    use serde_json::json;

    fn noop(name: &str) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(name, |_| Box::pin(async { Ok(json!(null)) })))
    }

    #[test]
    fn test_registration_id_uniqueness() {
        let a = RegistrationId::new();
        let b = RegistrationId::new();
        assert_ne!(a, b);
        assert!(a.as_u64() < b.as_u64());
        assert!(a.to_string().starts_with("registration-"));
    }

    #[test]
    fn test_subscribe_and_count() {
        let registry = ListenerRegistry::new();
        assert!(!registry.has_listener("DATA.SAVE.COMPLETED"));

        registry.subscribe("DATA.SAVE.COMPLETED", noop("a"), 100);
        registry.subscribe("DATA.SAVE.COMPLETED", noop("b"), 100);
        registry.subscribe("EXTRACTION.PAGE.COMPLETED", noop("c"), 100);

        assert!(registry.has_listener("DATA.SAVE.COMPLETED"));
        assert_eq!(registry.listener_count("DATA.SAVE.COMPLETED"), 2);
        assert_eq!(registry.listener_count("EXTRACTION.PAGE.COMPLETED"), 1);
        assert_eq!(registry.listener_count("UNKNOWN.TYPE"), 0);
        assert_eq!(registry.event_type_count(), 2);
        assert_eq!(registry.total_listeners(), 3);
    }

    #[test]
    fn test_subscribe_idempotent_per_handler_name() {
        let registry = ListenerRegistry::new();
        let first = registry.subscribe("A.B", noop("same"), 100);
        let second = registry.subscribe("A.B", noop("same"), 50);

        assert_eq!(first, second);
        assert_eq!(registry.listener_count("A.B"), 1);

        // Same name on a different type is a distinct registration.
        let third = registry.subscribe("A.C", noop("same"), 100);
        assert_ne!(first, third);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = ListenerRegistry::new();
        let id = registry.subscribe("A.B", noop("a"), 100);

        assert!(registry.unsubscribe(id));
        assert!(!registry.has_listener("A.B"));
        assert_eq!(registry.event_type_count(), 0);

        // No-op the second time.
        assert!(!registry.unsubscribe(id));
    }

    #[test]
    fn test_dispatch_order_priority_then_insertion() {
        let registry = ListenerRegistry::new();
        registry.subscribe("A.B", noop("late-low"), 200);
        registry.subscribe("A.B", noop("first-normal"), 100);
        registry.subscribe("A.B", noop("urgent"), 0);
        registry.subscribe("A.B", noop("second-normal"), 100);

        let order: Vec<String> = registry
            .listeners_for("A.B")
            .iter()
            .map(|r| r.handler.name().to_string())
            .collect();
        assert_eq!(order, ["urgent", "first-normal", "second-normal", "late-low"]);
    }

    #[test]
    fn test_set_enabled() {
        let registry = ListenerRegistry::new();
        let id = registry.subscribe("A.B", noop("a"), 100);

        assert!(registry.set_enabled(id, false));
        assert!(!registry.has_listener("A.B"));
        assert_eq!(registry.listener_count("A.B"), 0);
        assert!(registry.listeners_for("A.B").is_empty());
        // Registration survives and can be re-enabled.
        assert_eq!(registry.total_listeners(), 1);

        assert!(registry.set_enabled(id, true));
        assert!(registry.has_listener("A.B"));

        assert!(!registry.set_enabled(RegistrationId::new(), true));
    }

    #[test]
    fn test_stats_recording() {
        let registry = ListenerRegistry::new();
        let id = registry.subscribe("A.B", noop("a"), 100);

        let reg = &registry.listeners_for("A.B")[0];
        reg.stats.record(Duration::from_micros(100));
        reg.stats.record(Duration::from_micros(300));

        let snap = registry.stats_for(id).unwrap();
        assert_eq!(snap.invocations, 2);
        assert_eq!(snap.last_duration, Duration::from_micros(300));
        assert_eq!(snap.avg_duration, Duration::from_micros(200));

        assert!(registry.stats_for(RegistrationId::new()).is_none());
    }
}
