//! Aggregate bus counters and the read-only stats snapshot.
//!
//! UI surfaces and operators observe the bus exclusively through
//! [`StatsSnapshot`]; internal containers are never handed out.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::handler::HandlerOutcome;

/// Live dispatch counters, updated by the dispatcher only.
#[derive(Default)]
pub struct BusStats {
    total_dispatches: AtomicU64,
    total_failures: AtomicU64,
    handling_us: AtomicU64,
    last_activity: RwLock<Option<DateTime<Utc>>>,
    per_type: DashMap<String, u64>,
}

impl BusStats {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one delivered dispatch and its handler outcomes.
    ///
    /// Buffered (undelivered) envelopes are not counted here.
    pub(crate) fn record_dispatch(&self, event_type: &str, outcomes: &[HandlerOutcome]) {
        self.total_dispatches.fetch_add(1, Ordering::Relaxed);
        *self.per_type.entry(event_type.to_string()).or_insert(0) += 1;
        for outcome in outcomes {
            if outcome.is_failure() {
                self.total_failures.fetch_add(1, Ordering::Relaxed);
            }
            self.handling_us
                .fetch_add(outcome.duration.as_micros() as u64, Ordering::Relaxed);
        }
        *self.last_activity.write() = Some(Utc::now());
    }

    /// Envelopes delivered for an event type.
    pub fn throughput_for(&self, event_type: &str) -> u64 {
        self.per_type.get(event_type).map(|c| *c).unwrap_or(0)
    }

    /// Total delivered dispatches.
    pub fn total_dispatches(&self) -> u64 {
        self.total_dispatches.load(Ordering::Relaxed)
    }

    /// Total failed handler invocations.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Cumulative time spent inside handlers.
    pub fn cumulative_handling(&self) -> Duration {
        Duration::from_micros(self.handling_us.load(Ordering::Relaxed))
    }

    /// Timestamp of the most recent delivery.
    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        *self.last_activity.read()
    }
}

/// Point-in-time, read-only view of the whole bus.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    /// Event types with at least one registration.
    pub event_types: usize,
    /// Registrations across all event types.
    pub total_listeners: usize,
    /// Envelopes delivered to at least one handler.
    pub total_dispatches: u64,
    /// Failed handler invocations (errors and timeouts).
    pub total_failures: u64,
    /// Cumulative handler time.
    pub cumulative_handling: Duration,
    /// Most recent delivery timestamp.
    pub last_activity: Option<DateTime<Utc>>,
    /// Envelopes currently buffered pre-ready.
    pub queue_depth: usize,
    /// Buffered envelopes lost to overflow.
    pub queue_dropped_overflow: u64,
    /// Buffered envelopes dropped for exceeding their max age.
    pub queue_dropped_stale: u64,
}
