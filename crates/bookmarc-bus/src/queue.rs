//! Pre-ready queue: bounded buffer for envelopes that cannot be delivered
//! yet (barrier still closed, or no matching listener registered).
//!
//! Overflow drops the oldest entry and stale entries are discarded at drain
//! time; both paths increment a diagnostic counter and log, so nothing is
//! ever lost without trace.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::envelope::Envelope;

struct QueuedEnvelope {
    envelope: Envelope,
    enqueued_at: Instant,
}

/// Bounded FIFO of undeliverable envelopes awaiting replay.
pub struct PreReadyQueue {
    entries: Mutex<VecDeque<QueuedEnvelope>>,
    capacity: usize,
    max_age: Duration,
    dropped_overflow: AtomicU64,
    dropped_stale: AtomicU64,
}

impl PreReadyQueue {
    /// Create a queue holding at most `capacity` entries; entries older
    /// than `max_age` are dropped instead of replayed.
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
            max_age,
            dropped_overflow: AtomicU64::new(0),
            dropped_stale: AtomicU64::new(0),
        }
    }

    /// Buffer an envelope. On overflow the oldest entry is dropped and the
    /// overflow counter increments.
    pub fn push(&self, envelope: Envelope) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            if let Some(evicted) = entries.pop_front() {
                self.dropped_overflow.fetch_add(1, Ordering::Relaxed);
                warn!(
                    event_type = evicted.envelope.event_type(),
                    capacity = self.capacity,
                    "pre-ready queue full, dropped oldest entry"
                );
            }
        }
        debug!(
            event_type = envelope.event_type(),
            depth = entries.len() + 1,
            "buffered envelope for later replay"
        );
        entries.push_back(QueuedEnvelope {
            envelope,
            enqueued_at: Instant::now(),
        });
    }

    /// Remove and return every buffered envelope in enqueue order,
    /// discarding entries past their maximum age.
    pub fn drain_all(&self) -> Vec<Envelope> {
        let drained: Vec<QueuedEnvelope> = self.entries.lock().drain(..).collect();
        self.filter_fresh(drained)
    }

    /// Remove and return buffered envelopes of one event type, in enqueue
    /// order; other entries keep their positions.
    pub fn drain_matching(&self, event_type: &str) -> Vec<Envelope> {
        let mut entries = self.entries.lock();
        let mut matched = Vec::new();
        let mut kept = VecDeque::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if entry.envelope.event_type() == event_type {
                matched.push(entry);
            } else {
                kept.push_back(entry);
            }
        }
        *entries = kept;
        drop(entries);
        self.filter_fresh(matched)
    }

    fn filter_fresh(&self, drained: Vec<QueuedEnvelope>) -> Vec<Envelope> {
        let mut fresh = Vec::with_capacity(drained.len());
        for entry in drained {
            if entry.enqueued_at.elapsed() > self.max_age {
                self.dropped_stale.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event_type = entry.envelope.event_type(),
                    age_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                    "dropped stale buffered envelope"
                );
            } else {
                fresh.push(entry.envelope);
            }
        }
        fresh
    }

    /// Check whether any buffered entry matches an event type.
    pub fn has_matching(&self, event_type: &str) -> bool {
        self.entries
            .lock()
            .iter()
            .any(|e| e.envelope.event_type() == event_type)
    }

    /// Current number of buffered entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries dropped because the queue was full.
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    /// Entries dropped because they exceeded the maximum age.
    pub fn dropped_stale(&self) -> u64 {
        self.dropped_stale.load(Ordering::Relaxed)
    }
}
