//! The event bus: listener registry, readiness gating, and the dispatch
//! loop with per-handler timeouts and failure isolation.
//!
//! Dispatch control flow: barrier check -> (buffer if not ready) -> resolve
//! listeners -> invoke in `(priority, insertion)` order, each under its own
//! timeout -> route failures to the error coordinator on a distinct channel
//! -> aggregate outcomes. A handler failure never aborts its siblings and
//! never unwinds through `dispatch`.

use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::diagnostics::{BusStats, StatsSnapshot};
use crate::envelope::Envelope;
use crate::failure::{BreakerPolicy, ErrorCoordinator};
use crate::handler::{FailureKind, Handler, HandlerOutcome};
use crate::queue::PreReadyQueue;
use crate::readiness::ReadinessBarrier;
use crate::registry::{ListenerRegistry, RegistrationId, RegistrationStatsSnapshot};

/// Runtime tuning for one bus instance.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Per-handler invocation timeout.
    pub handler_timeout: Duration,
    /// Pre-ready queue capacity.
    pub queue_capacity: usize,
    /// Maximum age of a buffered envelope before it is dropped.
    pub queue_max_age: Duration,
    /// Breaker tuning applied to every tracked component.
    pub breaker: BreakerPolicy,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            handler_timeout: Duration::from_secs(5),
            queue_capacity: 256,
            queue_max_age: Duration::from_secs(300),
            breaker: BreakerPolicy::default(),
        }
    }
}

impl From<&bookmarc_config::BusConfig> for BusSettings {
    fn from(config: &bookmarc_config::BusConfig) -> Self {
        Self {
            handler_timeout: config.handler_timeout(),
            queue_capacity: config.queue.capacity,
            queue_max_age: config.queue.max_age(),
            breaker: BreakerPolicy {
                failure_threshold: config.breaker.failure_threshold,
                cooldown: config.breaker.cooldown(),
                max_cooldown: config.breaker.max_cooldown(),
            },
        }
    }
}

/// Central event bus for one execution context.
///
/// Cheap to clone via `Arc`; every piece of owned state (registry, queue,
/// breaker cells) is mutated only through its own component's methods.
pub struct EventBus {
    registry: Arc<ListenerRegistry>,
    barrier: Arc<ReadinessBarrier>,
    queue: Arc<PreReadyQueue>,
    coordinator: Arc<ErrorCoordinator>,
    stats: Arc<BusStats>,
    handler_timeout: Duration,
}

impl EventBus {
    /// Create a bus with default settings.
    pub fn new() -> Self {
        Self::with_settings(BusSettings::default())
    }

    /// Create a bus with explicit settings.
    pub fn with_settings(settings: BusSettings) -> Self {
        Self {
            registry: Arc::new(ListenerRegistry::new()),
            barrier: Arc::new(ReadinessBarrier::new()),
            queue: Arc::new(PreReadyQueue::new(
                settings.queue_capacity,
                settings.queue_max_age,
            )),
            coordinator: Arc::new(ErrorCoordinator::with_policy(settings.breaker)),
            stats: Arc::new(BusStats::new()),
            handler_timeout: settings.handler_timeout,
        }
    }

    /// Create a bus from loaded configuration.
    pub fn from_config(config: &bookmarc_config::BusConfig) -> Self {
        Self::with_settings(BusSettings::from(config))
    }

    /// Register a handler for an event type.
    ///
    /// Idempotent per `(event_type, handler name)`. If envelopes of this
    /// type are already buffered, they replay immediately in enqueue order,
    /// regardless of barrier state, so a slow-starting listener does not
    /// miss early events.
    pub async fn subscribe(
        &self,
        event_type: &str,
        handler: Arc<dyn Handler>,
        priority: i32,
    ) -> RegistrationId {
        let id = self.registry.subscribe(event_type, handler, priority);

        if self.queue.has_matching(event_type) {
            let buffered = self.queue.drain_matching(event_type);
            debug!(
                event_type,
                count = buffered.len(),
                "replaying buffered envelopes to new listener"
            );
            for envelope in buffered {
                self.deliver(envelope).await;
            }
        }

        id
    }

    /// Remove a registration. No-op (returns false) if already removed.
    pub fn unsubscribe(&self, id: RegistrationId) -> bool {
        self.registry.unsubscribe(id)
    }

    /// Enable or disable a registration without removing it.
    pub fn set_enabled(&self, id: RegistrationId, enabled: bool) -> bool {
        self.registry.set_enabled(id, enabled)
    }

    /// Dispatch an envelope to all matching listeners.
    ///
    /// Returns one [`HandlerOutcome`] per listener in invocation order. An
    /// empty result means the envelope was buffered (barrier closed or no
    /// matching listener) — an explicit, observable outcome rather than a
    /// silent no-op.
    pub async fn dispatch(&self, envelope: Envelope) -> Vec<HandlerOutcome> {
        if !self.barrier.is_ready() {
            trace!(
                event_type = envelope.event_type(),
                "barrier closed, buffering envelope"
            );
            self.queue.push(envelope);
            return Vec::new();
        }

        if !self.registry.has_listener(envelope.event_type()) {
            debug!(
                event_type = envelope.event_type(),
                "no listener registered, buffering envelope"
            );
            self.queue.push(envelope);
            return Vec::new();
        }

        self.deliver(envelope).await
    }

    /// Invoke all matching listeners, bypassing the barrier gate.
    ///
    /// Used by `dispatch` once the bus is ready, and by the replay paths so
    /// replayed envelopes cannot bounce straight back into the queue.
    async fn deliver(&self, envelope: Envelope) -> Vec<HandlerOutcome> {
        let listeners = self.registry.listeners_for(envelope.event_type());
        if listeners.is_empty() {
            // Listeners disappeared between the gate check and delivery.
            self.queue.push(envelope);
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(listeners.len());
        for registration in listeners {
            let name = registration.handler.name().to_string();

            if self.coordinator.is_open(&name) {
                debug!(handler = %name, "breaker open, skipping handler");
                outcomes.push(HandlerOutcome::skipped(&name));
                continue;
            }

            let started = Instant::now();
            let result = tokio::time::timeout(
                self.handler_timeout,
                registration.handler.handle(&envelope),
            )
            .await;
            let duration = started.elapsed();
            registration.stats.record(duration);

            let outcome = match result {
                Ok(Ok(value)) => {
                    self.coordinator.record_success(&name);
                    HandlerOutcome::completed(&name, value, duration)
                }
                Ok(Err(error)) => {
                    self.coordinator.report(
                        &name,
                        error.kind,
                        &error.message,
                        json!({
                            "event_type": envelope.event_type(),
                            "envelope_id": envelope.id(),
                        }),
                    );
                    HandlerOutcome::failed(&name, error, duration)
                }
                Err(_) => {
                    self.coordinator.report(
                        &name,
                        FailureKind::Timeout,
                        "handler exceeded invocation timeout",
                        json!({
                            "event_type": envelope.event_type(),
                            "envelope_id": envelope.id(),
                        }),
                    );
                    HandlerOutcome::timed_out(&name, self.handler_timeout)
                }
            };
            outcomes.push(outcome);
        }

        self.stats.record_dispatch(envelope.event_type(), &outcomes);
        outcomes
    }

    /// Open the readiness barrier and replay every buffered envelope in
    /// enqueue order. Idempotent: only the transitioning call replays.
    pub async fn mark_ready(&self) -> bool {
        let transitioned = self.barrier.mark_ready();
        if transitioned {
            let buffered = self.queue.drain_all();
            if !buffered.is_empty() {
                info!(count = buffered.len(), "replaying pre-ready queue");
            }
            for envelope in buffered {
                self.deliver(envelope).await;
            }
        }
        transitioned
    }

    /// Check the barrier without waiting.
    pub fn is_ready(&self) -> bool {
        self.barrier.is_ready()
    }

    /// Wait until the barrier opens. No timeout by design.
    pub async fn wait_ready(&self) {
        self.barrier.wait_ready().await;
    }

    /// Check whether any enabled listener matches the event type.
    pub fn has_listener(&self, event_type: &str) -> bool {
        self.registry.has_listener(event_type)
    }

    /// Count enabled listeners for an event type.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.registry.listener_count(event_type)
    }

    /// Stats snapshot for one registration, if it still exists.
    pub fn registration_stats(&self, id: RegistrationId) -> Option<RegistrationStatsSnapshot> {
        self.registry.stats_for(id)
    }

    /// The failure channel for this bus. Components report into it and
    /// check breakers through it; it never calls back into `dispatch`.
    pub fn coordinator(&self) -> &Arc<ErrorCoordinator> {
        &self.coordinator
    }

    /// Aggregate read-only diagnostics, assembled from component public
    /// state only.
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            event_types: self.registry.event_type_count(),
            total_listeners: self.registry.total_listeners(),
            total_dispatches: self.stats.total_dispatches(),
            total_failures: self.stats.total_failures(),
            cumulative_handling: self.stats.cumulative_handling(),
            last_activity: self.stats.last_activity(),
            queue_depth: self.queue.len(),
            queue_dropped_overflow: self.queue.dropped_overflow(),
            queue_dropped_stale: self.queue.dropped_stale(),
        }
    }

    /// Envelopes delivered for an event type.
    pub fn throughput_for(&self, event_type: &str) -> u64 {
        self.stats.throughput_for(event_type)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            barrier: Arc::clone(&self.barrier),
            queue: Arc::clone(&self.queue),
            coordinator: Arc::clone(&self.coordinator),
            stats: Arc::clone(&self.stats),
            handler_timeout: self.handler_timeout,
        }
    }
}
