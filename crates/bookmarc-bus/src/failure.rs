//! Error coordinator and per-component circuit breakers.
//!
//! Failure reporting is a plain method call on a channel physically distinct
//! from the dispatch path: the coordinator never publishes through the bus,
//! so an error raised while handling an error cannot re-enter `dispatch`.
//! All bookkeeping is direct state mutation plus `tracing`.

use dashmap::DashMap;
use serde_json::Value as JsonValue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::handler::FailureKind;

/// Circuit breaker state for one logical component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls are allowed.
    Closed,
    /// Calls are blocked until the cooldown elapses.
    Open,
    /// One probe call is in flight; its result decides the next state.
    HalfOpen,
}

/// Breaker tuning shared by every component the coordinator tracks.
#[derive(Debug, Clone)]
pub struct BreakerPolicy {
    /// Consecutive countable failures before the breaker opens.
    pub failure_threshold: u32,
    /// Initial open duration before a probe is allowed.
    pub cooldown: Duration,
    /// Cap for the exponentially growing cooldown on repeated re-opens.
    pub max_cooldown: Duration,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            max_cooldown: Duration::from_secs(300),
        }
    }
}

/// Read-only view of one component's breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Current state.
    pub state: BreakerState,
    /// Consecutive countable failures since the last success.
    pub failure_count: u32,
    /// Cooldown currently in effect.
    pub cooldown: Duration,
}

#[derive(Debug)]
struct BreakerCell {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
}

impl BreakerCell {
    fn new(policy: &BreakerPolicy) -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
            cooldown: policy.cooldown,
        }
    }

    fn open(&mut self) {
        self.state = BreakerState::Open;
        self.opened_at = Some(Instant::now());
    }

    fn reopen_with_backoff(&mut self, max_cooldown: Duration) {
        self.cooldown = (self.cooldown * 2).min(max_cooldown);
        self.open();
    }
}

/// Central failure channel: classifies reports, trips per-component
/// breakers, and schedules half-open recovery.
///
/// Owned state (breaker cells) is mutated exclusively through these
/// methods; no other component touches it.
pub struct ErrorCoordinator {
    breakers: DashMap<String, BreakerCell>,
    policy: BreakerPolicy,
    reports: AtomicU64,
}

impl ErrorCoordinator {
    /// Create a coordinator with the default breaker policy.
    pub fn new() -> Self {
        Self::with_policy(BreakerPolicy::default())
    }

    /// Create a coordinator with an explicit breaker policy.
    pub fn with_policy(policy: BreakerPolicy) -> Self {
        Self {
            breakers: DashMap::new(),
            policy,
            reports: AtomicU64::new(0),
        }
    }

    /// Report a failure for a logical component.
    ///
    /// Per-kind policy: `Transient` and `Timeout` count toward the
    /// threshold, `Resource` opens the breaker immediately, `Logic` is
    /// logged and surfaced but never affects breaker state.
    pub fn report(&self, component_id: &str, kind: FailureKind, message: &str, context: JsonValue) {
        self.reports.fetch_add(1, Ordering::Relaxed);

        if kind == FailureKind::Logic {
            error!(
                component = component_id,
                kind = %kind,
                message,
                %context,
                "logic failure surfaced, breaker unaffected"
            );
            return;
        }

        let mut cell = self
            .breakers
            .entry(component_id.to_string())
            .or_insert_with(|| BreakerCell::new(&self.policy));

        cell.failure_count = cell.failure_count.saturating_add(1);

        if kind == FailureKind::Resource {
            warn!(
                component = component_id,
                message,
                %context,
                "resource exhaustion, opening breaker immediately"
            );
            cell.open();
            return;
        }

        // Transient and Timeout count toward the threshold.
        match cell.state {
            BreakerState::HalfOpen => {
                cell.reopen_with_backoff(self.policy.max_cooldown);
                warn!(
                    component = component_id,
                    cooldown_ms = cell.cooldown.as_millis() as u64,
                    "probe failed, breaker re-opened with backoff"
                );
            }
            BreakerState::Closed if cell.failure_count >= self.policy.failure_threshold => {
                cell.open();
                warn!(
                    component = component_id,
                    failures = cell.failure_count,
                    "failure threshold reached, breaker opened"
                );
            }
            _ => {
                warn!(
                    component = component_id,
                    kind = %kind,
                    failures = cell.failure_count,
                    message,
                    %context,
                    "failure recorded"
                );
            }
        }
    }

    /// Check whether a component's breaker currently blocks calls.
    ///
    /// When an open breaker's cooldown has elapsed, this transitions it to
    /// half-open and returns false exactly once: that caller is the probe.
    /// Further calls see half-open as blocked until the probe resolves.
    pub fn is_open(&self, component_id: &str) -> bool {
        let Some(mut cell) = self.breakers.get_mut(component_id) else {
            return false;
        };
        match cell.state {
            BreakerState::Closed => false,
            BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let due = cell
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= cell.cooldown);
                if due {
                    cell.state = BreakerState::HalfOpen;
                    info!(component = component_id, "cooldown elapsed, allowing probe");
                    false
                } else {
                    true
                }
            }
        }
    }

    /// Record a successful call; closes a half-open breaker and resets the
    /// failure streak.
    pub fn record_success(&self, component_id: &str) {
        let Some(mut cell) = self.breakers.get_mut(component_id) else {
            return;
        };
        match cell.state {
            BreakerState::HalfOpen => {
                cell.state = BreakerState::Closed;
                cell.failure_count = 0;
                cell.opened_at = None;
                cell.cooldown = self.policy.cooldown;
                info!(component = component_id, "probe succeeded, breaker closed");
            }
            BreakerState::Closed => {
                cell.failure_count = 0;
            }
            BreakerState::Open => {}
        }
    }

    /// Read-only breaker diagnostics for one component.
    pub fn breaker_snapshot(&self, component_id: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(component_id).map(|cell| BreakerSnapshot {
            state: cell.state,
            failure_count: cell.failure_count,
            cooldown: cell.cooldown,
        })
    }

    /// Total failure reports received.
    pub fn report_count(&self) -> u64 {
        self.reports.load(Ordering::Relaxed)
    }
}

impl Default for ErrorCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
