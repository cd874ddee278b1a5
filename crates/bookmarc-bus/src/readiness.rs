//! Readiness barrier: one-shot gate between construction and steady state.
//!
//! The barrier is an explicit state machine (`Constructing -> Ready`, no
//! reverse transition) rather than a free-floating boolean, so the single
//! mutation point is centralized and testable. It deliberately has no
//! timeout: waiting indefinitely beats silently dropping early traffic.

use tokio::sync::watch;
use tracing::info;

/// One-way gate that consumers await before dispatching inbound envelopes.
#[derive(Debug)]
pub struct ReadinessBarrier {
    state: watch::Sender<bool>,
}

impl ReadinessBarrier {
    /// Create a barrier in the `Constructing` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Flip the barrier to `Ready`.
    ///
    /// Returns true only for the call that performed the transition;
    /// subsequent calls are no-ops.
    pub fn mark_ready(&self) -> bool {
        let transitioned = self.state.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if transitioned {
            info!("readiness barrier opened");
        }
        transitioned
    }

    /// Check the barrier without waiting.
    pub fn is_ready(&self) -> bool {
        *self.state.borrow()
    }

    /// Wait until `mark_ready` has been called. Returns immediately if the
    /// barrier is already open. No timeout by design.
    pub async fn wait_ready(&self) {
        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender lives inside self; this only happens during drop.
                return;
            }
        }
    }
}

impl Default for ReadinessBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio_test::{assert_pending, assert_ready};

    #[test]
    fn test_starts_constructing() {
        let barrier = ReadinessBarrier::new();
        assert!(!barrier.is_ready());
    }

    #[test]
    fn test_mark_ready_idempotent() {
        let barrier = ReadinessBarrier::new();
        assert!(barrier.mark_ready());
        assert!(barrier.is_ready());

        // Only the first call reports the transition.
        assert!(!barrier.mark_ready());
        assert!(!barrier.mark_ready());
        assert!(barrier.is_ready());
    }

    #[tokio::test]
    async fn test_wait_ready_returns_immediately_when_open() {
        let barrier = ReadinessBarrier::new();
        barrier.mark_ready();
        barrier.wait_ready().await;
    }

    #[tokio::test]
    async fn test_wait_ready_pending_until_transition() {
        let barrier = ReadinessBarrier::new();
        let mut waiter = tokio_test::task::spawn(barrier.wait_ready());

        assert_pending!(waiter.poll());
        assert_pending!(waiter.poll());

        barrier.mark_ready();
        assert!(waiter.is_woken());
        assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_wait_ready_wakes_all_waiters() {
        let barrier = Arc::new(ReadinessBarrier::new());

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait_ready().await;
                    true
                })
            })
            .collect();

        tokio::task::yield_now().await;
        assert!(waiters.iter().all(|w| !w.is_finished()));

        barrier.mark_ready();
        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
    }
}
