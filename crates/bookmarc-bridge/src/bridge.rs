//! The cross-context bridge.
//!
//! A bridge instance belongs to exactly one execution context. Outbound,
//! it serializes envelopes to the wire format and pushes them through the
//! host transport with bounded retries; inbound, it routes raw messages
//! either to a pending correlated request or into the local bus, where
//! normal barrier and queue semantics apply.

use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use bookmarc_bus::{Envelope, EventBus, ExecutionContext, FailureKind};

use crate::correlation::CorrelationMap;
use crate::retry::RetryPolicy;
use crate::transport::{MessageTransport, TransportError};

/// Bridge send and receive failures.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Envelope could not be encoded or decoded.
    #[error("wire serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    /// All delivery attempts failed.
    #[error("delivery to {target} failed after {attempts} attempts: {last}")]
    Transport {
        target: ExecutionContext,
        attempts: u32,
        #[source]
        last: TransportError,
    },
    /// The correlated response did not arrive in time.
    #[error("response for correlation {0} timed out")]
    ResponseTimeout(Uuid),
    /// The responder resolved the correlation without sending a reply.
    #[error("response channel for correlation {0} dropped")]
    ResponseDropped(Uuid),
}

/// Result of a successful [`ContextBridge::send`].
#[derive(Debug)]
pub enum SendOutcome {
    /// Fire-and-forget envelope handed to the transport.
    Delivered,
    /// Correlated request resolved with this response envelope.
    Responded(Envelope),
}

/// Outbound and inbound envelope routing for one execution context.
pub struct ContextBridge {
    source: ExecutionContext,
    transport: Arc<dyn MessageTransport>,
    bus: EventBus,
    correlations: CorrelationMap,
    retry: RetryPolicy,
    request_timeout: Duration,
    // Serializes the deliver+retry section per target so retries of an
    // earlier envelope cannot be overtaken by a later one.
    send_locks: Mutex<HashMap<ExecutionContext, Arc<Mutex<()>>>>,
}

impl ContextBridge {
    /// Create a bridge for `source`, routing inbound traffic into `bus`.
    pub fn new(source: ExecutionContext, transport: Arc<dyn MessageTransport>, bus: EventBus) -> Self {
        Self {
            source,
            transport,
            bus,
            correlations: CorrelationMap::new(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(5),
            send_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Override how long a correlated request waits for its response.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create a bridge tuned from loaded configuration.
    pub fn from_config(
        source: ExecutionContext,
        transport: Arc<dyn MessageTransport>,
        bus: EventBus,
        config: &bookmarc_config::BridgeConfig,
    ) -> Self {
        Self::new(source, transport, bus)
            .with_retry(RetryPolicy::from(config))
            .with_request_timeout(config.request_timeout())
    }

    /// The context this bridge belongs to.
    pub fn source(&self) -> ExecutionContext {
        self.source
    }

    /// Outstanding correlated requests.
    pub fn pending_requests(&self) -> usize {
        self.correlations.pending_count()
    }

    /// Send an envelope to another context.
    ///
    /// Without a correlation id this is fire-and-forget and resolves to
    /// [`SendOutcome::Delivered`] once the transport accepts it. With one,
    /// the call also awaits the correlated response under the request
    /// timeout and resolves to [`SendOutcome::Responded`].
    pub async fn send(
        &self,
        target: ExecutionContext,
        envelope: Envelope,
    ) -> Result<SendOutcome, BridgeError> {
        let correlation = envelope.correlation_id();
        let pending = correlation.map(|id| self.correlations.register(id));

        let delivery = self.deliver_with_retry(target, &envelope).await;
        if let Err(error) = delivery {
            if let Some(id) = correlation {
                self.correlations.cancel(id);
            }
            return Err(error);
        }

        let Some(receiver) = pending else {
            return Ok(SendOutcome::Delivered);
        };
        let id = correlation.unwrap_or_default();

        match tokio::time::timeout(self.request_timeout, receiver).await {
            Ok(Ok(response)) => Ok(SendOutcome::Responded(response)),
            Ok(Err(_)) => {
                self.correlations.cancel(id);
                Err(BridgeError::ResponseDropped(id))
            }
            Err(_) => {
                self.correlations.cancel(id);
                self.report_failure(target, &format!("response timeout for correlation {id}"));
                Err(BridgeError::ResponseTimeout(id))
            }
        }
    }

    /// Send a response envelope for a correlated request.
    ///
    /// Same delivery semantics as [`send`](Self::send), but never registers
    /// a pending entry: a response must not wait on a response of its own.
    pub async fn respond(
        &self,
        target: ExecutionContext,
        envelope: Envelope,
    ) -> Result<(), BridgeError> {
        self.deliver_with_retry(target, &envelope).await
    }

    async fn deliver_with_retry(
        &self,
        target: ExecutionContext,
        envelope: &Envelope,
    ) -> Result<(), BridgeError> {
        let raw = envelope.to_json_line()?;
        let lock = self.target_lock(target).await;
        let _guard = lock.lock().await;

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.transport.deliver(target, raw.clone()).await {
                Ok(()) => {
                    debug!(%target, event_type = envelope.event_type(), attempt, "envelope delivered");
                    return Ok(());
                }
                Err(error) if error.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        %target,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "transient delivery failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    self.report_failure(target, &error.to_string());
                    return Err(BridgeError::Transport {
                        target,
                        attempts: attempt,
                        last: error,
                    });
                }
            }
        }
    }

    async fn target_lock(&self, target: ExecutionContext) -> Arc<Mutex<()>> {
        let mut locks = self.send_locks.lock().await;
        Arc::clone(locks.entry(target).or_default())
    }

    fn report_failure(&self, target: ExecutionContext, message: &str) {
        self.bus.coordinator().report(
            &format!("bridge:{target}"),
            FailureKind::Transient,
            message,
            json!({ "source": self.source.as_str() }),
        );
    }

    /// Route a raw inbound message.
    ///
    /// A message whose correlation id matches a pending request completes
    /// that request directly; anything else dispatches into the local bus,
    /// where barrier and queue semantics apply as usual.
    pub async fn on_receive(&self, raw: &str) -> Result<(), BridgeError> {
        let envelope = Envelope::from_json(raw)?;

        if let Some(id) = envelope.correlation_id() {
            if self.correlations.complete(id, envelope.clone()) {
                debug!(%id, "inbound envelope resolved a pending request");
                return Ok(());
            }
        }

        self.bus.dispatch(envelope).await;
        Ok(())
    }
}
