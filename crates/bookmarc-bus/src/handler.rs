//! Handler contract and outcome types for event dispatch.
//!
//! Handlers never unwind through the dispatcher: every invocation produces a
//! [`HandlerOutcome`] value, so failure is a first-class, inspectable result
//! rather than an exception. A handler that fails or times out yields a
//! FAILED/TIMED_OUT outcome and does not abort dispatch to its siblings.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::envelope::Envelope;

/// Failure taxonomy used by the error coordinator to pick a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Retryable failure (network, channel flakiness).
    Transient,
    /// Memory/quota exhaustion; trips the breaker immediately, no retry.
    Resource,
    /// Validation or programming error; logged and surfaced, never retried.
    Logic,
    /// Allotted time exceeded; terminal for handler dispatch, retryable for
    /// bridge sends.
    Timeout,
}

impl FailureKind {
    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Resource => "resource",
            Self::Logic => "logic",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned by a handler invocation.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind} failure: {message}")]
pub struct HandlerError {
    /// Classification used by the error coordinator.
    pub kind: FailureKind,
    /// Human-readable description.
    pub message: String,
    /// Whether a caller may reasonably retry the triggering operation.
    pub retryable: bool,
}

impl HandlerError {
    /// A retryable failure (network, channel).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Transient,
            message: message.into(),
            retryable: true,
        }
    }

    /// Resource exhaustion; never retried.
    pub fn resource(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Resource,
            message: message.into(),
            retryable: false,
        }
    }

    /// Validation or programming error; never retried.
    pub fn logic(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Logic,
            message: message.into(),
            retryable: false,
        }
    }
}

/// Terminal status of one handler invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerStatus {
    /// Handler returned a value.
    Completed,
    /// Handler returned an error.
    Failed,
    /// Handler exceeded its per-invocation timeout.
    TimedOut,
    /// Handler was not invoked because its circuit breaker is open.
    Skipped,
}

/// Result of invoking a single handler for one envelope.
#[derive(Debug, Clone)]
pub struct HandlerOutcome {
    /// Name of the handler that was (or would have been) invoked.
    pub handler: String,
    /// Terminal status.
    pub status: HandlerStatus,
    /// Value produced on success.
    pub value: Option<JsonValue>,
    /// Error captured on failure.
    pub error: Option<HandlerError>,
    /// Time spent inside the handler.
    pub duration: Duration,
}

impl HandlerOutcome {
    /// Successful invocation.
    pub fn completed(handler: impl Into<String>, value: JsonValue, duration: Duration) -> Self {
        Self {
            handler: handler.into(),
            status: HandlerStatus::Completed,
            value: Some(value),
            error: None,
            duration,
        }
    }

    /// Handler returned an error.
    pub fn failed(handler: impl Into<String>, error: HandlerError, duration: Duration) -> Self {
        Self {
            handler: handler.into(),
            status: HandlerStatus::Failed,
            value: None,
            error: Some(error),
            duration,
        }
    }

    /// Handler ran past its timeout.
    pub fn timed_out(handler: impl Into<String>, timeout: Duration) -> Self {
        Self {
            handler: handler.into(),
            status: HandlerStatus::TimedOut,
            value: None,
            error: Some(HandlerError {
                kind: FailureKind::Timeout,
                message: format!("handler exceeded {}ms timeout", timeout.as_millis()),
                retryable: false,
            }),
            duration: timeout,
        }
    }

    /// Handler skipped because its breaker is open.
    pub fn skipped(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            status: HandlerStatus::Skipped,
            value: None,
            error: Some(HandlerError {
                kind: FailureKind::Transient,
                message: "circuit open, handler skipped".to_string(),
                retryable: true,
            }),
            duration: Duration::ZERO,
        }
    }

    /// Check whether the invocation completed successfully.
    pub fn is_completed(&self) -> bool {
        self.status == HandlerStatus::Completed
    }

    /// Check whether the invocation produced a failure (error or timeout).
    pub fn is_failure(&self) -> bool {
        matches!(self.status, HandlerStatus::Failed | HandlerStatus::TimedOut)
    }
}

/// An event handler registered with the bus.
///
/// `name()` doubles as the handler's identity: subscribing the same name to
/// the same event type twice is idempotent, and the error coordinator keys
/// breaker state by it.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Stable, unique name for this handler.
    fn name(&self) -> &str;

    /// Process one envelope.
    async fn handle(&self, envelope: &Envelope) -> Result<JsonValue, HandlerError>;
}

/// Boxed future type for closure-based handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<JsonValue, HandlerError>> + Send>>;

/// Adapter that lets a closure subscribe without a hand-written type.
///
/// The closure receives an owned clone of the envelope so the returned
/// future does not borrow from the dispatch loop.
pub struct FnHandler {
    name: String,
    f: Box<dyn Fn(Envelope) -> HandlerFuture + Send + Sync>,
}

impl FnHandler {
    /// Wrap an async closure as a handler.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Envelope) -> HandlerFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(f),
        }
    }
}

#[async_trait]
impl Handler for FnHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, envelope: &Envelope) -> Result<JsonValue, HandlerError> {
        (self.f)(envelope.clone()).await
    }
}

impl fmt::Debug for FnHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}
