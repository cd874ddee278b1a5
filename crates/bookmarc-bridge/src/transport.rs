//! Transport seam between execution contexts.
//!
//! The host environment only guarantees best-effort, fire-and-forget
//! message passing: the receiving context may be mid-restart, not yet
//! started, or already torn down. [`MessageTransport`] models exactly that
//! surface, nothing more. [`InMemoryTransport`] backs tests and
//! single-process wiring with one tokio mpsc channel per attached context.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use bookmarc_bus::ExecutionContext;

/// Delivery failures reported by a transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The target context is not listening right now.
    #[error("no receiver attached for context {0}")]
    NoReceiver(ExecutionContext),
    /// The target context detached mid-delivery.
    #[error("channel to context {0} closed")]
    ChannelClosed(ExecutionContext),
    /// Host-level delivery failure.
    #[error("transport io error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether a retry could plausibly succeed. A missing receiver is
    /// transient (the context may still be starting up); a closed channel
    /// is not.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::NoReceiver(_) | TransportError::Io(_) => true,
            TransportError::ChannelClosed(_) => false,
        }
    }
}

/// One-way raw-message delivery into another execution context.
#[async_trait]
pub trait MessageTransport: Send + Sync {
    /// Deliver a serialized envelope to the target context.
    async fn deliver(&self, target: ExecutionContext, raw: String) -> Result<(), TransportError>;
}

/// In-process transport: one unbounded channel per attached context.
///
/// A context attaches to obtain its inbox receiver; sends to a context
/// that never attached fail with [`TransportError::NoReceiver`].
#[derive(Default)]
pub struct InMemoryTransport {
    inboxes: DashMap<ExecutionContext, mpsc::UnboundedSender<String>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a context and return its inbox. Re-attaching replaces the
    /// previous inbox, which models a context restart.
    pub fn attach(&self, context: ExecutionContext) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inboxes.insert(context, tx);
        debug!(%context, "context attached to transport");
        rx
    }

    /// Detach a context; subsequent sends to it fail.
    pub fn detach(&self, context: ExecutionContext) {
        self.inboxes.remove(&context);
        debug!(%context, "context detached from transport");
    }
}

#[async_trait]
impl MessageTransport for InMemoryTransport {
    async fn deliver(&self, target: ExecutionContext, raw: String) -> Result<(), TransportError> {
        let Some(inbox) = self.inboxes.get(&target) else {
            return Err(TransportError::NoReceiver(target));
        };
        inbox
            .send(raw)
            .map_err(|_| TransportError::ChannelClosed(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_to_attached_context() {
        let transport = InMemoryTransport::new();
        let mut inbox = transport.attach(ExecutionContext::Background);

        transport
            .deliver(ExecutionContext::Background, "hello".into())
            .await
            .unwrap();
        assert_eq!(inbox.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_deliver_without_receiver_fails_transient() {
        let transport = InMemoryTransport::new();
        let err = transport
            .deliver(ExecutionContext::Popup, "hello".into())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::NoReceiver(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_dropped_inbox_fails_terminal() {
        let transport = InMemoryTransport::new();
        let inbox = transport.attach(ExecutionContext::Page);
        drop(inbox);

        let err = transport
            .deliver(ExecutionContext::Page, "hello".into())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ChannelClosed(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_reattach_replaces_inbox() {
        let transport = InMemoryTransport::new();
        let _stale = transport.attach(ExecutionContext::Overview);
        let mut fresh = transport.attach(ExecutionContext::Overview);

        transport
            .deliver(ExecutionContext::Overview, "after restart".into())
            .await
            .unwrap();
        assert_eq!(fresh.recv().await.unwrap(), "after restart");
    }
}
