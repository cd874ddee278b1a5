//! Cross-context envelope bridge for the bookmarc scraping pipeline.
//!
//! Each execution context owns one [`ContextBridge`] wrapping its
//! [`EventBus`](bookmarc_bus::EventBus). Outbound envelopes are serialized
//! to the newline-delimited JSON wire form and delivered through a
//! [`MessageTransport`] with bounded retries; inbound messages resolve a
//! pending correlated request or dispatch into the local bus. Delivery is
//! best effort end to end: the remote context may be restarting, and the
//! sender finds out only through a transport error or a response timeout.

pub mod bridge;
pub mod correlation;
pub mod retry;
pub mod transport;

pub use bridge::{BridgeError, ContextBridge, SendOutcome};
pub use correlation::CorrelationMap;
pub use retry::RetryPolicy;
pub use transport::{InMemoryTransport, MessageTransport, TransportError};
