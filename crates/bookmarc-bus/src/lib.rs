//! In-context event bus for the bookmarc scraping pipeline.
//!
//! One [`EventBus`] instance lives inside each execution context (page
//! scraper, background coordinator, popup or overview surface) and carries
//! typed envelopes between decoupled components of that context. Readiness
//! gating buffers early traffic until the context finishes wiring its
//! listeners, and a per-component circuit breaker keeps a misbehaving
//! handler from taking the rest of the context down with it.
//!
//! Cross-context traffic is the `bookmarc-bridge` crate's job; this crate
//! is purely in-process.
//!
//! ```no_run
//! use bookmarc_bus::{priority, Envelope, EventBus, FnHandler};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn demo() {
//! let bus = EventBus::new();
//! bus.subscribe(
//!     "DATA.SAVE.COMPLETED",
//!     Arc::new(FnHandler::new("index-refresher", |envelope| {
//!         Box::pin(async move {
//!             tracing::info!(id = %envelope.id(), "refreshing index");
//!             Ok(json!({ "refreshed": true }))
//!         })
//!     })),
//!     priority::NORMAL,
//! )
//! .await;
//!
//! bus.mark_ready().await;
//! bus.dispatch(Envelope::new("DATA.SAVE.COMPLETED", json!({ "book_id": 42 })))
//!     .await;
//! # }
//! ```

pub mod bus;
pub mod diagnostics;
pub mod envelope;
pub mod failure;
pub mod handler;
pub mod queue;
pub mod readiness;
pub mod registry;
pub mod store;

pub use bus::{BusSettings, EventBus};
pub use diagnostics::{BusStats, StatsSnapshot};
pub use envelope::{priority, Envelope, ExecutionContext};
pub use failure::{BreakerPolicy, BreakerSnapshot, BreakerState, ErrorCoordinator};
pub use handler::{
    FailureKind, FnHandler, Handler, HandlerError, HandlerFuture, HandlerOutcome, HandlerStatus,
};
pub use queue::PreReadyQueue;
pub use readiness::ReadinessBarrier;
pub use registry::{ListenerRegistry, RegistrationId, RegistrationStatsSnapshot};
pub use store::{KeyValueStore, MemoryStore, StoreError};
