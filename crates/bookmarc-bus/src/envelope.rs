//! Event envelope: the immutable message unit routed by the bus.
//!
//! An [`Envelope`] is created once and never mutated. Routing uses the
//! dot-delimited `event_type` string verbatim; the payload is opaque to the
//! bus and its schema is owned by the producer/consumer pair. Delivery state
//! is tracked by the dispatcher, never on the envelope itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use uuid::Uuid;

/// Priority tiers for envelope routing. Lower values run first.
pub mod priority {
    /// Must-run-first events (shutdown, cancellation).
    pub const CRITICAL: i32 = 0;
    /// Ahead-of-normal events (state requests from UI surfaces).
    pub const HIGH: i32 = 50;
    /// Default tier for ordinary traffic.
    pub const NORMAL: i32 = 100;
    /// Deferred work (diagnostics, cleanup).
    pub const LOW: i32 = 200;
}

/// Isolated execution context an envelope originates from or targets.
///
/// Contexts share no memory; they communicate only through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionContext {
    /// Page-embedded extraction script.
    Page,
    /// Long-lived background coordinator (may be torn down at any time).
    Background,
    /// Short-lived popup UI surface.
    Popup,
    /// Overview/report UI surface.
    Overview,
}

impl ExecutionContext {
    /// Parse a context tag from its wire form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "page" => Some(Self::Page),
            "background" => Some(Self::Background),
            "popup" => Some(Self::Popup),
            "overview" => Some(Self::Overview),
            _ => None,
        }
    }

    /// Get string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Background => "background",
            Self::Popup => "popup",
            Self::Overview => "overview",
        }
    }
}

impl fmt::Display for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable event flowing through the bus.
///
/// Fields are private; construction goes through [`Envelope::new`] and the
/// consuming `with_*` builders, reads go through accessors. There is no
/// mutation API once an envelope exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    id: Uuid,
    event_type: String,
    payload: JsonValue,
    created_at: DateTime<Utc>,
    priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<Uuid>,
    source: ExecutionContext,
}

impl Envelope {
    /// Create a new envelope with a fresh id, normal priority, and
    /// `Background` as the default source.
    pub fn new(event_type: impl Into<String>, payload: JsonValue) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            created_at: Utc::now(),
            priority: priority::NORMAL,
            correlation_id: None,
            source: ExecutionContext::Background,
        }
    }

    /// Set the priority tier (lower = more urgent).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attach a correlation id linking this envelope to a request/response
    /// exchange across the bridge.
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Tag the originating execution context.
    pub fn with_source(mut self, source: ExecutionContext) -> Self {
        self.source = source;
        self
    }

    /// Build a terminal `{base}.FAILED` envelope for UI surfaces.
    ///
    /// Carries only a human-readable message and a retryable flag; raw
    /// internal errors never cross this boundary.
    pub fn failure(base: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self::new(
            format!("{base}.FAILED"),
            serde_json::json!({
                "message": message.into(),
                "retryable": retryable,
            }),
        )
    }

    /// Globally unique envelope id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Dot-delimited event type used for routing.
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Opaque payload; schema belongs to the producer/consumer pair.
    pub fn payload(&self) -> &JsonValue {
        &self.payload
    }

    /// Wall-clock creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Priority tier (lower = more urgent).
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Correlation id, if this envelope is part of a request/response pair.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Originating execution context.
    pub fn source(&self) -> ExecutionContext {
        self.source
    }

    /// Serialize to a newline-terminated JSON string for wire transport.
    pub fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Deserialize an envelope from its wire form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw.trim_end())
    }
}
