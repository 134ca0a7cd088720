// packages/engine/src/events/emitter.rs
//! Lifecycle event types and the emitter boundary
//!
//! The engine pushes `EventEnvelope`s through an `EventEmitter`; the transport
//! behind it (WebSocket, SSE, queue) is not the engine's concern. Delivery is
//! best-effort: an `EmitError` is logged and counted, never propagated into
//! the execution.

use crate::utils::ids::ExecutionId;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Why an execution was declared dead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathKind {
    /// Deadline exceeded
    Timeout,

    /// Agent returned an error
    Exception,

    /// Agent task panicked
    Panic,

    /// Engine cleanup cancelled the run
    Cancelled,

    /// Heartbeats stopped before the deadline
    Silent,
}

impl DeathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DeathKind::Timeout => "timeout",
            DeathKind::Exception => "exception",
            DeathKind::Panic => "panic",
            DeathKind::Cancelled => "cancelled",
            DeathKind::Silent => "silent",
        }
    }
}

impl fmt::Display for DeathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    Started,
    Thinking {
        reasoning: String,
        step_number: Option<u32>,
        progress_percent: Option<f64>,
    },
    ToolExecuting {
        tool_name: String,
        params: Value,
    },
    ToolCompleted {
        tool_name: String,
        result: Value,
        duration_ms: Option<u64>,
    },
    Completed {
        result: Value,
        duration_ms: u64,
    },
    Death {
        kind: DeathKind,
        context: Value,
    },
    Error {
        error: String,
        context: Value,
    },
}

impl AgentEvent {
    /// `completed` and `death` close an execution's stream
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentEvent::Completed { .. } | AgentEvent::Death { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Started => "started",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::ToolExecuting { .. } => "tool_executing",
            AgentEvent::ToolCompleted { .. } => "tool_completed",
            AgentEvent::Completed { .. } => "completed",
            AgentEvent::Death { .. } => "death",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// Event plus the identity of the execution that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub execution_id: ExecutionId,

    /// Position within this execution's stream, starting at 0
    pub sequence: u64,

    pub user_id: String,
    pub thread_id: String,
    pub run_id: String,
    pub agent_name: String,
    pub timestamp: DateTime<Utc>,
    pub event: AgentEvent,
}

/// Transport-level delivery failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("event channel closed")]
    ChannelClosed,

    #[error("event buffer full")]
    BufferFull,

    #[error("transport error: {0}")]
    Transport(String),
}

/// Sink for lifecycle events
pub trait EventEmitter: Send + Sync {
    /// Deliver one event; failures are reported, not retried
    fn emit(&self, envelope: EventEnvelope) -> BoxFuture<'_, Result<(), EmitError>>;
}

/// Delivery counters, shared by every execution of one engine
#[derive(Debug, Default)]
pub struct EmitterCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped_after_terminal: AtomicU64,
}

impl EmitterCounters {
    pub fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped_after_terminal.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EmitterStats {
        EmitterStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped_after_terminal: self.dropped_after_terminal.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.delivered.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.dropped_after_terminal.store(0, Ordering::Relaxed);
    }
}

/// Event delivery statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitterStats {
    /// Events accepted by the emitter
    pub delivered: u64,

    /// Events the emitter rejected
    pub failed: u64,

    /// Events raised after the terminal event and discarded
    pub dropped_after_terminal: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_events() {
        assert!(AgentEvent::Completed { result: json!(null), duration_ms: 1 }.is_terminal());
        assert!(AgentEvent::Death { kind: DeathKind::Timeout, context: json!({}) }.is_terminal());
        assert!(!AgentEvent::Started.is_terminal());
        assert!(!AgentEvent::Error { error: "x".into(), context: json!({}) }.is_terminal());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = AgentEvent::Death {
            kind: DeathKind::Timeout,
            context: json!({"timeout_ms": 100}),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "death");
        assert_eq!(value["kind"], "timeout");
    }

    #[test]
    fn test_counters() {
        let counters = EmitterCounters::default();
        counters.record_delivered();
        counters.record_delivered();
        counters.record_failed();
        counters.record_dropped();

        let stats = counters.snapshot();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dropped_after_terminal, 1);

        counters.reset();
        assert_eq!(counters.snapshot(), EmitterStats::default());
    }
}
