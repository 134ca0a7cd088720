// packages/engine/src/runtime/result.rs
//! Execution outcomes handed back to callers

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Outcome of exactly one `ExecutionRequest`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,

    /// Agent output on success (or fallback payload)
    pub data: Option<Value>,

    /// Human-readable failure reason
    pub error: Option<String>,

    /// Wall-clock duration; equals the deadline for timeouts
    pub duration_ms: u64,

    pub metadata: Map<String, Value>,
}

impl ExecutionResult {
    pub fn succeeded(data: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            duration_ms,
            metadata: Map::new(),
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            duration_ms,
            metadata: Map::new(),
        }
    }

    /// Placeholder for a pipeline step that never ran
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::failed(reason, 0).with_metadata("skipped", Value::Bool(true))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read a boolean metadata flag (`timeout`, `skipped`, `fallback`, ...)
    pub fn flag(&self, key: &str) -> bool {
        self.metadata.get(key).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn is_skipped(&self) -> bool {
        self.flag("skipped")
    }

    pub fn timed_out(&self) -> bool {
        self.flag("timeout")
    }
}
