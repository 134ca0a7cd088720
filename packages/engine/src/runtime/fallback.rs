// packages/engine/src/runtime/fallback.rs
//! Degraded results for failed executions
//!
//! Every engine carries a `FallbackManager`. `DisabledFallback` declines
//! every failure, so the caller receives a typed `AgentExecution` error.

use crate::events::emitter::DeathKind;
use crate::runtime::result::ExecutionResult;
use serde_json::Value;

/// What the fallback manager knows about a failure
#[derive(Debug, Clone)]
pub struct FailureContext<'a> {
    pub user_id: &'a str,
    pub run_id: &'a str,
    pub agent_name: &'a str,
    pub kind: DeathKind,
    pub error: &'a str,
    pub duration_ms: u64,
    pub attempts: u32,
}

/// Converts a hard failure into a structured result, or declines
pub trait FallbackManager: Send + Sync {
    fn fallback(&self, failure: &FailureContext<'_>) -> Option<ExecutionResult>;
}

/// Never produces a fallback
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledFallback;

impl FallbackManager for DisabledFallback {
    fn fallback(&self, _failure: &FailureContext<'_>) -> Option<ExecutionResult> {
        None
    }
}

/// Answers every failure with a fixed degraded payload
#[derive(Debug, Clone)]
pub struct StaticFallback {
    payload: Value,
}

impl StaticFallback {
    pub fn new(payload: Value) -> Self {
        Self { payload }
    }
}

impl FallbackManager for StaticFallback {
    fn fallback(&self, failure: &FailureContext<'_>) -> Option<ExecutionResult> {
        Some(
            ExecutionResult::succeeded(self.payload.clone(), failure.duration_ms)
                .with_metadata("fallback", Value::Bool(true))
                .with_metadata("degraded", Value::Bool(true))
                .with_metadata("original_error", Value::String(failure.error.to_string()))
                .with_metadata("failure_kind", Value::String(failure.kind.to_string())),
        )
    }
}
