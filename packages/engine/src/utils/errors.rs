// packages/engine/src/utils/errors.rs
//! Error taxonomy for the execution engine
//!
//! Validation errors are raised before any resource is touched. Timeouts and
//! deaths are normally captured into a failed `ExecutionResult`; the variants
//! exist so the same wording is used in results, logs, and tracker errors.

use crate::runtime::tracker::ExecutionState;
use crate::utils::ids::ExecutionId;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, EngineError>;

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed session or request (empty ids, placeholder run id, user mismatch)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Per-user engine ceiling or concurrency ceiling hit
    #[error("Resource exceeded: {0}")]
    ResourceExceeded(String),

    #[error("execution timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The agent collaborator raised and no fallback was available
    #[error("agent '{agent_name}' failed in run {run_id}: {source:#}")]
    AgentExecution {
        run_id: String,
        agent_name: String,
        execution_id: ExecutionId,
        state: ExecutionState,
        duration_ms: u64,
        #[source]
        source: anyhow::Error,
    },

    #[error("execution {execution_id} stopped sending heartbeats")]
    DeathDetected { execution_id: ExecutionId },

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    /// Tracker rejected a state write
    #[error("Invalid transition for {execution_id}: {from} -> {to}")]
    InvalidTransition {
        execution_id: ExecutionId,
        from: ExecutionState,
        to: ExecutionState,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Observability setup failed: {0}")]
    Observability(String),
}

impl EngineError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Whether this error was raised before the engine touched any resource
    pub fn is_validation(&self) -> bool {
        matches!(self, EngineError::Validation(_))
    }

    /// Short machine-readable kind, used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::ResourceExceeded(_) => "resource_exceeded",
            EngineError::Timeout { .. } => "timeout",
            EngineError::AgentExecution { .. } => "agent_execution",
            EngineError::DeathDetected { .. } => "death_detected",
            EngineError::ShutdownInProgress => "shutdown_in_progress",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::Config(_) => "config",
            EngineError::Observability(_) => "observability",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_mentions_timed_out() {
        let err = EngineError::Timeout { timeout_ms: 100 };
        assert!(err.to_string().contains("timed out"));
        assert_eq!(err.kind(), "timeout");
    }

    #[test]
    fn test_agent_execution_carries_identifiers() {
        let err = EngineError::AgentExecution {
            run_id: "run_1".to_string(),
            agent_name: "triage".to_string(),
            execution_id: ExecutionId::new(),
            state: ExecutionState::Failed,
            duration_ms: 12,
            source: anyhow::anyhow!("model unavailable"),
        };
        let msg = err.to_string();
        assert!(msg.contains("run_1"));
        assert!(msg.contains("triage"));
        assert!(msg.contains("model unavailable"));
    }

    #[test]
    fn test_validation_helper() {
        let err = EngineError::validation("user_id must not be empty");
        assert!(err.is_validation());
        assert!(!EngineError::ShutdownInProgress.is_validation());
    }
}
