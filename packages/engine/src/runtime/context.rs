// packages/engine/src/runtime/context.rs
//! Session and request types
//!
//! A `SessionContext` is the isolation boundary: one per user session, created
//! by the request layer and handed read-only to the engine. Every
//! `execute_agent` call carries an `ExecutionRequest` that must belong to the
//! engine's user.

use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// Run ids that upstream wiring passes by mistake instead of a real run id
pub const RESERVED_RUN_IDS: &[&str] = &["registry"];

/// Whether `run_id` is a reserved placeholder
pub fn is_placeholder_run_id(run_id: &str) -> bool {
    RESERVED_RUN_IDS
        .iter()
        .any(|reserved| run_id.trim().eq_ignore_ascii_case(reserved))
}

/// Immutable identity of one user session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    user_id: String,
    thread_id: String,
    run_id: String,
    request_id: String,
    metadata: Map<String, Value>,
    created_at: DateTime<Utc>,
}

impl SessionContext {
    pub fn new(
        user_id: impl Into<String>,
        thread_id: impl Into<String>,
        run_id: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            thread_id: thread_id.into(),
            run_id: run_id.into(),
            request_id: request_id.into(),
            metadata: Map::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach session metadata; only available while building the session
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Check the ids that scope an engine
    pub fn validate(&self) -> Result<()> {
        require_non_empty("user_id", &self.user_id)?;
        require_non_empty("thread_id", &self.thread_id)?;
        require_non_empty("run_id", &self.run_id)?;
        if is_placeholder_run_id(&self.run_id) {
            return Err(EngineError::validation(format!(
                "run_id '{}' is a reserved placeholder, not a real run id",
                self.run_id
            )));
        }
        Ok(())
    }
}

/// One invocation of an agent within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub run_id: String,
    pub thread_id: String,
    pub user_id: String,
    pub agent_name: String,

    /// Attempts already made for this request
    pub retry_count: u32,

    /// Extra attempts allowed after a collaborator error
    pub max_retries: u32,

    /// Per-request deadline, replacing the engine default
    pub timeout_override: Option<Duration>,

    /// Input handed to the agent
    pub input: Value,

    pub metadata: Map<String, Value>,
    pub started_at: DateTime<Utc>,
}

impl ExecutionRequest {
    /// Build a request inheriting the session's ids
    pub fn new(session: &SessionContext, agent_name: impl Into<String>) -> Self {
        Self {
            run_id: session.run_id.clone(),
            thread_id: session.thread_id.clone(),
            user_id: session.user_id.clone(),
            agent_name: agent_name.into(),
            retry_count: 0,
            max_retries: 0,
            timeout_override: None,
            input: Value::Null,
            metadata: Map::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_input(mut self, input: Value) -> Self {
        self.input = input;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Fail fast on malformed ids before any resource is acquired
    pub fn validate(&self) -> Result<()> {
        require_non_empty("user_id", &self.user_id)?;
        require_non_empty("thread_id", &self.thread_id)?;
        require_non_empty("run_id", &self.run_id)?;
        require_non_empty("agent_name", &self.agent_name)?;

        if is_placeholder_run_id(&self.run_id) {
            return Err(EngineError::validation(format!(
                "run_id '{}' is a reserved placeholder, not a real run id",
                self.run_id
            )));
        }

        if matches!(self.timeout_override, Some(t) if t.is_zero()) {
            return Err(EngineError::validation("timeout_override must be positive"));
        }

        Ok(())
    }

    /// Validate and additionally require the request to belong to `session`
    pub fn validate_for(&self, session: &SessionContext) -> Result<()> {
        self.validate()?;
        if self.user_id != session.user_id {
            return Err(EngineError::validation(format!(
                "request for user '{}' submitted to engine of user '{}'",
                self.user_id, session.user_id
            )));
        }
        Ok(())
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionContext {
        SessionContext::new("user_1", "thread_1", "run_1", "req_1")
    }

    #[test]
    fn test_request_inherits_session_ids() {
        let req = ExecutionRequest::new(&session(), "triage");
        assert_eq!(req.user_id, "user_1");
        assert_eq!(req.thread_id, "thread_1");
        assert_eq!(req.run_id, "run_1");
        assert!(req.validate_for(&session()).is_ok());
    }

    #[test]
    fn test_empty_ids_rejected() {
        let mut req = ExecutionRequest::new(&session(), "triage");
        req.user_id = String::new();
        assert!(req.validate().unwrap_err().is_validation());

        let mut req = ExecutionRequest::new(&session(), "triage");
        req.thread_id = "   ".to_string();
        assert!(req.validate().is_err());

        let req = ExecutionRequest::new(&session(), "");
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_placeholder_run_id_rejected() {
        let mut req = ExecutionRequest::new(&session(), "triage");
        req.run_id = "registry".to_string();
        assert!(req.validate().unwrap_err().is_validation());

        let session = SessionContext::new("user_1", "thread_1", "Registry", "req_1");
        assert!(session.validate().is_err());
    }

    #[test]
    fn test_foreign_user_rejected() {
        let mut req = ExecutionRequest::new(&session(), "triage");
        req.user_id = "user_2".to_string();
        assert!(req.validate().is_ok());
        assert!(req.validate_for(&session()).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let req = ExecutionRequest::new(&session(), "triage").with_timeout(Duration::ZERO);
        assert!(req.validate().is_err());
    }
}
