// packages/engine/src/runtime/tracker.rs
//! Execution state machine and liveness tracking
//!
//! ```text
//! CREATED ─► STARTED ─► RUNNING ◄─┐ (heartbeat)
//!    │          │          │ ─────┘
//!    │          │          ├─► COMPLETED
//!    └──────────┴──────────┼─► FAILED
//!                          ├─► TIMED_OUT
//!                          └─► DEAD
//! ```
//!
//! Terminal states are write-once: any later write is rejected.

use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::ExecutionId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Lifecycle state of one execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Created,
    Started,
    Running,
    Completed,
    Failed,
    TimedOut,
    Dead,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Completed
                | ExecutionState::Failed
                | ExecutionState::TimedOut
                | ExecutionState::Dead
        )
    }

    /// Whether `self -> next` is a legal write
    pub fn can_transition_to(self, next: ExecutionState) -> bool {
        use ExecutionState::*;

        if self.is_terminal() {
            return false;
        }

        match next {
            Created => false,
            Started => self == Created,
            Running => matches!(self, Started | Running),
            Completed => matches!(self, Started | Running),
            Failed | TimedOut | Dead => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionState::Created => "created",
            ExecutionState::Started => "started",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::Dead => "dead",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
struct TrackedExecution {
    state: ExecutionState,
    agent_name: String,
    created_at: Instant,
    last_heartbeat: Instant,
    heartbeats: u64,
}

/// Per-engine tracker of execution states
#[derive(Debug, Default)]
pub struct ExecutionTracker {
    executions: Mutex<HashMap<ExecutionId, TrackedExecution>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution in `CREATED`
    pub fn register(&self, execution_id: ExecutionId, agent_name: &str) {
        let now = Instant::now();
        self.executions.lock().insert(
            execution_id,
            TrackedExecution {
                state: ExecutionState::Created,
                agent_name: agent_name.to_string(),
                created_at: now,
                last_heartbeat: now,
                heartbeats: 0,
            },
        );
    }

    /// Apply a state write, rejecting illegal or post-terminal writes
    pub fn transition(&self, execution_id: ExecutionId, next: ExecutionState) -> Result<()> {
        let mut executions = self.executions.lock();
        let tracked = executions.get_mut(&execution_id).ok_or_else(|| {
            EngineError::validation(format!("execution {} is not tracked", execution_id))
        })?;

        if !tracked.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                execution_id,
                from: tracked.state,
                to: next,
            });
        }

        debug!(
            execution_id = %execution_id,
            agent_name = %tracked.agent_name,
            from = %tracked.state,
            to = %next,
            "Execution state transition"
        );
        tracked.state = next;
        if next == ExecutionState::Running {
            tracked.last_heartbeat = Instant::now();
        }
        Ok(())
    }

    /// Refresh liveness; keeps the execution in `RUNNING`
    pub fn heartbeat(&self, execution_id: ExecutionId) -> Result<()> {
        let mut executions = self.executions.lock();
        let tracked = executions.get_mut(&execution_id).ok_or_else(|| {
            EngineError::validation(format!("execution {} is not tracked", execution_id))
        })?;

        if !tracked.state.can_transition_to(ExecutionState::Running) {
            return Err(EngineError::InvalidTransition {
                execution_id,
                from: tracked.state,
                to: ExecutionState::Running,
            });
        }

        tracked.state = ExecutionState::Running;
        tracked.last_heartbeat = Instant::now();
        tracked.heartbeats += 1;
        Ok(())
    }

    /// Force an execution into `DEAD`
    pub fn mark_dead(&self, execution_id: ExecutionId) -> Result<()> {
        self.transition(execution_id, ExecutionState::Dead)
    }

    /// Force every non-terminal execution silent for longer than `threshold`
    /// into `TIMED_OUT`, returning the affected ids
    pub fn expire_silent(&self, threshold: Duration) -> Vec<ExecutionId> {
        let now = Instant::now();
        let mut expired = Vec::new();

        for (id, tracked) in self.executions.lock().iter_mut() {
            if tracked.state.is_terminal() {
                continue;
            }
            if now.duration_since(tracked.last_heartbeat) > threshold {
                warn!(
                    execution_id = %id,
                    agent_name = %tracked.agent_name,
                    silent_ms = now.duration_since(tracked.last_heartbeat).as_millis() as u64,
                    "No heartbeat within threshold, forcing timeout"
                );
                tracked.state = ExecutionState::TimedOut;
                expired.push(*id);
            }
        }

        expired
    }

    pub fn state(&self, execution_id: ExecutionId) -> Option<ExecutionState> {
        self.executions.lock().get(&execution_id).map(|t| t.state)
    }

    pub fn heartbeat_count(&self, execution_id: ExecutionId) -> Option<u64> {
        self.executions.lock().get(&execution_id).map(|t| t.heartbeats)
    }

    /// Age of an execution since registration
    pub fn age(&self, execution_id: ExecutionId) -> Option<Duration> {
        self.executions
            .lock()
            .get(&execution_id)
            .map(|t| t.created_at.elapsed())
    }

    /// Executions not yet in a terminal state
    pub fn active_count(&self) -> usize {
        self.executions
            .lock()
            .values()
            .filter(|t| !t.state.is_terminal())
            .count()
    }

    /// Drop an execution once the engine has finished with it
    pub fn forget(&self, execution_id: ExecutionId) -> Option<ExecutionState> {
        self.executions.lock().remove(&execution_id).map(|t| t.state)
    }

    pub fn clear(&self) {
        self.executions.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.executions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.lock().is_empty()
    }
}
