// packages/engine/src/events/notifier.rs
//! Per-execution event stream
//!
//! A `RunNotifier` owns the ordering contract for one execution:
//! - `started` is always the first event
//! - exactly one terminal event (`completed` or `death`) is the last event
//! - tool events are paired 1:1 and nested between the two
//!
//! Emission is serialized through an async gate so the heartbeat loop, the
//! agent's tool reports, and the engine's terminal event never interleave.
//! Once sealed, further events are dropped and counted. Each delivery is
//! bounded by an emit timeout so a stalled transport cannot hold the gate.

use crate::events::emitter::{
    AgentEvent, DeathKind, EmitterCounters, EventEmitter, EventEnvelope,
};
use crate::utils::ids::ExecutionId;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{trace, warn};

/// Longest a single `emit` may take before it is counted as failed
pub const DEFAULT_EMIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Identity stamped on every envelope of one execution
#[derive(Debug, Clone)]
pub struct RunIdentity {
    pub execution_id: ExecutionId,
    pub user_id: String,
    pub thread_id: String,
    pub run_id: String,
    pub agent_name: String,
}

#[derive(Debug, Default)]
struct Gate {
    next_sequence: u64,
    started: bool,
    next_tool_call: u64,
    open_tools: BTreeMap<u64, (String, Instant)>,
}

/// Ordered, sealed-after-terminal event stream for one execution
pub struct RunNotifier {
    identity: RunIdentity,
    emitter: Arc<dyn EventEmitter>,
    counters: Arc<EmitterCounters>,
    gate: Mutex<Gate>,
    sealed: AtomicBool,
    emit_timeout: Duration,
}

impl RunNotifier {
    pub fn new(
        identity: RunIdentity,
        emitter: Arc<dyn EventEmitter>,
        counters: Arc<EmitterCounters>,
    ) -> Self {
        Self {
            identity,
            emitter,
            counters,
            gate: Mutex::new(Gate::default()),
            sealed: AtomicBool::new(false),
            emit_timeout: DEFAULT_EMIT_TIMEOUT,
        }
    }

    pub fn with_emit_timeout(mut self, emit_timeout: Duration) -> Self {
        self.emit_timeout = emit_timeout;
        self
    }

    pub fn identity(&self) -> &RunIdentity {
        &self.identity
    }

    /// Whether the terminal event has been emitted
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    pub async fn notify_started(&self) {
        let mut gate = self.gate.lock().await;
        if self.is_sealed() || gate.started {
            return;
        }
        self.send(&mut gate, AgentEvent::Started).await;
        gate.started = true;
    }

    pub async fn notify_thinking(
        &self,
        reasoning: impl Into<String>,
        step_number: Option<u32>,
        progress_percent: Option<f64>,
    ) {
        self.send_progress(AgentEvent::Thinking {
            reasoning: reasoning.into(),
            step_number,
            progress_percent,
        })
        .await;
    }

    pub async fn notify_error(&self, error: impl Into<String>, context: Value) {
        self.send_progress(AgentEvent::Error {
            error: error.into(),
            context,
        })
        .await;
    }

    /// Open a tool call; `None` if the stream is already sealed
    pub async fn notify_tool_executing(&self, tool_name: &str, params: Value) -> Option<u64> {
        let mut gate = self.gate.lock().await;
        if !self.admit(&gate) {
            return None;
        }

        let call_id = gate.next_tool_call;
        gate.next_tool_call += 1;
        gate.open_tools
            .insert(call_id, (tool_name.to_string(), Instant::now()));
        self.send(
            &mut gate,
            AgentEvent::ToolExecuting {
                tool_name: tool_name.to_string(),
                params,
            },
        )
        .await;
        Some(call_id)
    }

    /// Close a tool call opened by `notify_tool_executing`
    pub async fn notify_tool_completed(&self, call_id: u64, result: Value, duration_ms: Option<u64>) {
        let mut gate = self.gate.lock().await;
        if !self.admit(&gate) {
            return;
        }

        let Some((tool_name, opened_at)) = gate.open_tools.remove(&call_id) else {
            warn!(
                execution_id = %self.identity.execution_id,
                call_id = call_id,
                "Tool completion for unknown call ignored"
            );
            return;
        };

        let duration_ms = duration_ms.or_else(|| Some(opened_at.elapsed().as_millis() as u64));
        self.send(
            &mut gate,
            AgentEvent::ToolCompleted {
                tool_name,
                result,
                duration_ms,
            },
        )
        .await;
    }

    /// Terminal success event; returns false if the stream was already sealed
    pub async fn notify_completed(&self, result: Value, duration_ms: u64) -> bool {
        self.send_terminal(AgentEvent::Completed { result, duration_ms })
            .await
    }

    /// Terminal death event; returns false if the stream was already sealed
    pub async fn notify_death(&self, kind: DeathKind, context: Value) -> bool {
        self.send_terminal(AgentEvent::Death { kind, context }).await
    }

    fn admit(&self, gate: &Gate) -> bool {
        if self.is_sealed() {
            self.counters.record_dropped();
            trace!(execution_id = %self.identity.execution_id, "Event after terminal dropped");
            return false;
        }
        if !gate.started {
            self.counters.record_dropped();
            warn!(execution_id = %self.identity.execution_id, "Event before started dropped");
            return false;
        }
        true
    }

    async fn send_progress(&self, event: AgentEvent) {
        let mut gate = self.gate.lock().await;
        if self.admit(&gate) {
            self.send(&mut gate, event).await;
        }
    }

    async fn send_terminal(&self, event: AgentEvent) -> bool {
        let mut gate = self.gate.lock().await;
        if self.is_sealed() {
            self.counters.record_dropped();
            return false;
        }

        if !gate.started {
            self.send(&mut gate, AgentEvent::Started).await;
            gate.started = true;
        }

        // Close dangling tool calls so every tool_executing has a partner
        let open: Vec<_> = std::mem::take(&mut gate.open_tools).into_values().collect();
        for (tool_name, opened_at) in open {
            self.send(
                &mut gate,
                AgentEvent::ToolCompleted {
                    tool_name,
                    result: json!({ "status": "abandoned" }),
                    duration_ms: Some(opened_at.elapsed().as_millis() as u64),
                },
            )
            .await;
        }

        self.send(&mut gate, event).await;
        self.sealed.store(true, Ordering::Release);
        true
    }

    async fn send(&self, gate: &mut Gate, event: AgentEvent) {
        let envelope = EventEnvelope {
            execution_id: self.identity.execution_id,
            sequence: gate.next_sequence,
            user_id: self.identity.user_id.clone(),
            thread_id: self.identity.thread_id.clone(),
            run_id: self.identity.run_id.clone(),
            agent_name: self.identity.agent_name.clone(),
            timestamp: Utc::now(),
            event,
        };
        gate.next_sequence += 1;

        let name = envelope.event.name();
        match tokio::time::timeout(self.emit_timeout, self.emitter.emit(envelope)).await {
            Ok(Ok(())) => self.counters.record_delivered(),
            Ok(Err(e)) => {
                self.counters.record_failed();
                warn!(
                    execution_id = %self.identity.execution_id,
                    event = name,
                    error = %e,
                    "Event delivery failed"
                );
            }
            Err(_) => {
                self.counters.record_failed();
                warn!(
                    execution_id = %self.identity.execution_id,
                    event = name,
                    timeout_ms = self.emit_timeout.as_millis() as u64,
                    "Event delivery timed out"
                );
            }
        }
    }
}

/// Handle through which an agent reports tool usage and reasoning
#[derive(Clone)]
pub struct ToolReporter {
    notifier: Arc<RunNotifier>,
}

/// An open tool call; consumed by `ToolReporter::tool_completed`
#[derive(Debug)]
#[must_use = "a tool call should be completed"]
pub struct ToolCall {
    call_id: Option<u64>,
    started: Instant,
}

impl ToolReporter {
    pub(crate) fn new(notifier: Arc<RunNotifier>) -> Self {
        Self { notifier }
    }

    pub async fn tool_executing(&self, tool_name: &str, params: Value) -> ToolCall {
        let call_id = self.notifier.notify_tool_executing(tool_name, params).await;
        ToolCall {
            call_id,
            started: Instant::now(),
        }
    }

    pub async fn tool_completed(&self, call: ToolCall, result: Value) {
        if let Some(call_id) = call.call_id {
            let duration_ms = call.started.elapsed().as_millis() as u64;
            self.notifier
                .notify_tool_completed(call_id, result, Some(duration_ms))
                .await;
        }
    }

    /// Intermediate reasoning from the agent
    pub async fn thinking(&self, reasoning: impl Into<String>, step_number: Option<u32>) {
        self.notifier.notify_thinking(reasoning, step_number, None).await;
    }
}
