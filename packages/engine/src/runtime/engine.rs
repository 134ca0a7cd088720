// packages/engine/src/runtime/engine.rs
//! Per-user execution engine
//!
//! One engine serves exactly one `SessionContext`. It owns:
//! - a counting semaphore bounding concurrent executions for this user
//! - the active-run table, bounded history, and statistics (one lock)
//! - an execution tracker and a cancellation token for in-flight work
//!
//! Nothing here is shared with other engines. Engines are only built by
//! `EngineFactory`.
//!
//! # Execution lifecycle
//!
//! ```text
//! validate ─► acquire slot ─► register ─► started ─► spawn agent task
//!                                                        │
//!        ┌──────────────── select ───────────────────────┤
//!        │ heartbeat tick  → thinking + tracker refresh   │
//!        │ agent finished  → completed | retry | death    │
//!        │ deadline        → cancel, detach, death        │
//!        │ engine cleanup  → cancel, detach, death        │
//!        └────────────────────────────────────────────────┘
//!                              │
//!               record history/stats, release slot (always)
//! ```

use crate::events::emitter::{DeathKind, EmitterCounters, EmitterStats, EventEmitter};
use crate::events::notifier::{RunIdentity, RunNotifier, ToolReporter};
use crate::runtime::context::{ExecutionRequest, SessionContext};
use crate::runtime::fallback::{FailureContext, FallbackManager};
use crate::runtime::history::{ExecutionHistory, ExecutionRecord, ExecutionStats, Outcome, StatsAccumulator};
use crate::runtime::resolver::{AgentResolver, RunContext};
use crate::runtime::result::ExecutionResult;
use crate::runtime::tracker::{ExecutionState, ExecutionTracker};
use crate::utils::config::EngineSettings;
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::{EngineId, ExecutionId};
use anyhow::anyhow;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, OptionFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// How long an abandoned agent task may keep running after cancellation
const DETACH_GRACE: Duration = Duration::from_secs(5);

/// Collaborators injected into every engine
#[derive(Clone)]
pub struct EngineCollaborators {
    pub resolver: Arc<dyn AgentResolver>,
    pub emitter: Arc<dyn EventEmitter>,
    pub fallback: Arc<dyn FallbackManager>,
}

/// Whether the engine is still owned by its factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationStatus {
    /// Registered with the factory and bound to one session
    SessionScoped,

    /// No longer tracked by the factory (reclaimed or shut down) but still
    /// referenced by a caller; flagged for migration
    Detached,
}

/// Point-in-time view of an engine
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub engine_id: EngineId,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub active_runs: HashMap<ExecutionId, ExecutionRequest>,
    pub stats: ExecutionStats,
    pub isolation: IsolationStatus,
}

struct EngineState {
    active_runs: HashMap<ExecutionId, ExecutionRequest>,
    history: ExecutionHistory,
    stats: StatsAccumulator,
    last_activity: Instant,
}

enum RunOutcome {
    Completed { value: Value, attempts: u32 },
    Failed { error: anyhow::Error, attempts: u32 },
    Panicked { message: String, attempts: u32 },
    TimedOut,
    Silent,
    Cancelled,
}

/// Execution engine bound to one user session
pub struct ExecutionEngine {
    engine_id: EngineId,
    session: Arc<SessionContext>,
    settings: EngineSettings,
    created_at: DateTime<Utc>,
    semaphore: Arc<Semaphore>,
    state: Mutex<EngineState>,
    tracker: ExecutionTracker,
    collaborators: EngineCollaborators,
    counters: Arc<EmitterCounters>,
    cancel: CancellationToken,
    closed: AtomicBool,
    registered: AtomicBool,
}

impl ExecutionEngine {
    pub(crate) fn new(
        session: SessionContext,
        settings: EngineSettings,
        collaborators: EngineCollaborators,
    ) -> Self {
        let engine_id = EngineId::new();
        debug!(
            engine_id = %engine_id,
            user_id = %session.user_id(),
            max_concurrent = settings.max_concurrent_agents,
            "Creating execution engine"
        );

        Self {
            engine_id,
            semaphore: Arc::new(Semaphore::new(settings.max_concurrent_agents)),
            state: Mutex::new(EngineState {
                active_runs: HashMap::new(),
                history: ExecutionHistory::new(settings.max_history_size),
                stats: StatsAccumulator::default(),
                last_activity: Instant::now(),
            }),
            session: Arc::new(session),
            settings,
            created_at: Utc::now(),
            tracker: ExecutionTracker::new(),
            collaborators,
            counters: Arc::new(EmitterCounters::default()),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            registered: AtomicBool::new(true),
        }
    }

    pub fn engine_id(&self) -> EngineId {
        self.engine_id
    }

    pub fn user_id(&self) -> &str {
        self.session.user_id()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn tracker(&self) -> &ExecutionTracker {
        &self.tracker
    }

    /// Execute one agent for this engine's user
    pub async fn execute_agent(&self, req: ExecutionRequest) -> Result<ExecutionResult> {
        req.validate_for(&self.session)?;
        if self.is_closed() {
            return Err(EngineError::ShutdownInProgress);
        }

        let queued_at = Instant::now();
        let permit = self.acquire_slot(&req).await?;
        let queue_wait = queued_at.elapsed();

        let execution_id = ExecutionId::new();
        let _guard = ActiveRun::register(self, execution_id, &req, queue_wait, permit);

        let span = info_span!(
            "agent_execution",
            engine_id = %self.engine_id,
            user_id = %req.user_id,
            run_id = %req.run_id,
            execution_id = %execution_id,
            agent_name = %req.agent_name,
        );

        self.run_registered(execution_id, req, queue_wait)
            .instrument(span)
            .await
    }

    async fn acquire_slot(&self, req: &ExecutionRequest) -> Result<OwnedSemaphorePermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();

        let acquired = match self.settings.max_queue_wait() {
            Some(limit) => tokio::time::timeout(limit, acquire).await.map_err(|_| {
                warn!(
                    user_id = %req.user_id,
                    agent_name = %req.agent_name,
                    waited_ms = limit.as_millis() as u64,
                    "No execution slot within queue limit"
                );
                EngineError::ResourceExceeded(format!(
                    "no execution slot available for user '{}' within {}ms ({} concurrent max)",
                    req.user_id,
                    limit.as_millis(),
                    self.settings.max_concurrent_agents
                ))
            })?,
            None => acquire.await,
        };

        // The semaphore is only closed by cleanup
        acquired.map_err(|_| EngineError::ShutdownInProgress)
    }

    async fn run_registered(
        &self,
        execution_id: ExecutionId,
        req: ExecutionRequest,
        queue_wait: Duration,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        let timeout = req
            .timeout_override
            .unwrap_or_else(|| self.settings.execution_timeout());

        let notifier = Arc::new(RunNotifier::new(
            RunIdentity {
                execution_id,
                user_id: req.user_id.clone(),
                thread_id: req.thread_id.clone(),
                run_id: req.run_id.clone(),
                agent_name: req.agent_name.clone(),
            },
            Arc::clone(&self.collaborators.emitter),
            Arc::clone(&self.counters),
        )
        .with_emit_timeout(self.settings.emit_timeout()));

        self.write_state(execution_id, ExecutionState::Started);
        notifier.notify_started().await;
        info!(
            queue_wait_ms = queue_wait.as_millis() as u64,
            timeout_ms = timeout.as_millis() as u64,
            "Agent execution started"
        );

        let run_cancel = self.cancel.child_token();
        let outcome = self
            .drive(execution_id, &req, &notifier, &run_cancel, started, timeout)
            .await;

        self.finish(execution_id, &req, &notifier, outcome, started, timeout, queue_wait)
            .await
    }

    /// Run the agent until it finishes, the deadline passes, or the engine is
    /// cleaned up, emitting heartbeats meanwhile
    async fn drive(
        &self,
        execution_id: ExecutionId,
        req: &ExecutionRequest,
        notifier: &Arc<RunNotifier>,
        run_cancel: &CancellationToken,
        started: Instant,
        timeout: Duration,
    ) -> RunOutcome {
        let deadline = tokio::time::Instant::from_std(started + timeout);

        let executable = match self
            .collaborators
            .resolver
            .resolve(&req.agent_name, &self.session)
        {
            Ok(executable) => executable,
            Err(error) => {
                return RunOutcome::Failed {
                    error: error.context("agent resolution failed"),
                    attempts: 0,
                }
            }
        };

        let interval = self.settings.heartbeat_interval();
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats: u32 = 0;
        let mut attempt = req.retry_count;

        loop {
            let ctx = RunContext {
                execution_id,
                session: Arc::clone(&self.session),
                cancel: run_cancel.clone(),
                tools: ToolReporter::new(Arc::clone(notifier)),
                attempt,
            };
            let mut task = tokio::spawn(executable.run(req.input.clone(), ctx));

            // In-flight heartbeat delivery; polled alongside the deadline so a
            // slow emitter never holds the caller past it
            let mut beat: Option<BoxFuture<'_, ()>> = None;

            let joined = loop {
                tokio::select! {
                    biased;

                    joined = &mut task => break joined,

                    _ = tokio::time::sleep_until(deadline) => {
                        warn!(timeout_ms = timeout.as_millis() as u64, "Agent execution exceeded deadline");
                        run_cancel.cancel();
                        detach(task);
                        return RunOutcome::TimedOut;
                    }

                    _ = run_cancel.cancelled() => {
                        warn!("Agent execution cancelled by engine cleanup");
                        detach(task);
                        return RunOutcome::Cancelled;
                    }

                    Some(()) = OptionFuture::from(beat.as_mut()), if beat.is_some() => {
                        beat = None;
                    }

                    _ = heartbeat.tick(), if beat.is_none() => {
                        beats += 1;
                        if let Err(e) = self.tracker.heartbeat(execution_id) {
                            if self.tracker.state(execution_id) == Some(ExecutionState::TimedOut) {
                                error!(error = %e, "Execution declared silent by liveness sweep");
                                run_cancel.cancel();
                                detach(task);
                                return RunOutcome::Silent;
                            }
                            debug!(error = %e, "Heartbeat not recorded");
                        }

                        let progress = (started.elapsed().as_secs_f64() / timeout.as_secs_f64() * 100.0).min(99.0);
                        beat = Some(
                            notifier
                                .notify_thinking(
                                    format!("{} is still working", req.agent_name),
                                    Some(beats),
                                    Some(progress),
                                )
                                .boxed(),
                        );
                    }
                }
            };
            drop(beat);

            match joined {
                Ok(Ok(value)) => {
                    return RunOutcome::Completed {
                        value,
                        attempts: attempt + 1,
                    }
                }
                Ok(Err(error)) => {
                    if attempt < req.max_retries && !run_cancel.is_cancelled() {
                        attempt += 1;
                        warn!(
                            attempt = attempt,
                            max_retries = req.max_retries,
                            error = %error,
                            "Agent failed, retrying"
                        );
                        let retrying = notifier.notify_thinking(
                            format!("Retrying {} (attempt {}): {}", req.agent_name, attempt + 1, error),
                            Some(beats),
                            None,
                        );
                        let _ = tokio::time::timeout_at(deadline, retrying).await;
                        continue;
                    }
                    return RunOutcome::Failed {
                        error,
                        attempts: attempt + 1,
                    };
                }
                Err(join_error) if join_error.is_panic() => {
                    return RunOutcome::Panicked {
                        message: panic_message(join_error),
                        attempts: attempt + 1,
                    }
                }
                Err(join_error) => {
                    return RunOutcome::Failed {
                        error: anyhow!("agent task aborted: {}", join_error),
                        attempts: attempt + 1,
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        execution_id: ExecutionId,
        req: &ExecutionRequest,
        notifier: &RunNotifier,
        outcome: RunOutcome,
        started: Instant,
        timeout: Duration,
        queue_wait: Duration,
    ) -> Result<ExecutionResult> {
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let timeout_ms = timeout.as_millis() as u64;

        match outcome {
            RunOutcome::Completed { value, attempts } => {
                self.write_state(execution_id, ExecutionState::Completed);
                notifier.notify_completed(value.clone(), elapsed_ms).await;
                self.record(execution_id, req, Outcome::Completed, elapsed_ms, true);
                info!(duration_ms = elapsed_ms, attempts = attempts, "Agent execution completed");

                Ok(self.annotate(
                    ExecutionResult::succeeded(value, elapsed_ms),
                    execution_id,
                    req,
                    ExecutionState::Completed,
                    attempts,
                    queue_wait,
                ))
            }

            RunOutcome::TimedOut => {
                self.write_state(execution_id, ExecutionState::TimedOut);
                notifier
                    .notify_death(
                        DeathKind::Timeout,
                        json!({ "timeout_ms": timeout_ms, "elapsed_ms": elapsed_ms }),
                    )
                    .await;
                self.record(execution_id, req, Outcome::TimedOut, timeout_ms, false);

                let result = ExecutionResult::failed(EngineError::Timeout { timeout_ms }.to_string(), timeout_ms)
                    .with_metadata("timeout", Value::Bool(true));
                Ok(self.annotate(result, execution_id, req, ExecutionState::TimedOut, 0, queue_wait))
            }

            RunOutcome::Silent => {
                notifier
                    .notify_death(DeathKind::Silent, json!({ "elapsed_ms": elapsed_ms }))
                    .await;
                self.record(execution_id, req, Outcome::Dead, elapsed_ms, false);

                let result = ExecutionResult::failed(EngineError::DeathDetected { execution_id }.to_string(), elapsed_ms)
                    .with_metadata("dead", Value::Bool(true));
                Ok(self.annotate(result, execution_id, req, ExecutionState::TimedOut, 0, queue_wait))
            }

            RunOutcome::Cancelled => {
                self.write_state(execution_id, ExecutionState::Failed);
                notifier
                    .notify_death(DeathKind::Cancelled, json!({ "elapsed_ms": elapsed_ms }))
                    .await;
                self.record(execution_id, req, Outcome::Cancelled, elapsed_ms, false);

                let result = ExecutionResult::failed("execution cancelled", elapsed_ms)
                    .with_metadata("cancelled", Value::Bool(true));
                Ok(self.annotate(result, execution_id, req, ExecutionState::Failed, 0, queue_wait))
            }

            RunOutcome::Failed { error, attempts } => {
                self.fail(execution_id, req, notifier, DeathKind::Exception, error, attempts, elapsed_ms, queue_wait)
                    .await
            }

            RunOutcome::Panicked { message, attempts } => {
                let error = anyhow!("agent panicked: {}", message);
                self.fail(execution_id, req, notifier, DeathKind::Panic, error, attempts, elapsed_ms, queue_wait)
                    .await
            }
        }
    }

    /// Exception and panic path: death event, then fallback or typed error
    #[allow(clippy::too_many_arguments)]
    async fn fail(
        &self,
        execution_id: ExecutionId,
        req: &ExecutionRequest,
        notifier: &RunNotifier,
        kind: DeathKind,
        error: anyhow::Error,
        attempts: u32,
        elapsed_ms: u64,
        queue_wait: Duration,
    ) -> Result<ExecutionResult> {
        let (state, outcome) = match kind {
            DeathKind::Panic => (ExecutionState::Dead, Outcome::Dead),
            _ => (ExecutionState::Failed, Outcome::Failed),
        };
        let message = format!("{:#}", error);
        error!(error = %message, kind = %kind, attempts = attempts, "Agent execution failed");

        self.write_state(execution_id, state);
        let context = json!({ "error": message, "attempts": attempts, "elapsed_ms": elapsed_ms });
        notifier.notify_error(message.clone(), context.clone()).await;
        notifier.notify_death(kind, context).await;
        self.record(execution_id, req, outcome, elapsed_ms, false);

        let failure = FailureContext {
            user_id: &req.user_id,
            run_id: &req.run_id,
            agent_name: &req.agent_name,
            kind,
            error: &message,
            duration_ms: elapsed_ms,
            attempts,
        };

        match self.collaborators.fallback.fallback(&failure) {
            Some(result) => {
                info!("Fallback produced a degraded result");
                Ok(self.annotate(result, execution_id, req, state, attempts, queue_wait))
            }
            None => Err(EngineError::AgentExecution {
                run_id: req.run_id.clone(),
                agent_name: req.agent_name.clone(),
                execution_id,
                state,
                duration_ms: elapsed_ms,
                source: error,
            }),
        }
    }

    fn annotate(
        &self,
        mut result: ExecutionResult,
        execution_id: ExecutionId,
        req: &ExecutionRequest,
        state: ExecutionState,
        attempts: u32,
        queue_wait: Duration,
    ) -> ExecutionResult {
        let meta = &mut result.metadata;
        meta.insert("execution_id".into(), json!(execution_id.to_string()));
        meta.insert("engine_id".into(), json!(self.engine_id.to_string()));
        meta.insert("user_id".into(), json!(req.user_id));
        meta.insert("thread_id".into(), json!(req.thread_id));
        meta.insert("run_id".into(), json!(req.run_id));
        meta.insert("agent_name".into(), json!(req.agent_name));
        meta.insert("state".into(), json!(state.as_str()));
        meta.insert("attempts".into(), json!(attempts));
        meta.insert("queue_wait_ms".into(), json!(queue_wait.as_millis() as u64));
        result
    }

    fn write_state(&self, execution_id: ExecutionId, state: ExecutionState) {
        if let Err(e) = self.tracker.transition(execution_id, state) {
            debug!(execution_id = %execution_id, error = %e, "Tracker write skipped");
        }
    }

    fn record(&self, execution_id: ExecutionId, req: &ExecutionRequest, outcome: Outcome, duration_ms: u64, success: bool) {
        {
            let mut state = self.state.lock();
            // Under the lock, so a run finishing during cleanup cannot repopulate it
            if self.is_closed() {
                return;
            }
            state.history.push(execution_id, &req.agent_name, success, duration_ms);
            state.stats.record_outcome(outcome, duration_ms);
            state.last_activity = Instant::now();
        }

        let label = match outcome {
            Outcome::Completed => "completed",
            Outcome::Failed => "failed",
            Outcome::TimedOut => "timed_out",
            Outcome::Dead => "dead",
            Outcome::Cancelled => "cancelled",
        };
        metrics::counter!("agent_engine_executions_total", "outcome" => label).increment(1);
        metrics::histogram!("agent_engine_execution_duration_ms").record(duration_ms as f64);
    }

    /// Statistics for this engine's user only
    pub fn get_execution_stats(&self) -> ExecutionStats {
        let state = self.state.lock();
        state.stats.snapshot(state.active_runs.len())
    }

    /// History records, oldest first
    pub fn history(&self) -> Vec<ExecutionRecord> {
        self.state.lock().history.records()
    }

    /// Copy of the active-run table
    pub fn active_runs(&self) -> HashMap<ExecutionId, ExecutionRequest> {
        self.state.lock().active_runs.clone()
    }

    pub fn emitter_stats(&self) -> EmitterStats {
        self.counters.snapshot()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.state.lock();
        EngineSnapshot {
            engine_id: self.engine_id,
            user_id: self.session.user_id().to_string(),
            created_at: self.created_at,
            active_runs: state.active_runs.clone(),
            stats: state.stats.snapshot(state.active_runs.len()),
            isolation: self.isolation_status(),
        }
    }

    /// Time since the last execution finished; zero while work is in flight
    pub fn idle_for(&self) -> Duration {
        let state = self.state.lock();
        if state.active_runs.is_empty() {
            state.last_activity.elapsed()
        } else {
            Duration::ZERO
        }
    }

    /// Slots currently free
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn is_active(&self) -> bool {
        !self.is_closed()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn isolation_status(&self) -> IsolationStatus {
        if self.registered.load(Ordering::Acquire) {
            IsolationStatus::SessionScoped
        } else {
            IsolationStatus::Detached
        }
    }

    pub(crate) fn mark_detached(&self) {
        self.registered.store(false, Ordering::Release);
    }

    /// Force executions whose heartbeats stopped for a full deadline into
    /// `TIMED_OUT`; their drive loops report them as silent deaths
    pub fn sweep_silent(&self) -> Vec<ExecutionId> {
        self.tracker.expire_silent(self.settings.execution_timeout())
    }

    /// Cancel in-flight work and clear all per-user state. Idempotent.
    pub fn cleanup(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!(engine_id = %self.engine_id, "Engine already cleaned up");
            return;
        }

        self.cancel.cancel();
        self.semaphore.close();

        let in_flight = {
            let mut state = self.state.lock();
            let in_flight = state.active_runs.len();
            state.active_runs.clear();
            state.history.clear();
            state.stats.reset();
            in_flight
        };
        self.tracker.clear();
        self.counters.reset();

        info!(
            engine_id = %self.engine_id,
            user_id = %self.session.user_id(),
            cancelled_runs = in_flight,
            "Execution engine cleaned up"
        );
    }
}

impl fmt::Debug for ExecutionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionEngine")
            .field("engine_id", &format_args!("{}", self.engine_id))
            .field("user_id", &self.session.user_id())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Drop for ExecutionEngine {
    fn drop(&mut self) {
        // Stop any agent task still holding a child token
        self.cancel.cancel();
    }
}

/// Active-run registration; releases the slot and the table entry on drop,
/// whichever way the execution ends
struct ActiveRun<'a> {
    engine: &'a ExecutionEngine,
    execution_id: ExecutionId,
    _permit: OwnedSemaphorePermit,
}

impl<'a> ActiveRun<'a> {
    fn register(
        engine: &'a ExecutionEngine,
        execution_id: ExecutionId,
        req: &ExecutionRequest,
        queue_wait: Duration,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        {
            let mut state = engine.state.lock();
            state.active_runs.insert(execution_id, req.clone());
            state.stats.record_queue_wait(queue_wait);
            state.last_activity = Instant::now();
        }
        engine.tracker.register(execution_id, &req.agent_name);
        metrics::histogram!("agent_engine_queue_wait_ms").record(queue_wait.as_millis() as f64);

        Self {
            engine,
            execution_id,
            _permit: permit,
        }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.engine.state.lock();
            state.active_runs.remove(&self.execution_id);
            state.last_activity = Instant::now();
        }
        self.engine.tracker.forget(self.execution_id);
    }
}

/// Let an abandoned agent task wind down, aborting it after a grace period
fn detach(task: JoinHandle<anyhow::Result<Value>>) {
    tokio::spawn(async move {
        let mut task = task;
        if tokio::time::timeout(DETACH_GRACE, &mut task).await.is_err() {
            debug!("Abandoned agent task ignored cancellation, aborting");
            task.abort();
        }
    });
}

fn panic_message(join_error: JoinError) -> String {
    match join_error.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string()),
        Err(join_error) => join_error.to_string(),
    }
}
