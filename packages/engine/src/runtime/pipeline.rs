// packages/engine/src/runtime/pipeline.rs
//! Multi-step agent pipelines
//!
//! Every step runs through `ExecutionEngine::execute_agent`, so each one gets
//! its own slot, deadline, and event stream. The pipeline only decides which
//! steps run, in what grouping, and with what input.
//!
//! - `Sequential` steps run one after another, each fed the previous
//!   successful output
//! - consecutive `Parallel` steps form a batch that runs concurrently
//! - `Conditional` steps run only when their condition holds
//!
//! Exactly one result is returned per step, in declaration order.

use crate::runtime::context::ExecutionRequest;
use crate::runtime::engine::ExecutionEngine;
use crate::runtime::result::ExecutionResult;
use crate::utils::errors::{EngineError, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// How a step is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
    #[default]
    Sequential,
    Parallel,
    Conditional,
}

/// Predicate gating a conditional step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// The most recently executed step succeeded
    PreviousSucceeded,

    /// The most recently executed step failed
    PreviousFailed,

    /// A JSON pointer into an earlier step's output equals `value`
    OutputEquals {
        step_id: String,
        pointer: String,
        value: Value,
    },

    /// The base request's metadata has `key` equal to `value`
    MetadataEquals { key: String, value: Value },
}

/// One step of a pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Name used by dependencies and conditions; defaults to the agent name
    pub step_id: String,
    pub agent_name: String,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    #[serde(default)]
    pub condition: Option<StepCondition>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl PipelineStep {
    pub fn new(agent_name: impl Into<String>) -> Self {
        let agent_name = agent_name.into();
        Self {
            step_id: agent_name.clone(),
            agent_name,
            strategy: ExecutionStrategy::Sequential,
            condition: None,
            dependencies: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_id(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = step_id.into();
        self
    }

    pub fn parallel(mut self) -> Self {
        self.strategy = ExecutionStrategy::Parallel;
        self
    }

    pub fn when(mut self, condition: StepCondition) -> Self {
        self.strategy = ExecutionStrategy::Conditional;
        self.condition = Some(condition);
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Pipeline-wide policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOptions {
    /// Keep running independent steps after a failure
    pub continue_on_error: bool,
}

/// Bookkeeping while walking the steps
struct PipelineRun<'a> {
    base: &'a ExecutionRequest,
    options: PipelineOptions,
    outputs: HashMap<String, ExecutionResult>,
    last_output: Value,
    last_success: Option<bool>,
    failed: Option<String>,
}

impl<'a> PipelineRun<'a> {
    fn new(base: &'a ExecutionRequest, options: PipelineOptions) -> Self {
        Self {
            base,
            options,
            outputs: HashMap::new(),
            last_output: base.input.clone(),
            last_success: None,
            failed: None,
        }
    }

    /// Reason to skip `step`, if any
    fn skip_reason(&self, step: &PipelineStep) -> Option<String> {
        for dep in &step.dependencies {
            match self.outputs.get(dep) {
                Some(result) if result.success => {}
                Some(_) => return Some(format!("skipped: dependency '{}' did not succeed", dep)),
                None => return Some(format!("skipped: dependency '{}' has not run", dep)),
            }
        }

        if step.strategy == ExecutionStrategy::Conditional {
            return match &step.condition {
                Some(condition) if !self.holds(condition) => {
                    Some(format!("skipped: condition not met for step '{}'", step.step_id))
                }
                _ => None,
            };
        }

        if !self.options.continue_on_error {
            if let Some(failed) = &self.failed {
                return Some(format!("skipped: step '{}' failed", failed));
            }
        }

        None
    }

    fn holds(&self, condition: &StepCondition) -> bool {
        match condition {
            StepCondition::PreviousSucceeded => self.last_success == Some(true),
            StepCondition::PreviousFailed => self.last_success == Some(false),
            StepCondition::OutputEquals { step_id, pointer, value } => self
                .outputs
                .get(step_id)
                .and_then(|r| r.data.as_ref())
                .and_then(|data| data.pointer(pointer))
                == Some(value),
            StepCondition::MetadataEquals { key, value } => self.base.metadata.get(key) == Some(value),
        }
    }

    fn input_for(&self, step: &PipelineStep) -> Value {
        if step.dependencies.is_empty() {
            return self.last_output.clone();
        }

        let mut inputs = Map::new();
        for dep in &step.dependencies {
            let data = self
                .outputs
                .get(dep)
                .and_then(|r| r.data.clone())
                .unwrap_or(Value::Null);
            inputs.insert(dep.clone(), data);
        }
        Value::Object(inputs)
    }

    fn request_for(&self, step: &PipelineStep) -> ExecutionRequest {
        let mut req = self.base.clone();
        req.agent_name = step.agent_name.clone();
        req.input = self.input_for(step);
        req.started_at = chrono::Utc::now();
        for (key, value) in &step.metadata {
            req.metadata.insert(key.clone(), value.clone());
        }
        req.metadata
            .insert("pipeline_step".to_string(), Value::String(step.step_id.clone()));
        req
    }

    fn record(&mut self, step: &PipelineStep, result: &ExecutionResult) {
        if result.is_skipped() {
            self.outputs.insert(step.step_id.clone(), result.clone());
            return;
        }

        self.last_success = Some(result.success);
        if result.success {
            if let Some(data) = &result.data {
                self.last_output = data.clone();
            }
        } else if self.failed.is_none() {
            self.failed = Some(step.step_id.clone());
        }
        self.outputs.insert(step.step_id.clone(), result.clone());
    }
}

impl ExecutionEngine {
    /// Run `steps` with fail-fast semantics
    pub async fn execute_pipeline(
        &self,
        steps: &[PipelineStep],
        base: ExecutionRequest,
    ) -> Result<Vec<ExecutionResult>> {
        self.execute_pipeline_with(steps, base, PipelineOptions::default())
            .await
    }

    /// Run `steps` under an explicit policy
    pub async fn execute_pipeline_with(
        &self,
        steps: &[PipelineStep],
        base: ExecutionRequest,
        options: PipelineOptions,
    ) -> Result<Vec<ExecutionResult>> {
        validate_steps(steps)?;
        base.validate_for(self.session())?;

        info!(
            user_id = %base.user_id,
            run_id = %base.run_id,
            steps = steps.len(),
            continue_on_error = options.continue_on_error,
            "Starting pipeline"
        );

        let mut run = PipelineRun::new(&base, options);
        let mut results: Vec<Option<ExecutionResult>> = vec![None; steps.len()];
        let mut index = 0;

        while index < steps.len() {
            let end = batch_end(steps, index);

            let mut pending = Vec::new();
            for (offset, step) in steps[index..end].iter().enumerate() {
                match run.skip_reason(step) {
                    Some(reason) => {
                        debug!(step_id = %step.step_id, reason = %reason, "Skipping pipeline step");
                        results[index + offset] = Some(ExecutionResult::skipped(reason));
                    }
                    None => pending.push((index + offset, run.request_for(step))),
                }
            }

            let executed = join_all(pending.into_iter().map(|(position, req)| async move {
                (position, self.run_step(req).await)
            }))
            .await;

            for (position, result) in executed {
                results[position] = Some(result?);
            }

            for position in index..end {
                if let Some(result) = &results[position] {
                    run.record(&steps[position], result);
                }
            }

            index = end;
        }

        let results: Vec<ExecutionResult> = results.into_iter().flatten().collect();
        let failed = results.iter().filter(|r| !r.success && !r.is_skipped()).count();
        info!(failed_steps = failed, "Pipeline finished");
        Ok(results)
    }

    /// Execute one step, turning collaborator errors into failed results
    async fn run_step(&self, req: ExecutionRequest) -> Result<ExecutionResult> {
        let identity = StepIdentity::from(&req);
        let queued_at = std::time::Instant::now();

        match self.execute_agent(req).await {
            Ok(result) => Ok(result),
            Err(EngineError::AgentExecution {
                run_id,
                agent_name,
                execution_id,
                state,
                duration_ms,
                source,
            }) => {
                let message = format!("agent '{}' failed in run {}: {:#}", agent_name, run_id, source);
                warn!(agent_name = %agent_name, error = %message, "Pipeline step failed");
                Ok(identity
                    .annotate(ExecutionResult::failed(message, duration_ms))
                    .with_metadata("execution_id", Value::String(execution_id.to_string()))
                    .with_metadata("state", Value::String(state.as_str().to_string())))
            }
            Err(err @ EngineError::ResourceExceeded(_)) => {
                warn!(agent_name = %identity.agent_name, error = %err, "Pipeline step could not be scheduled");
                let waited_ms = queued_at.elapsed().as_millis() as u64;
                Ok(identity.annotate(ExecutionResult::failed(err.to_string(), waited_ms)))
            }
            Err(err) => Err(err),
        }
    }
}

/// Identity copied onto results the engine did not annotate itself
struct StepIdentity {
    user_id: String,
    thread_id: String,
    run_id: String,
    agent_name: String,
    step_id: Option<Value>,
}

impl From<&ExecutionRequest> for StepIdentity {
    fn from(req: &ExecutionRequest) -> Self {
        Self {
            user_id: req.user_id.clone(),
            thread_id: req.thread_id.clone(),
            run_id: req.run_id.clone(),
            agent_name: req.agent_name.clone(),
            step_id: req.metadata.get("pipeline_step").cloned(),
        }
    }
}

impl StepIdentity {
    fn annotate(&self, result: ExecutionResult) -> ExecutionResult {
        let result = result
            .with_metadata("user_id", Value::String(self.user_id.clone()))
            .with_metadata("thread_id", Value::String(self.thread_id.clone()))
            .with_metadata("run_id", Value::String(self.run_id.clone()))
            .with_metadata("agent_name", Value::String(self.agent_name.clone()));
        match &self.step_id {
            Some(step_id) => result.with_metadata("pipeline_step", step_id.clone()),
            None => result,
        }
    }
}

/// End (exclusive) of the batch starting at `start`. Consecutive parallel
/// steps share a batch until one depends on a step already in it.
fn batch_end(steps: &[PipelineStep], start: usize) -> usize {
    if steps[start].strategy != ExecutionStrategy::Parallel {
        return start + 1;
    }

    let mut batch: HashSet<&str> = HashSet::new();
    let mut end = start;
    while end < steps.len() && steps[end].strategy == ExecutionStrategy::Parallel {
        let step = &steps[end];
        if step.dependencies.iter().any(|dep| batch.contains(dep.as_str())) {
            break;
        }
        batch.insert(step.step_id.as_str());
        end += 1;
    }
    end
}

fn validate_steps(steps: &[PipelineStep]) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.agent_name.trim().is_empty() {
            return Err(EngineError::validation("pipeline step agent_name must not be empty"));
        }
        for dep in &step.dependencies {
            if !seen.contains(dep.as_str()) {
                return Err(EngineError::validation(format!(
                    "step '{}' depends on '{}', which is not declared earlier",
                    step.step_id, dep
                )));
            }
        }
        if !seen.insert(step.step_id.as_str()) {
            return Err(EngineError::validation(format!("duplicate step id '{}'", step.step_id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::recorder::RecordingEmitter;
    use crate::runtime::context::SessionContext;
    use crate::runtime::engine::EngineCollaborators;
    use crate::runtime::fallback::DisabledFallback;
    use crate::runtime::resolver::AgentRegistry;
    use crate::utils::config::EngineSettings;
    use anyhow::anyhow;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn engine(registry: AgentRegistry) -> (ExecutionEngine, Arc<RecordingEmitter>) {
        let emitter = Arc::new(RecordingEmitter::new(1024));
        let engine = ExecutionEngine::new(
            SessionContext::new("alice", "thread_1", "run_1", "req_1"),
            EngineSettings {
                heartbeat_interval_ms: 1_000,
                ..EngineSettings::default()
            },
            EngineCollaborators {
                resolver: Arc::new(registry),
                emitter: emitter.clone(),
                fallback: Arc::new(DisabledFallback),
            },
        );
        (engine, emitter)
    }

    fn registry() -> AgentRegistry {
        let registry = AgentRegistry::new();
        registry.register_fn("double", |input, _ctx| async move {
            Ok(json!(input.as_i64().unwrap_or(0) * 2))
        });
        registry.register_fn("fail", |_input, _ctx| async move { Err(anyhow!("step broke")) });
        registry.register_fn("classify", |_input, _ctx| async move {
            Ok(json!({"label": "urgent"}))
        });
        registry.register_fn("echo", |input, _ctx| async move { Ok(input) });
        registry
    }

    #[tokio::test]
    async fn test_sequential_chains_outputs() {
        let (engine, _) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "double").with_input(json!(3));
        let steps = vec![
            PipelineStep::new("double").with_id("first"),
            PipelineStep::new("double").with_id("second"),
        ];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].data, Some(json!(6)));
        assert_eq!(results[1].data, Some(json!(12)));
        assert_eq!(results[1].metadata["agent_name"], "double");
    }

    #[tokio::test]
    async fn test_fail_fast_skips_remaining() {
        let (engine, emitter) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "double").with_input(json!(1));
        let steps = vec![
            PipelineStep::new("double"),
            PipelineStep::new("fail"),
            PipelineStep::new("echo"),
        ];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(!results[1].is_skipped());
        assert!(results[2].is_skipped());

        // The skipped step never started
        let started = emitter
            .drain()
            .into_iter()
            .filter(|e| e.event.name() == "started")
            .count();
        assert_eq!(started, 2);
    }

    #[tokio::test]
    async fn test_continue_on_error_only_skips_dependents() {
        let (engine, _) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "double").with_input(json!(2));
        let steps = vec![
            PipelineStep::new("fail").with_id("broken"),
            PipelineStep::new("echo").with_id("needs_broken").depends_on("broken"),
            PipelineStep::new("double").with_id("independent"),
        ];

        let results = engine
            .execute_pipeline_with(&steps, base, PipelineOptions { continue_on_error: true })
            .await
            .unwrap();
        assert!(!results[0].success);
        assert!(results[1].is_skipped());
        assert!(results[2].success);
        assert_eq!(results[2].data, Some(json!(4)));
    }

    #[tokio::test]
    async fn test_parallel_batch_runs_concurrently() {
        let registry = registry();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (r, p) = (running.clone(), peak.clone());
        registry.register_fn("wait", move |input, _ctx| {
            let (running, peak) = (r.clone(), p.clone());
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(input)
            }
        });
        let (engine, _) = engine(registry);

        let base = ExecutionRequest::new(engine.session(), "wait").with_input(json!("x"));
        let steps = vec![
            PipelineStep::new("wait").with_id("a").parallel(),
            PipelineStep::new("wait").with_id("b").parallel(),
            PipelineStep::new("wait").with_id("c").parallel(),
            PipelineStep::new("echo").with_id("join").depends_on("a").depends_on("c"),
        ];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| r.success));
        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(results[3].data, Some(json!({"a": "x", "c": "x"})));
    }

    #[tokio::test]
    async fn test_parallel_step_waits_for_parallel_dependency() {
        let (engine, _) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "double").with_input(json!(2));
        let steps = vec![
            PipelineStep::new("double").with_id("a").parallel(),
            PipelineStep::new("echo").with_id("b").parallel().depends_on("a"),
            PipelineStep::new("double").with_id("c").parallel(),
        ];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        assert!(results.iter().all(|r| r.success));
        assert_eq!(results[0].data, Some(json!(4)));
        assert_eq!(results[1].data, Some(json!({"a": 4})));
    }

    #[test]
    fn test_batch_boundaries() {
        let steps = vec![
            PipelineStep::new("x").with_id("a").parallel(),
            PipelineStep::new("x").with_id("b").parallel(),
            PipelineStep::new("x").with_id("c").parallel().depends_on("a"),
            PipelineStep::new("x").with_id("d"),
        ];
        assert_eq!(batch_end(&steps, 0), 2);
        assert_eq!(batch_end(&steps, 2), 3);
        assert_eq!(batch_end(&steps, 3), 4);
    }

    #[tokio::test]
    async fn test_conditional_steps() {
        let (engine, _) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "classify")
            .with_metadata("channel", json!("email"));
        let steps = vec![
            PipelineStep::new("classify"),
            PipelineStep::new("echo").with_id("urgent_path").when(StepCondition::OutputEquals {
                step_id: "classify".to_string(),
                pointer: "/label".to_string(),
                value: json!("urgent"),
            }),
            PipelineStep::new("echo").with_id("on_failure").when(StepCondition::PreviousFailed),
            PipelineStep::new("echo").with_id("sms_only").when(StepCondition::MetadataEquals {
                key: "channel".to_string(),
                value: json!("sms"),
            }),
        ];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        assert!(results[0].success);
        assert!(results[1].success);
        assert!(results[2].is_skipped());
        assert!(results[3].is_skipped());
    }

    #[tokio::test]
    async fn test_failed_step_keeps_identity_and_duration() {
        let registry = registry();
        registry.register_fn("slow_fail", |_input, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Err(anyhow!("gave up"))
        });
        let (engine, _) = engine(registry);
        let base = ExecutionRequest::new(engine.session(), "slow_fail");
        let steps = vec![PipelineStep::new("slow_fail").with_id("attempt")];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        let failed = &results[0];
        assert!(!failed.success);
        assert!(failed.duration_ms >= 30);
        assert!(failed.error.as_deref().unwrap().contains("gave up"));
        assert_eq!(failed.metadata["user_id"], "alice");
        assert_eq!(failed.metadata["run_id"], "run_1");
        assert_eq!(failed.metadata["state"], "failed");
        assert_eq!(failed.metadata["pipeline_step"], "attempt");
        assert!(failed.metadata["execution_id"].as_str().unwrap().starts_with("exec_"));
    }

    #[tokio::test]
    async fn test_error_handler_runs_under_fail_fast() {
        let (engine, _) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "fail");
        let steps = vec![
            PipelineStep::new("fail"),
            PipelineStep::new("echo").with_id("cleanup").when(StepCondition::PreviousFailed),
            PipelineStep::new("double"),
        ];

        let results = engine.execute_pipeline(&steps, base).await.unwrap();
        assert!(!results[0].success);
        assert!(results[1].success);
        assert!(results[2].is_skipped());
    }

    #[tokio::test]
    async fn test_invalid_pipelines_rejected() {
        let (engine, emitter) = engine(registry());
        let base = ExecutionRequest::new(engine.session(), "echo");

        let forward_ref = vec![PipelineStep::new("echo").depends_on("later"), PipelineStep::new("later")];
        assert!(engine.execute_pipeline(&forward_ref, base.clone()).await.unwrap_err().is_validation());

        let duplicate = vec![PipelineStep::new("echo"), PipelineStep::new("echo")];
        assert!(engine.execute_pipeline(&duplicate, base.clone()).await.unwrap_err().is_validation());

        let mut bad_base = base;
        bad_base.run_id = "registry".to_string();
        let steps = vec![PipelineStep::new("echo")];
        assert!(engine.execute_pipeline(&steps, bad_base).await.unwrap_err().is_validation());

        assert!(emitter.is_empty());
    }
}
