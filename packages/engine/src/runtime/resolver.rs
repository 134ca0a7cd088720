// packages/engine/src/runtime/resolver.rs
//! Agent resolution boundary
//!
//! The engine treats an agent as an opaque, cancellable unit of work: it
//! resolves a name to an `Executable`, spawns its future, and times it. What
//! the agent does inside (LLM calls, tools) is not the engine's business.

use crate::events::notifier::ToolReporter;
use crate::runtime::context::SessionContext;
use crate::utils::ids::ExecutionId;
use anyhow::anyhow;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything an agent receives besides its input
#[derive(Clone)]
pub struct RunContext {
    pub execution_id: ExecutionId,

    /// Session the execution belongs to (read-only)
    pub session: Arc<SessionContext>,

    /// Cancelled when the deadline passes or the engine is cleaned up
    pub cancel: CancellationToken,

    /// Channel for tool and reasoning notifications
    pub tools: ToolReporter,

    /// 0 for the first attempt, incremented per retry
    pub attempt: u32,
}

/// A resolved, runnable agent
pub trait Executable: Send + Sync {
    /// Run once. The future is spawned on its own task and may be abandoned
    /// after the deadline, so it must own everything it touches.
    fn run(&self, input: Value, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<Value>>;
}

/// Resolves agent names to executables
pub trait AgentResolver: Send + Sync {
    fn resolve(&self, agent_name: &str, session: &SessionContext) -> anyhow::Result<Arc<dyn Executable>>;
}

/// Adapter turning an async closure into an `Executable`
pub struct FnExecutable<F> {
    f: F,
}

impl<F, Fut> FnExecutable<F>
where
    F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> Executable for FnExecutable<F>
where
    F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    fn run(&self, input: Value, ctx: RunContext) -> BoxFuture<'static, anyhow::Result<Value>> {
        Box::pin((self.f)(input, ctx))
    }
}

/// Concurrent name-to-executable registry
#[derive(Default)]
pub struct AgentRegistry {
    agents: DashMap<String, Arc<dyn Executable>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) an agent under `name`
    pub fn register(&self, name: impl Into<String>, executable: Arc<dyn Executable>) {
        self.agents.insert(name.into(), executable);
    }

    /// Register an async closure as an agent
    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        self.register(name, Arc::new(FnExecutable::new(f)));
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.agents.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl AgentResolver for AgentRegistry {
    fn resolve(&self, agent_name: &str, _session: &SessionContext) -> anyhow::Result<Arc<dyn Executable>> {
        self.agents
            .get(agent_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| anyhow!("no agent registered under '{}'", agent_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolution() {
        let registry = AgentRegistry::new();
        registry.register_fn("echo", |input, _ctx| async move { Ok(input) });

        let session = SessionContext::new("user", "thread", "run", "req");
        assert!(registry.resolve("echo", &session).is_ok());

        let err = registry.resolve("missing", &session).err().unwrap();
        assert!(err.to_string().contains("missing"));

        assert_eq!(registry.names(), vec!["echo".to_string()]);
        assert!(registry.unregister("echo"));
        assert!(!registry.contains("echo"));
    }
}
