// packages/engine/src/lib.rs
//! Per-User Isolated Agent Execution Engine
//!
//! Runs named agents on behalf of many concurrent users while keeping each
//! user's execution state, statistics, and lifecycle events separate.
//!
//! # Architecture
//!
//! The library is structured into several key modules:
//!
//! - **runtime**: Sessions, engines, the engine factory, pipelines
//! - **events**: Lifecycle events and emitter implementations
//! - **observability**: Tracing subscriber and Prometheus recorder setup
//! - **utils**: Configuration, errors, identifiers
//!
//! # Usage
//!
//! ```no_run
//! use agent_exec_engine::{
//!     AgentRegistry, DisabledFallback, EngineConfig, EngineFactory, ExecutionRequest,
//!     NullEmitter, SessionContext,
//! };
//! use std::sync::Arc;
//!
//! # async fn demo() -> agent_exec_engine::Result<()> {
//! let registry = AgentRegistry::new();
//! registry.register_fn("echo", |input, _ctx| async move { Ok(input) });
//!
//! let factory = EngineFactory::new(
//!     EngineConfig::load()?,
//!     Arc::new(registry),
//!     Arc::new(NullEmitter),
//!     Arc::new(DisabledFallback),
//! )?;
//!
//! let session = SessionContext::new("user_1", "thread_1", "run_1", "req_1");
//! let result = factory
//!     .with_user_execution_scope(session.clone(), |engine| async move {
//!         engine.execute_agent(ExecutionRequest::new(&session, "echo")).await
//!     })
//!     .await?;
//! assert!(result.success);
//! # Ok(())
//! # }
//! ```

// Public module exports
pub mod events;
pub mod observability;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use events::{
    AgentEvent, ChannelEmitter, DeathKind, EventEmitter, EventEnvelope, NullEmitter, RecordingEmitter,
};
pub use runtime::{
    AgentRegistry, AgentResolver, DisabledFallback, EngineFactory, ExecutionEngine, ExecutionRequest,
    ExecutionResult, ExecutionStats, FallbackManager, PipelineStep, SessionContext, StaticFallback,
    UserExecutionScope,
};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
