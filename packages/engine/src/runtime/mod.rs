// packages/engine/src/runtime/mod.rs
//! Per-user agent execution runtime
//!
//! This module provides the isolated execution environment, including:
//!
//! - **Context**: Session identity and execution requests
//! - **Engine**: Bounded, timed, observable agent execution for one user
//! - **Factory**: Engine creation with per-user ceilings and reclamation
//! - **Scope**: Engine handle with guaranteed cleanup
//! - **Pipeline**: Multi-step sequential, parallel, and conditional runs
//! - **Tracker**: Execution state machine and heartbeats
//! - **Resolver**: Agent lookup and the `Executable` boundary
//! - **Fallback**: Degraded results for failed executions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     EngineFactory                       │
//! │        user_id ─► [ExecutionEngine; ≤ per-user max]     │
//! │                          │                              │
//! │   ┌──────────────────────┴──────────────────────┐       │
//! │   │ ExecutionEngine (one session)               │       │
//! │   │   semaphore ─► active runs ─► history/stats │       │
//! │   │        │                                    │       │
//! │   │   agent task ── deadline / cancel / beat    │       │
//! │   │        │                                    │       │
//! │   │   RunNotifier ─► EventEmitter               │       │
//! │   └─────────────────────────────────────────────┘       │
//! │                  reclamation loop                       │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! No mutable state is shared between engines except the factory registry.

pub mod context;
pub mod engine;
pub mod factory;
pub mod fallback;
pub mod history;
pub mod pipeline;
pub mod resolver;
pub mod result;
pub mod scope;
pub mod tracker;

// Re-export commonly used types
pub use context::{is_placeholder_run_id, ExecutionRequest, SessionContext};
pub use engine::{EngineCollaborators, EngineSnapshot, ExecutionEngine, IsolationStatus};
pub use factory::{EngineFactory, FactoryMetrics};
pub use fallback::{DisabledFallback, FailureContext, FallbackManager, StaticFallback};
pub use history::{ExecutionRecord, ExecutionStats};
pub use pipeline::{ExecutionStrategy, PipelineOptions, PipelineStep, StepCondition};
pub use resolver::{AgentRegistry, AgentResolver, Executable, FnExecutable, RunContext};
pub use result::ExecutionResult;
pub use scope::UserExecutionScope;
pub use tracker::{ExecutionState, ExecutionTracker};
