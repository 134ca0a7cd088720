// packages/engine/src/utils/mod.rs
//! Common utilities shared by the engine
//!
//! - **errors**: Crate-wide error taxonomy and `Result` alias
//! - **config**: Layered configuration (defaults, file, environment)
//! - **ids**: ULID-backed identifiers for engines and executions

pub mod config;
pub mod errors;
pub mod ids;

pub use config::{EngineConfig, EngineSettings, EventSettings, FactorySettings, ObservabilityConfig};
pub use errors::{EngineError, Result};
pub use ids::{EngineId, ExecutionId};
