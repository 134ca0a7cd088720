// packages/engine/src/utils/config.rs
//! Layered engine configuration
//!
//! Sources, lowest precedence first:
//! 1. Built-in defaults (`Default` impls below)
//! 2. Optional config file (path from `AGENT_ENGINE_CONFIG` or explicit)
//! 3. Environment variables, e.g. `AGENT_ENGINE__ENGINE__MAX_CONCURRENT_AGENTS=4`

use crate::utils::errors::{EngineError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides
pub const ENV_PREFIX: &str = "AGENT_ENGINE";

/// Environment variable naming an optional config file
pub const CONFIG_PATH_ENV: &str = "AGENT_ENGINE_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-engine (per-user) execution limits
    pub engine: EngineSettings,

    /// Engine factory limits and reclamation
    pub factory: FactorySettings,

    /// Event emitter buffers
    pub events: EventSettings,

    /// Logging setup
    pub observability: ObservabilityConfig,
}

/// Limits applied inside one engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Concurrency slots per engine (MAX_CONCURRENT_AGENTS)
    pub max_concurrent_agents: usize,

    /// Deadline for one execution in milliseconds (AGENT_EXECUTION_TIMEOUT)
    pub agent_execution_timeout_ms: u64,

    /// Interval between "thinking" heartbeats in milliseconds
    pub heartbeat_interval_ms: u64,

    /// Ring buffer size for execution history (MAX_HISTORY_SIZE)
    pub max_history_size: usize,

    /// Longest a request may wait for a slot; `None` waits indefinitely
    pub max_queue_wait_ms: Option<u64>,

    /// Bound on a single event delivery in milliseconds
    pub emit_timeout_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 10,
            agent_execution_timeout_ms: 30_000,
            heartbeat_interval_ms: 5_000,
            max_history_size: 100,
            max_queue_wait_ms: None,
            emit_timeout_ms: 1_000,
        }
    }
}

impl EngineSettings {
    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.agent_execution_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn max_queue_wait(&self) -> Option<Duration> {
        self.max_queue_wait_ms.map(Duration::from_millis)
    }

    pub fn emit_timeout(&self) -> Duration {
        Duration::from_millis(self.emit_timeout_ms)
    }
}

/// Factory-wide limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorySettings {
    /// Live engines a single user may hold
    pub max_engines_per_user: usize,

    /// Idle time after which the reclamation pass destroys an engine
    pub engine_timeout_secs: u64,

    /// Period of the background reclamation loop
    pub cleanup_interval_secs: u64,
}

impl Default for FactorySettings {
    fn default() -> Self {
        Self {
            max_engines_per_user: 2,
            engine_timeout_secs: 300,
            cleanup_interval_secs: 60,
        }
    }
}

impl FactorySettings {
    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Buffer sizes for the provided emitters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSettings {
    /// Capacity of the in-memory recording emitter
    pub recording_capacity: usize,

    /// Capacity of the channel emitter
    pub channel_capacity: usize,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            recording_capacity: 10_000,
            channel_capacity: 1024,
        }
    }
}

/// Tracing subscriber options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones
    pub json: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default sources
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).ok();
        Self::build(path.as_deref().map(Path::new), ENV_PREFIX)
    }

    /// Load configuration from an explicit file plus environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(Some(path.as_ref()), ENV_PREFIX)
    }

    fn build(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine unusable
    pub fn validate(&self) -> Result<()> {
        if self.engine.max_concurrent_agents == 0 {
            return Err(EngineError::validation("max_concurrent_agents must be at least 1"));
        }
        if self.engine.agent_execution_timeout_ms == 0 {
            return Err(EngineError::validation("agent_execution_timeout_ms must be positive"));
        }
        if self.engine.heartbeat_interval_ms == 0 {
            return Err(EngineError::validation("heartbeat_interval_ms must be positive"));
        }
        if self.engine.emit_timeout_ms == 0 {
            return Err(EngineError::validation("emit_timeout_ms must be positive"));
        }
        if self.engine.max_history_size == 0 {
            return Err(EngineError::validation("max_history_size must be at least 1"));
        }
        if self.factory.max_engines_per_user == 0 {
            return Err(EngineError::validation("max_engines_per_user must be at least 1"));
        }
        if self.factory.cleanup_interval_secs == 0 {
            return Err(EngineError::validation("cleanup_interval_secs must be positive"));
        }
        if self.events.recording_capacity == 0 || self.events.channel_capacity == 0 {
            return Err(EngineError::validation("event buffer capacities must be positive"));
        }
        Ok(())
    }
}
