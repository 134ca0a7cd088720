// packages/engine/src/events/mod.rs
//! Lifecycle event delivery
//!
//! - **Emitter**: Event types and the `EventEmitter` boundary
//! - **Notifier**: Per-execution ordering (started first, one terminal last)
//! - **Event Queue**: Lock-free bounded queue
//! - **Recorder**: In-memory emitter built on the queue
//! - **Channel**: tokio channel bridge and a no-op emitter
//!
//! # Stream shape
//!
//! ```text
//! started ─► (thinking | tool_executing ─► tool_completed | error)* ─► completed | death
//! ```

pub mod channel;
pub mod emitter;
pub mod event_queue;
pub mod notifier;
pub mod recorder;

pub use channel::{ChannelEmitter, NullEmitter};
pub use emitter::{AgentEvent, DeathKind, EmitError, EmitterStats, EventEmitter, EventEnvelope};
pub use event_queue::{EventQueue, QueueStats};
pub use notifier::{RunIdentity, RunNotifier, ToolCall, ToolReporter};
pub use recorder::RecordingEmitter;
