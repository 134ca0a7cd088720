// packages/engine/src/events/recorder.rs
//! In-memory recording emitter
//!
//! Keeps every delivered envelope in a bounded lock-free queue so tests and
//! debugging tools can inspect the exact stream an execution produced.

use crate::events::emitter::{EmitError, EventEmitter, EventEnvelope};
use crate::events::event_queue::{EventQueue, QueueStats};
use crate::utils::config::EventSettings;
use crate::utils::ids::ExecutionId;
use futures::future::BoxFuture;
use std::collections::HashMap;

/// Emitter that records envelopes in memory
pub struct RecordingEmitter {
    queue: EventQueue,
}

impl RecordingEmitter {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: EventQueue::new(capacity),
        }
    }

    /// Sized from `events.recording_capacity`
    pub fn from_settings(settings: &EventSettings) -> Self {
        Self::new(settings.recording_capacity)
    }

    /// Remove and return everything recorded so far, in delivery order
    pub fn drain(&self) -> Vec<EventEnvelope> {
        self.queue.drain()
    }

    /// Drain and group envelopes by execution, each group in delivery order
    pub fn drain_by_execution(&self) -> HashMap<ExecutionId, Vec<EventEnvelope>> {
        let mut grouped: HashMap<ExecutionId, Vec<EventEnvelope>> = HashMap::new();
        for envelope in self.drain() {
            grouped.entry(envelope.execution_id).or_default().push(envelope);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn stats(&self) -> QueueStats {
        self.queue.stats()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit(&self, envelope: EventEnvelope) -> BoxFuture<'_, Result<(), EmitError>> {
        let pushed = self.queue.push(envelope).map_err(|_| EmitError::BufferFull);
        Box::pin(async move { pushed })
    }
}
