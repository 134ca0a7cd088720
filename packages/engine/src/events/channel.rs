// packages/engine/src/events/channel.rs
//! Channel-backed and no-op emitters
//!
//! `ChannelEmitter` bridges the engine to whatever transport drains the
//! receiver. It never waits for capacity: a slow consumer loses events
//! instead of stalling executions.

use crate::events::emitter::{EmitError, EventEmitter, EventEnvelope};
use crate::utils::config::EventSettings;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Emitter forwarding envelopes into a bounded tokio channel
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: mpsc::Sender<EventEnvelope>,
}

impl ChannelEmitter {
    /// Create an emitter and the receiver the transport should drain
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EventEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Sized from `events.channel_capacity`
    pub fn from_settings(settings: &EventSettings) -> (Self, mpsc::Receiver<EventEnvelope>) {
        Self::new(settings.channel_capacity)
    }

    pub fn from_sender(tx: mpsc::Sender<EventEnvelope>) -> Self {
        Self { tx }
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, envelope: EventEnvelope) -> BoxFuture<'_, Result<(), EmitError>> {
        let sent = self.tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => EmitError::BufferFull,
            TrySendError::Closed(_) => EmitError::ChannelClosed,
        });
        Box::pin(async move { sent })
    }
}

/// Emitter that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEmitter;

impl EventEmitter for NullEmitter {
    fn emit(&self, _envelope: EventEnvelope) -> BoxFuture<'_, Result<(), EmitError>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::AgentEvent;
    use crate::utils::ids::ExecutionId;
    use chrono::Utc;

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            execution_id: ExecutionId::new(),
            sequence: 0,
            user_id: "user".to_string(),
            thread_id: "thread".to_string(),
            run_id: "run".to_string(),
            agent_name: "agent".to_string(),
            timestamp: Utc::now(),
            event: AgentEvent::Started,
        }
    }

    #[tokio::test]
    async fn test_forwards_to_receiver() {
        let (emitter, mut rx) = ChannelEmitter::new(4);
        emitter.emit(envelope()).await.unwrap();
        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, AgentEvent::Started);
    }

    #[tokio::test]
    async fn test_full_and_closed() {
        let (emitter, rx) = ChannelEmitter::new(1);
        emitter.emit(envelope()).await.unwrap();
        assert_eq!(emitter.emit(envelope()).await, Err(EmitError::BufferFull));

        drop(rx);
        assert_eq!(emitter.emit(envelope()).await, Err(EmitError::ChannelClosed));
    }

    #[test]
    fn test_sized_from_settings() {
        let settings = EventSettings {
            channel_capacity: 7,
            ..EventSettings::default()
        };
        let (emitter, _rx) = ChannelEmitter::from_settings(&settings);
        assert_eq!(emitter.tx.max_capacity(), 7);
    }

    #[tokio::test]
    async fn test_null_emitter() {
        assert!(NullEmitter.emit(envelope()).await.is_ok());
    }
}
