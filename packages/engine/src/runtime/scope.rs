// packages/engine/src/runtime/scope.rs
//! Scoped engine handle
//!
//! Cleanup runs in `Drop`, so it happens on normal return, on error, on
//! panic unwinding, and when an awaiting future is dropped.

use crate::runtime::engine::ExecutionEngine;
use crate::runtime::factory::EngineFactory;
use std::ops::Deref;
use std::sync::Arc;
use tracing::debug;

/// Engine handle that releases its engine when dropped
pub struct UserExecutionScope {
    factory: EngineFactory,
    engine: Arc<ExecutionEngine>,
}

impl UserExecutionScope {
    pub(crate) fn new(factory: EngineFactory, engine: Arc<ExecutionEngine>) -> Self {
        Self { factory, engine }
    }

    /// Shared handle to the scoped engine; it stops accepting work once the
    /// scope ends
    pub fn engine(&self) -> Arc<ExecutionEngine> {
        Arc::clone(&self.engine)
    }
}

impl Deref for UserExecutionScope {
    type Target = ExecutionEngine;

    fn deref(&self) -> &Self::Target {
        &self.engine
    }
}

impl Drop for UserExecutionScope {
    fn drop(&mut self) {
        debug!(engine_id = %self.engine.engine_id(), "Execution scope ended");
        if !self.factory.release(self.engine.engine_id(), self.engine.user_id()) {
            // Already reclaimed or shut down; make sure the engine is closed anyway
            self.engine.mark_detached();
            self.engine.cleanup();
        }
    }
}
