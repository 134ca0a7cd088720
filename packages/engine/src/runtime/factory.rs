// packages/engine/src/runtime/factory.rs
//! Engine factory: the only way to obtain an `ExecutionEngine`
//!
//! # Architecture
//!
//! ```text
//! EngineFactory
//! ├─ engines: DashMap<user_id, Vec<Arc<ExecutionEngine>>>   (per-key locking)
//! ├─ metrics: created / cleaned / errors (atomics)
//! └─ reclamation loop (lazy, one per factory)
//!        every cleanup_interval: drop idle or inactive engines
//! ```
//!
//! The registry is the only state shared between users. Each engine's own
//! state never leaves the engine.

use crate::events::emitter::EventEmitter;
use crate::runtime::context::SessionContext;
use crate::runtime::engine::{EngineCollaborators, ExecutionEngine};
use crate::runtime::fallback::FallbackManager;
use crate::runtime::resolver::AgentResolver;
use crate::runtime::scope::UserExecutionScope;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::EngineId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Factory counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryMetrics {
    pub total_created: u64,
    pub total_cleaned: u64,
    pub active_count: u64,
    pub creation_errors: u64,
    pub cleanup_errors: u64,
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    cleaned: AtomicU64,
    creation_errors: AtomicU64,
    cleanup_errors: AtomicU64,
}

struct FactoryInner {
    config: EngineConfig,
    collaborators: EngineCollaborators,
    engines: DashMap<String, Vec<Arc<ExecutionEngine>>>,
    counters: Counters,
    reclaimer: Mutex<Option<JoinHandle<()>>>,
    shutdown_token: CancellationToken,
    shutting_down: AtomicBool,
}

/// Creates, tracks, and reclaims per-user engines
#[derive(Clone)]
pub struct EngineFactory {
    inner: Arc<FactoryInner>,
}

impl EngineFactory {
    /// Build a factory; rejects invalid configuration up front
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn AgentResolver>,
        emitter: Arc<dyn EventEmitter>,
        fallback: Arc<dyn FallbackManager>,
    ) -> Result<Self> {
        config.validate()?;

        info!(
            max_engines_per_user = config.factory.max_engines_per_user,
            max_concurrent_agents = config.engine.max_concurrent_agents,
            "Initializing engine factory"
        );

        Ok(Self {
            inner: Arc::new(FactoryInner {
                config,
                collaborators: EngineCollaborators {
                    resolver,
                    emitter,
                    fallback,
                },
                engines: DashMap::new(),
                counters: Counters::default(),
                reclaimer: Mutex::new(None),
                shutdown_token: CancellationToken::new(),
                shutting_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Create an engine for `session`'s user, enforcing the per-user ceiling.
    ///
    /// Must be called from within a Tokio runtime; the first successful call
    /// starts the reclamation loop.
    pub fn create_for_user(&self, session: SessionContext) -> Result<Arc<ExecutionEngine>> {
        match self.try_create(session) {
            Ok(engine) => {
                self.inner.counters.created.fetch_add(1, Ordering::Relaxed);
                self.publish_active_gauge();
                self.ensure_reclaimer();
                Ok(engine)
            }
            Err(e) => {
                self.inner.counters.creation_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Engine creation rejected");
                Err(e)
            }
        }
    }

    fn try_create(&self, session: SessionContext) -> Result<Arc<ExecutionEngine>> {
        if self.is_shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        session.validate()?;

        let limit = self.inner.config.factory.max_engines_per_user;
        let user_id = session.user_id().to_string();

        // The entry guard holds the shard lock, so check-then-insert is atomic per user
        let mut entry = self.inner.engines.entry(user_id.clone()).or_default();
        // Shutdown flags before sweeping and the sweep needs this shard, so a
        // create that passes this check is always seen by the sweep
        if self.is_shutting_down() {
            return Err(EngineError::ShutdownInProgress);
        }
        entry.retain(|engine| engine.is_active());

        if entry.len() >= limit {
            return Err(EngineError::ResourceExceeded(format!(
                "user '{}' already holds {} engines (limit {})",
                user_id,
                entry.len(),
                limit
            )));
        }

        let engine = Arc::new(ExecutionEngine::new(
            session,
            self.inner.config.engine.clone(),
            self.inner.collaborators.clone(),
        ));
        entry.push(Arc::clone(&engine));

        info!(
            engine_id = %engine.engine_id(),
            user_id = %user_id,
            user_engines = entry.len(),
            "Engine created"
        );
        Ok(engine)
    }

    /// Acquire an engine that is cleaned up when the returned guard drops
    pub fn scope(&self, session: SessionContext) -> Result<UserExecutionScope> {
        let engine = self.create_for_user(session)?;
        Ok(UserExecutionScope::new(self.clone(), engine))
    }

    /// Run `f` with a fresh engine, cleaning it up however `f` ends
    pub async fn with_user_execution_scope<F, Fut, T>(&self, session: SessionContext, f: F) -> Result<T>
    where
        F: FnOnce(Arc<ExecutionEngine>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let scope = self.scope(session)?;
        let outcome = f(scope.engine()).await;
        drop(scope);
        outcome
    }

    /// Live engines currently held by `user_id`
    pub fn engines_for_user(&self, user_id: &str) -> Vec<Arc<ExecutionEngine>> {
        self.inner
            .engines
            .get(user_id)
            .map(|engines| engines.iter().filter(|e| e.is_active()).cloned().collect())
            .unwrap_or_default()
    }

    /// Clean up and deregister one engine
    pub fn release(&self, engine_id: EngineId, user_id: &str) -> bool {
        let removed = match self.inner.engines.entry(user_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let engines = occupied.get_mut();
                let position = engines.iter().position(|e| e.engine_id() == engine_id);
                let removed = position.map(|i| engines.remove(i));
                if engines.is_empty() {
                    occupied.remove();
                }
                removed
            }
            Entry::Vacant(_) => None,
        };

        match removed {
            Some(engine) => {
                self.destroy(&engine);
                self.publish_active_gauge();
                true
            }
            None => false,
        }
    }

    /// Clean up every engine of one user
    pub fn cleanup_user(&self, user_id: &str) -> usize {
        let engines = self
            .inner
            .engines
            .remove(user_id)
            .map(|(_, engines)| engines)
            .unwrap_or_default();

        for engine in &engines {
            self.destroy(engine);
        }
        self.publish_active_gauge();
        engines.len()
    }

    /// One reclamation pass: destroy engines idle past the timeout or
    /// already inactive. Returns how many were reclaimed.
    pub fn reclaim(&self) -> usize {
        let timeout = self.inner.config.factory.engine_timeout();
        let mut reclaimed = Vec::new();

        self.inner.engines.retain(|user_id, engines| {
            engines.retain(|engine| {
                // Piggyback liveness checks on the pass
                engine.sweep_silent();

                let idle = engine.idle_for();
                let expired = !engine.is_active() || idle > timeout;
                if expired {
                    debug!(
                        engine_id = %engine.engine_id(),
                        user_id = %user_id,
                        idle_secs = idle.as_secs(),
                        "Reclaiming engine"
                    );
                    reclaimed.push(Arc::clone(engine));
                }
                !expired
            });
            !engines.is_empty()
        });

        for engine in &reclaimed {
            self.destroy(engine);
        }

        if !reclaimed.is_empty() {
            info!(reclaimed = reclaimed.len(), "Reclamation pass finished");
        }
        self.publish_active_gauge();
        reclaimed.len()
    }

    /// Stop reclamation and force-clean every engine. Idempotent.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("Engine factory already shut down");
            return;
        }

        info!("Shutting down engine factory");
        self.inner.shutdown_token.cancel();

        let handle = self.inner.reclaimer.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Reclamation loop ended abnormally");
                }
            }
        }

        let users: Vec<String> = self.inner.engines.iter().map(|e| e.key().clone()).collect();
        let mut cleaned = 0;
        for user_id in users {
            cleaned += self.cleanup_user(&user_id);
        }

        info!(engines_cleaned = cleaned, "Engine factory shut down");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> FactoryMetrics {
        let counters = &self.inner.counters;
        FactoryMetrics {
            total_created: counters.created.load(Ordering::Relaxed),
            total_cleaned: counters.cleaned.load(Ordering::Relaxed),
            active_count: self.active_count() as u64,
            creation_errors: counters.creation_errors.load(Ordering::Relaxed),
            cleanup_errors: counters.cleanup_errors.load(Ordering::Relaxed),
        }
    }

    fn active_count(&self) -> usize {
        self.inner.engines.iter().map(|e| e.value().len()).sum()
    }

    /// Whether the background reclamation loop is running
    pub fn reclaimer_running(&self) -> bool {
        self.inner
            .reclaimer
            .lock()
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    fn destroy(&self, engine: &ExecutionEngine) {
        engine.mark_detached();
        match catch_unwind(AssertUnwindSafe(|| engine.cleanup())) {
            Ok(()) => {
                self.inner.counters.cleaned.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.inner.counters.cleanup_errors.fetch_add(1, Ordering::Relaxed);
                error!(engine_id = %engine.engine_id(), "Engine cleanup panicked");
            }
        }
    }

    fn publish_active_gauge(&self) {
        metrics::gauge!("agent_engine_active_engines").set(self.active_count() as f64);
    }

    /// Start the shared reclamation loop if it is not running yet
    fn ensure_reclaimer(&self) {
        let mut slot = self.inner.reclaimer.lock();
        if slot.as_ref().map_or(false, |handle| !handle.is_finished()) {
            return;
        }

        let weak: Weak<FactoryInner> = Arc::downgrade(&self.inner);
        let token = self.inner.shutdown_token.clone();
        let period = self.inner.config.factory.cleanup_interval();

        debug!(interval_secs = period.as_secs(), "Starting engine reclamation loop");
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick fires immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        let Some(inner) = weak.upgrade() else { break };
                        EngineFactory { inner }.reclaim();
                    }
                }
            }
            debug!("Engine reclamation loop stopped");
        }));
    }
}

impl Drop for FactoryInner {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}
