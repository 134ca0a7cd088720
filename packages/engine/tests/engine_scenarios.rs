// packages/engine/tests/engine_scenarios.rs
//! End-to-end behaviour through the public factory API

use agent_exec_engine::runtime::ExecutionState;
use agent_exec_engine::{
    AgentEvent, AgentRegistry, DeathKind, DisabledFallback, EngineConfig, EngineError, EngineFactory,
    EventEnvelope, ExecutionRequest, PipelineStep, RecordingEmitter, SessionContext, StaticFallback,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    factory: EngineFactory,
    events: Arc<RecordingEmitter>,
    peak: Arc<AtomicUsize>,
}

fn harness(config: EngineConfig) -> Harness {
    let registry = AgentRegistry::new();
    let peak = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));

    registry.register_fn("echo", |input, _ctx| async move { Ok(input) });
    registry.register_fn("slow", |_input, _ctx| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(json!({"done": true}))
    });
    registry.register_fn("sleeper", |_input, _ctx| async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok(json!(null))
    });
    registry.register_fn("broken", |_input, _ctx| async move {
        Err(anyhow::anyhow!("upstream model refused"))
    });
    {
        let peak = Arc::clone(&peak);
        let running = Arc::clone(&running);
        registry.register_fn("counted", move |_input, _ctx| {
            let peak = Arc::clone(&peak);
            let running = Arc::clone(&running);
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(40)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(now))
            }
        });
    }

    let events = Arc::new(RecordingEmitter::new(10_000));
    let factory = EngineFactory::new(
        config,
        Arc::new(registry),
        events.clone(),
        Arc::new(DisabledFallback),
    )
    .unwrap();

    Harness { factory, events, peak }
}

fn session(user: &str) -> SessionContext {
    SessionContext::new(user, format!("thread_{}", user), format!("run_{}", user), "req_1")
}

fn count(events: &[EventEnvelope], name: &str) -> usize {
    events.iter().filter(|e| e.event.name() == name).count()
}

#[tokio::test]
async fn five_users_run_concurrently_without_crosstalk() {
    let h = harness(EngineConfig::default());
    let users: Vec<String> = (0..5).map(|i| format!("user_{}", i)).collect();

    let runs = users.iter().map(|user| {
        let factory = h.factory.clone();
        let session = session(user);
        async move {
            factory
                .with_user_execution_scope(session.clone(), |engine| async move {
                    engine.execute_agent(ExecutionRequest::new(&session, "slow")).await
                })
                .await
        }
    });
    let results = futures::future::join_all(runs).await;

    for (user, result) in users.iter().zip(results) {
        let result = result.unwrap();
        assert!(result.success);
        assert_eq!(result.metadata["user_id"], json!(user));
    }

    let events = h.events.drain();
    assert_eq!(count(&events, "started"), 5);
    assert_eq!(count(&events, "completed"), 5);
    let owners: HashSet<&str> = events.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(owners.len(), 5);
    assert_eq!(h.factory.metrics().active_count, 0);
}

#[tokio::test]
async fn overrunning_agent_times_out() {
    let h = harness(EngineConfig::default());
    let s = session("alice");
    let engine = h.factory.create_for_user(s.clone()).unwrap();

    let result = engine
        .execute_agent(ExecutionRequest::new(&s, "sleeper").with_timeout(Duration::from_millis(100)))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.timed_out());
    assert_eq!(result.duration_ms, 100);
    assert_eq!(result.metadata["state"], json!(ExecutionState::TimedOut.as_str()));

    let events = h.events.drain();
    assert_eq!(events.first().unwrap().event, AgentEvent::Started);
    match &events.last().unwrap().event {
        AgentEvent::Death { kind, .. } => assert_eq!(*kind, DeathKind::Timeout),
        other => panic!("expected death event, got {:?}", other),
    }

    let stats = engine.get_execution_stats();
    assert_eq!(stats.total_executions, 1);
    assert_eq!(stats.timeout_executions, 1);
    assert_eq!(stats.concurrent_executions, 0);
}

#[tokio::test]
async fn third_engine_for_same_user_is_refused() {
    let h = harness(EngineConfig::default());
    h.factory.create_for_user(session("alice")).unwrap();
    h.factory.create_for_user(session("alice")).unwrap();

    let err = h.factory.create_for_user(session("alice")).unwrap_err();
    assert!(matches!(err, EngineError::ResourceExceeded(_)));
    assert_eq!(h.factory.metrics().creation_errors, 1);
}

#[tokio::test]
async fn statistics_stay_per_user() {
    let h = harness(EngineConfig::default());
    let (a, b) = (session("alice"), session("bob"));
    let engine_a = h.factory.create_for_user(a.clone()).unwrap();
    let engine_b = h.factory.create_for_user(b.clone()).unwrap();

    for _ in 0..3 {
        engine_a.execute_agent(ExecutionRequest::new(&a, "echo")).await.unwrap();
    }
    let err = engine_b
        .execute_agent(ExecutionRequest::new(&b, "broken"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AgentExecution { .. }));

    let stats_a = engine_a.get_execution_stats();
    let stats_b = engine_b.get_execution_stats();
    assert_eq!(stats_a.total_executions, 3);
    assert_eq!(stats_a.failed_executions, 0);
    assert_eq!(stats_b.total_executions, 1);
    assert_eq!(stats_b.failed_executions, 1);
    assert_eq!(engine_a.history().len(), 3);
    assert_eq!(engine_b.history().len(), 1);

    // An engine refuses requests belonging to someone else
    let err = engine_a
        .execute_agent(ExecutionRequest::new(&b, "echo"))
        .await
        .unwrap_err();
    assert!(err.is_validation());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_never_exceeds_slot_count() {
    let mut config = EngineConfig::default();
    config.engine.max_concurrent_agents = 3;
    let h = harness(config);
    let s = session("alice");
    let engine = h.factory.create_for_user(s.clone()).unwrap();

    let tasks: Vec<_> = (0..12)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let req = ExecutionRequest::new(&s, "counted");
            tokio::spawn(async move { engine.execute_agent(req).await })
        })
        .collect();

    for task in tasks {
        assert!(task.await.unwrap().unwrap().success);
    }

    let peak = h.peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak concurrency {} exceeded limit", peak);
    assert!(peak >= 1);
    assert_eq!(engine.get_execution_stats().total_executions, 12);
    assert_eq!(engine.available_slots(), 3);
}

#[tokio::test]
async fn every_execution_has_one_terminal_event_last() {
    let h = harness(EngineConfig::default());
    let s = session("alice");
    let engine = h.factory.create_for_user(s.clone()).unwrap();

    engine.execute_agent(ExecutionRequest::new(&s, "echo")).await.unwrap();
    let _ = engine.execute_agent(ExecutionRequest::new(&s, "broken")).await;
    engine
        .execute_agent(ExecutionRequest::new(&s, "sleeper").with_timeout(Duration::from_millis(30)))
        .await
        .unwrap();

    let by_execution = h.events.drain_by_execution();
    assert_eq!(by_execution.len(), 3);
    for events in by_execution.values() {
        assert_eq!(events.first().unwrap().event, AgentEvent::Started);
        let terminals = events.iter().filter(|e| e.event.is_terminal()).count();
        assert_eq!(terminals, 1);
        let (first, last) = (events.first().unwrap(), events.last().unwrap());
        assert!(last.event.is_terminal());
        assert!(last.timestamp >= first.timestamp);
    }
}

#[tokio::test]
async fn cleanup_is_idempotent_and_final() {
    let h = harness(EngineConfig::default());
    let s = session("alice");
    let engine = h.factory.create_for_user(s.clone()).unwrap();
    engine.execute_agent(ExecutionRequest::new(&s, "echo")).await.unwrap();

    engine.cleanup();
    engine.cleanup();

    assert!(!engine.is_active());
    assert!(engine.history().is_empty());
    assert_eq!(engine.get_execution_stats().total_executions, 0);
    assert!(matches!(
        engine.execute_agent(ExecutionRequest::new(&s, "echo")).await,
        Err(EngineError::ShutdownInProgress)
    ));
}

#[tokio::test]
async fn malformed_requests_are_rejected_before_execution() {
    let h = harness(EngineConfig::default());
    let s = session("alice");
    let engine = h.factory.create_for_user(s.clone()).unwrap();

    let mut req = ExecutionRequest::new(&s, "echo");
    req.run_id = "Registry".to_string();
    assert!(engine.execute_agent(req).await.unwrap_err().is_validation());

    let req = ExecutionRequest::new(&s, "");
    assert!(engine.execute_agent(req).await.unwrap_err().is_validation());

    assert!(h.events.is_empty());
    assert_eq!(engine.get_execution_stats().total_executions, 0);
}

#[tokio::test]
async fn fallback_turns_failure_into_degraded_result() {
    let registry = AgentRegistry::new();
    registry.register_fn("broken", |_input, _ctx| async move { Err(anyhow::anyhow!("boom")) });
    let factory = EngineFactory::new(
        EngineConfig::default(),
        Arc::new(registry),
        Arc::new(RecordingEmitter::new(64)),
        Arc::new(StaticFallback::new(json!({"message": "unavailable"}))),
    )
    .unwrap();

    let s = session("alice");
    let engine = factory.create_for_user(s.clone()).unwrap();
    let result = engine
        .execute_agent(ExecutionRequest::new(&s, "broken"))
        .await
        .unwrap();

    assert!(result.success);
    assert!(result.flag("degraded"));
    assert_eq!(result.data, Some(json!({"message": "unavailable"})));
    assert_eq!(engine.get_execution_stats().failed_executions, 1);
}

#[tokio::test]
async fn pipeline_runs_through_the_factory_scope() {
    let h = harness(EngineConfig::default());
    let s = session("alice");

    let results = h
        .factory
        .with_user_execution_scope(s.clone(), |engine| async move {
            let steps = vec![
                PipelineStep::new("echo").with_id("greet"),
                PipelineStep::new("broken"),
                PipelineStep::new("echo").with_id("reply"),
            ];
            engine
                .execute_pipeline(&steps, ExecutionRequest::new(&s, "echo").with_input(json!("hi")))
                .await
        })
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert!(results[0].success);
    assert!(!results[1].success);
    assert!(results[2].is_skipped());
}
