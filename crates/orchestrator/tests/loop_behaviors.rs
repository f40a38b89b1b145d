//! Loop and Runtime Behavioral Tests - BDD Style
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>
//!
//! Covers the loop state machine, tick isolation, agent-to-agent signalling
//! and the work submitted from inside agent hooks.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::runtime::TICK_EVENT;
use orchestrator::{
    Agent, AgentContext, AgentManager, AgentResult, ExecutionError, LoopController, LoopState,
    Runtime, RuntimeConfig, Scheduler, StateContext, StopReason, StopSignal, StrategyKind,
    WorkItem, WorkStatus, work_fn,
};
use serde_json::{Value, json};
use tickloom_events::{Event, EventBus};

type TestResult = Result<(), Box<dyn std::error::Error>>;

const WAIT: Duration = Duration::from_secs(5);

fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        worker_count: 2,
        tick_interval_ms: 1,
        strategy: StrategyKind::RoundRobin,
        max_agents_per_tick: 8,
        ..RuntimeConfig::default()
    }
}

/// Counts ticks into shared state.
struct Ticker {
    name: &'static str,
}

#[async_trait]
impl Agent for Ticker {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
        let key = format!("{}.ticks", self.name);
        ctx.state()
            .modify(key, |n| json!(n.and_then(Value::as_u64).unwrap_or(0) + 1))
            .await;
        Ok(())
    }
}

/// Fails on every tick.
struct Broken {
    errors_seen: Arc<Mutex<u32>>,
}

#[async_trait]
impl Agent for Broken {
    fn name(&self) -> &str {
        "broken"
    }

    async fn on_tick(&mut self, _ctx: &AgentContext) -> AgentResult {
        Err(ExecutionError::new("sensor offline"))
    }

    async fn on_error(&mut self, _error: &ExecutionError) {
        if let Ok(mut seen) = self.errors_seen.lock() {
            *seen += 1;
        }
    }
}

// ============================================================================
// 1. STATE MACHINE
// ============================================================================

#[tokio::test]
async fn given_running_loop_when_stopped_via_handle_then_every_state_observed() -> TestResult {
    // GIVEN: a runtime with one ticking agent
    let runtime = Arc::new(Runtime::new(fast_config())?);
    runtime.register(Box::new(Ticker { name: "clock" })).await?;
    let handle = runtime.handle();
    assert_eq!(handle.state(), LoopState::Initializing);

    // WHEN: the loop runs until a programmatic stop
    let runner = {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move { runtime.run().await })
    };
    tokio::time::timeout(WAIT, handle.wait_for_state(LoopState::Running)).await?;
    tokio::time::timeout(WAIT, async {
        while handle.tick_count() < 3 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await?;
    assert!(handle.stop());

    // THEN: the loop finishes Stopped with a programmatic reason
    let summary = tokio::time::timeout(WAIT, runner).await???;
    assert_eq!(handle.state(), LoopState::Stopped);
    assert_eq!(summary.stop_reason, Some(StopReason::Programmatic));
    assert!(summary.ticks >= 3);
    assert_eq!(
        runtime.state().get("clock.ticks").await,
        Some(json!(summary.ticks))
    );
    Ok(())
}

#[tokio::test]
async fn given_finished_loop_when_run_again_then_already_started() -> TestResult {
    let runtime = Runtime::new(fast_config())?;
    runtime.run_for(1).await?;

    let second = runtime.run_for(1).await;

    assert!(second.is_err());
    Ok(())
}

#[tokio::test]
async fn given_external_stop_signal_when_triggered_first_then_loop_still_shuts_down_agents()
-> TestResult {
    let stop = StopSignal::new();
    let runtime = Runtime::with_stop_signal(fast_config(), stop.clone())?;
    runtime.register(Box::new(Ticker { name: "idle" })).await?;
    stop.trigger(StopReason::Sigterm);

    let summary = runtime.run().await?;

    assert_eq!(summary.ticks, 0);
    assert_eq!(summary.stop_reason, Some(StopReason::Sigterm));
    assert_eq!(summary.shut_down.succeeded, vec!["idle".to_string()]);
    assert_eq!(runtime.handle().state(), LoopState::Stopped);
    Ok(())
}

// ============================================================================
// 2. TICK ISOLATION
// ============================================================================

#[tokio::test]
async fn given_failing_agent_when_loop_runs_then_others_keep_ticking() -> TestResult {
    // GIVEN: one broken agent between two healthy ones
    let errors_seen = Arc::new(Mutex::new(0));
    let runtime = Runtime::new(fast_config())?;
    runtime.register(Box::new(Ticker { name: "left" })).await?;
    runtime
        .register(Box::new(Broken {
            errors_seen: Arc::clone(&errors_seen),
        }))
        .await?;
    runtime.register(Box::new(Ticker { name: "right" })).await?;

    // WHEN: five ticks run
    let summary = runtime.run_for(5).await?;

    // THEN: healthy agents ticked every time and the failures were recorded
    assert_eq!(summary.ticks, 5);
    assert_eq!(runtime.state().get("left.ticks").await, Some(json!(5)));
    assert_eq!(runtime.state().get("right.ticks").await, Some(json!(5)));

    let stats = runtime.agents().stats("broken")?;
    assert_eq!(stats.tick_count, 5);
    assert_eq!(stats.error_count, 5);
    assert_eq!(stats.last_error.as_deref(), Some("sensor offline"));
    assert_eq!(errors_seen.lock().map(|n| *n).unwrap_or(0), 5);

    let tick_events = runtime.bus().history(Some(TICK_EVENT), None);
    assert_eq!(tick_events.len(), 5);
    assert_eq!(tick_events[0].data()["failed"], json!(["broken"]));
    Ok(())
}

// ============================================================================
// 3. EVENTS BETWEEN AGENTS
// ============================================================================

struct Announcer;

#[async_trait]
impl Agent for Announcer {
    fn name(&self) -> &str {
        "announcer"
    }

    async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
        ctx.publish("report.ready", json!({ "tick": ctx.tick() }));
        Ok(())
    }
}

struct Listener {
    seen: Arc<Mutex<Vec<(u64, String)>>>,
}

#[async_trait]
impl Agent for Listener {
    fn name(&self) -> &str {
        "listener"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec!["report.ready".to_string()]
    }

    async fn on_tick(&mut self, _ctx: &AgentContext) -> AgentResult {
        Ok(())
    }

    async fn on_event(&mut self, event: &Event, _ctx: &AgentContext) -> AgentResult {
        if let Ok(mut seen) = self.seen.lock() {
            let tick = event.data()["tick"].as_u64().unwrap_or(0);
            seen.push((tick, event.source().to_string()));
        }
        Ok(())
    }
}

#[tokio::test]
async fn given_subscribed_listener_when_announcer_publishes_then_events_delivered_in_order()
-> TestResult {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let runtime = Runtime::new(fast_config())?;
    runtime.register(Box::new(Announcer)).await?;
    runtime
        .register(Box::new(Listener {
            seen: Arc::clone(&seen),
        }))
        .await?;

    runtime.run_for(3).await?;

    let seen = seen.lock().map(|seen| seen.clone()).unwrap_or_default();
    assert_eq!(
        seen,
        vec![
            (1, "announcer".to_string()),
            (2, "announcer".to_string()),
            (3, "announcer".to_string()),
        ]
    );
    Ok(())
}

// ============================================================================
// 4. WORK FROM AGENTS
// ============================================================================

struct Dispatcher;

#[async_trait]
impl Agent for Dispatcher {
    fn name(&self) -> &str {
        "dispatcher"
    }

    async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
        let item = WorkItem::new(format!("job-{}", ctx.tick()), 1, json!({ "n": ctx.tick() }));
        ctx.submit_work(
            item,
            work_fn(|payload: Value| async move {
                let n = payload["n"].as_u64().unwrap_or(0);
                Ok(json!(n * 10))
            }),
        )?;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn given_agent_submitting_work_when_runtime_drains_then_all_items_done() -> TestResult {
    // GIVEN: an agent that submits one item per tick
    let runtime = Runtime::new(fast_config())?;
    runtime.register(Box::new(Dispatcher)).await?;

    // WHEN: four ticks run and the runtime drains
    runtime.run_for(4).await?;
    let shutdown = runtime.shutdown(true).await?;

    // THEN: every item completed with its result
    assert_eq!(shutdown.loop_state, LoopState::Stopped);
    assert_eq!(shutdown.work.abandoned, 0);
    let done = runtime.orchestrator().list(Some(WorkStatus::Done));
    assert_eq!(done.len(), 4);
    let mut results: Vec<u64> = done
        .iter()
        .filter_map(|item| item.result.as_ref().and_then(Value::as_u64))
        .collect();
    results.sort_unstable();
    assert_eq!(results, vec![10, 20, 30, 40]);
    Ok(())
}

#[tokio::test]
async fn given_manager_without_orchestrator_when_agent_submits_then_tick_fails_without_stopping_loop()
-> TestResult {
    // GIVEN: a loop wired by hand with no work orchestrator
    let bus = Arc::new(EventBus::new(100));
    let state = Arc::new(StateContext::new(4));
    let manager = Arc::new(AgentManager::new(state, Arc::clone(&bus)));
    manager.register(Box::new(Dispatcher)).await?;
    let controller = LoopController::new(
        fast_config().loop_config(),
        Arc::clone(&manager),
        Scheduler::new(StrategyKind::RoundRobin),
        bus,
    );

    // WHEN: two ticks run
    let summary = controller.run_for(2).await?;

    // THEN: both submissions failed and were recorded, the loop completed
    assert_eq!(summary.ticks, 2);
    let stats = manager.stats("dispatcher")?;
    assert_eq!(stats.error_count, 2);
    assert!(stats.last_error.is_some());
    Ok(())
}
