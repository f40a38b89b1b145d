//! Work Queue Behavioral Tests - BDD Style
//!
//! Following BDD naming convention: given_<context>_when_<action>_then_<outcome>
//!
//! Covers submission ordering, cancellation, failure capture and the two
//! shutdown modes of the orchestrator.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use orchestrator::work::{ExecutionError, WorkStats};
use orchestrator::{
    ErrorKind, Executable, Orchestrator, OrchestratorConfig, WorkItem, WorkStatus, work_fn,
};
use serde_json::{Value, json};
use tickloom_events::{Event, EventBus};
use tokio::sync::Notify;

type TestResult = Result<(), Box<dyn std::error::Error>>;

const WAIT: Duration = Duration::from_secs(5);

fn config(workers: usize) -> OrchestratorConfig {
    OrchestratorConfig {
        worker_count: workers,
        retention_limit: None,
    }
}

/// Work that appends its payload's `name` to a shared log.
fn recording(log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Executable> {
    let log = Arc::clone(log);
    work_fn(move |payload: Value| {
        let log = Arc::clone(&log);
        async move {
            let name = payload["name"].as_str().unwrap_or_default().to_string();
            if let Ok(mut entries) = log.lock() {
                entries.push(name.clone());
            }
            Ok(json!(name))
        }
    })
}

/// Work that signals `started` and then blocks until `release` fires.
fn gated(started: &Arc<Notify>, release: &Arc<Notify>) -> Arc<dyn Executable> {
    let started = Arc::clone(started);
    let release = Arc::clone(release);
    work_fn(move |_payload: Value| {
        let started = Arc::clone(&started);
        let release = Arc::clone(&release);
        async move {
            started.notify_one();
            release.notified().await;
            Ok(json!("released"))
        }
    })
}

fn item(name: &str, priority: i32) -> WorkItem {
    WorkItem::new(name, priority, json!({ "name": name }))
}

// ============================================================================
// 1. ORDERING
// ============================================================================

#[tokio::test]
async fn given_a5_b9_c5_queued_when_single_worker_runs_then_order_is_b_a_c() -> TestResult {
    // GIVEN: three items submitted before any worker exists
    let orchestrator = Orchestrator::new(config(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    for (name, priority) in [("A", 5), ("B", 9), ("C", 5)] {
        orchestrator.submit(item(name, priority), recording(&log))?;
    }

    // WHEN: one worker drains the queue
    orchestrator.start(1)?;
    orchestrator.shutdown(true).await?;

    // THEN: higher priority first, ties in submission order
    let order = log.lock().map(|entries| entries.clone()).unwrap_or_default();
    assert_eq!(order, vec!["B", "A", "C"]);
    Ok(())
}

#[tokio::test]
async fn given_many_equal_priorities_when_executed_then_submission_order_kept() -> TestResult {
    let orchestrator = Orchestrator::new(config(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    let names: Vec<String> = (0..20).map(|i| format!("job-{i:02}")).collect();
    for name in &names {
        orchestrator.submit(item(name, 3), recording(&log))?;
    }

    orchestrator.start(1)?;
    orchestrator.shutdown(true).await?;

    let order = log.lock().map(|entries| entries.clone()).unwrap_or_default();
    assert_eq!(order, names);
    Ok(())
}

// ============================================================================
// 2. CANCELLATION
// ============================================================================

#[tokio::test]
async fn given_queued_item_when_cancelled_then_never_executed() -> TestResult {
    // GIVEN: a queued item and no running workers
    let orchestrator = Orchestrator::new(config(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    let keep = orchestrator.submit(item("keep", 1), recording(&log))?;
    let drop = orchestrator.submit(item("drop", 9), recording(&log))?;

    // WHEN: the higher priority item is cancelled before workers start
    let cancelled = orchestrator.cancel(&drop)?;
    orchestrator.start(1)?;
    orchestrator.shutdown(true).await?;

    // THEN: it stays cancelled and only the other item ran
    assert_eq!(cancelled.status, WorkStatus::Cancelled);
    assert_eq!(orchestrator.status(&drop)?.status, WorkStatus::Cancelled);
    assert_eq!(orchestrator.status(&keep)?.status, WorkStatus::Done);
    let order = log.lock().map(|entries| entries.clone()).unwrap_or_default();
    assert_eq!(order, vec!["keep"]);
    Ok(())
}

#[tokio::test]
async fn given_running_item_when_cancelled_then_not_cancellable_and_outcome_unaffected()
-> TestResult {
    // GIVEN: an item held in the running state
    let orchestrator = Orchestrator::new(config(1));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    orchestrator.start(1)?;
    let id = orchestrator.submit(item("held", 1), gated(&started, &release))?;
    tokio::time::timeout(WAIT, started.notified()).await?;
    assert_eq!(orchestrator.status(&id)?.status, WorkStatus::Running);

    // WHEN: cancel is attempted
    let err = orchestrator.cancel(&id).err();

    // THEN: it is rejected and the item still completes
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotCancellable));
    release.notify_one();
    let finished = tokio::time::timeout(WAIT, orchestrator.wait_for(&id)).await??;
    assert_eq!(finished.status, WorkStatus::Done);
    assert_eq!(finished.result, Some(json!("released")));

    // AND: a terminal item cannot be cancelled either
    let err = orchestrator.cancel(&id).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::NotCancellable));
    orchestrator.shutdown(true).await?;
    Ok(())
}

// ============================================================================
// 3. FAILURE CAPTURE
// ============================================================================

#[tokio::test]
async fn given_failing_work_when_executed_then_error_recorded_and_not_retried() -> TestResult {
    let orchestrator = Orchestrator::new(config(1));
    let attempts = Arc::new(Mutex::new(0u32));
    let counter = Arc::clone(&attempts);
    let work = work_fn(move |_payload: Value| {
        let counter = Arc::clone(&counter);
        async move {
            if let Ok(mut n) = counter.lock() {
                *n += 1;
            }
            Err(ExecutionError::new("disk full"))
        }
    });

    orchestrator.start(1)?;
    let id = orchestrator.submit(item("flaky", 1), work)?;
    let finished = tokio::time::timeout(WAIT, orchestrator.wait_for(&id)).await??;
    orchestrator.shutdown(true).await?;

    assert_eq!(finished.status, WorkStatus::Error);
    assert_eq!(finished.error.as_deref(), Some("disk full"));
    assert!(finished.result.is_none());
    assert_eq!(attempts.lock().map(|n| *n).unwrap_or_default(), 1);
    Ok(())
}

#[tokio::test]
async fn given_panicking_work_when_executed_then_item_errors_and_worker_survives() -> TestResult {
    let orchestrator = Orchestrator::new(config(1));
    let log = Arc::new(Mutex::new(Vec::new()));
    #[allow(clippy::panic)]
    let explode = work_fn(|_payload: Value| async move {
        if true {
            panic!("kaboom");
        }
        Ok(Value::Null)
    });

    orchestrator.start(1)?;
    let bad = orchestrator.submit(item("bad", 5), explode)?;
    let good = orchestrator.submit(item("good", 1), recording(&log))?;
    let bad_item = tokio::time::timeout(WAIT, orchestrator.wait_for(&bad)).await??;
    let good_item = tokio::time::timeout(WAIT, orchestrator.wait_for(&good)).await??;
    orchestrator.shutdown(true).await?;

    assert_eq!(bad_item.status, WorkStatus::Error);
    assert!(bad_item.error.unwrap_or_default().contains("kaboom"));
    assert_eq!(good_item.status, WorkStatus::Done);
    Ok(())
}

// ============================================================================
// 4. SHUTDOWN
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_queued_and_running_items_when_drain_shutdown_then_all_terminal() -> TestResult {
    // GIVEN: more items than workers, some still queued
    let orchestrator = Orchestrator::new(config(2));
    let slow = work_fn(|payload: Value| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok(payload)
    });
    orchestrator.start(2)?;
    let ids = (0..12)
        .map(|i| orchestrator.submit(item(&format!("job-{i}"), i % 3), Arc::clone(&slow)))
        .collect::<Result<Vec<_>, _>>()?;
    let cancelled = orchestrator.cancel(&ids[11]).is_ok();

    // WHEN: shutting down with drain
    let summary = orchestrator.shutdown(true).await?;

    // THEN: nothing is left queued or running
    assert_eq!(summary.abandoned, 0);
    for id in &ids {
        let status = orchestrator.status(id)?.status;
        assert!(status.is_terminal(), "{id} left in {status}");
    }
    let stats: WorkStats = orchestrator.stats();
    assert_eq!(stats.queued + stats.running, 0);
    assert_eq!(stats.done + stats.cancelled, 12);
    assert_eq!(stats.cancelled, usize::from(cancelled));
    Ok(())
}

#[tokio::test]
async fn given_queued_items_when_shutdown_without_drain_then_they_stay_queued() -> TestResult {
    // GIVEN: one in-flight item and three queued behind it
    let orchestrator = Arc::new(Orchestrator::new(config(1)));
    let started = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let log = Arc::new(Mutex::new(Vec::new()));
    orchestrator.start(1)?;
    let held = orchestrator.submit(item("held", 9), gated(&started, &release))?;
    tokio::time::timeout(WAIT, started.notified()).await?;
    let queued = (0..3)
        .map(|i| orchestrator.submit(item(&format!("q{i}"), 1), recording(&log)))
        .collect::<Result<Vec<_>, _>>()?;

    // WHEN: shutting down without drain while the first item runs
    let shutdown = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.shutdown(false).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    release.notify_one();
    let summary = tokio::time::timeout(WAIT, shutdown).await???;

    // THEN: the in-flight item finished and the rest were abandoned
    assert_eq!(summary.abandoned, 3);
    assert_eq!(orchestrator.status(&held)?.status, WorkStatus::Done);
    for id in &queued {
        assert_eq!(orchestrator.status(id)?.status, WorkStatus::Queued);
    }
    assert!(log.lock().map(|entries| entries.is_empty()).unwrap_or(false));

    // AND: new submissions are refused
    let err = orchestrator.submit(item("late", 1), recording(&log)).err();
    assert_eq!(err.map(|e| e.kind()), Some(ErrorKind::ShutdownInProgress));
    Ok(())
}

#[tokio::test]
async fn given_never_started_pool_when_drain_shutdown_then_queue_still_executes() -> TestResult {
    let orchestrator = Orchestrator::new(config(2));
    let log = Arc::new(Mutex::new(Vec::new()));
    let id = orchestrator.submit(item("pending", 1), recording(&log))?;

    orchestrator.shutdown(true).await?;

    assert_eq!(orchestrator.status(&id)?.status, WorkStatus::Done);
    Ok(())
}

// ============================================================================
// 5. LIFECYCLE EVENTS
// ============================================================================

#[tokio::test]
async fn given_event_bus_when_work_completes_then_lifecycle_events_published() -> TestResult {
    let bus = Arc::new(EventBus::new(100));
    let orchestrator = Orchestrator::with_event_bus(config(1), Arc::clone(&bus));
    let log = Arc::new(Mutex::new(Vec::new()));

    let cancelled = orchestrator.submit(item("skip", 1), recording(&log))?;
    orchestrator.cancel(&cancelled)?;
    orchestrator.start(1)?;
    let id = orchestrator.submit(item("run", 1), recording(&log))?;
    tokio::time::timeout(WAIT, orchestrator.wait_for(&id)).await??;
    orchestrator.shutdown(true).await?;

    let types: Vec<String> = bus
        .history(None, Some("orchestrator"))
        .iter()
        .filter(|event| event.correlation_id() == Some(id.as_str()))
        .map(|event| event.event_type().to_string())
        .collect();
    assert_eq!(types, vec!["work.queued", "work.started", "work.completed"]);
    assert_eq!(bus.history(Some("work.cancelled"), None).len(), 1);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn given_busy_workers_when_submitting_then_queued_observed_before_started() -> TestResult {
    // GIVEN: a wildcard observer recording every work event in delivery order
    let bus = Arc::new(EventBus::new(16));
    let seen: Arc<Mutex<Vec<(String, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.subscribe("*", "observer", move |event: &Event| {
        if let (Ok(mut seen), Some(id)) = (sink.lock(), event.correlation_id()) {
            seen.push((event.event_type().to_string(), id.to_string()));
        }
        Ok(())
    })?;
    let orchestrator = Orchestrator::with_event_bus(config(4), Arc::clone(&bus));
    orchestrator.start(4)?;

    // WHEN: many items are submitted while idle workers race to claim them
    let echo = work_fn(|payload| async move { Ok(payload) });
    for n in 0..2000 {
        orchestrator.submit(item(&format!("job-{n}"), n % 3), Arc::clone(&echo))?;
    }
    orchestrator.shutdown(true).await?;

    // THEN: no item was reported started before it was reported queued
    let seen = seen.lock().map_err(|e| e.to_string())?;
    let mut queued_at = HashMap::new();
    let mut started = 0;
    for (position, (event_type, id)) in seen.iter().enumerate() {
        match event_type.as_str() {
            "work.queued" => {
                queued_at.insert(id.clone(), position);
            }
            "work.started" => {
                started += 1;
                let queued = queued_at.get(id).ok_or(format!("{id} started before queued"))?;
                assert!(*queued < position);
            }
            _ => {}
        }
    }
    assert_eq!(started, 2000);
    assert_eq!(queued_at.len(), 2000);
    Ok(())
}
