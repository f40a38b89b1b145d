//! Registry of agents and their lifecycle.
//!
//! Agents are kept in registration order. Each agent sits behind its own
//! async mutex, so hooks of one agent never overlap while different agents
//! may run concurrently. The registry lock is only held for bookkeeping and
//! never across a hook call.
//!
//! Every hook invocation is isolated: an error or panic is converted to an
//! [`ExecutionError`], passed to the agent's `on_error`, recorded in its
//! statistics and logged. Nothing propagates to the caller.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tickloom_events::{Event, EventBus};
use tracing::{debug, error, info, warn};

use super::agent::{Agent, AgentContext, AgentResult};
use super::stats::AgentStats;
use crate::scheduler::AgentView;
use crate::state::StateContext;
use crate::work::{ExecutionError, Orchestrator};
use crate::{Error, Result, ResultExt, panic_message};

/// Events buffered per agent before the oldest are dropped.
pub const INBOX_CAPACITY: usize = 1024;

type SharedAgent = Arc<tokio::sync::Mutex<Box<dyn Agent>>>;
type Inbox = Arc<Mutex<VecDeque<Event>>>;

/// Where an agent is in its start/shutdown lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    Registered,
    Started,
    Stopped,
}

/// Registry entry as reported by [`AgentManager::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentSummary {
    pub name: String,
    pub priority: u32,
    pub enabled: bool,
    pub lifecycle: AgentLifecycle,
    pub pending_events: usize,
    pub stats: AgentStats,
}

/// Result of a batch lifecycle call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleReport {
    pub succeeded: Vec<String>,
    /// `(agent, error)` for every hook that failed.
    pub failed: Vec<(String, String)>,
}

impl LifecycleReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// What happened when one agent was ticked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickOutcome {
    pub agent: String,
    pub duration: Duration,
    pub error: Option<String>,
}

struct AgentSlot {
    name: String,
    agent: SharedAgent,
    priority: u32,
    enabled: bool,
    lifecycle: AgentLifecycle,
    stats: AgentStats,
    inbox: Inbox,
}

#[derive(Clone, Copy)]
enum Hook<'e> {
    Start,
    Tick,
    Event(&'e Event),
    Shutdown,
}

impl Hook<'_> {
    const fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Tick => "tick",
            Self::Event(_) => "event",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Registers agents and drives their hooks.
pub struct AgentManager {
    slots: RwLock<Vec<AgentSlot>>,
    running: AtomicBool,
    state: Arc<StateContext>,
    bus: Arc<EventBus>,
    orchestrator: Option<Arc<Orchestrator>>,
}

impl AgentManager {
    #[must_use]
    pub fn new(state: Arc<StateContext>, bus: Arc<EventBus>) -> Self {
        Self {
            slots: RwLock::new(Vec::new()),
            running: AtomicBool::new(false),
            state,
            bus,
            orchestrator: None,
        }
    }

    /// Let agents submit work through their context.
    #[must_use]
    pub fn with_orchestrator(mut self, orchestrator: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<AgentSlot>> {
        self.slots.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<AgentSlot>> {
        self.slots.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn context(&self, name: &str, tick: u64) -> AgentContext {
        let ctx = AgentContext::new(name, tick, Arc::clone(&self.state), Arc::clone(&self.bus));
        match &self.orchestrator {
            Some(orchestrator) => ctx.with_orchestrator(Arc::clone(orchestrator)),
            None => ctx,
        }
    }

    fn with_slot<T>(&self, name: &str, f: impl FnOnce(&mut AgentSlot) -> T) -> Result<T> {
        let mut slots = self.write();
        slots
            .iter_mut()
            .find(|slot| slot.name == name)
            .map(f)
            .ok_or_else(|| Error::not_found("agent", name))
    }

    /// Add an agent and subscribe it to its declared event types.
    ///
    /// An agent registered after [`AgentManager::start_all`] is started
    /// immediately.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank name.
    /// - `DuplicateName` if the name is taken.
    pub async fn register(&self, agent: Box<dyn Agent>) -> Result<()> {
        let name = agent.name().to_string();
        if name.trim().is_empty() {
            return Err(Error::validation("agent name must not be empty"));
        }
        let priority = agent.priority();
        let subscriptions: Vec<String> = agent
            .subscriptions()
            .into_iter()
            .filter(|event_type| !event_type.trim().is_empty())
            .collect();
        let inbox: Inbox = Arc::new(Mutex::new(VecDeque::new()));

        {
            let mut slots = self.write();
            if slots.iter().any(|slot| slot.name == name) {
                return Err(Error::duplicate_name(name));
            }
            slots.push(AgentSlot {
                name: name.clone(),
                agent: Arc::new(tokio::sync::Mutex::new(agent)),
                priority,
                enabled: true,
                lifecycle: AgentLifecycle::Registered,
                stats: AgentStats::default(),
                inbox: Arc::clone(&inbox),
            });
        }

        for event_type in &subscriptions {
            let inbox = Arc::clone(&inbox);
            let agent_name = name.clone();
            let subscribed = self.bus.subscribe(event_type, &subscriber_id(&name), move |event: &Event| {
                let mut queue = inbox.lock().unwrap_or_else(PoisonError::into_inner);
                if queue.len() >= INBOX_CAPACITY {
                    queue.pop_front();
                    warn!(agent = %agent_name, "Agent inbox full, dropping oldest event");
                }
                queue.push_back(event.clone());
                Ok(())
            })
            .inspect_error(|e| {
                warn!(agent = %name, event_type = %event_type, error = %e, "Subscription rejected, rolling back registration");
            });
            if let Err(e) = subscribed {
                self.bus.unsubscribe_all(&subscriber_id(&name));
                self.write().retain(|slot| slot.name != name);
                return Err(e);
            }
        }

        info!(agent = %name, priority, subscriptions = subscriptions.len(), "Agent registered");

        if self.running.load(Ordering::Acquire) {
            self.start_one(&name).await;
        }
        Ok(())
    }

    /// Shut an agent down and remove it.
    ///
    /// The shutdown hook runs before removal if the agent was started; a
    /// failing hook is logged and the agent is removed regardless.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name.
    pub async fn unregister(&self, name: &str) -> Result<()> {
        let lifecycle = self.with_slot(name, |slot| slot.lifecycle)?;
        self.bus.unsubscribe_all(&subscriber_id(name));
        if lifecycle == AgentLifecycle::Started {
            self.stop_one(name).await;
        }
        self.write().retain(|slot| slot.name != name);
        info!(agent = %name, "Agent unregistered");
        Ok(())
    }

    /// Start every registered agent that has not been started yet.
    ///
    /// Failures are logged and reported; the remaining agents still start.
    pub async fn start_all(&self) -> LifecycleReport {
        self.running.store(true, Ordering::Release);
        let pending: Vec<String> = self
            .read()
            .iter()
            .filter(|slot| slot.lifecycle == AgentLifecycle::Registered)
            .map(|slot| slot.name.clone())
            .collect();

        let mut report = LifecycleReport::default();
        for name in pending {
            match self.start_one(&name).await {
                Some(Err(e)) => report.failed.push((name, e.to_string())),
                Some(Ok(())) => report.succeeded.push(name),
                None => {}
            }
        }
        info!(
            started = report.succeeded.len(),
            failed = report.failed.len(),
            "Agents started"
        );
        report
    }

    /// Shut down every started agent, most recently registered first.
    ///
    /// Failures are logged and reported; the remaining agents still stop.
    pub async fn shutdown_all(&self) -> LifecycleReport {
        self.running.store(false, Ordering::Release);
        let started: Vec<String> = self
            .read()
            .iter()
            .rev()
            .filter(|slot| slot.lifecycle == AgentLifecycle::Started)
            .map(|slot| slot.name.clone())
            .collect();

        let mut report = LifecycleReport::default();
        for name in started {
            match self.stop_one(&name).await {
                Some(Err(e)) => report.failed.push((name, e.to_string())),
                Some(Ok(())) => report.succeeded.push(name),
                None => {}
            }
        }
        info!(
            stopped = report.succeeded.len(),
            failed = report.failed.len(),
            "Agents shut down"
        );
        report
    }

    /// Run the start hook once. `None` if the agent is gone or already started.
    async fn start_one(&self, name: &str) -> Option<AgentResult> {
        let agent = self
            .with_slot(name, |slot| {
                (slot.lifecycle == AgentLifecycle::Registered).then(|| {
                    slot.lifecycle = AgentLifecycle::Started;
                    Arc::clone(&slot.agent)
                })
            })
            .ok()
            .flatten()?;

        let result = call_hook(&agent, name, Hook::Start, &self.context(name, 0)).await;
        match &result {
            Ok(()) => debug!(agent = %name, "Agent started"),
            Err(e) => {
                error!(agent = %name, error = %e, "Agent failed to start");
                let reason = e.to_string();
                let _ = self.with_slot(name, |slot| slot.stats.record_error(reason));
            }
        }
        Some(result)
    }

    /// Run the shutdown hook once. `None` if the agent is gone or not started.
    async fn stop_one(&self, name: &str) -> Option<AgentResult> {
        let agent = self
            .with_slot(name, |slot| {
                (slot.lifecycle == AgentLifecycle::Started).then(|| {
                    slot.lifecycle = AgentLifecycle::Stopped;
                    Arc::clone(&slot.agent)
                })
            })
            .ok()
            .flatten()?;

        let result = call_hook(&agent, name, Hook::Shutdown, &self.context(name, 0)).await;
        match &result {
            Ok(()) => debug!(agent = %name, "Agent shut down"),
            Err(e) => {
                error!(agent = %name, error = %e, "Agent failed to shut down cleanly");
                let reason = e.to_string();
                let _ = self.with_slot(name, |slot| slot.stats.record_error(reason));
            }
        }
        Some(result)
    }

    /// Invoke one agent's tick hook and record its statistics.
    ///
    /// Returns `None` if the agent is unknown, disabled or not started.
    pub async fn run_tick(&self, name: &str, tick: u64) -> Option<TickOutcome> {
        let agent = self
            .with_slot(name, |slot| {
                (slot.enabled && slot.lifecycle == AgentLifecycle::Started)
                    .then(|| Arc::clone(&slot.agent))
            })
            .ok()
            .flatten()?;

        let ctx = self.context(name, tick);
        let start = Instant::now();
        let result = call_hook(&agent, name, Hook::Tick, &ctx).await;
        let duration = start.elapsed();
        let error = result.err().map(|e| e.to_string());

        if let Some(reason) = &error {
            warn!(agent = %name, tick, error = %reason, "Agent tick failed");
        }
        let recorded = error.clone();
        let _ = self.with_slot(name, |slot| slot.stats.record_tick(tick, duration, recorded));

        Some(TickOutcome {
            agent: name.to_string(),
            duration,
            error,
        })
    }

    /// Deliver buffered events to one agent. Returns how many were handled.
    pub async fn deliver_events(&self, name: &str, tick: u64) -> usize {
        let Ok(Some((agent, inbox))) = self.with_slot(name, |slot| {
            (slot.enabled && slot.lifecycle == AgentLifecycle::Started)
                .then(|| (Arc::clone(&slot.agent), Arc::clone(&slot.inbox)))
        }) else {
            return 0;
        };

        let events: Vec<Event> = inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if events.is_empty() {
            return 0;
        }

        let ctx = self.context(name, tick);
        for event in &events {
            if let Err(e) = call_hook(&agent, name, Hook::Event(event), &ctx).await {
                warn!(
                    agent = %name,
                    event_type = %event.event_type(),
                    error = %e,
                    "Agent failed to handle event"
                );
                let reason = e.to_string();
                let _ = self.with_slot(name, |slot| slot.stats.record_error(reason));
            }
        }
        events.len()
    }

    /// Deliver buffered events to every agent. Returns the total handled.
    pub async fn deliver_all_events(&self, tick: u64) -> usize {
        let mut delivered = 0;
        for name in self.names() {
            delivered += self.deliver_events(&name, tick).await;
        }
        delivered
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        self.with_slot(name, |slot| slot.enabled = enabled)?;
        info!(agent = %name, enabled, "Agent enablement changed");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name.
    pub fn set_priority(&self, name: &str, priority: u32) -> Result<()> {
        self.with_slot(name, |slot| slot.priority = priority)?;
        debug!(agent = %name, priority, "Agent priority changed");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns `NotFound` for an unknown name.
    pub fn stats(&self, name: &str) -> Result<AgentStats> {
        self.with_slot(name, |slot| slot.stats.clone())
    }

    /// Registered names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.read().iter().map(|slot| slot.name.clone()).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().iter().any(|slot| slot.name == name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Scheduler input: every agent in registration order.
    #[must_use]
    pub fn views(&self) -> Vec<AgentView> {
        self.read()
            .iter()
            .map(|slot| {
                AgentView::new(slot.name.clone(), slot.priority)
                    .with_enabled(slot.enabled && slot.lifecycle == AgentLifecycle::Started)
                    .with_stats(slot.stats.clone())
            })
            .collect()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<AgentSummary> {
        self.read()
            .iter()
            .map(|slot| AgentSummary {
                name: slot.name.clone(),
                priority: slot.priority,
                enabled: slot.enabled,
                lifecycle: slot.lifecycle,
                pending_events: slot.inbox.lock().unwrap_or_else(PoisonError::into_inner).len(),
                stats: slot.stats.clone(),
            })
            .collect()
    }
}

impl std::fmt::Debug for AgentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentManager")
            .field("agents", &self.names())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

fn subscriber_id(name: &str) -> String {
    format!("agent:{name}")
}

/// Run one hook with panic isolation, then `on_error` if it failed.
async fn call_hook(
    agent: &SharedAgent,
    name: &str,
    hook: Hook<'_>,
    ctx: &AgentContext,
) -> AgentResult {
    let mut guard = agent.lock().await;
    let outcome = {
        let call = match hook {
            Hook::Start => guard.on_start(ctx),
            Hook::Tick => guard.on_tick(ctx),
            Hook::Event(event) => guard.on_event(event, ctx),
            Hook::Shutdown => guard.on_shutdown(ctx),
        };
        AssertUnwindSafe(call).catch_unwind().await
    };

    let result = match outcome {
        Ok(result) => result,
        Err(panic) => Err(ExecutionError::new(format!(
            "{} hook panicked: {}",
            hook.label(),
            panic_message(panic.as_ref())
        ))),
    };

    if let Err(e) = &result {
        if AssertUnwindSafe(guard.on_error(e)).catch_unwind().await.is_err() {
            warn!(agent = %name, hook = hook.label(), "Agent error hook panicked");
        }
    }
    result
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::panic)]

    use async_trait::async_trait;
    use serde_json::json;
    use tickloom_core::ErrorKind;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        fail_start: bool,
        subscriptions: Vec<String>,
    }

    impl Recorder {
        fn new(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                log: Arc::clone(log),
                ..Self::default()
            }
        }

        fn record(&self, entry: &str) {
            self.log.lock().unwrap().push(format!("{}:{entry}", self.name));
        }
    }

    #[async_trait]
    impl Agent for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn subscriptions(&self) -> Vec<String> {
            self.subscriptions.clone()
        }

        async fn on_start(&mut self, _ctx: &AgentContext) -> AgentResult {
            self.record("start");
            if self.fail_start {
                return Err(ExecutionError::new("no start"));
            }
            Ok(())
        }

        async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
            self.record(&format!("tick{}", ctx.tick()));
            if ctx.tick() == 99 {
                panic!("tick 99");
            }
            Ok(())
        }

        async fn on_event(&mut self, event: &Event, _ctx: &AgentContext) -> AgentResult {
            self.record(&format!("event:{}", event.event_type()));
            Ok(())
        }

        async fn on_error(&mut self, error: &ExecutionError) {
            self.record(&format!("error:{}", error.message()));
        }

        async fn on_shutdown(&mut self, _ctx: &AgentContext) -> AgentResult {
            self.record("shutdown");
            Ok(())
        }
    }

    fn manager() -> AgentManager {
        AgentManager::new(Arc::new(StateContext::new(4)), Arc::new(EventBus::new(16)))
    }

    fn log() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let manager = manager();
        let log = log();
        manager.register(Box::new(Recorder::new("a", &log))).await.unwrap();
        let err = manager
            .register(Box::new(Recorder::new("a", &log)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateName);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn test_start_failure_does_not_block_others() {
        let manager = manager();
        let log = log();
        manager
            .register(Box::new(Recorder {
                fail_start: true,
                ..Recorder::new("bad", &log)
            }))
            .await
            .unwrap();
        manager.register(Box::new(Recorder::new("good", &log))).await.unwrap();

        let report = manager.start_all().await;
        assert_eq!(report.succeeded, vec!["good".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(manager.stats("bad").unwrap().error_count, 1);

        let entries = log.lock().unwrap().clone();
        assert!(entries.contains(&"bad:error:no start".to_string()));
        assert!(entries.contains(&"good:start".to_string()));
    }

    #[tokio::test]
    async fn test_unregister_calls_shutdown_once() {
        let manager = manager();
        let log = log();
        manager.register(Box::new(Recorder::new("a", &log))).await.unwrap();
        manager.start_all().await;

        manager.unregister("a").await.unwrap();
        assert!(!manager.contains("a"));
        assert_eq!(
            manager.unregister("a").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        manager.shutdown_all().await;

        let shutdowns = log
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.ends_with("shutdown"))
            .count();
        assert_eq!(shutdowns, 1);
    }

    #[tokio::test]
    async fn test_tick_panic_is_recorded() {
        let manager = manager();
        let log = log();
        manager.register(Box::new(Recorder::new("a", &log))).await.unwrap();
        manager.start_all().await;

        let ok = manager.run_tick("a", 1).await.unwrap();
        assert!(ok.error.is_none());
        let failed = manager.run_tick("a", 99).await.unwrap();
        assert!(failed.error.unwrap().contains("panicked"));

        let stats = manager.stats("a").unwrap();
        assert_eq!(stats.tick_count, 2);
        assert_eq!(stats.error_count, 1);
        assert!(manager.run_tick("ghost", 1).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_agent_not_ticked() {
        let manager = manager();
        let log = log();
        manager.register(Box::new(Recorder::new("a", &log))).await.unwrap();
        manager.start_all().await;
        manager.set_enabled("a", false).unwrap();

        assert!(manager.run_tick("a", 1).await.is_none());
        assert!(!manager.views()[0].enabled);
        assert!(manager.set_enabled("ghost", true).is_err());
    }

    #[tokio::test]
    async fn test_subscribed_events_are_buffered_and_delivered() {
        let bus = Arc::new(EventBus::new(16));
        let manager = AgentManager::new(Arc::new(StateContext::new(4)), Arc::clone(&bus));
        let log = log();
        manager
            .register(Box::new(Recorder {
                subscriptions: vec!["ping".to_string()],
                ..Recorder::new("a", &log)
            }))
            .await
            .unwrap();
        manager.start_all().await;

        bus.publish(Event::new("ping", "test", json!(1)));
        bus.publish(Event::new("other", "test", json!(2)));
        assert_eq!(manager.snapshot()[0].pending_events, 1);

        assert_eq!(manager.deliver_all_events(1).await, 1);
        assert!(log.lock().unwrap().contains(&"a:event:ping".to_string()));
        assert_eq!(manager.snapshot()[0].pending_events, 0);
    }

    #[tokio::test]
    async fn test_late_registration_starts_immediately() {
        let manager = manager();
        let log = log();
        manager.start_all().await;
        manager.register(Box::new(Recorder::new("late", &log))).await.unwrap();
        assert_eq!(manager.snapshot()[0].lifecycle, AgentLifecycle::Started);
    }
}
