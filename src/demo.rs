//! Demo agents registered by `tickloom run`.
//!
//! `heartbeat` publishes a pulse every tick. `counter` counts its own ticks
//! in shared state, tallies the pulses it receives and periodically hands
//! a summing job to the worker pool.

use std::sync::Arc;

use async_trait::async_trait;
use orchestrator::{
    Agent, AgentContext, AgentResult, Executable, ExecutionError, WorkItem, work_fn,
};
use serde_json::{Value, json};
use tickloom_events::Event;
use tracing::{debug, info};

/// Event type published by [`HeartbeatAgent`].
pub const HEARTBEAT_EVENT: &str = "heartbeat";

pub const COUNTER_KEY: &str = "counter.value";
pub const PULSES_KEY: &str = "counter.pulses";
pub const LAST_BEAT_KEY: &str = "heartbeat.last_tick";

/// Publishes a [`HEARTBEAT_EVENT`] on every tick.
#[derive(Debug, Default)]
pub struct HeartbeatAgent {
    beats: u64,
}

impl HeartbeatAgent {
    #[must_use]
    pub const fn new() -> Self {
        Self { beats: 0 }
    }
}

#[async_trait]
impl Agent for HeartbeatAgent {
    fn name(&self) -> &str {
        "heartbeat"
    }

    fn priority(&self) -> u32 {
        2
    }

    async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
        self.beats += 1;
        ctx.state().set(LAST_BEAT_KEY, json!(ctx.tick())).await;
        let report = ctx.publish(HEARTBEAT_EVENT, json!({ "tick": ctx.tick(), "beat": self.beats }));
        debug!(tick = ctx.tick(), delivered = report.delivered, "Heartbeat");
        Ok(())
    }

    async fn on_shutdown(&mut self, _ctx: &AgentContext) -> AgentResult {
        info!(beats = self.beats, "Heartbeat stopped");
        Ok(())
    }
}

/// Counts ticks and heartbeats, submitting a tally job every `submit_every`
/// ticks.
#[derive(Debug)]
pub struct CounterAgent {
    submit_every: u64,
    submitted: u64,
}

impl CounterAgent {
    /// `submit_every == 0` disables work submission.
    #[must_use]
    pub const fn new(submit_every: u64) -> Self {
        Self {
            submit_every,
            submitted: 0,
        }
    }

    fn tally_job() -> Arc<dyn Executable> {
        work_fn(|payload: Value| async move {
            let upto = payload["upto"]
                .as_u64()
                .ok_or_else(|| ExecutionError::new("payload field 'upto' must be an integer"))?;
            Ok::<_, ExecutionError>(json!({ "upto": upto, "sum": (1..=upto).sum::<u64>() }))
        })
    }
}

#[async_trait]
impl Agent for CounterAgent {
    fn name(&self) -> &str {
        "counter"
    }

    fn subscriptions(&self) -> Vec<String> {
        vec![HEARTBEAT_EVENT.to_string()]
    }

    async fn on_start(&mut self, ctx: &AgentContext) -> AgentResult {
        if !ctx.state().has(COUNTER_KEY).await {
            ctx.state().set(COUNTER_KEY, json!(0)).await;
        }
        Ok(())
    }

    async fn on_tick(&mut self, ctx: &AgentContext) -> AgentResult {
        let value = ctx
            .state()
            .modify(COUNTER_KEY, |current| {
                json!(current.and_then(Value::as_u64).unwrap_or(0) + 1)
            })
            .await;
        let count = value.as_u64().unwrap_or(0);

        if self.submit_every > 0 && count % self.submit_every == 0 {
            let item = WorkItem::new(format!("tally-{count}"), 1, json!({ "upto": count }));
            let id = ctx.submit_work(item, Self::tally_job())?;
            self.submitted += 1;
            debug!(work_id = %id, count, "Submitted tally job");
        }
        Ok(())
    }

    async fn on_event(&mut self, event: &Event, ctx: &AgentContext) -> AgentResult {
        if event.event_type() == HEARTBEAT_EVENT {
            ctx.state()
                .modify(PULSES_KEY, |current| {
                    json!(current.and_then(Value::as_u64).unwrap_or(0) + 1)
                })
                .await;
        }
        Ok(())
    }

    async fn on_shutdown(&mut self, _ctx: &AgentContext) -> AgentResult {
        info!(submitted = self.submitted, "Counter stopped");
        Ok(())
    }
}
