use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use serde_json::json;
use stagehand_core::{Event, EventPayload, Priority, StagehandError, StagehandResult};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Source tag of trigger events.
pub const TRIGGER_SOURCE: &str = "scheduler";
/// Event type of trigger events.
pub const TRIGGER_EVENT_TYPE: &str = "scheduled_task";

/// A cron job that turns into an event each time it fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Unique name, copied into the event's `trigger` field.
    pub name: String,
    /// 7-field cron: sec min hour day-of-month month day-of-week year.
    pub cron: String,
    /// Message text of the generated event.
    pub message: String,
    /// Priority of the generated event. Defaults to low.
    #[serde(default = "default_priority")]
    pub priority: Priority,
    /// Speech flag for the generated event.
    #[serde(default)]
    pub speak: Option<bool>,
    /// Disabled triggers are parsed but never fire.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> Priority {
    Priority::Low
}

fn default_enabled() -> bool {
    true
}

impl TriggerConfig {
    /// Build the event this trigger submits.
    pub fn materialize(&self) -> Event {
        let mut payload = EventPayload::message(&self.message);
        payload.speak = self.speak;
        payload.extra.insert("trigger".into(), json!(self.name));
        Event::new(TRIGGER_SOURCE, TRIGGER_EVENT_TYPE, self.priority, payload)
    }
}

/// Parse a cron expression into a [`cron::Schedule`].
pub fn parse_cron(expr: &str) -> StagehandResult<Schedule> {
    Schedule::from_str(expr)
        .map_err(|e| StagehandError::Config(format!("Invalid cron expression '{expr}': {e}")))
}

/// First fire time of `expr` strictly after `after`.
pub fn next_fire_time(expr: &str, after: DateTime<Utc>) -> StagehandResult<DateTime<Utc>> {
    parse_cron(expr)?.after(&after).next().ok_or_else(|| {
        StagehandError::Config(format!("Cron expression '{expr}' has no upcoming fire times"))
    })
}

/// Fires [`TriggerConfig`]s on their cron schedules.
#[derive(Debug)]
pub struct TriggerScheduler {
    triggers: Vec<TriggerConfig>,
}

impl TriggerScheduler {
    /// Scheduler over `triggers`. Nothing fires until [`start`](Self::start).
    pub fn new(triggers: Vec<TriggerConfig>) -> Self {
        Self { triggers }
    }

    /// Triggers that will fire.
    pub fn enabled(&self) -> Vec<&TriggerConfig> {
        self.triggers.iter().filter(|t| t.enabled).collect()
    }

    /// Configured triggers, disabled ones included.
    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    /// No triggers configured.
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Spawn the firing loop. Each fired trigger's event goes to `sink`.
    pub fn start(self, sink: mpsc::UnboundedSender<Event>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let now = Utc::now();
            let mut pending: Vec<(TriggerConfig, Schedule, DateTime<Utc>)> = Vec::new();
            for trigger in self.triggers.into_iter().filter(|t| t.enabled) {
                match parse_cron(&trigger.cron) {
                    Ok(schedule) => {
                        if let Some(next) = schedule.after(&now).next() {
                            pending.push((trigger, schedule, next));
                        }
                    }
                    Err(e) => warn!(trigger = %trigger.name, error = %e, "Skipping trigger"),
                }
            }
            if pending.is_empty() {
                info!("No enabled triggers");
                return;
            }

            loop {
                let Some(nearest) = pending.iter().map(|(_, _, at)| *at).min() else {
                    return;
                };
                let wait = (nearest - Utc::now()).to_std().unwrap_or_default();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(wait) => {}
                }

                let now = Utc::now();
                let mut still_scheduled = Vec::with_capacity(pending.len());
                for (trigger, schedule, at) in pending {
                    if at > now {
                        still_scheduled.push((trigger, schedule, at));
                        continue;
                    }
                    let mut event = trigger.materialize();
                    event
                        .payload
                        .extra
                        .insert("scheduled_for".into(), json!(at.to_rfc3339()));
                    info!(trigger = %trigger.name, event_id = %event.id, "Trigger fired");
                    if sink.send(event).is_err() {
                        return;
                    }
                    let next = schedule.after(&at).next();
                    match next {
                        Some(next) => still_scheduled.push((trigger, schedule, next)),
                        None => info!(trigger = %trigger.name, "Trigger has no further fire times"),
                    }
                }
                pending = still_scheduled;
                if pending.is_empty() {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn trigger(name: &str, cron: &str, enabled: bool) -> TriggerConfig {
        TriggerConfig {
            name: name.into(),
            cron: cron.into(),
            message: "post the recap".into(),
            priority: Priority::Low,
            speak: None,
            enabled,
        }
    }

    #[test]
    fn test_parse_cron() {
        assert!(parse_cron("0 * * * * * *").is_ok());
        assert!(parse_cron("not a cron expression").is_err());
    }

    #[test]
    fn test_next_fire_time() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 8, 30, 0).unwrap();
        let next = next_fire_time("0 0 9 * * * *", at).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap());
    }

    #[test]
    fn test_materialize() {
        let event = trigger("recap", "0 * * * * * *", true).materialize();
        assert_eq!(event.source, TRIGGER_SOURCE);
        assert_eq!(event.event_type, TRIGGER_EVENT_TYPE);
        assert_eq!(event.priority, Priority::Low);
        assert_eq!(event.text(), "post the recap");
        assert_eq!(event.payload.extra["trigger"], "recap");
    }

    #[test]
    fn test_enabled_filter() {
        let scheduler = TriggerScheduler::new(vec![
            trigger("on", "0 * * * * * *", true),
            trigger("off", "0 * * * * * *", false),
        ]);
        assert_eq!(scheduler.len(), 2);
        assert_eq!(scheduler.enabled().len(), 1);
        assert_eq!(scheduler.enabled()[0].name, "on");
    }

    #[tokio::test]
    async fn test_loop_fires_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle =
            TriggerScheduler::new(vec![trigger("tick", "* * * * * * *", true)]).start(tx, cancel.clone());

        let event = tokio::time::timeout(std::time::Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.payload.extra["trigger"], "tick");

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_interleaved_triggers_never_fire_early() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let handle = TriggerScheduler::new(vec![
            trigger("even", "0/2 * * * * * *", true),
            trigger("odd", "1/2 * * * * * *", true),
        ])
        .start(tx, cancel.clone());

        for _ in 0..4 {
            let event = tokio::time::timeout(std::time::Duration::from_secs(3), rx.recv())
                .await
                .unwrap()
                .unwrap();
            let scheduled_for: DateTime<Utc> = event.payload.extra["scheduled_for"]
                .as_str()
                .unwrap()
                .parse()
                .unwrap();
            assert!(
                event.timestamp >= scheduled_for,
                "{} fired at {} before {}",
                event.payload.extra["trigger"],
                event.timestamp,
                scheduled_for
            );
        }

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_enabled_triggers_exits() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = TriggerScheduler::new(vec![trigger("off", "0 * * * * * *", false)])
            .start(tx, CancellationToken::new());
        handle.await.unwrap();
    }
}
