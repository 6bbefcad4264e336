//! Wall-clock scheduler.
//!
//! One ticker fires every 60 seconds and compares the local `HH:MM`
//! against the enabled triggers. At most one trigger fires per minute;
//! a trigger that lands while any run is in progress is logged and
//! skipped, never queued. Configuration changes restart the scheduler so
//! the new trigger list takes effect at the next tick.

use crate::config::ScheduleTrigger;
use crate::service::{StepSpec, UpdateService};
use chrono::{Duration as ChronoDuration, Local};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{info, warn};

/// Scheduled runs cover recent days plus tomorrow's card:
/// `today - 2 .. today + 1`.
const WINDOW_DAYS_BACK: i64 = 2;
const WINDOW_DAYS_AHEAD: i64 = 1;

/// Mutual exclusion between scheduled and manual runs. Acquiring fails
/// instead of blocking; the caller decides whether to skip or report.
#[derive(Clone, Default)]
pub struct RunLock {
    busy: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunGuard> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(RunGuard {
                busy: self.busy.clone(),
            })
        } else {
            None
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

pub struct RunGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// First enabled trigger matching the minute, if any. The caller dedups
/// minutes; this only answers "who fires now".
pub fn due_trigger<'a>(
    triggers: &'a [ScheduleTrigger],
    now_hhmm: &str,
) -> Option<&'a ScheduleTrigger> {
    triggers
        .iter()
        .find(|t| t.enabled && t.time == now_hhmm)
}

pub struct Scheduler {
    service: Arc<UpdateService>,
    run_lock: RunLock,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(service: Arc<UpdateService>) -> Self {
        Self {
            service,
            run_lock: RunLock::new(),
            handle: None,
        }
    }

    /// The lock manual runs should hold so triggers skip while they work.
    pub fn run_lock(&self) -> RunLock {
        self.run_lock.clone()
    }

    pub fn is_started(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn start(&mut self, triggers: Vec<ScheduleTrigger>) {
        if self.is_started() {
            warn!("Scheduler already started");
            return;
        }
        info!(trigger_count = triggers.len(), "Scheduler starting");
        let service = self.service.clone();
        let run_lock = self.run_lock.clone();

        self.handle = Some(tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(60));
            let mut last_checked: Option<String> = None;

            loop {
                ticker.tick().await;
                let now_hhmm = Local::now().format("%H:%M").to_string();
                // One check per wall-clock minute, however the ticks land.
                if last_checked.as_deref() == Some(now_hhmm.as_str()) {
                    continue;
                }
                last_checked = Some(now_hhmm.clone());

                let Some(trigger) = due_trigger(&triggers, &now_hhmm) else {
                    continue;
                };

                let Some(guard) = run_lock.try_acquire() else {
                    warn!(
                        time = %trigger.time,
                        "Trigger fired while a run is in progress; skipping"
                    );
                    continue;
                };

                info!(time = %trigger.time, steps = ?trigger.steps, "Trigger firing");
                let service = service.clone();
                let steps: Vec<StepSpec> =
                    trigger.steps.iter().map(|&n| StepSpec::from(n)).collect();
                tokio::spawn(async move {
                    let _guard = guard;
                    let today = Local::now().date_naive();
                    let start = today - ChronoDuration::days(WINDOW_DAYS_BACK);
                    let end = today + ChronoDuration::days(WINDOW_DAYS_AHEAD);
                    let (ok, report) = service.run_period(start, end, &steps, None, false).await;
                    info!(ok, steps = report.steps.len(), "Scheduled run finished");
                });
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!("Scheduler stopped");
        }
    }

    /// Apply a new trigger list: stop and start so the change takes effect
    /// at the next tick.
    pub fn restart(&mut self, triggers: Vec<ScheduleTrigger>) {
        info!("Scheduler restarting with new trigger list");
        self.stop();
        self.start(triggers);
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(time: &str, enabled: bool) -> ScheduleTrigger {
        ScheduleTrigger {
            time: time.into(),
            steps: vec![1, 2],
            enabled,
        }
    }

    #[test]
    fn only_enabled_matching_trigger_fires() {
        let triggers = vec![
            trigger("03:00", false),
            trigger("03:00", true),
            trigger("04:00", true),
        ];
        let fired = due_trigger(&triggers, "03:00").unwrap();
        assert!(fired.enabled);
        assert_eq!(fired.time, "03:00");
        assert!(due_trigger(&triggers, "05:00").is_none());
    }

    #[test]
    fn at_most_one_trigger_per_minute() {
        let triggers = vec![trigger("03:00", true), trigger("03:00", true)];
        // Both match, exactly one is returned.
        let fired = due_trigger(&triggers, "03:00");
        assert!(fired.is_some());
    }

    #[test]
    fn run_lock_excludes_overlap() {
        let lock = RunLock::new();
        let guard = lock.try_acquire().expect("first acquire");
        assert!(lock.is_busy());
        assert!(lock.try_acquire().is_none(), "overlap must be refused");
        drop(guard);
        assert!(!lock.is_busy());
        assert!(lock.try_acquire().is_some());
    }
}
