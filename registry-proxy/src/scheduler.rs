//! Daily report scheduling.
//!
//! A background task polls the wall clock and fires the [`Reporter`] once
//! per day at the configured local time. Missed triggers are not replayed:
//! the next run is always the first trigger time after the latest check.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime, TimeDelta};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::report::Reporter;

/// First occurrence of `trigger` strictly after `after`.
pub fn next_occurrence(trigger: NaiveTime, after: NaiveDateTime) -> NaiveDateTime {
    let today = after.date().and_time(trigger);
    if today > after {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// Tracks when the daily report is next due.
#[derive(Debug, Clone)]
pub struct DailySchedule {
    trigger: NaiveTime,
    next_run: NaiveDateTime,
}

impl DailySchedule {
    /// Start tracking from `now`; a trigger time equal to or earlier than
    /// `now` today is not due until tomorrow.
    pub fn new(trigger: NaiveTime, now: NaiveDateTime) -> Self {
        Self {
            trigger,
            next_run: next_occurrence(trigger, now),
        }
    }

    pub fn next_run(&self) -> NaiveDateTime {
        self.next_run
    }

    /// Returns `true` at most once per due trigger, then moves on to the
    /// next trigger after `now`.
    pub fn poll(&mut self, now: NaiveDateTime) -> bool {
        if now < self.next_run {
            return false;
        }
        self.next_run = next_occurrence(self.trigger, now);
        true
    }
}

type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Runs the reporter on a [`DailySchedule`].
pub struct ReportScheduler {
    reporter: Arc<Reporter>,
    trigger: NaiveTime,
    poll_interval: Duration,
    clock: Clock,
}

impl ReportScheduler {
    pub fn new(reporter: Arc<Reporter>, trigger: NaiveTime, poll_interval: Duration) -> Self {
        Self {
            reporter,
            trigger,
            poll_interval,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the local wall clock, mainly for tests.
    pub fn with_clock(mut self, clock: impl Fn() -> NaiveDateTime + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Poll until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut schedule = DailySchedule::new(self.trigger, (self.clock)());
        info!(next_run = %schedule.next_run(), "Report scheduler started");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if schedule.poll((self.clock)()) {
                        self.fire().await;
                        debug!(next_run = %schedule.next_run(), "Next report scheduled");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Report scheduler stopped");
    }

    async fn fire(&self) {
        match self.reporter.send_report().await {
            Ok(recipients) => info!(recipients, "Scheduled report delivered"),
            Err(e) => error!(error = %e, "Scheduled report failed"),
        }
    }

    /// Spawn [`run`](Self::run) on the current runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
