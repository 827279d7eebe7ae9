//! Timer-driven ingestion cycles and the housekeeping hooks.
//!
//! A cycle runs inside the poll timer's loop, so a slow cycle delays the next
//! fire instead of overlapping with it. Missed fires are skipped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, Local, NaiveTime, TimeZone, Weekday};
use log::{error, info, warn};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use uuid::Uuid;

use crate::ingestion::IngestionService;
use crate::shutdown::signalled;

/// Currencies polled every cycle after the default one.
pub const WATCHED_CURRENCIES: [&str; 7] = ["USD", "EUR", "GBP", "JPY", "CHF", "CAD", "AUD"];

pub const INTER_CALL_PAUSE: Duration = Duration::from_millis(100);

const DAILY_CLEANUP_HOUR: u32 = 2;
const WEEKLY_MONITORING_DAY: Weekday = Weekday::Mon;
const WEEKLY_MONITORING_HOUR: u32 = 8;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub fixed_rate: Duration,
    pub initial_delay: Duration,
    pub default_base_currency: String,
}

/// Cuts the pause of the running cycle short, abandoning its remaining currencies.
/// `stop` is permanent and also keeps later cycles from starting.
#[derive(Default)]
pub struct CycleInterrupt {
    interrupted: AtomicBool,
    stopped: AtomicBool,
    notify: Notify,
}

impl CycleInterrupt {
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn is_set(&self) -> bool {
        self.interrupted.load(Ordering::Acquire) || self.is_stopped()
    }

    fn reset(&self) {
        self.interrupted.store(false, Ordering::Release);
    }

    /// `false` when interrupted before or during the pause.
    async fn pause(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_set(),
            _ = notified => false,
        }
    }
}

pub struct Scheduler {
    ingestion: Arc<IngestionService>,
    settings: SchedulerSettings,
    interrupt: Arc<CycleInterrupt>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub aborted: bool,
}

impl Scheduler {
    pub fn new(ingestion: Arc<IngestionService>, settings: SchedulerSettings) -> Self {
        Self {
            ingestion,
            settings,
            interrupt: Arc::new(CycleInterrupt::default()),
        }
    }

    pub fn interrupter(&self) -> Arc<CycleInterrupt> {
        Arc::clone(&self.interrupt)
    }

    /// Default currency first, then the watch list in order without it.
    pub fn cycle_currencies(default_base_currency: &str) -> Vec<String> {
        std::iter::once(default_base_currency.to_string())
            .chain(
                WATCHED_CURRENCIES
                    .iter()
                    .filter(|currency| **currency != default_base_currency)
                    .map(|currency| currency.to_string()),
            )
            .collect()
    }

    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let mut report = CycleReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
            aborted: false,
        };
        if self.interrupt.is_stopped() {
            warn!("Scheduler is stopping; skipping cycle {}", cycle_id);
            report.aborted = true;
            return report;
        }
        info!("Starting scheduled exchange rate fetch (cycle {})", cycle_id);
        self.interrupt.reset();

        for (index, currency) in Self::cycle_currencies(&self.settings.default_base_currency)
            .into_iter()
            .enumerate()
        {
            if index > 0 && !self.interrupt.pause(INTER_CALL_PAUSE).await {
                error!(
                    "Cycle {} interrupted while waiting to fetch rates for {}; skipping the rest of the list",
                    cycle_id, currency
                );
                report.aborted = true;
                break;
            }
            match self.ingestion.ingest(&currency).await {
                Ok(_) => report.succeeded.push(currency),
                Err(_) => report.failed.push(currency),
            }
        }

        info!(
            "Completed scheduled exchange rate fetch (cycle {}): {} succeeded, {} failed, aborted={}",
            cycle_id,
            report.succeeded.len(),
            report.failed.len(),
            report.aborted
        );
        report
    }

    /// Spawns the poll timer and both housekeeping timers.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let interrupter = self.interrupter();
        let mut on_shutdown = shutdown.clone();
        let watcher = tokio::spawn(async move {
            signalled(&mut on_shutdown).await;
            interrupter.stop();
        });

        vec![
            watcher,
            tokio::spawn(Arc::clone(&self).poll_loop(shutdown.clone())),
            tokio::spawn(housekeeping_loop(
                "daily cleanup",
                next_daily_run,
                daily_cleanup,
                shutdown.clone(),
            )),
            tokio::spawn(housekeeping_loop(
                "weekly monitoring",
                next_weekly_run,
                weekly_monitoring,
                shutdown,
            )),
        ]
    }

    async fn poll_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Exchange rate scheduler started (every {:?}, first run in {:?})",
            self.settings.fixed_rate, self.settings.initial_delay
        );
        tokio::select! {
            _ = tokio::time::sleep(self.settings.initial_delay) => {}
            _ = signalled(&mut shutdown) => return,
        }

        let mut ticker = interval(self.settings.fixed_rate);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    self.run_cycle().await;
                }
                _ = signalled(&mut shutdown) => break,
            }
        }
        info!("Exchange rate scheduler stopped");
    }
}

async fn housekeeping_loop(
    name: &'static str,
    next_run: fn(DateTime<Local>) -> DateTime<Local>,
    task: fn(),
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let now = Local::now();
        let wait = (next_run(now) - now).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = tokio::time::sleep(wait) => task(),
            _ = signalled(&mut shutdown) => {
                info!("Housekeeping task {} stopped", name);
                return;
            }
        }
    }
}

fn daily_cleanup() {
    info!("Starting daily cleanup task");
    info!("Daily cleanup completed");
}

fn weekly_monitoring() {
    info!("Starting weekly monitoring task");
    info!("Weekly monitoring completed");
}

fn at_hour(date: chrono::NaiveDate, hour: u32) -> Option<DateTime<Local>> {
    let naive = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0)?);
    Local.from_local_datetime(&naive).earliest()
}

/// Next 02:00 local time strictly after `now`.
pub fn next_daily_run(now: DateTime<Local>) -> DateTime<Local> {
    let mut date = now.date_naive();
    for _ in 0..3 {
        if let Some(candidate) = at_hour(date, DAILY_CLEANUP_HOUR) {
            if candidate > now {
                return candidate;
            }
        }
        date = date.checked_add_days(Days::new(1)).unwrap_or(date);
    }
    warn!("Could not resolve next daily run after {}; retrying in a day", now);
    now + chrono::Duration::days(1)
}

/// Next Monday 08:00 local time strictly after `now`.
pub fn next_weekly_run(now: DateTime<Local>) -> DateTime<Local> {
    let mut date = now.date_naive();
    for _ in 0..15 {
        if date.weekday() == WEEKLY_MONITORING_DAY {
            if let Some(candidate) = at_hour(date, WEEKLY_MONITORING_HOUR) {
                if candidate > now {
                    return candidate;
                }
            }
        }
        date = date.checked_add_days(Days::new(1)).unwrap_or(date);
    }
    warn!("Could not resolve next weekly run after {}; retrying in a week", now);
    now + chrono::Duration::weeks(1)
}
