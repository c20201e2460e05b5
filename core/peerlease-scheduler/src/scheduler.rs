//! The maintenance loop.

use crate::error::{SchedulerError, SchedulerResult};
use crate::notifier::{Notifier, notice_for};
use chrono::{DateTime, Utc};
use peerlease_db::PeerDirectory;
use peerlease_lifecycle::{SweepReport, sweep};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, timeout};
use tracing::{debug, info, warn};

/// Timing for the maintenance loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between runs.
    pub period: Duration,
    /// Hard limit for one run.
    pub run_budget: Duration,
    /// How long after its grace period an expired subscription's devices
    /// are revoked in the ledger.
    pub cleanup_after: chrono::Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(24 * 60 * 60),
            run_budget: Duration::from_secs(5 * 60),
            cleanup_after: chrono::Duration::days(30),
        }
    }
}

/// One of the three passes of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Sweep,
    Notify,
    Cleanup,
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sweep => "status sweep",
            Self::Notify => "notifications",
            Self::Cleanup => "cleanup",
        })
    }
}

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub sweep: Option<SweepReport>,
    pub notices_sent: usize,
    pub devices_cleaned: usize,
    pub failed_passes: Vec<Pass>,
}

/// Runs the sweep, notification and cleanup passes on a timer.
pub struct Scheduler {
    directory: PeerDirectory,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    in_flight: AtomicBool,
}

impl Scheduler {
    pub fn new(
        directory: PeerDirectory,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            directory,
            notifier,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Runs until `shutdown` carries `true` or its sender is dropped.
    ///
    /// The first run starts immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Scheduler started (period {:?}, budget {:?})",
            self.config.period, self.config.run_budget
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.try_spawn_run();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Scheduler stopped");
    }

    /// Starts a run in the background unless one is still executing.
    ///
    /// Returns `None` when the tick is skipped.
    pub fn try_spawn_run(self: &Arc<Self>) -> Option<JoinHandle<RunReport>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("Previous scheduler run still in progress; skipping this tick");
            return None;
        }
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let _in_flight = InFlight(&this.in_flight);
            let budget = this.config.run_budget;
            let report = match timeout(budget, this.run_once(Utc::now())).await {
                Ok(report) => {
                    info!(
                        "Scheduler run done: {} transitions, {} notices, {} devices cleaned",
                        report.sweep.as_ref().map_or(0, |s| s.applied.len()),
                        report.notices_sent,
                        report.devices_cleaned
                    );
                    report
                }
                Err(_) => {
                    warn!("Scheduler run exceeded its budget of {:?}", budget);
                    RunReport::default()
                }
            };
            report
        }))
    }

    /// Runs the three passes once. A failing pass is logged and recorded;
    /// the following passes still run.
    pub async fn run_once(&self, now: DateTime<Utc>) -> RunReport {
        let mut report = RunReport::default();

        match self.sweep_pass(now).await {
            Ok(sweep) => report.sweep = Some(sweep),
            Err(e) => self.record_failure(&mut report, Pass::Sweep, &e),
        }
        match self.notify_pass(now).await {
            Ok(sent) => report.notices_sent = sent,
            Err(e) => self.record_failure(&mut report, Pass::Notify, &e),
        }
        match self.cleanup_pass(now).await {
            Ok(cleaned) => report.devices_cleaned = cleaned,
            Err(e) => self.record_failure(&mut report, Pass::Cleanup, &e),
        }
        report
    }

    fn record_failure(&self, report: &mut RunReport, pass: Pass, err: &SchedulerError) {
        warn!("Scheduler {} failed: {}", pass, err);
        report.failed_passes.push(pass);
    }

    async fn sweep_pass(&self, now: DateTime<Utc>) -> SchedulerResult<SweepReport> {
        let directory = self.directory.clone();
        blocking(move || Ok(sweep(&directory, now)?)).await
    }

    async fn notify_pass(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let directory = self.directory.clone();
        let live = blocking(move || Ok(directory.live_subscriptions()?)).await?;

        let mut sent = 0;
        for sub in live {
            let Some(notice) = notice_for(&sub, now) else {
                continue;
            };
            let directory = self.directory.clone();
            let user_id = sub.user_id;
            let Some(user) = blocking(move || Ok(directory.user_by_id(user_id)?)).await? else {
                warn!("Subscription {} belongs to missing user {}", sub.id, user_id);
                continue;
            };
            match self.notifier.notify(&user, &notice).await {
                Ok(()) => sent += 1,
                Err(e) => warn!("Failed to notify user {}: {}", user.id, e),
            }
        }
        Ok(sent)
    }

    async fn cleanup_pass(&self, now: DateTime<Utc>) -> SchedulerResult<usize> {
        let directory = self.directory.clone();
        let before = now - self.config.cleanup_after;
        blocking(move || {
            let stale = directory.devices_to_clean_up(before)?;
            let mut cleaned = 0;
            for device in stale {
                match directory.revoke_device(device.id) {
                    Ok(true) => {
                        debug!("Revoked stale device {} ({})", device.id, device.assigned_address);
                        cleaned += 1;
                    }
                    Ok(false) => {}
                    Err(e) => warn!("Failed to revoke stale device {}: {}", device.id, e),
                }
            }
            Ok(cleaned)
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> SchedulerResult<T>
where
    F: FnOnce() -> SchedulerResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SchedulerError::Task(e.to_string()))?
}

/// Clears the in-flight flag when the run ends, including by panic.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
