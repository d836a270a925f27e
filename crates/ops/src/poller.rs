//! Periodic rollout health poller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use rollcall_core::{HealthStatus, PollError, TargetKey};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{messages, RelayContext};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    /// Bound on each per-target cluster read.
    pub call_timeout: Duration,
    /// Expire pending entries older than this with a "did not converge" notice.
    /// `None` keeps them pending until the target turns healthy.
    pub pending_timeout: Option<Duration>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self { interval: Duration::from_secs(30), call_timeout: Duration::from_secs(10), pending_timeout: None }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Pending targets observed healthy this cycle; one notice each.
    pub confirmed: Vec<HealthStatus>,
    pub healthy: Vec<TargetKey>,
    pub unhealthy: Vec<TargetKey>,
    pub failed: Vec<(TargetKey, PollError)>,
    pub expired: Vec<TargetKey>,
}

pub struct Poller {
    ctx: Arc<RelayContext>,
    cfg: PollerConfig,
}

impl Poller {
    pub fn new(ctx: Arc<RelayContext>, cfg: PollerConfig) -> Self {
        Self { ctx, cfg }
    }

    /// Visit every distinct target once. A failing or hung target is recorded
    /// and skipped; its pending entry is left as is.
    pub async fn run_cycle(&self) -> CycleReport {
        let t0 = Instant::now();
        let mut report = CycleReport::default();

        for key in self.ctx.registry.targets() {
            match self.check(&key).await {
                Ok(status) if status.is_healthy => {
                    if self.ctx.tracker.clear_pending(&key) {
                        counter!("rollcall_confirmations_total", 1u64);
                        info!(target = %key, ready = status.ready, desired = status.desired, "rollout healthy");
                        self.ctx.notifier.notify(messages::rollout_healthy(&status));
                        report.confirmed.push(status);
                    }
                    report.healthy.push(key);
                }
                Ok(status) => {
                    debug!(target = %key, ready = status.ready, desired = status.desired, pending = self.ctx.tracker.is_pending(&key), "rollout not ready");
                    report.unhealthy.push(key);
                }
                Err(e) => {
                    counter!("rollcall_poll_failures_total", 1u64);
                    warn!(target = %key, error = %e, "health poll failed");
                    report.failed.push((key, e));
                }
            }
        }

        // after the checks, so a target confirmed this cycle is never expired
        if let Some(max_age) = self.cfg.pending_timeout {
            for key in self.ctx.tracker.expire_older_than(max_age) {
                warn!(target = %key, waited_secs = max_age.as_secs(), "rollout did not converge; dropping pending entry");
                self.ctx.notifier.notify(messages::rollout_stalled(&key, max_age));
                report.expired.push(key);
            }
        }

        histogram!("rollcall_poll_cycle_ms", t0.elapsed().as_secs_f64() * 1000.0);
        debug!(
            confirmed = report.confirmed.len(),
            unhealthy = report.unhealthy.len(),
            failed = report.failed.len(),
            pending = self.ctx.tracker.len(),
            took_ms = %t0.elapsed().as_millis(),
            "poll cycle done"
        );
        report
    }

    async fn check(&self, key: &TargetKey) -> Result<HealthStatus, PollError> {
        tokio::time::timeout(self.cfg.call_timeout, self.ctx.workloads.health(key))
            .await
            .map_err(|_| PollError::Timeout(self.cfg.call_timeout))?
    }

    /// Run cycles on a fixed period until `shutdown` flips to true or its
    /// sender is dropped. One task runs each cycle to completion; ticks missed
    /// while a cycle is running are skipped.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.cfg.interval;
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = period.as_secs(), targets = self.ctx.registry.targets().len(), "health poller started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("health poller stopped");
        })
    }
}
