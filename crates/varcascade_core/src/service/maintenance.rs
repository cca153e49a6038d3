//! Periodic cascade maintenance.
//!
//! # Responsibility
//! - Decide when the retry and retention sweeps are due and run them.
//!
//! # Invariants
//! - The scheduler owns no thread or timer; callers drive it with `tick(now)`.
//! - A sweep that has never run is due on the first tick.
//! - A failed sweep does not advance its last-run mark.

use crate::config::EngineConfig;
use crate::repo::RepoResult;
use crate::service::cascade_service::CascadeService;
use log::error;

/// Sweeps run by one `tick`. `None` means the sweep was not due.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    pub retried: Option<usize>,
    pub pruned: Option<usize>,
}

/// Interval bookkeeping for the retry and retention sweeps.
#[derive(Debug, Clone)]
pub struct MaintenanceScheduler {
    retry_interval_ms: i64,
    retention_interval_ms: i64,
    last_retry_ms: Option<i64>,
    last_retention_ms: Option<i64>,
}

impl MaintenanceScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            retry_interval_ms: secs_to_ms(config.retry_sweep_interval_secs),
            retention_interval_ms: secs_to_ms(config.retention_sweep_interval_secs),
            last_retry_ms: None,
            last_retention_ms: None,
        }
    }

    /// Runs every sweep whose interval has elapsed at `now_ms`.
    pub fn tick(&mut self, service: &CascadeService<'_>, now_ms: i64) -> RepoResult<MaintenanceReport> {
        let mut report = MaintenanceReport::default();

        if is_due(self.last_retry_ms, self.retry_interval_ms, now_ms) {
            match service.run_retry_sweep(now_ms) {
                Ok(count) => {
                    report.retried = Some(count);
                    self.last_retry_ms = Some(now_ms);
                }
                Err(err) => {
                    error!("event=maintenance_tick module=maintenance status=error sweep=retry error={err}");
                    return Err(err);
                }
            }
        }

        if is_due(self.last_retention_ms, self.retention_interval_ms, now_ms) {
            match service.run_retention_sweep(now_ms) {
                Ok(count) => {
                    report.pruned = Some(count);
                    self.last_retention_ms = Some(now_ms);
                }
                Err(err) => {
                    error!("event=maintenance_tick module=maintenance status=error sweep=retention error={err}");
                    return Err(err);
                }
            }
        }

        Ok(report)
    }
}

fn is_due(last_run_ms: Option<i64>, interval_ms: i64, now_ms: i64) -> bool {
    match last_run_ms {
        None => true,
        Some(last) => now_ms - last >= interval_ms,
    }
}

fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}
