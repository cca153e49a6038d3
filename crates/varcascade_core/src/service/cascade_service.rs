//! Cascade propagation engine.
//!
//! # Responsibility
//! - Change master defaults and log each change durably before propagating.
//! - Drain an in-process FIFO of pending log entries with one logical worker.
//! - Retry recent failures, prune old terminal entries and recover orphans.
//! - Report cascade history and aggregate stats.
//!
//! # Invariants
//! - The default change and its `pending` entry commit in one transaction.
//! - Each entry settles to exactly one of `completed` or `failed` per attempt,
//!   and that status is written in the same transaction as its row updates.
//! - Only rows with `is_inherited = 1` whose template still binds the
//!   variable are rewritten.
//! - A cascade requested while the worker runs is queued, never dropped.
//! - Observer failures never reach the caller or the queue.

use crate::config::EngineConfig;
use crate::db::{days_to_ms, hours_to_ms};
use crate::model::cascade::{
    CascadeHistoryQuery, CascadeLogEntry, CascadeLogId, CascadeStats, CascadeStatus,
};
use crate::model::document::DocumentId;
use crate::model::validation::{require_text, ValidationError};
use crate::model::variable::MasterVarId;
use crate::repo::cascade_log_repo::{CascadeLogRepository, SqliteCascadeLogRepository};
use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
use crate::repo::value_repo::{DocumentValueRepository, SqliteDocumentValueRepository};
use crate::repo::{RepoError, RepoResult};
use log::{debug, error, info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::error::Error;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

pub const DEFAULT_STATS_WINDOW_DAYS: u32 = 30;

/// Error type observers may return; it is logged and dropped.
pub type ObserverError = Box<dyn Error + Send + Sync>;

/// Best-effort hook fired after an entry settles.
pub trait CascadeObserver {
    fn on_cascade_settled(&self, entry: &CascadeLogEntry) -> Result<(), ObserverError>;
}

/// Default observer: one log line per settled entry.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingObserver;

impl CascadeObserver for LoggingObserver {
    fn on_cascade_settled(&self, entry: &CascadeLogEntry) -> Result<(), ObserverError> {
        info!(
            "event=cascade_notify module=cascade status={} log_id={} master_var_id={} affected={}",
            entry.status.as_str(),
            entry.id,
            entry.master_var_id,
            entry.affected_documents_count
        );
        Ok(())
    }
}

/// Result of one propagation attempt before it is read back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PropagationOutcome {
    attempted: u32,
    affected: u32,
    failed: u32,
}

/// Clears the processing flag when the drain loop exits, including on panic.
struct ProcessingGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> ProcessingGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            return None;
        }
        Some(Self { flag })
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

/// Cascade engine bound to one connection.
pub struct CascadeService<'conn> {
    conn: &'conn Connection,
    config: EngineConfig,
    queue: RefCell<VecDeque<CascadeLogId>>,
    processing: Cell<bool>,
    observer: Box<dyn CascadeObserver>,
}

impl<'conn> CascadeService<'conn> {
    /// Creates an engine with an empty queue. Persisted pending entries are
    /// not touched; use `start` for that.
    pub fn new(conn: &'conn Connection, config: EngineConfig) -> Self {
        Self {
            conn,
            config,
            queue: RefCell::new(VecDeque::new()),
            processing: Cell::new(false),
            observer: Box::new(LoggingObserver),
        }
    }

    /// Creates an engine, re-enqueues orphaned `pending` entries and drains
    /// them when `auto_drain` is on.
    pub fn start(conn: &'conn Connection, config: EngineConfig) -> RepoResult<Self> {
        let service = Self::new(conn, config);
        let recovered = service.recover_pending()?;
        if recovered > 0 && service.config.auto_drain {
            service.process_queue();
        }
        Ok(service)
    }

    pub fn with_observer(mut self, observer: Box<dyn CascadeObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Entries waiting in the in-memory queue.
    pub fn queue_len(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Changes a master default and queues its propagation.
    ///
    /// Returns the id of the new `pending` log entry. With `auto_drain` on the
    /// entry has settled by the time this returns.
    pub fn change_master_default(
        &self,
        master_var_id: MasterVarId,
        new_value: Option<&str>,
        actor: &str,
    ) -> RepoResult<CascadeLogId> {
        let actor = require_text("actor", actor)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let log_id = {
            let catalog = SqliteCatalogRepository::new(&tx);
            let variable = catalog
                .get_variable(master_var_id)?
                .ok_or_else(|| RepoError::not_found("master variable", master_var_id))?;
            variable.validate_value(new_value)?;

            catalog.set_default_value(master_var_id, new_value)?;
            SqliteCascadeLogRepository::new(&tx).insert_pending(
                master_var_id,
                variable.default_value.as_deref(),
                new_value,
                actor,
            )?
        };
        tx.commit()?;

        info!(
            "event=cascade_enqueue module=cascade status=pending log_id={} master_var_id={}",
            log_id, master_var_id
        );
        self.enqueue(log_id);
        if self.config.auto_drain {
            self.process_queue();
        }
        Ok(log_id)
    }

    /// Drains the queue in FIFO order. Returns the number of entries settled.
    ///
    /// A call made while the worker is already draining returns `0`; its
    /// entries are picked up by the running loop.
    pub fn process_queue(&self) -> usize {
        let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
            debug!("event=cascade_drain module=cascade status=busy");
            return 0;
        };

        let mut settled = 0;
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(log_id) = next else {
                break;
            };
            match self.process_entry(log_id) {
                Ok(Some(entry)) => {
                    settled += 1;
                    self.notify(&entry);
                }
                Ok(None) => {}
                Err(err) => {
                    // Entry stays pending and is picked up by recovery.
                    error!(
                        "event=cascade_process module=cascade status=error log_id={} error={}",
                        log_id, err
                    );
                }
            }
        }
        settled
    }

    /// Re-queues one `failed` entry regardless of its age.
    pub fn retry_cascade(&self, log_id: CascadeLogId) -> RepoResult<()> {
        let log_repo = SqliteCascadeLogRepository::new(self.conn);
        let entry = log_repo
            .get_entry(log_id)?
            .ok_or_else(|| RepoError::not_found("cascade log entry", log_id))?;
        if entry.status != CascadeStatus::Failed {
            return Err(ValidationError::InvalidState(format!(
                "cascade {log_id} is {}; only failed cascades can be retried",
                entry.status.as_str()
            ))
            .into());
        }

        log_repo.reset_failed_to_pending(log_id)?;
        info!("event=cascade_retry module=cascade status=pending log_id={log_id} trigger=manual");
        self.enqueue(log_id);
        if self.config.auto_drain {
            self.process_queue();
        }
        Ok(())
    }

    /// Re-queues failures updated within the retry window. Returns how many.
    pub fn run_retry_sweep(&self, now_ms: i64) -> RepoResult<usize> {
        let since_ms = now_ms - hours_to_ms(self.config.retry_window_hours);
        let log_repo = SqliteCascadeLogRepository::new(self.conn);
        let ids = log_repo.list_failed_since(since_ms)?;
        for log_id in &ids {
            log_repo.reset_failed_to_pending(*log_id)?;
            self.enqueue(*log_id);
        }
        info!(
            "event=cascade_retry_sweep module=cascade status=ok requeued={}",
            ids.len()
        );
        if !ids.is_empty() && self.config.auto_drain {
            self.process_queue();
        }
        Ok(ids.len())
    }

    /// Deletes terminal entries created before the retention window.
    pub fn run_retention_sweep(&self, now_ms: i64) -> RepoResult<usize> {
        let cutoff_ms = now_ms - days_to_ms(self.config.retention_days);
        let deleted = SqliteCascadeLogRepository::new(self.conn).prune_terminal_before(cutoff_ms)?;
        info!(
            "event=cascade_retention_sweep module=cascade status=ok deleted={} retention_days={}",
            deleted, self.config.retention_days
        );
        Ok(deleted)
    }

    /// Enqueues every persisted `pending` entry in creation order.
    pub fn recover_pending(&self) -> RepoResult<usize> {
        let ids = SqliteCascadeLogRepository::new(self.conn).list_pending_ids()?;
        for log_id in &ids {
            self.enqueue(*log_id);
        }
        if !ids.is_empty() {
            warn!(
                "event=cascade_recover module=cascade status=ok requeued={}",
                ids.len()
            );
        }
        Ok(ids.len())
    }

    pub fn get_cascade_entry(&self, log_id: CascadeLogId) -> RepoResult<CascadeLogEntry> {
        SqliteCascadeLogRepository::new(self.conn)
            .get_entry(log_id)?
            .ok_or_else(|| RepoError::not_found("cascade log entry", log_id))
    }

    /// Newest first; the limit is clamped by configuration.
    pub fn get_cascade_history(
        &self,
        query: &CascadeHistoryQuery,
    ) -> RepoResult<Vec<CascadeLogEntry>> {
        let limit = self.config.normalize_history_limit(query.limit);
        SqliteCascadeLogRepository::new(self.conn).query_history(query, limit)
    }

    /// Aggregates entries created within `window_days` (default 30) of `now_ms`.
    pub fn get_cascade_stats(
        &self,
        window_days: Option<u32>,
        now_ms: i64,
    ) -> RepoResult<CascadeStats> {
        let window_days = window_days.unwrap_or(DEFAULT_STATS_WINDOW_DAYS);
        let counts = SqliteCascadeLogRepository::new(self.conn)
            .counts_since(now_ms - days_to_ms(window_days))?;
        let avg_per_cascade = if counts.completed == 0 {
            0.0
        } else {
            counts.documents_updated as f64 / counts.completed as f64
        };
        Ok(CascadeStats {
            window_days,
            total: counts.total,
            completed: counts.completed,
            failed: counts.failed,
            pending: counts.pending,
            total_documents_updated: counts.documents_updated,
            avg_per_cascade,
        })
    }

    fn enqueue(&self, log_id: CascadeLogId) {
        let mut queue = self.queue.borrow_mut();
        if !queue.contains(&log_id) {
            queue.push_back(log_id);
        }
    }

    /// Settles one entry. `Ok(None)` when the entry is gone or not pending.
    fn process_entry(&self, log_id: CascadeLogId) -> RepoResult<Option<CascadeLogEntry>> {
        let started_at = Instant::now();
        let log_repo = SqliteCascadeLogRepository::new(self.conn);
        let Some(entry) = log_repo.get_entry(log_id)? else {
            warn!("event=cascade_process module=cascade status=skipped log_id={log_id} reason=missing");
            return Ok(None);
        };
        if entry.status != CascadeStatus::Pending {
            debug!(
                "event=cascade_process module=cascade status=skipped log_id={} reason={}",
                log_id,
                entry.status.as_str()
            );
            return Ok(None);
        }

        match self.propagate(&entry) {
            Ok(outcome) => {
                let status = if outcome.failed == 0 { "ok" } else { "failed" };
                info!(
                    "event=cascade_process module=cascade status={} log_id={} master_var_id={} attempted={} affected={} failed={} duration_ms={}",
                    status,
                    log_id,
                    entry.master_var_id,
                    outcome.attempted,
                    outcome.affected,
                    outcome.failed,
                    started_at.elapsed().as_millis()
                );
            }
            Err(err) => {
                // Whole attempt rolled back; record it outside the transaction.
                error!(
                    "event=cascade_process module=cascade status=failed log_id={} duration_ms={} error_class={} error={}",
                    log_id,
                    started_at.elapsed().as_millis(),
                    error_class(&err),
                    err
                );
                log_repo.mark_failed(log_id, 0, 0, &err.to_string())?;
            }
        }

        log_repo.get_entry(log_id)
    }

    fn propagate(&self, entry: &CascadeLogEntry) -> RepoResult<PropagationOutcome> {
        let mut tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let targets = match SqliteCatalogRepository::new(&tx).get_variable(entry.master_var_id)? {
            None => {
                debug!(
                    "event=cascade_process module=cascade status=skipped log_id={} reason=variable_deleted",
                    entry.id
                );
                Vec::new()
            }
            Some(variable) if variable.default_value != entry.new_value => {
                debug!(
                    "event=cascade_process module=cascade status=skipped log_id={} reason=superseded",
                    entry.id
                );
                Vec::new()
            }
            Some(_) => {
                SqliteDocumentValueRepository::new(&tx).list_inheriting_targets(entry.master_var_id)?
            }
        };

        let mut outcome = PropagationOutcome {
            attempted: targets.len() as u32,
            ..PropagationOutcome::default()
        };
        let mut first_error: Option<String> = None;
        for target in &targets {
            let value = target
                .template_override
                .as_deref()
                .or(entry.new_value.as_deref());
            match update_in_savepoint(
                &mut tx,
                target.document_id,
                entry.master_var_id,
                value,
                &entry.initiated_by,
            ) {
                Ok(changed) => outcome.affected += changed as u32,
                Err(err) => {
                    outcome.failed += 1;
                    warn!(
                        "event=cascade_document_update module=cascade status=error log_id={} document_id={} error_class={} error={}",
                        entry.id,
                        target.document_id,
                        error_class(&err),
                        err
                    );
                    first_error.get_or_insert_with(|| err.to_string());
                }
            }
        }

        {
            let log_repo = SqliteCascadeLogRepository::new(&tx);
            match first_error {
                None => log_repo.mark_completed(entry.id, outcome.attempted, outcome.affected)?,
                Some(message) => log_repo.mark_failed(
                    entry.id,
                    outcome.attempted,
                    outcome.affected,
                    &format!(
                        "{} of {} document update(s) failed: {message}",
                        outcome.failed, outcome.attempted
                    ),
                )?,
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    fn notify(&self, entry: &CascadeLogEntry) {
        let result = catch_unwind(AssertUnwindSafe(|| self.observer.on_cascade_settled(entry)));
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(
                "event=cascade_notify module=cascade status=error log_id={} error={}",
                entry.id, err
            ),
            Err(_) => warn!(
                "event=cascade_notify module=cascade status=panicked log_id={}",
                entry.id
            ),
        }
    }
}

/// Rewrites one inheriting row inside its own savepoint.
fn update_in_savepoint(
    tx: &mut Transaction<'_>,
    document_id: DocumentId,
    master_var_id: MasterVarId,
    value: Option<&str>,
    actor: &str,
) -> RepoResult<usize> {
    let savepoint = tx.savepoint()?;
    let changed = SqliteDocumentValueRepository::new(&savepoint).update_inherited_value(
        document_id,
        master_var_id,
        value,
        actor,
    )?;
    savepoint.commit()?;
    Ok(changed)
}

/// Log tag separating store failures a retry may clear from bad data.
fn error_class(err: &RepoError) -> &'static str {
    if err.is_transient() {
        "transient_store"
    } else {
        "permanent"
    }
}

#[cfg(test)]
mod tests {
    use super::{error_class, ProcessingGuard};
    use crate::db::DbError;
    use crate::repo::RepoError;
    use std::cell::Cell;

    #[test]
    fn error_class_tags_store_failures_as_transient() {
        let store = RepoError::Db(DbError::Sqlite(rusqlite::Error::InvalidQuery));
        assert_eq!(error_class(&store), "transient_store");
        assert_eq!(error_class(&RepoError::not_found("document", "d1")), "permanent");
    }

    #[test]
    fn processing_guard_is_exclusive_and_released_on_drop() {
        let flag = Cell::new(false);
        {
            let guard = ProcessingGuard::acquire(&flag);
            assert!(guard.is_some());
            assert!(ProcessingGuard::acquire(&flag).is_none());
        }
        assert!(!flag.get());
        assert!(ProcessingGuard::acquire(&flag).is_some());
    }
}
