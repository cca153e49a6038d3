//! Cascade log repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist the durable audit trail of master-default propagation.
//! - Enforce the log state machine at the SQL level.
//!
//! # Invariants
//! - Terminal transitions only apply to `pending` rows.
//! - `failed -> pending` only applies to `failed` rows.
//! - Pruning never deletes `pending` rows.

use crate::model::cascade::{CascadeHistoryQuery, CascadeLogEntry, CascadeLogId, CascadeStatus};
use crate::model::validation::ValidationError;
use crate::model::variable::MasterVarId;
use crate::repo::{parse_uuid, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const CASCADE_LOG_SELECT_SQL: &str = "SELECT
    id,
    master_var_id,
    old_value,
    new_value,
    initiated_by,
    status,
    attempted_documents_count,
    affected_documents_count,
    created_at,
    updated_at,
    completion_timestamp,
    error_message
FROM cascade_log";

/// Raw status counts over a creation window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CascadeCounts {
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    /// Sum of `affected_documents_count` over completed entries.
    pub documents_updated: u64,
}

/// Repository interface for the cascade log.
pub trait CascadeLogRepository {
    fn insert_pending(
        &self,
        master_var_id: MasterVarId,
        old_value: Option<&str>,
        new_value: Option<&str>,
        initiated_by: &str,
    ) -> RepoResult<CascadeLogId>;
    fn get_entry(&self, id: CascadeLogId) -> RepoResult<Option<CascadeLogEntry>>;
    fn mark_completed(&self, id: CascadeLogId, attempted: u32, affected: u32) -> RepoResult<()>;
    fn mark_failed(
        &self,
        id: CascadeLogId,
        attempted: u32,
        affected: u32,
        error_message: &str,
    ) -> RepoResult<()>;
    /// Flips a `failed` row back to `pending` and clears its error.
    fn reset_failed_to_pending(&self, id: CascadeLogId) -> RepoResult<()>;
    /// Pending ids in creation order.
    fn list_pending_ids(&self) -> RepoResult<Vec<CascadeLogId>>;
    /// Failed ids whose `updated_at >= since_ms`, in creation order.
    fn list_failed_since(&self, since_ms: i64) -> RepoResult<Vec<CascadeLogId>>;
    fn query_history(&self, query: &CascadeHistoryQuery, limit: u32)
        -> RepoResult<Vec<CascadeLogEntry>>;
    fn counts_since(&self, since_ms: i64) -> RepoResult<CascadeCounts>;
    /// Deletes terminal rows created before `cutoff_ms`.
    fn prune_terminal_before(&self, cutoff_ms: i64) -> RepoResult<usize>;
}

/// SQLite-backed cascade log repository.
pub struct SqliteCascadeLogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCascadeLogRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn transition_error(&self, id: CascadeLogId, target: &str) -> RepoError {
        match self.get_entry(id) {
            Ok(Some(entry)) => RepoError::Validation(ValidationError::InvalidState(format!(
                "cascade {id} is {} and cannot become {target}",
                entry.status.as_str()
            ))),
            Ok(None) => RepoError::not_found("cascade log entry", id),
            Err(err) => err,
        }
    }
}

impl CascadeLogRepository for SqliteCascadeLogRepository<'_> {
    fn insert_pending(
        &self,
        master_var_id: MasterVarId,
        old_value: Option<&str>,
        new_value: Option<&str>,
        initiated_by: &str,
    ) -> RepoResult<CascadeLogId> {
        self.conn.execute(
            "INSERT INTO cascade_log (
                master_var_id,
                old_value,
                new_value,
                initiated_by,
                status
            ) VALUES (?1, ?2, ?3, ?4, 'pending');",
            params![master_var_id.to_string(), old_value, new_value, initiated_by],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_entry(&self, id: CascadeLogId) -> RepoResult<Option<CascadeLogEntry>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{CASCADE_LOG_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_entry_row(row)?));
        }
        Ok(None)
    }

    fn mark_completed(&self, id: CascadeLogId, attempted: u32, affected: u32) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cascade_log
             SET
                status = 'completed',
                attempted_documents_count = ?2,
                affected_documents_count = ?3,
                error_message = NULL,
                completion_timestamp = (strftime('%s', 'now') * 1000),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND status = 'pending';",
            params![id, attempted, affected],
        )?;
        if changed == 0 {
            return Err(self.transition_error(id, "completed"));
        }
        Ok(())
    }

    fn mark_failed(
        &self,
        id: CascadeLogId,
        attempted: u32,
        affected: u32,
        error_message: &str,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cascade_log
             SET
                status = 'failed',
                attempted_documents_count = ?2,
                affected_documents_count = ?3,
                error_message = ?4,
                completion_timestamp = (strftime('%s', 'now') * 1000),
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND status = 'pending';",
            params![id, attempted, affected, error_message],
        )?;
        if changed == 0 {
            return Err(self.transition_error(id, "failed"));
        }
        Ok(())
    }

    fn reset_failed_to_pending(&self, id: CascadeLogId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cascade_log
             SET
                status = 'pending',
                error_message = NULL,
                completion_timestamp = NULL,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND status = 'failed';",
            [id],
        )?;
        if changed == 0 {
            return Err(self.transition_error(id, "pending"));
        }
        Ok(())
    }

    fn list_pending_ids(&self) -> RepoResult<Vec<CascadeLogId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM cascade_log WHERE status = 'pending' ORDER BY id ASC;")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<CascadeLogId>, _>>()?;
        Ok(ids)
    }

    fn list_failed_since(&self, since_ms: i64) -> RepoResult<Vec<CascadeLogId>> {
        let mut stmt = self.conn.prepare(
            "SELECT id
             FROM cascade_log
             WHERE status = 'failed'
               AND updated_at >= ?1
             ORDER BY id ASC;",
        )?;
        let ids = stmt
            .query_map([since_ms], |row| row.get(0))?
            .collect::<Result<Vec<CascadeLogId>, _>>()?;
        Ok(ids)
    }

    fn query_history(
        &self,
        query: &CascadeHistoryQuery,
        limit: u32,
    ) -> RepoResult<Vec<CascadeLogEntry>> {
        let mut sql = format!("{CASCADE_LOG_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(master_var_id) = query.master_var_id {
            sql.push_str(" AND master_var_id = ?");
            bind_values.push(Value::Text(master_var_id.to_string()));
        }
        if let Some(status) = query.status {
            sql.push_str(" AND status = ?");
            bind_values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(date_from) = query.date_from {
            sql.push_str(" AND created_at >= ?");
            bind_values.push(Value::Integer(date_from));
        }
        if let Some(date_to) = query.date_to {
            sql.push_str(" AND created_at <= ?");
            bind_values.push(Value::Integer(date_to));
        }

        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        bind_values.push(Value::Integer(i64::from(limit)));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(parse_entry_row(row)?);
        }
        Ok(entries)
    }

    fn counts_since(&self, since_ms: i64) -> RepoResult<CascadeCounts> {
        let counts = self.conn.query_row(
            "SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN status = 'completed' THEN affected_documents_count ELSE 0 END), 0)
             FROM cascade_log
             WHERE created_at >= ?1;",
            [since_ms],
            |row| {
                Ok(CascadeCounts {
                    total: row.get::<_, i64>(0)? as u64,
                    completed: row.get::<_, i64>(1)? as u64,
                    failed: row.get::<_, i64>(2)? as u64,
                    pending: row.get::<_, i64>(3)? as u64,
                    documents_updated: row.get::<_, i64>(4)? as u64,
                })
            },
        )?;
        Ok(counts)
    }

    fn prune_terminal_before(&self, cutoff_ms: i64) -> RepoResult<usize> {
        let deleted = self.conn.execute(
            "DELETE FROM cascade_log
             WHERE status IN ('completed', 'failed')
               AND created_at < ?1;",
            [cutoff_ms],
        )?;
        Ok(deleted)
    }
}

fn parse_entry_row(row: &Row<'_>) -> RepoResult<CascadeLogEntry> {
    let var_text: String = row.get("master_var_id")?;
    let status_text: String = row.get("status")?;
    let status = CascadeStatus::parse(&status_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid status `{status_text}` in cascade_log.status"))
    })?;

    Ok(CascadeLogEntry {
        id: row.get("id")?,
        master_var_id: parse_uuid(&var_text, "cascade_log.master_var_id")?,
        old_value: row.get("old_value")?,
        new_value: row.get("new_value")?,
        initiated_by: row.get("initiated_by")?,
        status,
        attempted_documents_count: row.get("attempted_documents_count")?,
        affected_documents_count: row.get("affected_documents_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completion_timestamp: row.get("completion_timestamp")?,
        error_message: row.get("error_message")?,
    })
}
