//! Cascade log model.
//!
//! # Invariants
//! - Entries start `pending` and settle to exactly one of `completed` or
//!   `failed` per processing attempt.
//! - `failed -> pending` happens only through an explicit retry.
//! - There is no persisted in-progress state.

use crate::model::variable::MasterVarId;
use serde::{Deserialize, Serialize};

/// Autoincrement id of a cascade log entry.
pub type CascadeLogId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStatus {
    Pending,
    Completed,
    Failed,
}

impl CascadeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Durable record of one master-default change and its propagation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeLogEntry {
    pub id: CascadeLogId,
    pub master_var_id: MasterVarId,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub initiated_by: String,
    pub status: CascadeStatus,
    /// Inheriting rows selected for the last attempt.
    pub attempted_documents_count: u32,
    /// Rows actually rewritten by the last attempt.
    pub affected_documents_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
    pub completion_timestamp: Option<i64>,
    pub error_message: Option<String>,
}

/// Filter for history queries. All bounds are inclusive epoch milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CascadeHistoryQuery {
    pub master_var_id: Option<MasterVarId>,
    pub status: Option<CascadeStatus>,
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub limit: Option<u32>,
}

/// Aggregate over cascade entries created inside a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStats {
    pub window_days: u32,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub pending: u64,
    pub total_documents_updated: u64,
    /// Documents updated per completed cascade; `0.0` when none completed.
    pub avg_per_cascade: f64,
}

#[cfg(test)]
mod tests {
    use super::CascadeStatus;

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [
            CascadeStatus::Pending,
            CascadeStatus::Completed,
            CascadeStatus::Failed,
        ] {
            assert_eq!(CascadeStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CascadeStatus::parse("in_progress"), None);
    }

    #[test]
    fn only_pending_is_non_terminal() {
        assert!(!CascadeStatus::Pending.is_terminal());
        assert!(CascadeStatus::Completed.is_terminal());
        assert!(CascadeStatus::Failed.is_terminal());
    }
}
