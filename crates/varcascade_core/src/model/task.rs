//! Reviewer task model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TaskId = Uuid;

/// Kind of follow-up work raised by a cascade or block change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Templates embedding a changed block need re-checking.
    CascadeUpdate,
    /// A forked copy diverged from its changed source.
    ForkReview,
    /// Externally published surfaces may carry stale content.
    ExternalPlatform,
}

impl TaskType {
    pub const ALL: [TaskType; 3] = [
        TaskType::CascadeUpdate,
        TaskType::ForkReview,
        TaskType::ExternalPlatform,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CascadeUpdate => "cascade_update",
            Self::ForkReview => "fork_review",
            Self::ExternalPlatform => "external_platform",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cascade_update" => Some(Self::CascadeUpdate),
            "fork_review" => Some(Self::ForkReview),
            "external_platform" => Some(Self::ExternalPlatform),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeTask {
    pub id: TaskId,
    pub title: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    /// Block or variable id that raised the task.
    pub source_id: String,
    pub affected_items: Vec<String>,
    pub completed: bool,
    pub completed_by: Option<String>,
    pub completed_at: Option<i64>,
    pub created_at: i64,
}

impl CascadeTask {
    /// Creates an open task with a generated id.
    pub fn new(
        title: impl Into<String>,
        task_type: TaskType,
        source_id: impl Into<String>,
        affected_items: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            task_type,
            source_id: source_id.into(),
            affected_items,
            completed: false,
            completed_by: None,
            completed_at: None,
            created_at: 0,
        }
    }
}

/// Filter for task listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskListQuery {
    pub task_type: Option<TaskType>,
    pub completed: Option<bool>,
}

/// Open task counts with every known type present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTaskCounts {
    pub cascade_update: u64,
    pub fork_review: u64,
    pub external_platform: u64,
    pub total: u64,
}

impl PendingTaskCounts {
    /// Adds `count` open tasks of `task_type`.
    pub fn add(&mut self, task_type: TaskType, count: u64) {
        match task_type {
            TaskType::CascadeUpdate => self.cascade_update += count,
            TaskType::ForkReview => self.fork_review += count,
            TaskType::ExternalPlatform => self.external_platform += count,
        }
        self.total += count;
    }
}

#[cfg(test)]
mod tests {
    use super::{PendingTaskCounts, TaskType};

    #[test]
    fn every_task_type_round_trips() {
        for task_type in TaskType::ALL {
            assert_eq!(TaskType::parse(task_type.as_str()), Some(task_type));
        }
    }

    #[test]
    fn pending_counts_track_total() {
        let mut counts = PendingTaskCounts::default();
        counts.add(TaskType::ForkReview, 2);
        counts.add(TaskType::ExternalPlatform, 1);
        assert_eq!(counts.cascade_update, 0);
        assert_eq!(counts.fork_review, 2);
        assert_eq!(counts.total, 3);
    }
}
