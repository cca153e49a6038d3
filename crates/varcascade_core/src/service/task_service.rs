//! Task tracker use-case service.

use crate::model::task::{CascadeTask, PendingTaskCounts, TaskId, TaskListQuery, TaskType};
use crate::model::validation::require_text;
use crate::repo::task_repo::TaskRepository;
use crate::repo::{RepoError, RepoResult};
use log::info;

/// Use-case service wrapper for task operations.
pub struct TaskService<R: TaskRepository> {
    repo: R,
}

impl<R: TaskRepository> TaskService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    pub fn create_task(
        &self,
        title: &str,
        task_type: TaskType,
        source_id: &str,
        affected_items: Vec<String>,
    ) -> RepoResult<CascadeTask> {
        let task = CascadeTask::new(
            require_text("title", title)?,
            task_type,
            require_text("source_id", source_id)?,
            affected_items,
        );
        let id = self.repo.create_task(&task)?;
        info!(
            "event=task_create module=tasks status=ok task_id={} type={}",
            id,
            task_type.as_str()
        );
        self.get_task(id)
    }

    pub fn get_task(&self, id: TaskId) -> RepoResult<CascadeTask> {
        self.repo
            .get_task(id)?
            .ok_or_else(|| RepoError::not_found("task", id))
    }

    pub fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<CascadeTask>> {
        self.repo.list_tasks(query)
    }

    /// Stamps completion; completing twice is a validation error.
    pub fn complete_task(&self, id: TaskId, actor: &str) -> RepoResult<CascadeTask> {
        let actor = require_text("actor", actor)?;
        self.repo.complete_task(id, actor)?;
        info!("event=task_complete module=tasks status=ok task_id={id}");
        self.get_task(id)
    }

    pub fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        self.repo.delete_task(id)
    }

    /// Open tasks per type; every known type is present.
    pub fn list_pending_tasks_by_type(&self) -> RepoResult<PendingTaskCounts> {
        self.repo.pending_counts()
    }
}
