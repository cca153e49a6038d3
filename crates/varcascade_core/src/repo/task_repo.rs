//! Task tracker repository contracts and SQLite implementation.

use crate::model::task::{CascadeTask, PendingTaskCounts, TaskId, TaskListQuery, TaskType};
use crate::model::validation::ValidationError;
use crate::repo::{bool_to_int, decode_json, encode_json, parse_bool, parse_uuid, RepoError, RepoResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const TASK_SELECT_SQL: &str = "SELECT
    id,
    title,
    task_type,
    source_id,
    affected_items_json,
    completed,
    completed_by,
    completed_at,
    created_at
FROM cascade_tasks";

/// Repository interface for reviewer tasks.
pub trait TaskRepository {
    fn create_task(&self, task: &CascadeTask) -> RepoResult<TaskId>;
    fn get_task(&self, id: TaskId) -> RepoResult<Option<CascadeTask>>;
    /// Lists tasks, oldest first.
    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<CascadeTask>>;
    fn complete_task(&self, id: TaskId, completed_by: &str) -> RepoResult<()>;
    fn delete_task(&self, id: TaskId) -> RepoResult<()>;
    fn pending_counts(&self) -> RepoResult<PendingTaskCounts>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTaskRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create_task(&self, task: &CascadeTask) -> RepoResult<TaskId> {
        self.conn.execute(
            "INSERT INTO cascade_tasks (
                id,
                title,
                task_type,
                source_id,
                affected_items_json,
                completed,
                completed_by,
                completed_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
            params![
                task.id.to_string(),
                task.title.as_str(),
                task.task_type.as_str(),
                task.source_id.as_str(),
                encode_json(&task.affected_items, "cascade_tasks.affected_items_json")?,
                bool_to_int(task.completed),
                task.completed_by.as_deref(),
                task.completed_at,
            ],
        )?;
        Ok(task.id)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<CascadeTask>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{TASK_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_task_row(row)?));
        }
        Ok(None)
    }

    fn list_tasks(&self, query: &TaskListQuery) -> RepoResult<Vec<CascadeTask>> {
        let mut sql = format!("{TASK_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(task_type) = query.task_type {
            sql.push_str(" AND task_type = ?");
            bind_values.push(Value::Text(task_type.as_str().to_string()));
        }
        if let Some(completed) = query.completed {
            sql.push_str(" AND completed = ?");
            bind_values.push(Value::Integer(bool_to_int(completed)));
        }
        sql.push_str(" ORDER BY created_at ASC, rowid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn complete_task(&self, id: TaskId, completed_by: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE cascade_tasks
             SET
                completed = 1,
                completed_by = ?2,
                completed_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1
               AND completed = 0;",
            params![id.to_string(), completed_by],
        )?;
        if changed == 0 {
            return match self.get_task(id)? {
                Some(_) => Err(RepoError::Validation(ValidationError::InvalidState(format!(
                    "task {id} is already completed"
                )))),
                None => Err(RepoError::not_found("task", id)),
            };
        }
        Ok(())
    }

    fn delete_task(&self, id: TaskId) -> RepoResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM cascade_tasks WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::not_found("task", id));
        }
        Ok(())
    }

    fn pending_counts(&self) -> RepoResult<PendingTaskCounts> {
        let mut stmt = self.conn.prepare(
            "SELECT task_type, COUNT(*)
             FROM cascade_tasks
             WHERE completed = 0
             GROUP BY task_type;",
        )?;
        let mut rows = stmt.query([])?;
        let mut counts = PendingTaskCounts::default();
        while let Some(row) = rows.next()? {
            let type_text: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            // The CHECK constraint rules out unknown types.
            if let Some(task_type) = TaskType::parse(&type_text) {
                counts.add(task_type, count as u64);
            }
        }
        Ok(counts)
    }
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<CascadeTask> {
    let id_text: String = row.get("id")?;
    let type_text: String = row.get("task_type")?;
    let task_type = TaskType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid task type `{type_text}` in cascade_tasks.task_type"
        ))
    })?;
    let items_json: String = row.get("affected_items_json")?;

    Ok(CascadeTask {
        id: parse_uuid(&id_text, "cascade_tasks.id")?,
        title: row.get("title")?,
        task_type,
        source_id: row.get("source_id")?,
        affected_items: decode_json(&items_json, "cascade_tasks.affected_items_json")?,
        completed: parse_bool(row.get("completed")?, "cascade_tasks.completed")?,
        completed_by: row.get("completed_by")?,
        completed_at: row.get("completed_at")?,
        created_at: row.get("created_at")?,
    })
}
