mod common;

use common::EDITOR;
use rusqlite::Connection;
use varcascade_core::repo::task_repo::SqliteTaskRepository;
use varcascade_core::{
    open_db_in_memory, PendingTaskCounts, RepoError, TaskListQuery, TaskService, TaskType,
    ValidationError,
};

fn service(conn: &Connection) -> TaskService<SqliteTaskRepository<'_>> {
    TaskService::new(SqliteTaskRepository::new(conn))
}

#[test]
fn create_task_persists_open_task() {
    let conn = open_db_in_memory().unwrap();
    let tasks = service(&conn);

    let task = tasks
        .create_task(
            "Review NSW privacy fork",
            TaskType::ForkReview,
            "fork-1",
            vec!["fork-1".to_string()],
        )
        .unwrap();

    assert_eq!(task.title, "Review NSW privacy fork");
    assert_eq!(task.task_type, TaskType::ForkReview);
    assert_eq!(task.affected_items, vec!["fork-1".to_string()]);
    assert!(!task.completed);
    assert_eq!(task.completed_by, None);
    assert_eq!(tasks.get_task(task.id).unwrap(), task);
}

#[test]
fn create_task_requires_title_and_source() {
    let conn = open_db_in_memory().unwrap();
    let tasks = service(&conn);

    assert!(matches!(
        tasks
            .create_task(" ", TaskType::CascadeUpdate, "b1", Vec::new())
            .unwrap_err(),
        RepoError::Validation(ValidationError::EmptyField("title"))
    ));
    assert!(matches!(
        tasks
            .create_task("Check", TaskType::CascadeUpdate, "", Vec::new())
            .unwrap_err(),
        RepoError::Validation(ValidationError::EmptyField("source_id"))
    ));
}

#[test]
fn list_filters_by_type_and_completion() {
    let conn = open_db_in_memory().unwrap();
    let tasks = service(&conn);
    let first = tasks
        .create_task("Templates", TaskType::CascadeUpdate, "b1", Vec::new())
        .unwrap();
    tasks
        .create_task("Platforms", TaskType::ExternalPlatform, "b1", Vec::new())
        .unwrap();
    tasks
        .create_task("More templates", TaskType::CascadeUpdate, "b2", Vec::new())
        .unwrap();
    tasks.complete_task(first.id, EDITOR).unwrap();

    let all = tasks.list_tasks(&TaskListQuery::default()).unwrap();
    let titles: Vec<&str> = all.iter().map(|task| task.title.as_str()).collect();
    assert_eq!(titles, vec!["Templates", "Platforms", "More templates"]);

    let open_updates = tasks
        .list_tasks(&TaskListQuery {
            task_type: Some(TaskType::CascadeUpdate),
            completed: Some(false),
        })
        .unwrap();
    assert_eq!(open_updates.len(), 1);
    assert_eq!(open_updates[0].title, "More templates");

    let done = tasks
        .list_tasks(&TaskListQuery {
            task_type: None,
            completed: Some(true),
        })
        .unwrap();
    assert_eq!(done.len(), 1);
    assert_eq!(done[0].id, first.id);
}

#[test]
fn completing_twice_is_rejected() {
    let conn = open_db_in_memory().unwrap();
    let tasks = service(&conn);
    let task = tasks
        .create_task("Platforms", TaskType::ExternalPlatform, "b1", Vec::new())
        .unwrap();

    let completed = tasks.complete_task(task.id, EDITOR).unwrap();
    assert!(completed.completed);
    assert_eq!(completed.completed_by.as_deref(), Some(EDITOR));
    assert!(completed.completed_at.is_some());

    assert!(matches!(
        tasks.complete_task(task.id, "someone@firm.test").unwrap_err(),
        RepoError::Validation(ValidationError::InvalidState(_))
    ));
    assert_eq!(
        tasks.get_task(task.id).unwrap().completed_by.as_deref(),
        Some(EDITOR)
    );
    assert!(matches!(
        tasks.complete_task(uuid::Uuid::new_v4(), EDITOR).unwrap_err(),
        RepoError::NotFound { .. }
    ));
}

#[test]
fn delete_removes_task() {
    let conn = open_db_in_memory().unwrap();
    let tasks = service(&conn);
    let task = tasks
        .create_task("Templates", TaskType::CascadeUpdate, "b1", Vec::new())
        .unwrap();

    tasks.delete_task(task.id).unwrap();

    assert!(matches!(
        tasks.get_task(task.id).unwrap_err(),
        RepoError::NotFound { .. }
    ));
    assert!(matches!(
        tasks.delete_task(task.id).unwrap_err(),
        RepoError::NotFound { .. }
    ));
}

#[test]
fn pending_counts_cover_every_type() {
    let conn = open_db_in_memory().unwrap();
    let tasks = service(&conn);
    assert_eq!(
        tasks.list_pending_tasks_by_type().unwrap(),
        PendingTaskCounts::default()
    );

    tasks
        .create_task("Templates", TaskType::CascadeUpdate, "b1", Vec::new())
        .unwrap();
    tasks
        .create_task("More templates", TaskType::CascadeUpdate, "b2", Vec::new())
        .unwrap();
    let platform = tasks
        .create_task("Platforms", TaskType::ExternalPlatform, "b1", Vec::new())
        .unwrap();
    tasks.complete_task(platform.id, EDITOR).unwrap();

    let counts = tasks.list_pending_tasks_by_type().unwrap();
    assert_eq!(counts.cascade_update, 2);
    assert_eq!(counts.fork_review, 0);
    assert_eq!(counts.external_platform, 0);
    assert_eq!(counts.total, 2);
}
