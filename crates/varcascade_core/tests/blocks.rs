mod common;

use common::EDITOR;
use rusqlite::Connection;
use varcascade_core::repo::task_repo::SqliteTaskRepository;
use varcascade_core::{
    open_db_in_memory, BlockService, CatalogService, CommonBlock, NewBlock, RepoError,
    TaskListQuery, TaskService, TaskType, ValidationError,
};

fn privacy_block(conn: &Connection) -> CommonBlock {
    let catalog = CatalogService::new(conn);
    let lease = catalog.create_template("Residential lease").unwrap();
    let notice = catalog.create_template("Entry notice").unwrap();
    BlockService::new(conn)
        .create_block(
            NewBlock {
                title: "Privacy clause".to_string(),
                content: "We keep your details private.".to_string(),
                tags: vec!["legal".to_string()],
                used_in: vec![lease.id, notice.id],
            },
            EDITOR,
        )
        .unwrap()
}

#[test]
fn new_block_starts_at_initial_version() {
    let conn = open_db_in_memory().unwrap();
    let block = privacy_block(&conn);

    assert_eq!(block.version, "1.0.0");
    assert_eq!(block.tags, vec!["legal".to_string()]);
    assert_eq!(block.used_in.len(), 2);
    assert!(BlockService::new(&conn)
        .list_block_versions(block.id)
        .unwrap()
        .is_empty());
}

#[test]
fn content_edits_bump_minor_and_keep_history() {
    let conn = open_db_in_memory().unwrap();
    let block = privacy_block(&conn);
    conn.execute(
        "UPDATE common_blocks SET version = '1.2.0' WHERE id = ?1;",
        [block.id.to_string()],
    )
    .unwrap();
    let service = BlockService::new(&conn);

    let first = service
        .update_common_block(block.id, "We never share your details.", "Tighten wording", EDITOR)
        .unwrap();
    assert_eq!(first.new_version, "1.3.0");
    assert_eq!(first.block.version, "1.3.0");
    assert_eq!(first.block.content, "We never share your details.");
    assert_eq!(first.affected_templates, block.used_in);

    let second = service
        .update_common_block(block.id, "We never sell your details.", "Legal review", "counsel@firm.test")
        .unwrap();
    assert_eq!(second.new_version, "1.4.0");

    let versions = service.list_block_versions(block.id).unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].version, "1.4.0");
    assert_eq!(versions[0].content_snapshot, "We never share your details.");
    assert_eq!(versions[0].author, "counsel@firm.test");
    assert_eq!(versions[1].version, "1.3.0");
    assert_eq!(versions[1].content_snapshot, "We keep your details private.");
    assert_eq!(versions[1].change_description, "Tighten wording");
}

#[test]
fn edit_flags_forks_once_until_acknowledged() {
    let conn = open_db_in_memory().unwrap();
    let block = privacy_block(&conn);
    let service = BlockService::new(&conn);
    let fork = service.fork_block(block.id, "Privacy clause (NSW)", EDITOR).unwrap();
    service.fork_block(block.id, "Privacy clause (VIC)", EDITOR).unwrap();
    assert!(!fork.needs_review);
    assert_eq!(fork.forked_from_version, "1.0.0");
    assert_eq!(fork.content, block.content);

    let first = service
        .update_common_block(block.id, "Updated clause.", "Refresh", EDITOR)
        .unwrap();
    assert_eq!(first.affected_forks, 2);
    assert!(service.get_fork(fork.id).unwrap().needs_review);

    let second = service
        .update_common_block(block.id, "Updated clause again.", "Refresh", EDITOR)
        .unwrap();
    assert_eq!(second.affected_forks, 0);

    let acknowledged = service.acknowledge_fork_review(fork.id).unwrap();
    assert!(!acknowledged.needs_review);
    assert!(acknowledged.reviewed_at.is_some());
    assert_eq!(
        service
            .list_forks(block.id)
            .unwrap()
            .iter()
            .filter(|fork| fork.needs_review)
            .count(),
        1
    );
}

#[test]
fn edit_raises_template_and_platform_tasks() {
    let conn = open_db_in_memory().unwrap();
    let block = privacy_block(&conn);
    let service = BlockService::with_external_platforms(&conn, vec!["client_portal".to_string()]);

    service
        .update_common_block(block.id, "Updated clause.", "Refresh", EDITOR)
        .unwrap();

    let tasks = TaskService::new(SqliteTaskRepository::new(&conn))
        .list_tasks(&TaskListQuery::default())
        .unwrap();
    assert_eq!(tasks.len(), 2);

    let template_task = tasks
        .iter()
        .find(|task| task.task_type == TaskType::CascadeUpdate)
        .unwrap();
    let expected_templates: Vec<String> = block.used_in.iter().map(ToString::to_string).collect();
    assert_eq!(template_task.affected_items, expected_templates);
    assert_eq!(template_task.source_id, block.id.to_string());
    assert!(template_task.title.contains("v1.1.0"));

    let platform_task = tasks
        .iter()
        .find(|task| task.task_type == TaskType::ExternalPlatform)
        .unwrap();
    assert_eq!(platform_task.affected_items, vec!["client_portal".to_string()]);
    assert!(!platform_task.completed);
}

#[test]
fn failed_task_insert_rolls_back_whole_edit() {
    let conn = open_db_in_memory().unwrap();
    let block = privacy_block(&conn);
    let service = BlockService::new(&conn);
    service.fork_block(block.id, "Privacy clause (NSW)", EDITOR).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_platform_tasks
         BEFORE INSERT ON cascade_tasks
         WHEN NEW.task_type = 'external_platform'
         BEGIN
             SELECT RAISE(ABORT, 'task store offline');
         END;",
    )
    .unwrap();

    assert!(matches!(
        service
            .update_common_block(block.id, "Updated clause.", "Refresh", EDITOR)
            .unwrap_err(),
        RepoError::Db(_)
    ));

    let unchanged = service.get_block(block.id).unwrap();
    assert_eq!(unchanged.version, "1.0.0");
    assert_eq!(unchanged.content, block.content);
    assert!(service.list_block_versions(block.id).unwrap().is_empty());
    assert!(!service.list_forks(block.id).unwrap()[0].needs_review);
    let task_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM cascade_tasks;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(task_count, 0);
}

#[test]
fn invalid_requests_are_rejected() {
    let conn = open_db_in_memory().unwrap();
    let block = privacy_block(&conn);
    let service = BlockService::new(&conn);

    assert!(matches!(
        service
            .update_common_block(uuid::Uuid::new_v4(), "x", "Refresh", EDITOR)
            .unwrap_err(),
        RepoError::NotFound { .. }
    ));
    assert!(matches!(
        service
            .update_common_block(block.id, "x", "  ", EDITOR)
            .unwrap_err(),
        RepoError::Validation(ValidationError::EmptyField("change_description"))
    ));

    conn.execute(
        "UPDATE common_blocks SET version = 'v2' WHERE id = ?1;",
        [block.id.to_string()],
    )
    .unwrap();
    assert!(matches!(
        service
            .update_common_block(block.id, "x", "Refresh", EDITOR)
            .unwrap_err(),
        RepoError::Validation(ValidationError::InvalidVersion(_))
    ));
    assert!(matches!(
        service.acknowledge_fork_review(uuid::Uuid::new_v4()).unwrap_err(),
        RepoError::NotFound { .. }
    ));
}
