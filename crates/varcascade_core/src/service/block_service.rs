//! Common block versioning and review.
//!
//! # Responsibility
//! - Create, fork and update shared content blocks.
//! - On every content edit, append history, flag stale forks and open
//!   follow-up tasks, all in one transaction.
//!
//! # Invariants
//! - A content edit bumps MINOR only.
//! - Any failure during an edit rolls back every write of that edit.
//! - Each edit opens exactly one `cascade_update` and one
//!   `external_platform` task.

use crate::config::default_external_platforms;
use crate::model::block::{
    BlockId, BlockVersion, BlockVersionNumber, CommonBlock, ForkId, ForkedBlock,
};
use crate::model::document::TemplateId;
use crate::model::task::{CascadeTask, TaskType};
use crate::model::validation::require_text;
use crate::repo::block_repo::{BlockRepository, SqliteBlockRepository};
use crate::repo::task_repo::{SqliteTaskRepository, TaskRepository};
use crate::repo::{RepoError, RepoResult};
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::time::Instant;
use uuid::Uuid;

/// Request model for a new block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBlock {
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub used_in: Vec<TemplateId>,
}

/// Outcome of one content edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockUpdateResult {
    pub block: CommonBlock,
    pub affected_templates: Vec<TemplateId>,
    /// Forks newly flagged for review by this edit.
    pub affected_forks: usize,
    pub new_version: String,
}

/// Block service over one connection.
pub struct BlockService<'conn> {
    conn: &'conn Connection,
    external_platforms: Vec<String>,
}

impl<'conn> BlockService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self::with_external_platforms(conn, default_external_platforms())
    }

    pub fn with_external_platforms(conn: &'conn Connection, external_platforms: Vec<String>) -> Self {
        Self {
            conn,
            external_platforms,
        }
    }

    fn repo(&self) -> SqliteBlockRepository<'conn> {
        SqliteBlockRepository::new(self.conn)
    }

    /// Creates a block at version `1.0.0`.
    pub fn create_block(&self, request: NewBlock, actor: &str) -> RepoResult<CommonBlock> {
        let block = CommonBlock {
            id: Uuid::new_v4(),
            title: require_text("title", &request.title)?.to_string(),
            content: request.content,
            version: BlockVersionNumber::INITIAL.to_string(),
            tags: request.tags,
            used_in: request.used_in,
            created_by: require_text("actor", actor)?.to_string(),
            created_at: 0,
            updated_at: 0,
        };
        let id = self.repo().create_block(&block)?;
        info!("event=block_create module=blocks status=ok block_id={id}");
        self.get_block(id)
    }

    pub fn get_block(&self, id: BlockId) -> RepoResult<CommonBlock> {
        self.repo()
            .get_block(id)?
            .ok_or_else(|| RepoError::not_found("common block", id))
    }

    /// History of one block, newest first.
    pub fn list_block_versions(&self, block_id: BlockId) -> RepoResult<Vec<BlockVersion>> {
        self.get_block(block_id)?;
        self.repo().list_versions(block_id)
    }

    /// Replaces block content as one atomic edit.
    pub fn update_common_block(
        &self,
        block_id: BlockId,
        content: &str,
        change_description: &str,
        actor: &str,
    ) -> RepoResult<BlockUpdateResult> {
        let started_at = Instant::now();
        let actor = require_text("actor", actor)?;
        let change_description = require_text("change_description", change_description)?;

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let (block, new_version, affected_forks) = {
            let blocks = SqliteBlockRepository::new(&tx);
            let tasks = SqliteTaskRepository::new(&tx);

            let current = blocks
                .get_block(block_id)?
                .ok_or_else(|| RepoError::not_found("common block", block_id))?;
            let new_version = current
                .version
                .parse::<BlockVersionNumber>()?
                .bump_minor()?
                .to_string();

            blocks.update_block_content(block_id, content, &new_version)?;
            blocks.append_version(
                block_id,
                &new_version,
                &current.content,
                change_description,
                actor,
            )?;
            let affected_forks = blocks.flag_forks_for_review(block_id)?;

            tasks.create_task(&CascadeTask::new(
                format!("Review templates using block \"{}\" v{new_version}", current.title),
                TaskType::CascadeUpdate,
                block_id.to_string(),
                current.used_in.iter().map(ToString::to_string).collect(),
            ))?;
            tasks.create_task(&CascadeTask::new(
                format!("Republish block \"{}\" v{new_version}", current.title),
                TaskType::ExternalPlatform,
                block_id.to_string(),
                self.external_platforms.clone(),
            ))?;

            let block = blocks
                .get_block(block_id)?
                .ok_or_else(|| RepoError::InvalidData("updated block missing on read-back".into()))?;
            (block, new_version, affected_forks)
        };
        tx.commit()?;

        info!(
            "event=block_update module=blocks status=ok block_id={} version={} forks_flagged={} templates={} duration_ms={}",
            block_id,
            new_version,
            affected_forks,
            block.used_in.len(),
            started_at.elapsed().as_millis()
        );
        Ok(BlockUpdateResult {
            affected_templates: block.used_in.clone(),
            block,
            affected_forks,
            new_version,
        })
    }

    /// Copies the block's current content into a new fork.
    pub fn fork_block(&self, block_id: BlockId, title: &str, actor: &str) -> RepoResult<ForkedBlock> {
        let source = self.get_block(block_id)?;
        let fork = ForkedBlock {
            id: Uuid::new_v4(),
            source_block_id: block_id,
            title: require_text("title", title)?.to_string(),
            content: source.content,
            forked_from_version: source.version,
            needs_review: false,
            created_by: require_text("actor", actor)?.to_string(),
            created_at: 0,
            reviewed_at: None,
        };
        let id = self.repo().create_fork(&fork)?;
        info!("event=block_fork module=blocks status=ok block_id={block_id} fork_id={id}");
        self.get_fork(id)
    }

    pub fn get_fork(&self, fork_id: ForkId) -> RepoResult<ForkedBlock> {
        self.repo()
            .get_fork(fork_id)?
            .ok_or_else(|| RepoError::not_found("forked block", fork_id))
    }

    pub fn list_forks(&self, block_id: BlockId) -> RepoResult<Vec<ForkedBlock>> {
        self.repo().list_forks(block_id)
    }

    /// Clears `needs_review` once a reviewer has reconciled the fork.
    pub fn acknowledge_fork_review(&self, fork_id: ForkId) -> RepoResult<ForkedBlock> {
        self.repo().clear_fork_review(fork_id)?;
        self.get_fork(fork_id)
    }
}
