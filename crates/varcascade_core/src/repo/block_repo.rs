//! Common block repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist shared blocks, their append-only version history and forks.
//!
//! # Invariants
//! - `block_versions` rows are only ever inserted.
//! - Flagging forks touches only rows with `needs_review = 0`, in one statement.

use crate::model::block::{BlockId, BlockVersion, CommonBlock, ForkId, ForkedBlock};
use crate::repo::{
    bool_to_int, decode_json, encode_json, parse_bool, parse_uuid, RepoError, RepoResult,
};
use rusqlite::{params, Connection, Row};

const BLOCK_SELECT_SQL: &str = "SELECT
    id,
    title,
    content,
    version,
    tags_json,
    used_in_json,
    created_by,
    created_at,
    updated_at
FROM common_blocks";

const FORK_SELECT_SQL: &str = "SELECT
    id,
    source_block_id,
    title,
    content,
    forked_from_version,
    needs_review,
    created_by,
    created_at,
    reviewed_at
FROM forked_blocks";

/// Repository interface for common blocks.
pub trait BlockRepository {
    fn create_block(&self, block: &CommonBlock) -> RepoResult<BlockId>;
    fn get_block(&self, id: BlockId) -> RepoResult<Option<CommonBlock>>;
    fn update_block_content(&self, id: BlockId, content: &str, version: &str) -> RepoResult<()>;
    fn append_version(
        &self,
        block_id: BlockId,
        version: &str,
        content_snapshot: &str,
        change_description: &str,
        author: &str,
    ) -> RepoResult<i64>;
    /// History rows, newest first.
    fn list_versions(&self, block_id: BlockId) -> RepoResult<Vec<BlockVersion>>;
    fn create_fork(&self, fork: &ForkedBlock) -> RepoResult<ForkId>;
    fn get_fork(&self, id: ForkId) -> RepoResult<Option<ForkedBlock>>;
    fn list_forks(&self, block_id: BlockId) -> RepoResult<Vec<ForkedBlock>>;
    /// Sets `needs_review` on every fork not yet flagged. Returns rows flagged.
    fn flag_forks_for_review(&self, block_id: BlockId) -> RepoResult<usize>;
    fn clear_fork_review(&self, id: ForkId) -> RepoResult<()>;
}

/// SQLite-backed block repository.
pub struct SqliteBlockRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteBlockRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl BlockRepository for SqliteBlockRepository<'_> {
    fn create_block(&self, block: &CommonBlock) -> RepoResult<BlockId> {
        self.conn.execute(
            "INSERT INTO common_blocks (
                id,
                title,
                content,
                version,
                tags_json,
                used_in_json,
                created_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                block.id.to_string(),
                block.title.as_str(),
                block.content.as_str(),
                block.version.as_str(),
                encode_json(&block.tags, "common_blocks.tags_json")?,
                encode_json(&block.used_in, "common_blocks.used_in_json")?,
                block.created_by.as_str(),
            ],
        )?;
        Ok(block.id)
    }

    fn get_block(&self, id: BlockId) -> RepoResult<Option<CommonBlock>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{BLOCK_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_block_row(row)?));
        }
        Ok(None)
    }

    fn update_block_content(&self, id: BlockId, content: &str, version: &str) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE common_blocks
             SET
                content = ?2,
                version = ?3,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), content, version],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("common block", id));
        }
        Ok(())
    }

    fn append_version(
        &self,
        block_id: BlockId,
        version: &str,
        content_snapshot: &str,
        change_description: &str,
        author: &str,
    ) -> RepoResult<i64> {
        self.conn.execute(
            "INSERT INTO block_versions (
                block_id,
                version,
                content_snapshot,
                change_description,
                author
            ) VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                block_id.to_string(),
                version,
                content_snapshot,
                change_description,
                author
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn list_versions(&self, block_id: BlockId) -> RepoResult<Vec<BlockVersion>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                id,
                block_id,
                version,
                content_snapshot,
                change_description,
                author,
                created_at
             FROM block_versions
             WHERE block_id = ?1
             ORDER BY id DESC;",
        )?;
        let mut rows = stmt.query([block_id.to_string()])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            let block_text: String = row.get("block_id")?;
            versions.push(BlockVersion {
                id: row.get("id")?,
                block_id: parse_uuid(&block_text, "block_versions.block_id")?,
                version: row.get("version")?,
                content_snapshot: row.get("content_snapshot")?,
                change_description: row.get("change_description")?,
                author: row.get("author")?,
                created_at: row.get("created_at")?,
            });
        }
        Ok(versions)
    }

    fn create_fork(&self, fork: &ForkedBlock) -> RepoResult<ForkId> {
        self.conn.execute(
            "INSERT INTO forked_blocks (
                id,
                source_block_id,
                title,
                content,
                forked_from_version,
                needs_review,
                created_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                fork.id.to_string(),
                fork.source_block_id.to_string(),
                fork.title.as_str(),
                fork.content.as_str(),
                fork.forked_from_version.as_str(),
                bool_to_int(fork.needs_review),
                fork.created_by.as_str(),
            ],
        )?;
        Ok(fork.id)
    }

    fn get_fork(&self, id: ForkId) -> RepoResult<Option<ForkedBlock>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{FORK_SELECT_SQL} WHERE id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_fork_row(row)?));
        }
        Ok(None)
    }

    fn list_forks(&self, block_id: BlockId) -> RepoResult<Vec<ForkedBlock>> {
        let mut stmt = self.conn.prepare(&format!(
            "{FORK_SELECT_SQL}
             WHERE source_block_id = ?1
             ORDER BY created_at ASC, id ASC;"
        ))?;
        let mut rows = stmt.query([block_id.to_string()])?;
        let mut forks = Vec::new();
        while let Some(row) = rows.next()? {
            forks.push(parse_fork_row(row)?);
        }
        Ok(forks)
    }

    fn flag_forks_for_review(&self, block_id: BlockId) -> RepoResult<usize> {
        let flagged = self.conn.execute(
            "UPDATE forked_blocks
             SET
                needs_review = 1,
                reviewed_at = NULL
             WHERE source_block_id = ?1
               AND needs_review = 0;",
            [block_id.to_string()],
        )?;
        Ok(flagged)
    }

    fn clear_fork_review(&self, id: ForkId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE forked_blocks
             SET
                needs_review = 0,
                reviewed_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            [id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("forked block", id));
        }
        Ok(())
    }
}

fn parse_block_row(row: &Row<'_>) -> RepoResult<CommonBlock> {
    let id_text: String = row.get("id")?;
    let tags_json: String = row.get("tags_json")?;
    let used_in_json: String = row.get("used_in_json")?;
    Ok(CommonBlock {
        id: parse_uuid(&id_text, "common_blocks.id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        version: row.get("version")?,
        tags: decode_json(&tags_json, "common_blocks.tags_json")?,
        used_in: decode_json(&used_in_json, "common_blocks.used_in_json")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_fork_row(row: &Row<'_>) -> RepoResult<ForkedBlock> {
    let id_text: String = row.get("id")?;
    let source_text: String = row.get("source_block_id")?;
    Ok(ForkedBlock {
        id: parse_uuid(&id_text, "forked_blocks.id")?,
        source_block_id: parse_uuid(&source_text, "forked_blocks.source_block_id")?,
        title: row.get("title")?,
        content: row.get("content")?,
        forked_from_version: row.get("forked_from_version")?,
        needs_review: parse_bool(row.get("needs_review")?, "forked_blocks.needs_review")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        reviewed_at: row.get("reviewed_at")?,
    })
}
