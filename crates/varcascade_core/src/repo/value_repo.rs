//! Document value repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist per-document values (tier 3) keyed by `(document_id, master_var_id)`.
//! - Select cascade targets: inheriting rows whose template still binds the variable.
//!
//! # Invariants
//! - Cascade writes only touch rows with `is_inherited = 1`; the guard lives
//!   in the UPDATE itself.

use crate::model::document::{DocumentId, DocumentValue, TemplateId};
use crate::model::variable::MasterVarId;
use crate::repo::{bool_to_int, parse_bool, parse_uuid, RepoResult};
use rusqlite::{params, Connection, Row};

const VALUE_SELECT_SQL: &str = "SELECT
    document_id,
    master_var_id,
    variable_value,
    is_inherited,
    last_updated,
    updated_by
FROM document_values";

/// Inheriting row selected for propagation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritingTarget {
    pub document_id: DocumentId,
    /// Tier-2 override of the document's template, which shields the row
    /// from the master value.
    pub template_override: Option<String>,
}

/// Repository interface for document values.
pub trait DocumentValueRepository {
    fn get_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Option<DocumentValue>>;
    fn list_values(&self, document_id: DocumentId) -> RepoResult<Vec<DocumentValue>>;
    /// Inserts or replaces the value for the `(document, variable)` pair.
    fn upsert_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        is_inherited: bool,
        actor: &str,
    ) -> RepoResult<()>;
    fn list_inheriting_targets(&self, master_var_id: MasterVarId)
        -> RepoResult<Vec<InheritingTarget>>;
    /// Rewrites one inheriting row. Returns the number of rows changed (0 or 1).
    fn update_inherited_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        actor: &str,
    ) -> RepoResult<usize>;
    /// Rewrites every inheriting row of one template's documents.
    fn refresh_inherited_for_template(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        actor: &str,
    ) -> RepoResult<usize>;
}

/// SQLite-backed document value repository.
pub struct SqliteDocumentValueRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteDocumentValueRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl DocumentValueRepository for SqliteDocumentValueRepository<'_> {
    fn get_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Option<DocumentValue>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VALUE_SELECT_SQL}
             WHERE document_id = ?1
               AND master_var_id = ?2;"
        ))?;
        let mut rows = stmt.query(params![document_id.to_string(), master_var_id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_value_row(row)?));
        }
        Ok(None)
    }

    fn list_values(&self, document_id: DocumentId) -> RepoResult<Vec<DocumentValue>> {
        let mut stmt = self.conn.prepare(&format!(
            "{VALUE_SELECT_SQL}
             WHERE document_id = ?1
             ORDER BY master_var_id ASC;"
        ))?;
        let mut rows = stmt.query([document_id.to_string()])?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(parse_value_row(row)?);
        }
        Ok(values)
    }

    fn upsert_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        is_inherited: bool,
        actor: &str,
    ) -> RepoResult<()> {
        self.conn.execute(
            "INSERT INTO document_values (
                document_id,
                master_var_id,
                variable_value,
                is_inherited,
                updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT (document_id, master_var_id) DO UPDATE SET
                variable_value = excluded.variable_value,
                is_inherited = excluded.is_inherited,
                updated_by = excluded.updated_by,
                last_updated = (strftime('%s', 'now') * 1000);",
            params![
                document_id.to_string(),
                master_var_id.to_string(),
                value,
                bool_to_int(is_inherited),
                actor,
            ],
        )?;
        Ok(())
    }

    fn list_inheriting_targets(
        &self,
        master_var_id: MasterVarId,
    ) -> RepoResult<Vec<InheritingTarget>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                dv.document_id AS document_id,
                (
                  SELECT tb.default_override
                  FROM template_bindings tb
                  WHERE tb.template_id = d.template_id
                    AND tb.master_var_id = dv.master_var_id
                    AND tb.default_override IS NOT NULL
                  ORDER BY tb.variable_key ASC
                  LIMIT 1
                ) AS template_override
             FROM document_values dv
             INNER JOIN documents d ON d.id = dv.document_id
             WHERE dv.master_var_id = ?1
               AND dv.is_inherited = 1
               AND EXISTS (
                 SELECT 1
                 FROM template_bindings tb
                 WHERE tb.template_id = d.template_id
                   AND tb.master_var_id = dv.master_var_id
               )
             ORDER BY dv.document_id ASC;",
        )?;
        let mut rows = stmt.query([master_var_id.to_string()])?;
        let mut targets = Vec::new();
        while let Some(row) = rows.next()? {
            let document_text: String = row.get("document_id")?;
            targets.push(InheritingTarget {
                document_id: parse_uuid(&document_text, "document_values.document_id")?,
                template_override: row.get("template_override")?,
            });
        }
        Ok(targets)
    }

    fn update_inherited_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        actor: &str,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE document_values
             SET
                variable_value = ?3,
                updated_by = ?4,
                last_updated = (strftime('%s', 'now') * 1000)
             WHERE document_id = ?1
               AND master_var_id = ?2
               AND is_inherited = 1;",
            params![document_id.to_string(), master_var_id.to_string(), value, actor],
        )?;
        Ok(changed)
    }

    fn refresh_inherited_for_template(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        actor: &str,
    ) -> RepoResult<usize> {
        let changed = self.conn.execute(
            "UPDATE document_values
             SET
                variable_value = ?3,
                updated_by = ?4,
                last_updated = (strftime('%s', 'now') * 1000)
             WHERE master_var_id = ?2
               AND is_inherited = 1
               AND document_id IN (SELECT id FROM documents WHERE template_id = ?1);",
            params![template_id.to_string(), master_var_id.to_string(), value, actor],
        )?;
        Ok(changed)
    }
}

fn parse_value_row(row: &Row<'_>) -> RepoResult<DocumentValue> {
    let document_text: String = row.get("document_id")?;
    let var_text: String = row.get("master_var_id")?;
    Ok(DocumentValue {
        document_id: parse_uuid(&document_text, "document_values.document_id")?,
        master_var_id: parse_uuid(&var_text, "document_values.master_var_id")?,
        variable_value: row.get("variable_value")?,
        is_inherited: parse_bool(row.get("is_inherited")?, "document_values.is_inherited")?,
        last_updated: row.get("last_updated")?,
        updated_by: row.get("updated_by")?,
    })
}
