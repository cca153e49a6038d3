//! Template, document and binding repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist templates, generated documents and template bindings (tier 2).
//! - Answer the document → template → binding walk used by resolution.
//!
//! # Invariants
//! - Bindings are unique per `(template_id, master_var_id, variable_key)`.
//! - When one template binds a variable under several keys, the tier-2
//!   override is the first non-null override ordered by `variable_key`.
//! - A binding whose removal would orphan document values is never deleted.

use crate::model::document::{Document, DocumentId, Template, TemplateBinding, TemplateId};
use crate::model::validation::require_text;
use crate::model::variable::MasterVarId;
use crate::repo::{
    bool_to_int, map_unique_violation, parse_bool, parse_uuid, RepoError, RepoResult,
    UsageCounts,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const BINDING_SELECT_SQL: &str = "SELECT
    template_id,
    master_var_id,
    variable_key,
    is_required,
    default_override,
    updated_at
FROM template_bindings";

/// Repository interface for templates, documents and bindings.
pub trait TemplateRepository {
    fn create_template(&self, name: &str) -> RepoResult<Template>;
    fn get_template(&self, id: TemplateId) -> RepoResult<Option<Template>>;
    fn create_document(
        &self,
        template_id: TemplateId,
        title: &str,
        created_by: &str,
    ) -> RepoResult<Document>;
    fn get_document(&self, id: DocumentId) -> RepoResult<Option<Document>>;
    fn list_documents_for_template(&self, template_id: TemplateId) -> RepoResult<Vec<Document>>;

    fn bind_variable(&self, binding: &TemplateBinding) -> RepoResult<()>;
    /// Bindings of one template ordered by `variable_key`.
    fn list_bindings(&self, template_id: TemplateId) -> RepoResult<Vec<TemplateBinding>>;
    /// Bindings connecting one template to one variable, ordered by key.
    fn find_bindings(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Vec<TemplateBinding>>;
    /// Tier-2 override for one template/variable pair, if any binding sets one.
    fn template_override(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Option<String>>;
    fn set_default_override(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
        default_override: Option<&str>,
    ) -> RepoResult<()>;
    fn binding_usage(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
    ) -> RepoResult<UsageCounts>;
    fn unbind_variable(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
    ) -> RepoResult<()>;
}

/// SQLite-backed template repository.
pub struct SqliteTemplateRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteTemplateRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl TemplateRepository for SqliteTemplateRepository<'_> {
    fn create_template(&self, name: &str) -> RepoResult<Template> {
        let name = require_text("name", name)?;
        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO templates (id, name) VALUES (?1, ?2);",
            params![id.to_string(), name],
        )?;
        self.get_template(id)?
            .ok_or_else(|| RepoError::InvalidData("created template missing on read-back".into()))
    }

    fn get_template(&self, id: TemplateId) -> RepoResult<Option<Template>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM templates WHERE id = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id_text, name, created_at)| {
            Ok(Template {
                id: parse_uuid(&id_text, "templates.id")?,
                name,
                created_at,
            })
        })
        .transpose()
    }

    fn create_document(
        &self,
        template_id: TemplateId,
        title: &str,
        created_by: &str,
    ) -> RepoResult<Document> {
        let title = require_text("title", title)?;
        let created_by = require_text("actor", created_by)?;
        if self.get_template(template_id)?.is_none() {
            return Err(RepoError::not_found("template", template_id));
        }

        let id = Uuid::new_v4();
        self.conn.execute(
            "INSERT INTO documents (id, template_id, title, created_by) VALUES (?1, ?2, ?3, ?4);",
            params![id.to_string(), template_id.to_string(), title, created_by],
        )?;
        self.get_document(id)?
            .ok_or_else(|| RepoError::InvalidData("created document missing on read-back".into()))
    }

    fn get_document(&self, id: DocumentId) -> RepoResult<Option<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, template_id, title, created_by, created_at
             FROM documents
             WHERE id = ?1;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_document_row(row)?));
        }
        Ok(None)
    }

    fn list_documents_for_template(&self, template_id: TemplateId) -> RepoResult<Vec<Document>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, template_id, title, created_by, created_at
             FROM documents
             WHERE template_id = ?1
             ORDER BY created_at ASC, id ASC;",
        )?;
        let mut rows = stmt.query([template_id.to_string()])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(parse_document_row(row)?);
        }
        Ok(documents)
    }

    fn bind_variable(&self, binding: &TemplateBinding) -> RepoResult<()> {
        let key = require_text("variable_key", &binding.variable_key)?;
        self.conn
            .execute(
                "INSERT INTO template_bindings (
                    template_id,
                    master_var_id,
                    variable_key,
                    is_required,
                    default_override
                ) VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    binding.template_id.to_string(),
                    binding.master_var_id.to_string(),
                    key,
                    bool_to_int(binding.is_required),
                    binding.default_override.as_deref(),
                ],
            )
            .map_err(|err| map_unique_violation(err, "template binding", key))?;
        Ok(())
    }

    fn list_bindings(&self, template_id: TemplateId) -> RepoResult<Vec<TemplateBinding>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BINDING_SELECT_SQL}
             WHERE template_id = ?1
             ORDER BY variable_key ASC, master_var_id ASC;"
        ))?;
        let mut rows = stmt.query([template_id.to_string()])?;
        let mut bindings = Vec::new();
        while let Some(row) = rows.next()? {
            bindings.push(parse_binding_row(row)?);
        }
        Ok(bindings)
    }

    fn find_bindings(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Vec<TemplateBinding>> {
        let mut stmt = self.conn.prepare(&format!(
            "{BINDING_SELECT_SQL}
             WHERE template_id = ?1
               AND master_var_id = ?2
             ORDER BY variable_key ASC;"
        ))?;
        let mut rows = stmt.query(params![template_id.to_string(), master_var_id.to_string()])?;
        let mut bindings = Vec::new();
        while let Some(row) = rows.next()? {
            bindings.push(parse_binding_row(row)?);
        }
        Ok(bindings)
    }

    fn template_override(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT default_override
                 FROM template_bindings
                 WHERE template_id = ?1
                   AND master_var_id = ?2
                   AND default_override IS NOT NULL
                 ORDER BY variable_key ASC
                 LIMIT 1;",
                params![template_id.to_string(), master_var_id.to_string()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_default_override(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
        default_override: Option<&str>,
    ) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE template_bindings
             SET
                default_override = ?4,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE template_id = ?1
               AND master_var_id = ?2
               AND variable_key = ?3;",
            params![
                template_id.to_string(),
                master_var_id.to_string(),
                variable_key,
                default_override,
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found(
                "template binding",
                format!("{template_id}/{master_var_id}/{variable_key}"),
            ));
        }
        Ok(())
    }

    fn binding_usage(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
    ) -> RepoResult<UsageCounts> {
        // Values stay reachable while another key still binds the variable.
        let document_values: i64 = self.conn.query_row(
            "SELECT COUNT(*)
             FROM document_values dv
             INNER JOIN documents d ON d.id = dv.document_id
             WHERE d.template_id = ?1
               AND dv.master_var_id = ?2
               AND NOT EXISTS (
                 SELECT 1
                 FROM template_bindings tb
                 WHERE tb.template_id = ?1
                   AND tb.master_var_id = ?2
                   AND tb.variable_key <> ?3
               );",
            params![template_id.to_string(), master_var_id.to_string(), variable_key],
            |row| row.get(0),
        )?;
        Ok(UsageCounts {
            bindings: 0,
            document_values: document_values as u64,
        })
    }

    fn unbind_variable(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
    ) -> RepoResult<()> {
        let usage = self.binding_usage(template_id, master_var_id, variable_key)?;
        if !usage.is_unused() {
            return Err(RepoError::InUse {
                entity: "template binding",
                id: format!("{template_id}/{master_var_id}/{variable_key}"),
                usage,
            });
        }

        let changed = self.conn.execute(
            "DELETE FROM template_bindings
             WHERE template_id = ?1
               AND master_var_id = ?2
               AND variable_key = ?3;",
            params![template_id.to_string(), master_var_id.to_string(), variable_key],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found(
                "template binding",
                format!("{template_id}/{master_var_id}/{variable_key}"),
            ));
        }
        Ok(())
    }
}

fn parse_document_row(row: &Row<'_>) -> RepoResult<Document> {
    let id_text: String = row.get("id")?;
    let template_text: String = row.get("template_id")?;
    Ok(Document {
        id: parse_uuid(&id_text, "documents.id")?,
        template_id: parse_uuid(&template_text, "documents.template_id")?,
        title: row.get("title")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
    })
}

fn parse_binding_row(row: &Row<'_>) -> RepoResult<TemplateBinding> {
    let template_text: String = row.get("template_id")?;
    let var_text: String = row.get("master_var_id")?;
    Ok(TemplateBinding {
        template_id: parse_uuid(&template_text, "template_bindings.template_id")?,
        master_var_id: parse_uuid(&var_text, "template_bindings.master_var_id")?,
        variable_key: row.get("variable_key")?,
        is_required: parse_bool(row.get("is_required")?, "template_bindings.is_required")?,
        default_override: row.get("default_override")?,
        updated_at: row.get("updated_at")?,
    })
}
