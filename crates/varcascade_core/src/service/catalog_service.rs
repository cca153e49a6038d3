//! Catalog and template-binding administration.
//!
//! # Responsibility
//! - Create and maintain master variables, groups, templates and bindings.
//! - Generate documents with one inherited value per bound variable.
//! - Keep inheriting rows in step when a template override changes.
//!
//! # Invariants
//! - Master defaults are never written here; they change only through the
//!   cascade engine so every change is logged.
//! - Override changes and the refresh of inheriting rows commit together.

use crate::model::document::{Document, DocumentId, Template, TemplateBinding, TemplateId};
use crate::model::validation::require_text;
use crate::model::variable::{
    GroupId, GroupMember, GroupRef, MasterVarId, MasterVariable, VariableGroup, VariableType,
};
use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
use crate::repo::template_repo::{SqliteTemplateRepository, TemplateRepository};
use crate::repo::value_repo::{DocumentValueRepository, SqliteDocumentValueRepository};
use crate::repo::{RepoError, RepoResult};
use crate::service::resolution::inherited_value;
use log::info;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Request model for a new master variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMasterVariable {
    pub name: String,
    pub description: Option<String>,
    pub var_type: VariableType,
    pub options: Vec<String>,
    pub default_value: Option<String>,
}

/// Request model for binding a variable to a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingRequest {
    pub template_id: TemplateId,
    pub master_var_id: MasterVarId,
    pub variable_key: String,
    pub is_required: bool,
    pub default_override: Option<String>,
}

/// Catalog service over one connection.
pub struct CatalogService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> CatalogService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    fn catalog(&self) -> SqliteCatalogRepository<'conn> {
        SqliteCatalogRepository::new(self.conn)
    }

    fn templates(&self) -> SqliteTemplateRepository<'conn> {
        SqliteTemplateRepository::new(self.conn)
    }

    pub fn create_master_variable(
        &self,
        request: NewMasterVariable,
        actor: &str,
    ) -> RepoResult<MasterVariable> {
        let actor = require_text("actor", actor)?;
        let mut variable = MasterVariable::new(request.name.trim(), request.var_type, actor);
        variable.description = request.description;
        variable.options = request.options;
        variable.default_value = request.default_value;

        let id = self.catalog().create_variable(&variable)?;
        info!(
            "event=variable_create module=catalog status=ok master_var_id={} type={}",
            id,
            variable.var_type.as_str()
        );
        self.get_master_variable(id)
    }

    pub fn get_master_variable(&self, id: MasterVarId) -> RepoResult<MasterVariable> {
        self.catalog()
            .get_variable(id)?
            .ok_or_else(|| RepoError::not_found("master variable", id))
    }

    pub fn find_by_name(&self, name: &str) -> RepoResult<Option<MasterVariable>> {
        self.catalog().find_variable_by_name(name.trim())
    }

    pub fn list_master_variables(&self, include_inactive: bool) -> RepoResult<Vec<MasterVariable>> {
        self.catalog().list_variables(include_inactive)
    }

    /// Rewrites description, options and active flag.
    ///
    /// The current default must stay valid under the new options.
    pub fn update_master_variable_definition(
        &self,
        id: MasterVarId,
        description: Option<String>,
        options: Vec<String>,
        is_active: bool,
    ) -> RepoResult<MasterVariable> {
        let mut variable = self.get_master_variable(id)?;
        variable.description = description;
        variable.options = options;
        variable.is_active = is_active;
        self.catalog().update_variable_definition(&variable)?;
        self.get_master_variable(id)
    }

    /// Deletes an unreferenced variable; `InUse` reports what still points at it.
    pub fn delete_master_variable(&self, id: MasterVarId) -> RepoResult<()> {
        self.catalog().delete_variable(id)?;
        info!("event=variable_delete module=catalog status=ok master_var_id={id}");
        Ok(())
    }

    pub fn create_group(&self, name: &str, description: Option<String>) -> RepoResult<VariableGroup> {
        let group = VariableGroup {
            id: Uuid::new_v4(),
            name: require_text("name", name)?.to_string(),
            description,
        };
        self.catalog().create_group(&group)?;
        Ok(group)
    }

    pub fn list_groups(&self) -> RepoResult<Vec<VariableGroup>> {
        self.catalog().list_groups()
    }

    /// Adds or re-orders a membership.
    pub fn add_variable_to_group(
        &self,
        group_id: GroupId,
        master_var_id: MasterVarId,
        sort_order: i64,
    ) -> RepoResult<()> {
        self.catalog().add_to_group(group_id, master_var_id, sort_order)
    }

    pub fn remove_variable_from_group(
        &self,
        group_id: GroupId,
        master_var_id: MasterVarId,
    ) -> RepoResult<()> {
        self.catalog().remove_from_group(group_id, master_var_id)
    }

    pub fn list_group_variables(&self, group_id: GroupId) -> RepoResult<Vec<GroupMember>> {
        if self.catalog().get_group(group_id)?.is_none() {
            return Err(RepoError::not_found("variable group", group_id));
        }
        self.catalog().list_group_members(group_id)
    }

    pub fn groups_for_variable(&self, master_var_id: MasterVarId) -> RepoResult<Vec<GroupRef>> {
        self.catalog().groups_for_variable(master_var_id)
    }

    pub fn create_template(&self, name: &str) -> RepoResult<Template> {
        self.templates().create_template(name)
    }

    pub fn get_template(&self, id: TemplateId) -> RepoResult<Template> {
        self.templates()
            .get_template(id)?
            .ok_or_else(|| RepoError::not_found("template", id))
    }

    /// Generates a document with one inherited value per bound variable.
    pub fn create_document(
        &self,
        template_id: TemplateId,
        title: &str,
        actor: &str,
    ) -> RepoResult<Document> {
        let actor = require_text("actor", actor)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let document = {
            let templates = SqliteTemplateRepository::new(&tx);
            let values = SqliteDocumentValueRepository::new(&tx);
            let document = templates.create_document(template_id, title, actor)?;

            let bound: BTreeSet<MasterVarId> = templates
                .list_bindings(template_id)?
                .into_iter()
                .map(|binding| binding.master_var_id)
                .collect();
            for master_var_id in &bound {
                let value = inherited_value(&tx, template_id, *master_var_id)?;
                values.upsert_value(document.id, *master_var_id, value.as_deref(), true, actor)?;
            }
            info!(
                "event=document_create module=catalog status=ok document_id={} template_id={} values={}",
                document.id,
                template_id,
                bound.len()
            );
            document
        };
        tx.commit()?;
        Ok(document)
    }

    pub fn get_document(&self, id: DocumentId) -> RepoResult<Document> {
        self.templates()
            .get_document(id)?
            .ok_or_else(|| RepoError::not_found("document", id))
    }

    /// Binds a variable to a template.
    ///
    /// Existing documents of the template without a row for the variable
    /// receive an inherited one in the same transaction. Inheriting rows are
    /// rewritten when the new binding changes the tier-2 value.
    pub fn bind_variable(&self, request: BindingRequest) -> RepoResult<TemplateBinding> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        {
            let templates = SqliteTemplateRepository::new(&tx);
            let values = SqliteDocumentValueRepository::new(&tx);
            if templates.get_template(request.template_id)?.is_none() {
                return Err(RepoError::not_found("template", request.template_id));
            }
            let variable = SqliteCatalogRepository::new(&tx)
                .get_variable(request.master_var_id)?
                .ok_or_else(|| RepoError::not_found("master variable", request.master_var_id))?;
            variable.validate_value(request.default_override.as_deref())?;

            templates.bind_variable(&TemplateBinding {
                template_id: request.template_id,
                master_var_id: request.master_var_id,
                variable_key: request.variable_key.trim().to_string(),
                is_required: request.is_required,
                default_override: request.default_override.clone(),
                updated_at: 0,
            })?;

            let value = inherited_value(&tx, request.template_id, request.master_var_id)?;
            for document in templates.list_documents_for_template(request.template_id)? {
                let stale = match values.get_value(document.id, request.master_var_id)? {
                    None => true,
                    Some(row) => row.is_inherited && row.variable_value != value,
                };
                if stale {
                    values.upsert_value(
                        document.id,
                        request.master_var_id,
                        value.as_deref(),
                        true,
                        &document.created_by,
                    )?;
                }
            }
        }
        tx.commit()?;

        self.templates()
            .find_bindings(request.template_id, request.master_var_id)?
            .into_iter()
            .find(|binding| binding.variable_key == request.variable_key.trim())
            .ok_or_else(|| RepoError::InvalidData("created binding missing on read-back".into()))
    }

    pub fn list_bindings_for_template(
        &self,
        template_id: TemplateId,
    ) -> RepoResult<Vec<TemplateBinding>> {
        self.templates().list_bindings(template_id)
    }

    /// Bindings of one variable on one template, ordered by key.
    pub fn find_binding(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Vec<TemplateBinding>> {
        self.templates().find_bindings(template_id, master_var_id)
    }

    /// Sets the tier-2 override on every binding of the pair and refreshes
    /// inheriting rows. Returns the number of rows refreshed.
    pub fn set_template_override(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        default_override: Option<&str>,
        actor: &str,
    ) -> RepoResult<usize> {
        let actor = require_text("actor", actor)?;
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let refreshed = {
            let templates = SqliteTemplateRepository::new(&tx);
            let bindings = templates.find_bindings(template_id, master_var_id)?;
            if bindings.is_empty() {
                return Err(RepoError::not_found(
                    "template binding",
                    format!("{template_id}/{master_var_id}"),
                ));
            }
            let variable = SqliteCatalogRepository::new(&tx)
                .get_variable(master_var_id)?
                .ok_or_else(|| RepoError::not_found("master variable", master_var_id))?;
            variable.validate_value(default_override)?;

            for binding in &bindings {
                templates.set_default_override(
                    template_id,
                    master_var_id,
                    &binding.variable_key,
                    default_override,
                )?;
            }
            let value = inherited_value(&tx, template_id, master_var_id)?;
            SqliteDocumentValueRepository::new(&tx).refresh_inherited_for_template(
                template_id,
                master_var_id,
                value.as_deref(),
                actor,
            )?
        };
        tx.commit()?;
        info!(
            "event=template_override_set module=catalog status=ok template_id={} master_var_id={} refreshed={}",
            template_id, master_var_id, refreshed
        );
        Ok(refreshed)
    }

    /// Removes one binding; `InUse` while document values depend on it.
    pub fn unbind_variable(
        &self,
        template_id: TemplateId,
        master_var_id: MasterVarId,
        variable_key: &str,
    ) -> RepoResult<()> {
        self.templates()
            .unbind_variable(template_id, master_var_id, variable_key.trim())
    }
}
