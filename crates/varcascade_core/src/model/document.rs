//! Template binding and document value model.
//!
//! # Responsibility
//! - Describe how templates bind master variables (tier 2).
//! - Describe per-document values (tier 3) and their inheritance flag.
//!
//! # Invariants
//! - A binding is unique per `(template_id, master_var_id, variable_key)`.
//! - A document value is unique per `(document_id, master_var_id)`.
//! - `is_inherited = true` rows hold the last resolved inherited value and are
//!   the only rows cascade propagation may rewrite.

use crate::model::variable::{GroupRef, MasterVarId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TemplateId = Uuid;
pub type DocumentId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: TemplateId,
    pub name: String,
    pub created_at: i64,
}

/// Generated document; owns one value row per bound variable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub template_id: TemplateId,
    pub title: String,
    pub created_by: String,
    pub created_at: i64,
}

/// Association of a master variable with one template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateBinding {
    pub template_id: TemplateId,
    pub master_var_id: MasterVarId,
    /// Placeholder key used in template text, e.g. `{{coordinator_phone}}`.
    pub variable_key: String,
    pub is_required: bool,
    /// Wins over the master default for documents of this template.
    pub default_override: Option<String>,
    pub updated_at: i64,
}

/// Stored value of one variable for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentValue {
    pub document_id: DocumentId,
    pub master_var_id: MasterVarId,
    pub variable_value: Option<String>,
    pub is_inherited: bool,
    /// Epoch milliseconds.
    pub last_updated: i64,
    pub updated_by: String,
}

/// One item of a bulk value write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueWrite {
    pub master_var_id: MasterVarId,
    pub value: Option<String>,
    pub is_inherited: bool,
}

/// Effective value of one bound variable for one document.
///
/// Explicit shape for list/edit UIs: the variable, its binding key and the
/// groups it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub master_var_id: MasterVarId,
    pub name: String,
    pub key: String,
    pub effective_value: Option<String>,
    pub is_inherited: bool,
    pub is_required: bool,
    pub groups: Vec<GroupRef>,
}
