//! Document value store use-cases.
//!
//! # Responsibility
//! - Write per-document overrides and inherited values.
//! - Run bulk writes as one all-or-nothing transaction.
//!
//! # Invariants
//! - A write is rejected unless a binding connects the document's template
//!   to the variable; the check happens before any row is touched.
//! - Inherited writes store the freshly resolved inherited value.

use crate::model::document::{DocumentId, DocumentValue, ValueWrite};
use crate::model::validation::{require_text, ValidationError};
use crate::model::variable::MasterVarId;
use crate::repo::catalog_repo::{CatalogRepository, SqliteCatalogRepository};
use crate::repo::template_repo::{SqliteTemplateRepository, TemplateRepository};
use crate::repo::value_repo::{DocumentValueRepository, SqliteDocumentValueRepository};
use crate::repo::{RepoError, RepoResult};
use crate::service::resolution::inherited_value;
use log::{info, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Failure of one item inside a rejected batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItemError {
    pub index: usize,
    pub master_var_id: MasterVarId,
    pub message: String,
}

/// Error for `bulk_set`.
#[derive(Debug)]
pub enum BulkSetError {
    /// Request-level failure: empty batch, missing document or store error.
    Repo(RepoError),
    /// One or more items failed; nothing from the batch was written.
    PartialBatchFailure { errors: Vec<BatchItemError> },
}

impl Display for BulkSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Repo(err) => write!(f, "{err}"),
            Self::PartialBatchFailure { errors } => write!(
                f,
                "batch rolled back: {} item(s) failed",
                errors.len()
            ),
        }
    }
}

impl Error for BulkSetError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Repo(err) => Some(err),
            Self::PartialBatchFailure { .. } => None,
        }
    }
}

impl From<RepoError> for BulkSetError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<rusqlite::Error> for BulkSetError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Repo(value.into())
    }
}

/// Document value service over one connection.
pub struct DocumentValueService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> DocumentValueService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    pub fn get_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Option<DocumentValue>> {
        SqliteDocumentValueRepository::new(self.conn).get_value(document_id, master_var_id)
    }

    pub fn list_values(&self, document_id: DocumentId) -> RepoResult<Vec<DocumentValue>> {
        SqliteDocumentValueRepository::new(self.conn).list_values(document_id)
    }

    /// Upserts one value for the `(document, variable)` pair.
    ///
    /// # Errors
    /// - `NotFound` when the document or variable is missing.
    /// - `RelationshipNotFound` when the template does not bind the variable.
    /// - `Validation` when an override does not fit the variable type.
    pub fn set_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
        value: Option<&str>,
        is_inherited: bool,
        actor: &str,
    ) -> RepoResult<DocumentValue> {
        let actor = require_text("actor", actor)?;
        write_value(self.conn, document_id, master_var_id, value, is_inherited, actor)?;
        info!(
            "event=value_set module=values status=ok document_id={} master_var_id={} inherited={}",
            document_id, master_var_id, is_inherited
        );
        read_back(self.conn, document_id, master_var_id)
    }

    /// Drops a document override and stores the inherited value again.
    ///
    /// Idempotent: repeated calls store the same value. A variable the
    /// document's template does not bind is `NotFound`.
    pub fn reset_to_inherited(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
        actor: &str,
    ) -> RepoResult<Option<String>> {
        let actor = require_text("actor", actor)?;
        let stored = write_value(self.conn, document_id, master_var_id, None, true, actor)
            .map_err(|err| match err {
                RepoError::RelationshipNotFound { .. } => RepoError::not_found(
                    "document value",
                    format!("{document_id}/{master_var_id}"),
                ),
                other => other,
            })?;
        info!(
            "event=value_reset module=values status=ok document_id={} master_var_id={}",
            document_id, master_var_id
        );
        Ok(stored)
    }

    /// Writes every item or none.
    ///
    /// All items are attempted so the caller receives every failure, each
    /// addressed by its index in `items`.
    pub fn bulk_set(
        &self,
        document_id: DocumentId,
        items: &[ValueWrite],
        actor: &str,
    ) -> Result<Vec<DocumentValue>, BulkSetError> {
        let started_at = Instant::now();
        let actor = require_text("actor", actor).map_err(RepoError::from)?;
        if items.is_empty() {
            return Err(RepoError::from(ValidationError::EmptyBatch).into());
        }
        if SqliteTemplateRepository::new(self.conn)
            .get_document(document_id)?
            .is_none()
        {
            return Err(RepoError::not_found("document", document_id).into());
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut errors = Vec::new();
        for (index, item) in items.iter().enumerate() {
            if let Err(err) = write_value(
                &tx,
                document_id,
                item.master_var_id,
                item.value.as_deref(),
                item.is_inherited,
                actor,
            ) {
                errors.push(BatchItemError {
                    index,
                    master_var_id: item.master_var_id,
                    message: err.to_string(),
                });
            }
        }

        if !errors.is_empty() {
            tx.rollback()?;
            warn!(
                "event=value_bulk_set module=values status=rolled_back document_id={} items={} failed={} duration_ms={}",
                document_id,
                items.len(),
                errors.len(),
                started_at.elapsed().as_millis()
            );
            return Err(BulkSetError::PartialBatchFailure { errors });
        }

        let mut written = Vec::with_capacity(items.len());
        for item in items {
            written.push(read_back(&tx, document_id, item.master_var_id)?);
        }
        tx.commit()?;
        info!(
            "event=value_bulk_set module=values status=ok document_id={} items={} duration_ms={}",
            document_id,
            items.len(),
            started_at.elapsed().as_millis()
        );
        Ok(written)
    }
}

/// Validates and upserts one value. Returns the stored value.
fn write_value(
    conn: &Connection,
    document_id: DocumentId,
    master_var_id: MasterVarId,
    value: Option<&str>,
    is_inherited: bool,
    actor: &str,
) -> RepoResult<Option<String>> {
    let templates = SqliteTemplateRepository::new(conn);
    let document = templates
        .get_document(document_id)?
        .ok_or_else(|| RepoError::not_found("document", document_id))?;
    if templates
        .find_bindings(document.template_id, master_var_id)?
        .is_empty()
    {
        return Err(RepoError::RelationshipNotFound {
            document_id,
            master_var_id,
        });
    }

    let stored = if is_inherited {
        inherited_value(conn, document.template_id, master_var_id)?
    } else {
        let variable = SqliteCatalogRepository::new(conn)
            .get_variable(master_var_id)?
            .ok_or_else(|| RepoError::not_found("master variable", master_var_id))?;
        variable.validate_value(value)?;
        value.map(str::to_string)
    };

    SqliteDocumentValueRepository::new(conn).upsert_value(
        document_id,
        master_var_id,
        stored.as_deref(),
        is_inherited,
        actor,
    )?;
    Ok(stored)
}

fn read_back(
    conn: &Connection,
    document_id: DocumentId,
    master_var_id: MasterVarId,
) -> RepoResult<DocumentValue> {
    SqliteDocumentValueRepository::new(conn)
        .get_value(document_id, master_var_id)?
        .ok_or_else(|| RepoError::InvalidData("written document value missing on read-back".into()))
}
