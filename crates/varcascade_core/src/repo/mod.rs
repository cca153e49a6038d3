//! Repository layer abstractions and SQLite implementations.
//!
//! # Responsibility
//! - Define aggregate-oriented data access contracts.
//! - Isolate SQLite query details from service orchestration.
//!
//! # Invariants
//! - Every value reaches SQL as a bound parameter; no user content is
//!   interpolated into statement text.
//! - Repository APIs return semantic errors (`NotFound`, `InUse`, ...) in
//!   addition to DB transport errors.
//! - Repositories never open transactions of their own; callers pass a
//!   transaction when several writes must be atomic.

use crate::db::DbError;
use crate::model::document::DocumentId;
use crate::model::validation::ValidationError;
use crate::model::variable::MasterVarId;
use rusqlite::ErrorCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub mod block_repo;
pub mod cascade_log_repo;
pub mod catalog_repo;
pub mod task_repo;
pub mod template_repo;
pub mod value_repo;

pub type RepoResult<T> = Result<T, RepoError>;

/// Rows still referencing a record whose deletion was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageCounts {
    pub bindings: u64,
    pub document_values: u64,
}

impl UsageCounts {
    pub fn is_unused(&self) -> bool {
        self.bindings == 0 && self.document_values == 0
    }
}

/// Repository error shared by all aggregates.
#[derive(Debug)]
pub enum RepoError {
    /// Caller input rejected before touching storage.
    Validation(ValidationError),
    /// Storage failure; the only retryable class.
    Db(DbError),
    NotFound {
        entity: &'static str,
        id: String,
    },
    /// No template binding connects the document's template to the variable.
    RelationshipNotFound {
        document_id: DocumentId,
        master_var_id: MasterVarId,
    },
    /// Deletion blocked by referencing rows.
    InUse {
        entity: &'static str,
        id: String,
        usage: UsageCounts,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl RepoError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether the failure may succeed when retried unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Db(_))
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { entity, id } => write!(f, "{entity} not found: {id}"),
            Self::RelationshipNotFound {
                document_id,
                master_var_id,
            } => write!(
                f,
                "document {document_id} has no template binding for variable {master_var_id}"
            ),
            Self::InUse { entity, id, usage } => write!(
                f,
                "{entity} {id} is in use by {} binding(s) and {} document value(s)",
                usage.bindings, usage.document_values
            ),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::NotFound { .. }
            | Self::RelationshipNotFound { .. }
            | Self::InUse { .. }
            | Self::InvalidData(_) => None,
        }
    }
}

impl From<ValidationError> for RepoError {
    fn from(value: ValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Maps a UNIQUE/PRIMARY KEY violation to a `Duplicate` validation error.
pub(crate) fn map_unique_violation(
    err: rusqlite::Error,
    entity: &'static str,
    key: &str,
) -> RepoError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                        | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                ) =>
        {
            RepoError::Validation(ValidationError::Duplicate {
                entity,
                key: key.to_string(),
            })
        }
        _ => err.into(),
    }
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}

pub(crate) fn parse_bool(value: i64, column: &str) -> RepoResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RepoError::InvalidData(format!(
            "invalid boolean value `{other}` in {column}"
        ))),
    }
}

pub(crate) fn bool_to_int(value: bool) -> i64 {
    if value {
        1
    } else {
        0
    }
}

pub(crate) fn encode_json<T: Serialize + ?Sized>(value: &T, column: &str) -> RepoResult<String> {
    serde_json::to_string(value)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode {column}: {err}")))
}

pub(crate) fn decode_json<T: DeserializeOwned>(value: &str, column: &str) -> RepoResult<T> {
    serde_json::from_str(value)
        .map_err(|err| RepoError::InvalidData(format!("invalid json in {column}: {err}")))
}
