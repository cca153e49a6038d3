//! Core engine for variable cascade and override resolution.
//!
//! Resolves document placeholders from master defaults, template overrides
//! and document overrides, propagates master-default changes through a
//! durable cascade log, and versions shared content blocks.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{ConfigError, EngineConfig};
pub use db::{open_db, open_db_in_memory, open_db_with_busy_timeout, DbError};
pub use logging::{init_logging_from_config, LoggingError};
pub use model::block::{BlockVersion, BlockVersionNumber, CommonBlock, ForkedBlock};
pub use model::cascade::{CascadeHistoryQuery, CascadeLogEntry, CascadeStats, CascadeStatus};
pub use model::document::{
    Document, DocumentValue, ResolvedVariable, Template, TemplateBinding, ValueWrite,
};
pub use model::task::{CascadeTask, PendingTaskCounts, TaskListQuery, TaskType};
pub use model::validation::ValidationError;
pub use model::variable::{MasterVariable, VariableGroup, VariableType};
pub use repo::{RepoError, RepoResult, UsageCounts};
pub use service::block_service::{BlockService, BlockUpdateResult, NewBlock};
pub use service::cascade_service::{CascadeObserver, CascadeService, LoggingObserver};
pub use service::catalog_service::{BindingRequest, CatalogService, NewMasterVariable};
pub use service::maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use service::resolution::{
    effective_value, substitute_placeholders, RenderedContent, ResolutionService,
};
pub use service::task_service::TaskService;
pub use service::value_service::{BatchItemError, BulkSetError, DocumentValueService};

