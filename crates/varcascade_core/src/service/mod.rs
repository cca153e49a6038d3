//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository calls into use-case level APIs.
//! - Own transaction boundaries for multi-row writes.
//!
//! # Invariants
//! - Services borrow one `rusqlite::Connection`; none of them spawns threads.
//! - Repository writes that must be atomic run inside one
//!   `Transaction::new_unchecked(.., Immediate)` opened here.

pub mod block_service;
pub mod cascade_service;
pub mod catalog_service;
pub mod maintenance;
pub mod resolution;
pub mod task_service;
pub mod value_service;
