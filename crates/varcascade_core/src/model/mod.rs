//! Domain model for the variable cascade engine.
//!
//! # Responsibility
//! - Define canonical records for catalog, bindings, document values,
//!   cascade log entries, shared blocks and reviewer tasks.
//! - Own input validation rules shared by repositories and services.
//!
//! # Invariants
//! - Every record is identified by a stable id (UUID, or an integer for the
//!   append-only cascade log).
//! - Version strings are always `MAJOR.MINOR.PATCH` text.

pub mod block;
pub mod cascade;
pub mod document;
pub mod task;
pub mod validation;
pub mod variable;
