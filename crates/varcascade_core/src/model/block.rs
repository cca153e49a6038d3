//! Shared content block model.
//!
//! # Responsibility
//! - Define reusable blocks, their append-only history and forked copies.
//! - Own semantic version parsing and the content-edit bump rule.
//!
//! # Invariants
//! - Versions are stored as `MAJOR.MINOR.PATCH` text, never as numbers.
//! - A content edit bumps MINOR only; MAJOR and PATCH are untouched.

use crate::model::document::TemplateId;
use crate::model::validation::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

pub type BlockId = Uuid;
pub type ForkId = Uuid;

/// Parsed `MAJOR.MINOR.PATCH` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockVersionNumber {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl BlockVersionNumber {
    pub const INITIAL: Self = Self {
        major: 1,
        minor: 0,
        patch: 0,
    };

    /// Returns the version for the next content edit.
    pub fn bump_minor(self) -> Result<Self, ValidationError> {
        let minor = self
            .minor
            .checked_add(1)
            .ok_or_else(|| ValidationError::InvalidVersion(self.to_string()))?;
        Ok(Self { minor, ..self })
    }
}

impl Display for BlockVersionNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for BlockVersionNumber {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidVersion(value.to_string());
        let mut parts = value.trim().split('.');
        let mut next = || -> Result<u32, ValidationError> {
            let part = parts.next().ok_or_else(invalid)?;
            if part.is_empty() || !part.bytes().all(|byte| byte.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };
        let version = Self {
            major: next()?,
            minor: next()?,
            patch: next()?,
        };
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(version)
    }
}

/// Reusable, versioned piece of document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonBlock {
    pub id: BlockId,
    pub title: String,
    pub content: String,
    pub version: String,
    pub tags: Vec<String>,
    /// Templates embedding this block.
    pub used_in: Vec<TemplateId>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Append-only history row written on every content edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockVersion {
    pub id: i64,
    pub block_id: BlockId,
    /// Version produced by the edit.
    pub version: String,
    /// Content as it was before the edit.
    pub content_snapshot: String,
    pub change_description: String,
    pub author: String,
    pub created_at: i64,
}

/// Diverged copy of a block that must be reviewed when its source changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkedBlock {
    pub id: ForkId,
    pub source_block_id: BlockId,
    pub title: String,
    pub content: String,
    pub forked_from_version: String,
    pub needs_review: bool,
    pub created_by: String,
    pub created_at: i64,
    pub reviewed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::BlockVersionNumber;
    use crate::model::validation::ValidationError;

    #[test]
    fn parses_and_displays_semver_text() {
        let version: BlockVersionNumber = "1.2.0".parse().unwrap();
        assert_eq!(
            version,
            BlockVersionNumber {
                major: 1,
                minor: 2,
                patch: 0
            }
        );
        assert_eq!(version.to_string(), "1.2.0");
    }

    #[test]
    fn bump_minor_keeps_major_and_patch() {
        let version: BlockVersionNumber = "3.9.7".parse().unwrap();
        assert_eq!(version.bump_minor().unwrap().to_string(), "3.10.7");
    }

    #[test]
    fn bump_minor_rejects_exhausted_minor() {
        let version: BlockVersionNumber = "1.4294967295.0".parse().unwrap();
        assert_eq!(
            version.bump_minor().unwrap_err(),
            ValidationError::InvalidVersion("1.4294967295.0".to_string())
        );
    }

    #[test]
    fn rejects_malformed_versions() {
        for raw in ["1.2", "1.2.3.4", "1.x.0", "", "1..0", "-1.0.0", "1.2.+3"] {
            assert!(raw.parse::<BlockVersionNumber>().is_err(), "{raw}");
        }
    }
}
