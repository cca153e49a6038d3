//! Three-tier value resolution and placeholder substitution.
//!
//! # Responsibility
//! - Compute the effective value of a variable for a document from
//!   document override, template override and master default.
//! - Enumerate every bound variable of a document with its groups.
//! - Substitute `{{variable_key}}` placeholders in template text.
//!
//! # Invariants
//! - Resolution has no side effects.
//! - Keys are matched literally; replacement text is inserted verbatim.
//! - A placeholder whose effective value is missing is left untouched.

use crate::model::document::{DocumentId, DocumentValue, ResolvedVariable, TemplateId};
use crate::model::variable::MasterVarId;
use crate::repo::catalog_repo::{load_group_refs, CatalogRepository, SqliteCatalogRepository};
use crate::repo::template_repo::{SqliteTemplateRepository, TemplateRepository};
use crate::repo::value_repo::{DocumentValueRepository, SqliteDocumentValueRepository};
use crate::repo::{RepoError, RepoResult};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use rusqlite::Connection;
use std::collections::HashMap;

static PLACEHOLDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid placeholder regex"));

/// Text after substitution plus the placeholders left in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub content: String,
    /// Distinct keys, in first-occurrence order, that had no value.
    pub unresolved: Vec<String>,
}

/// Picks the effective value from the three tiers.
///
/// A document row wins only when it is a user override carrying a value.
pub fn effective_value(
    document_value: Option<&DocumentValue>,
    template_override: Option<&str>,
    master_default: Option<&str>,
) -> Option<String> {
    if let Some(row) = document_value {
        if !row.is_inherited {
            if let Some(value) = row.variable_value.as_deref() {
                return Some(value.to_string());
            }
        }
    }
    template_override.or(master_default).map(str::to_string)
}

/// Replaces every `{{key}}` whose value is known.
///
/// Keys are escaped before the pattern is built, so `.` or `$` in a key
/// only ever match themselves.
pub fn substitute_placeholders<'a, I>(content: &str, values: I) -> Result<RenderedContent, regex::Error>
where
    I: IntoIterator<Item = (&'a str, Option<&'a str>)>,
{
    let known: HashMap<&str, &str> = values
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
        .collect();

    let mut unresolved: Vec<String> = Vec::new();
    for caps in PLACEHOLDER_RE.captures_iter(content) {
        let key = &caps[1];
        if !known.contains_key(key) && !unresolved.iter().any(|seen| seen == key) {
            unresolved.push(key.to_string());
        }
    }

    if known.is_empty() {
        return Ok(RenderedContent {
            content: content.to_string(),
            unresolved,
        });
    }

    let mut keys: Vec<&str> = known.keys().copied().collect();
    keys.sort_unstable_by(|left, right| right.len().cmp(&left.len()).then(left.cmp(right)));
    let alternation = keys
        .iter()
        .map(|key| regex::escape(key))
        .collect::<Vec<_>>()
        .join("|");
    let pattern = Regex::new(&format!(r"\{{\{{({alternation})\}}\}}"))?;

    // Closure replacers never expand `$name` groups.
    let replaced = pattern.replace_all(content, |caps: &Captures<'_>| {
        known.get(&caps[1]).copied().unwrap_or_default().to_string()
    });

    Ok(RenderedContent {
        content: replaced.into_owned(),
        unresolved,
    })
}

/// Inherited value for one template/variable pair: template override, else
/// master default.
pub(crate) fn inherited_value(
    conn: &Connection,
    template_id: TemplateId,
    master_var_id: MasterVarId,
) -> RepoResult<Option<String>> {
    let variable = SqliteCatalogRepository::new(conn)
        .get_variable(master_var_id)?
        .ok_or_else(|| RepoError::not_found("master variable", master_var_id))?;
    let template_override =
        SqliteTemplateRepository::new(conn).template_override(template_id, master_var_id)?;
    Ok(template_override.or(variable.default_value))
}

/// Read-only resolution over one connection.
pub struct ResolutionService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> ResolutionService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }

    /// Effective value of one variable for one document.
    ///
    /// Returns `Ok(None)` when the document's template does not bind the
    /// variable, or when no tier carries a value.
    pub fn resolve_effective_value(
        &self,
        document_id: DocumentId,
        master_var_id: MasterVarId,
    ) -> RepoResult<Option<String>> {
        let templates = SqliteTemplateRepository::new(self.conn);
        let document = templates
            .get_document(document_id)?
            .ok_or_else(|| RepoError::not_found("document", document_id))?;
        if templates
            .find_bindings(document.template_id, master_var_id)?
            .is_empty()
        {
            return Ok(None);
        }

        let Some(variable) = SqliteCatalogRepository::new(self.conn).get_variable(master_var_id)?
        else {
            return Ok(None);
        };
        let template_override = templates.template_override(document.template_id, master_var_id)?;
        let row = SqliteDocumentValueRepository::new(self.conn).get_value(document_id, master_var_id)?;

        Ok(effective_value(
            row.as_ref(),
            template_override.as_deref(),
            variable.default_value.as_deref(),
        ))
    }

    /// Every binding of the document's template with its effective value,
    /// ordered by binding key.
    pub fn resolve_all_for_document(
        &self,
        document_id: DocumentId,
    ) -> RepoResult<Vec<ResolvedVariable>> {
        let templates = SqliteTemplateRepository::new(self.conn);
        let catalog = SqliteCatalogRepository::new(self.conn);
        let document = templates
            .get_document(document_id)?
            .ok_or_else(|| RepoError::not_found("document", document_id))?;

        let rows: HashMap<MasterVarId, DocumentValue> = SqliteDocumentValueRepository::new(self.conn)
            .list_values(document_id)?
            .into_iter()
            .map(|row| (row.master_var_id, row))
            .collect();

        let mut resolved = Vec::new();
        for binding in templates.list_bindings(document.template_id)? {
            let Some(variable) = catalog.get_variable(binding.master_var_id)? else {
                continue;
            };
            let template_override =
                templates.template_override(document.template_id, binding.master_var_id)?;
            let row = rows.get(&binding.master_var_id);

            resolved.push(ResolvedVariable {
                master_var_id: binding.master_var_id,
                name: variable.name,
                key: binding.variable_key,
                effective_value: effective_value(
                    row,
                    template_override.as_deref(),
                    variable.default_value.as_deref(),
                ),
                is_inherited: row.map_or(true, |row| row.is_inherited),
                is_required: binding.is_required,
                groups: load_group_refs(self.conn, binding.master_var_id)?,
            });
        }
        Ok(resolved)
    }

    /// Substitutes the document's effective values into `content`.
    pub fn render_document(
        &self,
        document_id: DocumentId,
        content: &str,
    ) -> RepoResult<RenderedContent> {
        let resolved = self.resolve_all_for_document(document_id)?;
        substitute_placeholders(
            content,
            resolved
                .iter()
                .map(|item| (item.key.as_str(), item.effective_value.as_deref())),
        )
        .map_err(|err| RepoError::InvalidData(format!("placeholder pattern: {err}")))
    }

    /// Required bindings whose effective value is missing.
    pub fn missing_required(&self, document_id: DocumentId) -> RepoResult<Vec<ResolvedVariable>> {
        Ok(self
            .resolve_all_for_document(document_id)?
            .into_iter()
            .filter(|item| item.is_required && item.effective_value.is_none())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::{effective_value, substitute_placeholders};
    use crate::model::document::DocumentValue;
    use uuid::Uuid;

    fn row(value: Option<&str>, is_inherited: bool) -> DocumentValue {
        DocumentValue {
            document_id: Uuid::new_v4(),
            master_var_id: Uuid::new_v4(),
            variable_value: value.map(str::to_string),
            is_inherited,
            last_updated: 0,
            updated_by: "tester".to_string(),
        }
    }

    #[test]
    fn document_override_wins() {
        let row = row(Some("$200"), false);
        assert_eq!(
            effective_value(Some(&row), Some("$160"), Some("$150")).as_deref(),
            Some("$200")
        );
    }

    #[test]
    fn inherited_row_falls_back_to_template_then_master() {
        let inherited = row(Some("stale"), true);
        assert_eq!(
            effective_value(Some(&inherited), Some("$160"), Some("$150")).as_deref(),
            Some("$160")
        );
        assert_eq!(
            effective_value(Some(&inherited), None, Some("$150")).as_deref(),
            Some("$150")
        );
        assert_eq!(effective_value(None, None, None), None);
    }

    #[test]
    fn empty_override_row_does_not_shadow_lower_tiers() {
        let blank = row(None, false);
        assert_eq!(
            effective_value(Some(&blank), None, Some("$150")).as_deref(),
            Some("$150")
        );
    }

    #[test]
    fn substitution_is_literal() {
        let rendered = substitute_placeholders(
            "Rent: {{rent.weekly}} / {{rentXweekly}}",
            [("rent.weekly", Some("$1 and $0"))],
        )
        .unwrap();
        assert_eq!(rendered.content, "Rent: $1 and $0 / {{rentXweekly}}");
        assert_eq!(rendered.unresolved, vec!["rentXweekly".to_string()]);
    }

    #[test]
    fn missing_values_leave_placeholders() {
        let rendered = substitute_placeholders(
            "{{phone}} {{phone}} {{name}}",
            [("phone", None), ("name", Some("Ana"))],
        )
        .unwrap();
        assert_eq!(rendered.content, "{{phone}} {{phone}} Ana");
        assert_eq!(rendered.unresolved, vec!["phone".to_string()]);
    }

    #[test]
    fn substituted_values_are_not_rescanned() {
        let rendered = substitute_placeholders(
            "{{a}}",
            [("a", Some("{{b}}")), ("b", Some("nope"))],
        )
        .unwrap();
        assert_eq!(rendered.content, "{{b}}");
    }
}
