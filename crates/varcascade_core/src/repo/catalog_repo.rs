//! Variable catalog repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist master variables and their ordered group memberships.
//! - Report referential usage before deletions.
//!
//! # Invariants
//! - Write paths call `MasterVariable::validate()` before SQL mutations.
//! - A variable referenced by any binding or document value is never deleted.

use crate::model::variable::{
    GroupId, GroupMember, GroupRef, MasterVarId, MasterVariable, VariableGroup, VariableType,
};
use crate::repo::{
    bool_to_int, decode_json, encode_json, map_unique_violation, parse_bool, parse_uuid,
    RepoError, RepoResult, UsageCounts,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const MASTER_VARIABLE_SELECT_SQL: &str = "SELECT
    mv.id AS id,
    mv.name AS name,
    mv.description AS description,
    mv.var_type AS var_type,
    mv.options_json AS options_json,
    mv.default_value AS default_value,
    mv.is_active AS is_active,
    mv.created_by AS created_by,
    mv.created_at AS created_at,
    mv.updated_at AS updated_at
FROM master_variables mv";

/// Repository interface for the variable catalog.
pub trait CatalogRepository {
    fn create_variable(&self, variable: &MasterVariable) -> RepoResult<MasterVarId>;
    fn get_variable(&self, id: MasterVarId) -> RepoResult<Option<MasterVariable>>;
    fn find_variable_by_name(&self, name: &str) -> RepoResult<Option<MasterVariable>>;
    fn list_variables(&self, include_inactive: bool) -> RepoResult<Vec<MasterVariable>>;
    /// Rewrites description, options and active flag. Never the default.
    fn update_variable_definition(&self, variable: &MasterVariable) -> RepoResult<()>;
    /// Rewrites the tier-1 default; callers own cascade bookkeeping.
    fn set_default_value(&self, id: MasterVarId, value: Option<&str>) -> RepoResult<()>;
    fn variable_usage(&self, id: MasterVarId) -> RepoResult<UsageCounts>;
    fn delete_variable(&self, id: MasterVarId) -> RepoResult<()>;

    fn create_group(&self, group: &VariableGroup) -> RepoResult<GroupId>;
    fn get_group(&self, id: GroupId) -> RepoResult<Option<VariableGroup>>;
    fn list_groups(&self) -> RepoResult<Vec<VariableGroup>>;
    fn add_to_group(
        &self,
        group_id: GroupId,
        master_var_id: MasterVarId,
        sort_order: i64,
    ) -> RepoResult<()>;
    fn remove_from_group(&self, group_id: GroupId, master_var_id: MasterVarId) -> RepoResult<()>;
    fn list_group_members(&self, group_id: GroupId) -> RepoResult<Vec<GroupMember>>;
    fn groups_for_variable(&self, master_var_id: MasterVarId) -> RepoResult<Vec<GroupRef>>;
}

/// SQLite-backed catalog repository.
pub struct SqliteCatalogRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteCatalogRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl CatalogRepository for SqliteCatalogRepository<'_> {
    fn create_variable(&self, variable: &MasterVariable) -> RepoResult<MasterVarId> {
        variable.validate()?;
        let options_json = encode_json(&variable.options, "master_variables.options_json")?;

        self.conn
            .execute(
                "INSERT INTO master_variables (
                    id,
                    name,
                    description,
                    var_type,
                    options_json,
                    default_value,
                    is_active,
                    created_by
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    variable.id.to_string(),
                    variable.name.as_str(),
                    variable.description.as_deref(),
                    variable.var_type.as_str(),
                    options_json,
                    variable.default_value.as_deref(),
                    bool_to_int(variable.is_active),
                    variable.created_by.as_str(),
                ],
            )
            .map_err(|err| map_unique_violation(err, "master variable", &variable.name))?;

        Ok(variable.id)
    }

    fn get_variable(&self, id: MasterVarId) -> RepoResult<Option<MasterVariable>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MASTER_VARIABLE_SELECT_SQL} WHERE mv.id = ?1;"))?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_variable_row(row)?));
        }
        Ok(None)
    }

    fn find_variable_by_name(&self, name: &str) -> RepoResult<Option<MasterVariable>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MASTER_VARIABLE_SELECT_SQL} WHERE mv.name = ?1;"))?;
        let mut rows = stmt.query([name])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_variable_row(row)?));
        }
        Ok(None)
    }

    fn list_variables(&self, include_inactive: bool) -> RepoResult<Vec<MasterVariable>> {
        let mut stmt = self.conn.prepare(&format!(
            "{MASTER_VARIABLE_SELECT_SQL}
             WHERE (?1 = 1 OR mv.is_active = 1)
             ORDER BY mv.name ASC;"
        ))?;
        let mut rows = stmt.query([bool_to_int(include_inactive)])?;
        let mut variables = Vec::new();
        while let Some(row) = rows.next()? {
            variables.push(parse_variable_row(row)?);
        }
        Ok(variables)
    }

    fn update_variable_definition(&self, variable: &MasterVariable) -> RepoResult<()> {
        variable.validate()?;
        let options_json = encode_json(&variable.options, "master_variables.options_json")?;

        let changed = self.conn.execute(
            "UPDATE master_variables
             SET
                description = ?2,
                options_json = ?3,
                is_active = ?4,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![
                variable.id.to_string(),
                variable.description.as_deref(),
                options_json,
                bool_to_int(variable.is_active),
            ],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("master variable", variable.id));
        }
        Ok(())
    }

    fn set_default_value(&self, id: MasterVarId, value: Option<&str>) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE master_variables
             SET
                default_value = ?2,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE id = ?1;",
            params![id.to_string(), value],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found("master variable", id));
        }
        Ok(())
    }

    fn variable_usage(&self, id: MasterVarId) -> RepoResult<UsageCounts> {
        let id_text = id.to_string();
        let bindings: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM template_bindings WHERE master_var_id = ?1;",
            [id_text.as_str()],
            |row| row.get(0),
        )?;
        let document_values: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM document_values WHERE master_var_id = ?1;",
            [id_text.as_str()],
            |row| row.get(0),
        )?;
        Ok(UsageCounts {
            bindings: bindings as u64,
            document_values: document_values as u64,
        })
    }

    fn delete_variable(&self, id: MasterVarId) -> RepoResult<()> {
        let usage = self.variable_usage(id)?;
        if !usage.is_unused() {
            return Err(RepoError::InUse {
                entity: "master variable",
                id: id.to_string(),
                usage,
            });
        }

        let changed = self
            .conn
            .execute("DELETE FROM master_variables WHERE id = ?1;", [id.to_string()])?;
        if changed == 0 {
            return Err(RepoError::not_found("master variable", id));
        }
        Ok(())
    }

    fn create_group(&self, group: &VariableGroup) -> RepoResult<GroupId> {
        self.conn
            .execute(
                "INSERT INTO variable_groups (id, name, description) VALUES (?1, ?2, ?3);",
                params![
                    group.id.to_string(),
                    group.name.as_str(),
                    group.description.as_deref()
                ],
            )
            .map_err(|err| map_unique_violation(err, "variable group", &group.name))?;
        Ok(group.id)
    }

    fn get_group(&self, id: GroupId) -> RepoResult<Option<VariableGroup>> {
        let group = self
            .conn
            .query_row(
                "SELECT id, name, description FROM variable_groups WHERE id = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()?;

        group
            .map(|(id_text, name, description)| {
                Ok(VariableGroup {
                    id: parse_uuid(&id_text, "variable_groups.id")?,
                    name,
                    description,
                })
            })
            .transpose()
    }

    fn list_groups(&self) -> RepoResult<Vec<VariableGroup>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, description FROM variable_groups ORDER BY name ASC;")?;
        let mut rows = stmt.query([])?;
        let mut groups = Vec::new();
        while let Some(row) = rows.next()? {
            let id_text: String = row.get(0)?;
            groups.push(VariableGroup {
                id: parse_uuid(&id_text, "variable_groups.id")?,
                name: row.get(1)?,
                description: row.get(2)?,
            });
        }
        Ok(groups)
    }

    fn add_to_group(
        &self,
        group_id: GroupId,
        master_var_id: MasterVarId,
        sort_order: i64,
    ) -> RepoResult<()> {
        if self.get_group(group_id)?.is_none() {
            return Err(RepoError::not_found("variable group", group_id));
        }
        if self.get_variable(master_var_id)?.is_none() {
            return Err(RepoError::not_found("master variable", master_var_id));
        }

        self.conn.execute(
            "INSERT INTO variable_group_members (group_id, master_var_id, sort_order)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (group_id, master_var_id)
             DO UPDATE SET sort_order = excluded.sort_order;",
            params![group_id.to_string(), master_var_id.to_string(), sort_order],
        )?;
        Ok(())
    }

    fn remove_from_group(&self, group_id: GroupId, master_var_id: MasterVarId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "DELETE FROM variable_group_members WHERE group_id = ?1 AND master_var_id = ?2;",
            params![group_id.to_string(), master_var_id.to_string()],
        )?;
        if changed == 0 {
            return Err(RepoError::not_found(
                "group membership",
                format!("{group_id}/{master_var_id}"),
            ));
        }
        Ok(())
    }

    fn list_group_members(&self, group_id: GroupId) -> RepoResult<Vec<GroupMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT
                mv.id AS id,
                mv.name AS name,
                mv.description AS description,
                mv.var_type AS var_type,
                mv.options_json AS options_json,
                mv.default_value AS default_value,
                mv.is_active AS is_active,
                mv.created_by AS created_by,
                mv.created_at AS created_at,
                mv.updated_at AS updated_at,
                gm.sort_order AS sort_order
             FROM variable_group_members gm
             INNER JOIN master_variables mv ON mv.id = gm.master_var_id
             WHERE gm.group_id = ?1
             ORDER BY gm.sort_order ASC, mv.name ASC;",
        )?;
        let mut rows = stmt.query([group_id.to_string()])?;
        let mut members = Vec::new();
        while let Some(row) = rows.next()? {
            members.push(GroupMember {
                variable: parse_variable_row(row)?,
                sort_order: row.get("sort_order")?,
            });
        }
        Ok(members)
    }

    fn groups_for_variable(&self, master_var_id: MasterVarId) -> RepoResult<Vec<GroupRef>> {
        load_group_refs(self.conn, master_var_id)
    }
}

/// Loads the groups one variable belongs to, ordered by group name.
pub(crate) fn load_group_refs(
    conn: &Connection,
    master_var_id: MasterVarId,
) -> RepoResult<Vec<GroupRef>> {
    let mut stmt = conn.prepare(
        "SELECT g.id, g.name, gm.sort_order
         FROM variable_group_members gm
         INNER JOIN variable_groups g ON g.id = gm.group_id
         WHERE gm.master_var_id = ?1
         ORDER BY g.name ASC;",
    )?;
    let mut rows = stmt.query([master_var_id.to_string()])?;
    let mut groups = Vec::new();
    while let Some(row) = rows.next()? {
        let id_text: String = row.get(0)?;
        groups.push(GroupRef {
            group_id: parse_uuid(&id_text, "variable_groups.id")?,
            name: row.get(1)?,
            sort_order: row.get(2)?,
        });
    }
    Ok(groups)
}

fn parse_variable_row(row: &Row<'_>) -> RepoResult<MasterVariable> {
    let id_text: String = row.get("id")?;
    let type_text: String = row.get("var_type")?;
    let var_type = VariableType::parse(&type_text).ok_or_else(|| {
        RepoError::InvalidData(format!(
            "invalid variable type `{type_text}` in master_variables.var_type"
        ))
    })?;
    let options_json: String = row.get("options_json")?;

    Ok(MasterVariable {
        id: parse_uuid(&id_text, "master_variables.id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        var_type,
        options: decode_json(&options_json, "master_variables.options_json")?,
        default_value: row.get("default_value")?,
        is_active: parse_bool(row.get("is_active")?, "master_variables.is_active")?,
        created_by: row.get("created_by")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}
