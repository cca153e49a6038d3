#![allow(dead_code)]

use rusqlite::Connection;
use varcascade_core::{
    BindingRequest, CatalogService, Document, EngineConfig, MasterVariable, NewMasterVariable,
    Template, VariableType,
};

pub const EDITOR: &str = "editor@firm.test";

/// Master variable, one template binding it as `weekly_rent`, and documents.
pub struct RentFixture {
    pub variable: MasterVariable,
    pub template: Template,
    pub documents: Vec<Document>,
}

pub fn manual_drain_config() -> EngineConfig {
    EngineConfig {
        auto_drain: false,
        ..EngineConfig::default()
    }
}

pub fn text_variable(conn: &Connection, name: &str, default: Option<&str>) -> MasterVariable {
    CatalogService::new(conn)
        .create_master_variable(
            NewMasterVariable {
                name: name.to_string(),
                description: None,
                var_type: VariableType::Text,
                options: Vec::new(),
                default_value: default.map(str::to_string),
            },
            EDITOR,
        )
        .unwrap()
}

pub fn bind(
    conn: &Connection,
    template: &Template,
    variable: &MasterVariable,
    key: &str,
    is_required: bool,
    default_override: Option<&str>,
) {
    CatalogService::new(conn)
        .bind_variable(BindingRequest {
            template_id: template.id,
            master_var_id: variable.id,
            variable_key: key.to_string(),
            is_required,
            default_override: default_override.map(str::to_string),
        })
        .unwrap();
}

pub fn rent_fixture(conn: &Connection, document_count: usize) -> RentFixture {
    let catalog = CatalogService::new(conn);
    let variable = text_variable(conn, "finance.accommodation.weekly_rent", Some("$150"));
    let template = catalog.create_template("Residential lease").unwrap();
    bind(conn, &template, &variable, "weekly_rent", true, None);

    let documents = (0..document_count)
        .map(|index| {
            catalog
                .create_document(template.id, &format!("Lease {index}"), EDITOR)
                .unwrap()
        })
        .collect();

    RentFixture {
        variable,
        template,
        documents,
    }
}

pub fn stored_value(conn: &Connection, document: &Document, variable: &MasterVariable) -> Option<String> {
    conn.query_row(
        "SELECT variable_value FROM document_values WHERE document_id = ?1 AND master_var_id = ?2;",
        [document.id.to_string(), variable.id.to_string()],
        |row| row.get(0),
    )
    .unwrap()
}
