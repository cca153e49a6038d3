mod common;

use common::{bind, rent_fixture, stored_value, text_variable, EDITOR};
use varcascade_core::{
    open_db_in_memory, BulkSetError, CatalogService, DocumentValueService, NewMasterVariable,
    RepoError, ValidationError, ValueWrite, VariableType,
};

#[test]
fn override_is_stored_and_read_back() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let document = &fixture.documents[0];

    let written = DocumentValueService::new(&conn)
        .set_value(document.id, fixture.variable.id, Some("$200"), false, EDITOR)
        .unwrap();

    assert_eq!(written.variable_value.as_deref(), Some("$200"));
    assert!(!written.is_inherited);
    assert_eq!(written.updated_by, EDITOR);
}

#[test]
fn unbound_variable_is_a_relationship_error() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let phone = text_variable(&conn, "org.phone", None);

    let err = DocumentValueService::new(&conn)
        .set_value(fixture.documents[0].id, phone.id, Some("555"), false, EDITOR)
        .unwrap_err();
    assert!(matches!(err, RepoError::RelationshipNotFound { .. }));

    let err = DocumentValueService::new(&conn)
        .set_value(uuid::Uuid::new_v4(), phone.id, Some("555"), false, EDITOR)
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound { .. }));
}

#[test]
fn inherited_write_ignores_supplied_value() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    CatalogService::new(&conn)
        .set_template_override(fixture.template.id, fixture.variable.id, Some("$160"), EDITOR)
        .unwrap();

    let written = DocumentValueService::new(&conn)
        .set_value(
            fixture.documents[0].id,
            fixture.variable.id,
            Some("$999"),
            true,
            EDITOR,
        )
        .unwrap();

    assert!(written.is_inherited);
    assert_eq!(written.variable_value.as_deref(), Some("$160"));
}

#[test]
fn override_must_fit_variable_type() {
    let conn = open_db_in_memory().unwrap();
    let catalog = CatalogService::new(&conn);
    let fixture = rent_fixture(&conn, 1);
    let start = catalog
        .create_master_variable(
            NewMasterVariable {
                name: "lease.start_date".to_string(),
                description: None,
                var_type: VariableType::Date,
                options: Vec::new(),
                default_value: None,
            },
            EDITOR,
        )
        .unwrap();
    bind(&conn, &fixture.template, &start, "start_date", true, None);
    let values = DocumentValueService::new(&conn);
    let document = &fixture.documents[0];

    let err = values
        .set_value(document.id, start.id, Some("next tuesday"), false, EDITOR)
        .unwrap_err();
    assert!(matches!(
        err,
        RepoError::Validation(ValidationError::InvalidValue { .. })
    ));
    values
        .set_value(document.id, start.id, Some("2026-02-01"), false, EDITOR)
        .unwrap();
}

#[test]
fn reset_to_inherited_is_idempotent() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let document = &fixture.documents[0];
    let values = DocumentValueService::new(&conn);
    values
        .set_value(document.id, fixture.variable.id, Some("$200"), false, EDITOR)
        .unwrap();

    let first = values
        .reset_to_inherited(document.id, fixture.variable.id, EDITOR)
        .unwrap();
    let second = values
        .reset_to_inherited(document.id, fixture.variable.id, EDITOR)
        .unwrap();

    assert_eq!(first.as_deref(), Some("$150"));
    assert_eq!(first, second);
    let row = values
        .get_value(document.id, fixture.variable.id)
        .unwrap()
        .unwrap();
    assert!(row.is_inherited);
    assert_eq!(row.variable_value.as_deref(), Some("$150"));
}

#[test]
fn reset_of_unbound_variable_is_not_found() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let phone = text_variable(&conn, "org.phone", Some("555-0100"));
    let values = DocumentValueService::new(&conn);

    assert!(matches!(
        values
            .reset_to_inherited(fixture.documents[0].id, phone.id, EDITOR)
            .unwrap_err(),
        RepoError::NotFound { .. }
    ));
    assert!(matches!(
        values
            .reset_to_inherited(uuid::Uuid::new_v4(), fixture.variable.id, EDITOR)
            .unwrap_err(),
        RepoError::NotFound { .. }
    ));
}

#[test]
fn bulk_set_writes_all_items() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let phone = text_variable(&conn, "org.phone", Some("555-0100"));
    bind(&conn, &fixture.template, &phone, "phone", false, None);
    let document = &fixture.documents[0];

    let written = DocumentValueService::new(&conn)
        .bulk_set(
            document.id,
            &[
                ValueWrite {
                    master_var_id: fixture.variable.id,
                    value: Some("$180".to_string()),
                    is_inherited: false,
                },
                ValueWrite {
                    master_var_id: phone.id,
                    value: Some("555-0199".to_string()),
                    is_inherited: false,
                },
            ],
            EDITOR,
        )
        .unwrap();

    assert_eq!(written.len(), 2);
    assert_eq!(stored_value(&conn, document, &phone).as_deref(), Some("555-0199"));
}

#[test]
fn bulk_set_rolls_back_and_reports_each_failed_index() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let unbound = text_variable(&conn, "org.unbound", None);
    let document = &fixture.documents[0];

    let err = DocumentValueService::new(&conn)
        .bulk_set(
            document.id,
            &[
                ValueWrite {
                    master_var_id: fixture.variable.id,
                    value: Some("$180".to_string()),
                    is_inherited: false,
                },
                ValueWrite {
                    master_var_id: unbound.id,
                    value: Some("x".to_string()),
                    is_inherited: false,
                },
                ValueWrite {
                    master_var_id: uuid::Uuid::new_v4(),
                    value: None,
                    is_inherited: true,
                },
            ],
            EDITOR,
        )
        .unwrap_err();

    match err {
        BulkSetError::PartialBatchFailure { errors } => {
            let indexes: Vec<usize> = errors.iter().map(|item| item.index).collect();
            assert_eq!(indexes, vec![1, 2]);
            assert_eq!(errors[0].master_var_id, unbound.id);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        stored_value(&conn, document, &fixture.variable).as_deref(),
        Some("$150")
    );
}

#[test]
fn bulk_set_rejects_empty_batch_and_unknown_document() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let values = DocumentValueService::new(&conn);

    assert!(matches!(
        values.bulk_set(fixture.documents[0].id, &[], EDITOR).unwrap_err(),
        BulkSetError::Repo(RepoError::Validation(ValidationError::EmptyBatch))
    ));
    assert!(matches!(
        values
            .bulk_set(
                uuid::Uuid::new_v4(),
                &[ValueWrite {
                    master_var_id: fixture.variable.id,
                    value: None,
                    is_inherited: true,
                }],
                EDITOR,
            )
            .unwrap_err(),
        BulkSetError::Repo(RepoError::NotFound { .. })
    ));
}
