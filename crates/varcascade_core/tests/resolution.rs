mod common;

use common::{bind, rent_fixture, text_variable, EDITOR};
use varcascade_core::{
    open_db_in_memory, CatalogService, DocumentValueService, RepoError, ResolutionService,
};

#[test]
fn precedence_runs_document_then_template_then_master() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let document = &fixture.documents[0];
    let resolution = ResolutionService::new(&conn);

    assert_eq!(
        resolution
            .resolve_effective_value(document.id, fixture.variable.id)
            .unwrap()
            .as_deref(),
        Some("$150")
    );

    CatalogService::new(&conn)
        .set_template_override(fixture.template.id, fixture.variable.id, Some("$160"), EDITOR)
        .unwrap();
    assert_eq!(
        resolution
            .resolve_effective_value(document.id, fixture.variable.id)
            .unwrap()
            .as_deref(),
        Some("$160")
    );

    DocumentValueService::new(&conn)
        .set_value(document.id, fixture.variable.id, Some("$200"), false, EDITOR)
        .unwrap();
    assert_eq!(
        resolution
            .resolve_effective_value(document.id, fixture.variable.id)
            .unwrap()
            .as_deref(),
        Some("$200")
    );
}

#[test]
fn unbound_variable_resolves_to_none_and_missing_document_errors() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let phone = text_variable(&conn, "org.phone", Some("555-0100"));
    let resolution = ResolutionService::new(&conn);

    assert_eq!(
        resolution
            .resolve_effective_value(fixture.documents[0].id, phone.id)
            .unwrap(),
        None
    );
    assert!(matches!(
        resolution
            .resolve_effective_value(uuid::Uuid::new_v4(), phone.id)
            .unwrap_err(),
        RepoError::NotFound { .. }
    ));
}

#[test]
fn resolve_all_lists_bindings_by_key_with_groups() {
    let conn = open_db_in_memory().unwrap();
    let catalog = CatalogService::new(&conn);
    let fixture = rent_fixture(&conn, 1);
    let phone = text_variable(&conn, "org.phone", None);
    bind(&conn, &fixture.template, &phone, "agent_phone", true, None);
    let finance = catalog.create_group("Finance", None).unwrap();
    catalog
        .add_variable_to_group(finance.id, fixture.variable.id, 0)
        .unwrap();

    let resolved = ResolutionService::new(&conn)
        .resolve_all_for_document(fixture.documents[0].id)
        .unwrap();

    let keys: Vec<&str> = resolved.iter().map(|item| item.key.as_str()).collect();
    assert_eq!(keys, vec!["agent_phone", "weekly_rent"]);
    assert_eq!(resolved[0].effective_value, None);
    assert!(resolved[0].groups.is_empty());
    assert_eq!(resolved[1].name, "finance.accommodation.weekly_rent");
    assert_eq!(resolved[1].effective_value.as_deref(), Some("$150"));
    assert!(resolved[1].is_inherited);
    assert_eq!(resolved[1].groups.len(), 1);
    assert_eq!(resolved[1].groups[0].name, "Finance");
}

#[test]
fn render_document_substitutes_known_keys_only() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let phone = text_variable(&conn, "org.phone", None);
    bind(&conn, &fixture.template, &phone, "agent_phone", false, None);

    let rendered = ResolutionService::new(&conn)
        .render_document(
            fixture.documents[0].id,
            "Rent is {{weekly_rent}} per week ({{weekly_rent}}). Call {{agent_phone}} or {{office}}.",
        )
        .unwrap();

    assert_eq!(
        rendered.content,
        "Rent is $150 per week ($150). Call {{agent_phone}} or {{office}}."
    );
    assert_eq!(rendered.unresolved, vec!["agent_phone", "office"]);
}

#[test]
fn missing_required_reports_empty_required_bindings() {
    let conn = open_db_in_memory().unwrap();
    let fixture = rent_fixture(&conn, 1);
    let signatory = text_variable(&conn, "org.signatory", None);
    let notes = text_variable(&conn, "lease.notes", None);
    bind(&conn, &fixture.template, &signatory, "signatory", true, None);
    bind(&conn, &fixture.template, &notes, "notes", false, None);
    let resolution = ResolutionService::new(&conn);
    let document = &fixture.documents[0];

    let missing = resolution.missing_required(document.id).unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].key, "signatory");

    DocumentValueService::new(&conn)
        .set_value(document.id, signatory.id, Some("J. Smith"), false, EDITOR)
        .unwrap();
    assert!(resolution.missing_required(document.id).unwrap().is_empty());
}
