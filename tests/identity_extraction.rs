use rowvault::{
    Comparison, KeyResolver, MemoryKeyStore, Operand, Predicate, RecordId, RowvaultError,
    StatementContext,
};
use uuid::Uuid;

fn filter(predicates: Vec<Predicate>) -> StatementContext {
    StatementContext::Filter(predicates)
}

#[test]
fn test_filter_on_identity_targets_that_row() {
    // update ... where id == X -> X
    let ctx = filter(vec![Predicate::equals(
        Operand::column("id"),
        Operand::Text("row-x".into()),
    )]);
    assert_eq!(ctx.extract_identity("id").unwrap(), RecordId::from("row-x"));

    // Literal on the left is the same clause.
    let ctx = filter(vec![Predicate::equals(
        Operand::Integer(42),
        Operand::column("encrypted_model.id"),
    )]);
    assert_eq!(ctx.extract_identity("id").unwrap(), RecordId::from(42i64));
}

#[test]
fn test_identity_clause_found_among_other_clauses() {
    let ctx = filter(vec![
        Predicate::new(Operand::column("created"), Comparison::Gt, Operand::Integer(0)),
        Predicate::equals(Operand::column("name"), Operand::Text("bob".into())),
        Predicate::equals(Operand::column("id"), Operand::Text("row-y".into())),
    ]);
    assert_eq!(ctx.extract_identity("id").unwrap(), RecordId::from("row-y"));
}

#[test]
fn test_insert_targets_first_object() {
    let y = RecordId::generate();
    let ctx = StatementContext::insert(&[y.clone()]);
    assert_eq!(ctx.extract_identity("id").unwrap(), y);

    let z = RecordId::generate();
    let ctx = StatementContext::insert(&[Some(y.clone()), Some(z)]);
    assert_eq!(ctx.extract_identity("id").unwrap(), y);
}

#[test]
fn test_explicit_identity_always_resolves() {
    let id = RecordId::from("threaded-through");
    let ctx = StatementContext::Explicit(id.clone());
    assert_eq!(ctx.extract_identity("anything").unwrap(), id);
}

#[test]
fn test_unresolvable_contexts_fail_loudly() {
    // A statement whose target cannot be determined must never mint or
    // guess a key.
    let cases = [
        StatementContext::Unknown,
        StatementContext::Insert(vec![]),
        StatementContext::Insert(vec![None]),
        filter(vec![]),
        filter(vec![Predicate::equals(
            Operand::column("name"),
            Operand::Text("bob".into()),
        )]),
        filter(vec![Predicate::new(
            Operand::column("id"),
            Comparison::Ne,
            Operand::Text("row-x".into()),
        )]),
        filter(vec![Predicate::equals(Operand::column("id"), Operand::Null)]),
        filter(vec![Predicate::equals(
            Operand::column("id"),
            Operand::column("other.id"),
        )]),
    ];

    let resolver = KeyResolver::new(MemoryKeyStore::new());
    for ctx in cases {
        let result = resolver.resolve_key_for_statement(&ctx);
        assert!(
            matches!(result, Err(RowvaultError::IdentityResolution(_))),
            "{:?} resolved to {:?}",
            ctx,
            result
        );
    }
    assert!(resolver.store().is_empty());
    assert!(resolver.cache().is_empty());
}

#[test]
fn test_conflicting_identities_are_rejected() {
    let ctx = filter(vec![
        Predicate::equals(Operand::column("id"), Operand::Text("a".into())),
        Predicate::equals(Operand::column("t.id"), Operand::Text("b".into())),
    ]);
    assert!(matches!(
        ctx.extract_identity("id"),
        Err(RowvaultError::IdentityResolution(_))
    ));
}

#[test]
fn test_uuid_literal_identifies_row_on_any_column() {
    let uuid = Uuid::new_v4();
    let ctx = filter(vec![Predicate::equals(
        Operand::column("external_ref"),
        Operand::Uuid(uuid),
    )]);
    assert_eq!(ctx.extract_identity("id").unwrap(), RecordId::from(uuid));
}

#[test]
fn test_configured_identity_column() {
    let ctx = filter(vec![Predicate::equals(
        Operand::column("pk"),
        Operand::Integer(9),
    )]);
    assert!(ctx.extract_identity("id").is_err());

    let resolver = KeyResolver::new(MemoryKeyStore::new()).with_identity_column("pk");
    let key = resolver.resolve_key_for_statement(&ctx).unwrap();
    assert_eq!(key.record_id, RecordId::from(9i64));
}

#[test]
fn test_predicates_deserialize_from_json() {
    let json = r#"[
        {"lhs": {"column": "id"}, "op": "eq", "rhs": {"text": "row-j"}},
        {"lhs": {"column": "age"}, "op": "gte", "rhs": {"integer": 18}}
    ]"#;
    let predicates: Vec<Predicate> = serde_json::from_str(json).unwrap();
    assert_eq!(
        filter(predicates).extract_identity("id").unwrap(),
        RecordId::from("row-j")
    );
}
