//! Merge and validation guarantees
//!
//! End-to-end checks through the public API:
//! - Aliases referenced by any input fragment stay defined after merging
//! - Shared aliases collapse to a single pattern
//! - Filters are conjoined, never dropped
//! - Illegal orderings and undefined aliases are rejected before rendering
//! - Parameter conflicts surface as `ParameterConflict`

use quiver_query::{
    Clause, Combiner, Fragment, NodePattern, Params, ProjectionItem, QueryBuilder, QueryError,
    QueryStructure,
};
use serde_json::json;

fn params(pairs: &[(&str, serde_json::Value)]) -> Params {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ============================================================================
// Combining
// ============================================================================

#[test]
fn test_aliases_survive_merge() {
    let users = QueryBuilder::new()
        .matching([NodePattern::new("u").label("User")])
        .filter("u.age > 18", ["u"])
        .returning(["u.name"])
        .build()
        .unwrap();
    let teams = QueryBuilder::new()
        .matching([NodePattern::new("t").label("Team")])
        .returning(["t.name"])
        .build()
        .unwrap();

    let mut combiner = Combiner::new();
    combiner.add(&users).unwrap();
    combiner.add(&teams).unwrap();
    let merged = combiner.build().unwrap();

    let structure = merged.structure().unwrap();
    let defined = structure.defined_aliases();
    for fragment in [&users, &teams] {
        for entry in fragment.structure().unwrap().clauses() {
            for alias in entry.clause.used_aliases() {
                assert!(defined.contains(&alias), "alias {} lost", alias);
            }
        }
    }
    assert_eq!(
        merged.text(),
        "MATCH (u:User), (t:Team) WHERE u.age > 18 RETURN u.name, t.name"
    );
}

#[test]
fn test_shared_alias_is_not_duplicated() {
    let a = Fragment::raw("MATCH (u:User) RETURN u.name", Params::new());
    let b = Fragment::raw("MATCH (u:User) WHERE u.admin = true RETURN u.email", Params::new());

    let merged = a.merged(&b).unwrap();
    // Raw + raw stays textual
    assert!(!merged.is_structured());

    let mut combiner = Combiner::new();
    combiner.add(&a).unwrap();
    combiner.add(&b).unwrap();
    let compiled = combiner.build().unwrap();

    let Clause::Match { patterns, .. } = &compiled.structure().unwrap().clauses()[0].clause else {
        panic!("expected MATCH first");
    };
    assert_eq!(patterns.len(), 1);
    assert_eq!(
        compiled.text(),
        "MATCH (u:User) WHERE u.admin = true RETURN u.name, u.email"
    );
}

#[test]
fn test_filters_conjoin() {
    let first = QueryBuilder::new()
        .matching([NodePattern::new("n")])
        .filter("n.a = 1", ["n"])
        .build()
        .unwrap();
    let second = QueryBuilder::new()
        .matching([NodePattern::new("n")])
        .filter("n.b = 2 OR n.c = 3", ["n"])
        .build()
        .unwrap();

    let merged = first.merged(&second).unwrap();
    assert!(merged
        .text()
        .contains("WHERE (n.a = 1) AND (n.b = 2 OR n.c = 3)"));
}

#[test]
fn test_conflicting_parameter_fails() {
    let five = QueryBuilder::new()
        .matching([NodePattern::new("u")])
        .filter_with("u.id = $id", ["u"], params(&[("id", json!(5))]))
        .build()
        .unwrap();
    let seven = QueryBuilder::new()
        .matching([NodePattern::new("u")])
        .filter_with("u.id = $id", ["u"], params(&[("id", json!(7))]))
        .build()
        .unwrap();
    let also_five = QueryBuilder::new()
        .matching([NodePattern::new("u")])
        .param("id", 5)
        .returning(["u"])
        .build()
        .unwrap();

    assert_eq!(
        five.merged(&seven).unwrap_err(),
        QueryError::ParameterConflict { key: "id".into() }
    );

    let merged = five.merged(&also_five).unwrap();
    assert_eq!(merged.parameters()["id"], json!(5));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_return_before_match_is_rejected() {
    let mut structure = QueryStructure::new();
    structure.add_clause(Clause::Match {
        patterns: vec![NodePattern::new("u").into()],
        optional: false,
    });
    structure.add_clause(Clause::Return {
        items: vec![ProjectionItem::field("u")],
        distinct: false,
    });
    structure.add_clause(Clause::Match {
        patterns: vec![NodePattern::new("v").into()],
        optional: false,
    });

    assert!(matches!(
        structure.validate(),
        Err(QueryError::CompilationFailed { .. })
    ));
    assert!(Fragment::from_structure(structure).is_err());
}

#[test]
fn test_undefined_alias_is_rejected() {
    let err = QueryBuilder::new()
        .matching([NodePattern::new("u")])
        .filter("x.age > 1", ["x"])
        .build()
        .unwrap_err();

    match err {
        QueryError::CompilationFailed { reason } => assert!(reason.contains("x")),
        other => panic!("expected CompilationFailed, got {:?}", other),
    }
}

#[test]
fn test_compiled_text_never_inlines_literals() {
    let fragment = QueryBuilder::new()
        .create([NodePattern::new("n")
            .label("Note")
            .property("title", json!("'; DROP everything"))])
        .set("n", "score", json!(0.5))
        .build()
        .unwrap();

    assert!(!fragment.text().contains("DROP"));
    assert_eq!(fragment.parameters()["p1"], json!("'; DROP everything"));
    assert_eq!(fragment.parameters()["p2"], json!(0.5));
}
