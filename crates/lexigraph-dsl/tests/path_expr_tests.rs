use lexigraph_dsl::path_expr::{parse_path_expr, PathExpr};
use proptest::prelude::*;

// ============================================================================
// Syntax errors
// ============================================================================

#[test]
fn unbalanced_parens_report_the_offending_offset() {
    let err = parse_path_expr("(friend,cat").unwrap_err();
    assert_eq!(err.offset, 0);
    assert!(err.message.contains("unclosed"), "{err}");

    let err = parse_path_expr("friend),cat").unwrap_err();
    assert_eq!(err.offset, 6);
    assert!(err.message.contains("unmatched"), "{err}");
}

#[test]
fn empty_atoms_are_rejected() {
    for text in ["friend,,cat", "friend,", "()", "a|", ",a"] {
        let err = parse_path_expr(text).unwrap_err();
        assert!(err.message.contains("empty atom"), "{text}: {err}");
    }
    let err = parse_path_expr("   ").unwrap_err();
    assert_eq!(err.message, "empty path expression");
}

#[test]
fn unknown_operators_are_rejected() {
    let err = parse_path_expr("friend#").unwrap_err();
    assert_eq!(err.offset, 6);
    assert!(err.message.contains('#'), "{err}");

    let err = parse_path_expr("+friend").unwrap_err();
    assert!(err.message.contains("no operand"), "{err}");

    let err = parse_path_expr("< ,cat").unwrap_err();
    assert!(err.message.contains('<'), "{err}");
}

#[test]
fn whitespace_is_insignificant() {
    assert_eq!(
        parse_path_expr(" ( < friend ) * , cat ").unwrap(),
        parse_path_expr("(<friend)*,cat").unwrap()
    );
}

#[test]
fn nested_repetition_keeps_structure() {
    let e = parse_path_expr("(friend,cat)+*").unwrap();
    assert_eq!(
        e,
        PathExpr::star(PathExpr::plus(PathExpr::seq(vec![
            PathExpr::forward("friend"),
            PathExpr::forward("cat"),
        ])))
    );
}

// ============================================================================
// Rendering is accepted by the parser
// ============================================================================

fn predicate() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-z][a-z0-9_]{0,6}").unwrap()
}

fn path_expr_strategy() -> impl Strategy<Value = PathExpr> {
    let leaf = prop_oneof![
        predicate().prop_map(PathExpr::forward),
        predicate().prop_map(PathExpr::reverse),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 2..=3).prop_map(PathExpr::seq),
            prop::collection::vec(inner.clone(), 2..=3).prop_map(PathExpr::alt),
            inner.clone().prop_map(PathExpr::plus),
            inner.clone().prop_map(PathExpr::star),
            (inner, 0u32..3, proptest::option::of(3u32..5)).prop_map(|(e, min, max)| {
                PathExpr::Repeat {
                    inner: Box::new(e),
                    min,
                    max,
                }
            }),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]

    #[test]
    fn rendered_expressions_reparse_to_the_same_ast(expr in path_expr_strategy()) {
        let text = expr.to_string();
        let reparsed = parse_path_expr(&text).map_err(|e| TestCaseError::fail(e.to_string()))?;
        prop_assert_eq!(reparsed, expr);
    }
}
