use kiln_ir::{TemplateId, builtin};
use test_case::test_case;

use crate::Error;
use crate::templates::{Segment, TemplateRegistry, declaration, parse};

#[test_case("plain text", vec![Segment::Text("plain text")]; "text only")]
#[test_case("${a}", vec![Segment::Var("a")]; "single placeholder")]
#[test_case("x = ${a} + ${b};", vec![
    Segment::Text("x = "), Segment::Var("a"), Segment::Text(" + "), Segment::Var("b"), Segment::Text(";")
]; "mixed")]
#[test_case("${a}${b}", vec![Segment::Var("a"), Segment::Var("b")]; "adjacent placeholders")]
#[test_case("cost: $5 {x}", vec![Segment::Text("cost: $5 {x}")]; "lone dollar is literal")]
#[test_case("", vec![]; "empty source")]
fn test_parse(source: &str, expected: Vec<Segment<'_>>) {
    assert_eq!(parse(source).unwrap(), expected);
}

#[test_case("${open", 0; "at start")]
#[test_case("a = ${b}; c = ${d", 14; "after a complete placeholder")]
fn test_parse_unterminated(source: &str, position: usize) {
    assert_eq!(parse(source), Err(position));
}

#[test]
fn test_builtins_cover_structural_and_declaration_templates() {
    let registry = TemplateRegistry::with_builtins();
    let ids = [
        builtin::COMMENT,
        builtin::FOR_TILES,
        builtin::IF_TILE_LT,
        builtin::IF_TILE_GE,
        builtin::SWITCH_PARITY,
        builtin::FOR_DIM,
        builtin::REF_DECL,
        builtin::REF_INDEXED,
        builtin::REF_ASSIGN,
        builtin::REF_ADVANCE,
        builtin::PARAM_ASSIGN,
        builtin::PARAM_DECL,
        declaration::EXTERN,
        declaration::STATIC,
        declaration::CONSTANT,
        declaration::ARENA,
        declaration::STRUCT,
    ];
    for id in &ids {
        assert!(registry.contains(id), "{id} missing");
        registry.segments(id).unwrap();
    }
    assert_eq!(registry.len(), ids.len());
}

#[test]
fn test_register_replaces_source() {
    let id = TemplateId::new("k");
    let mut registry = TemplateRegistry::new();
    assert!(registry.is_empty());
    registry.register(id.clone(), "first").register(id.clone(), String::from("second"));
    assert_eq!(registry.source(&id).unwrap(), "second");
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_extend_and_ids_are_sorted() {
    let mut registry = TemplateRegistry::new().with(TemplateId::new("b"), "B");
    registry.extend([(TemplateId::new("c"), "C"), (TemplateId::new("a"), "A")]);
    let ids: Vec<_> = registry.ids().map(TemplateId::as_str).collect();
    assert_eq!(ids, ["a", "b", "c"]);
}

#[test]
fn test_unknown_template() {
    let registry = TemplateRegistry::new();
    let err = registry.source(&TemplateId::new("missing")).unwrap_err();
    assert!(matches!(&err, Error::UnknownTemplate { template } if template == "missing"));
}

#[test]
fn test_malformed_template() {
    let registry = TemplateRegistry::new().with(TemplateId::new("broken"), "f(${x);");
    let err = registry.segments(&TemplateId::new("broken")).unwrap_err();
    assert!(matches!(err, Error::MalformedTemplate { position: 2, .. }));
}
