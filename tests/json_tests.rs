//! The built-in JSON sublanguage: complete documents succeed, truncated
//! ones stay undecided, and fixed-key members compose with other nodes.

use weft::{build_parser, Arena, ParseContext, ParseResult};

fn parse(arena: &Arena, input: &str, partial: bool) -> ParseResult {
    let mut ctx = ParseContext::new(input, partial);
    arena.parse(&mut ctx)
}

#[test]
fn simple_object_parses_to_the_end() {
    let parser = build_parser(|p| p.json());
    let input = r#"{"name": "test", "value": 42, "flag": true}"#;
    let result = parse(&parser, input, false);
    assert!(result.is_success());
    assert_eq!(result.end, input.len());
}

#[test]
fn array_with_mixed_types() {
    let parser = build_parser(|p| p.json());
    let input = r#"[1, "hello", true, null, 3.14]"#;
    let result = parse(&parser, input, false);
    assert!(result.is_success());
    assert_eq!(result.end, input.len());
}

#[test]
fn nested_objects_and_arrays() {
    let parser = build_parser(|p| p.json());
    let input = r#"{"users": [{"id": 1, "name": "Alice"}, {"id": 2, "name": "Bob"}], "count": 2, "metadata": {"version": "1.0", "tags": ["admin", "user"]}}"#;
    let result = parse(&parser, input, false);
    assert!(result.is_success());
    assert_eq!(result.end, input.len());
}

#[test]
fn numbers_with_exponents_and_signs() {
    let parser = build_parser(|p| p.json());
    for input in ["0", "-7", "3.14", "1e10", "-2.5E-3", "10"] {
        let result = parse(&parser, input, false);
        assert!(result.is_success(), "input {input:?}");
        assert_eq!(result.end, input.len(), "input {input:?}");
    }
}

#[test]
fn string_escapes() {
    let parser = build_parser(|p| p.json());
    let input = r#""line\nbreak é \"quoted\"""#;
    let result = parse(&parser, input, false);
    assert!(result.is_success());
    assert_eq!(result.end, input.len());
}

#[test]
fn incomplete_object_needs_more() {
    let parser = build_parser(|p| p.json());
    assert!(parse(&parser, r#"{"name": "test", "value": "#, true).needs_more());
}

#[test]
fn incomplete_array_needs_more() {
    let parser = build_parser(|p| p.json());
    assert!(parse(&parser, "[1, 2, 3, ", true).needs_more());
}

#[test]
fn incomplete_nested_structure_needs_more() {
    let parser = build_parser(|p| p.json());
    assert!(parse(&parser, r#"{"data": {"nested": "#, true).needs_more());
}

#[test]
fn incomplete_string_needs_more() {
    let parser = build_parser(|p| p.json());
    assert!(parse(&parser, r#"{"name": "bo"#, true).needs_more());
}

#[test]
fn member_with_fixed_key() {
    let parser = build_parser(|p| {
        let q1 = p.literal("\"");
        let word = p.chars_repeat("[a-z]", 1, None);
        let q2 = p.literal("\"");
        let value = p.sequence(&[q1, word, q2]);
        p.json_member("name", value)
    });

    assert!(parse(&parser, r#""name": "bob""#, false).is_success());
    assert!(parse(&parser, r#""name": "bo"#, true).needs_more());
    assert!(parse(&parser, "[]", false).is_fail());
}

#[test]
fn string_content_matches_interior_without_quotes() {
    let parser = build_parser(|p| {
        let q1 = p.literal("\"");
        let content = p.json_string_content();
        let q2 = p.literal("\"");
        p.sequence(&[q1, content, q2])
    });
    let input = r#""escaped \"text\" with \\ slashes""#;
    let result = parse(&parser, input, false);
    assert!(result.is_success());
    assert_eq!(result.end, input.len());
    // A bare backslash cannot end a string.
    assert!(parse(&parser, r#""bad \"#, true).needs_more());
}
