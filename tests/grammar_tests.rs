//! GBNF synthesis: node lowering, reachability pruning, trigger roots, and
//! schema-derived rules.

use serde_json::json;
use weft::build_parser;

const SPACE_LINE: &str = "space ::= | \" \" | \"\\n\"{1,2} [ \\t]{0,20}\n";

#[test]
fn literal_grammar() {
    let parser = build_parser(|p| p.literal("hello"));
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"hello\"\n{SPACE_LINE}")
    );
}

#[test]
fn char_class_grammar() {
    let parser = build_parser(|p| p.chars("[a-z]"));
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= [a-z]\n{SPACE_LINE}")
    );
}

#[test]
fn sequence_grammar() {
    let parser = build_parser(|p| {
        let a = p.literal("hello");
        let b = p.literal(" ");
        let c = p.literal("world");
        p.sequence(&[a, b, c])
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"hello\" \" \" \"world\"\n{SPACE_LINE}")
    );
}

#[test]
fn choice_grammar() {
    let parser = build_parser(|p| {
        let cat = p.literal("cat");
        let dog = p.literal("dog");
        p.choice(&[cat, dog])
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"cat\" | \"dog\"\n{SPACE_LINE}")
    );
}

#[test]
fn repetition_suffixes() {
    let parser = build_parser(|p| {
        let a = p.literal("a");
        p.one_or_more(a)
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"a\"+\n{SPACE_LINE}")
    );

    let parser = build_parser(|p| {
        let a = p.literal("a");
        p.zero_or_more(a)
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"a\"*\n{SPACE_LINE}")
    );

    let parser = build_parser(|p| {
        let hello = p.literal("hello");
        let world = p.literal(" world");
        let opt = p.optional(world);
        p.sequence(&[hello, opt])
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"hello\" \" world\"?\n{SPACE_LINE}")
    );

    let parser = build_parser(|p| {
        let digit = p.chars("[0-9]");
        p.repeat(digit, 2, Some(4))
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= [0-9]{{2,4}}\n{SPACE_LINE}")
    );
}

#[test]
fn choice_under_repetition_gets_parentheses() {
    let parser = build_parser(|p| {
        let a = p.literal("a");
        let b = p.literal("b");
        let either = p.choice(&[a, b]);
        p.one_or_more(either)
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= (\"a\" | \"b\")+\n{SPACE_LINE}")
    );
}

#[test]
fn until_lowers_to_delimiter_avoiding_loop() {
    let parser = build_parser(|p| p.until("</tag>"));
    assert_eq!(
        parser.build_grammar(false),
        format!(
            "root ::= ([^<] | \"<\" [^/] | \"</\" [^t] | \"</t\" [^a] | \"</ta\" [^g] | \"</tag\" [^>])*\n{SPACE_LINE}"
        )
    );
}

#[test]
fn literal_escapes_in_output() {
    let parser = build_parser(|p| p.literal("hello\nworld\n!"));
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"hello\\nworld\\n!\"\n{SPACE_LINE}")
    );
}

#[test]
fn rule_references_emit_named_rules() {
    let parser = build_parser(|p| {
        let class = p.chars("[0-9]");
        let digit = p.rule("digit", class);
        p.one_or_more(digit)
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("digit ::= [0-9]\nroot ::= digit+\n{SPACE_LINE}")
    );
}

#[test]
fn with_space_inserts_the_space_rule() {
    let parser = build_parser(|p| {
        let hello = p.literal("hello");
        let world = p.literal("world");
        p.with_space(&[hello, world])
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"hello\" space \"world\"\n{SPACE_LINE}")
    );
}

#[test]
fn zero_width_nodes_leave_no_trace() {
    let parser = build_parser(|p| {
        let a = p.literal("a");
        let ahead = p.literal("b");
        let peeked = p.peek(ahead);
        let end = p.end();
        p.sequence(&[a, peeked, end])
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= \"a\"\n{SPACE_LINE}")
    );
}

#[test]
fn only_reachable_rules_are_emitted() {
    let parser = build_parser(|p| {
        let orphan_body = p.literal("orphan");
        p.rule("orphan", orphan_body);
        let hello = p.literal("hello");
        let child_body = p.literal(" world");
        let child = p.rule("child", child_body);
        p.sequence(&[hello, child])
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("child ::= \" world\"\nroot ::= \"hello\" child\n{SPACE_LINE}")
    );
}

#[test]
fn trigger_rules_become_the_lazy_root() {
    let parser = build_parser(|p| {
        let a = p.literal("a");
        let r2 = p.ref_rule("rule-2");
        let body1 = p.sequence(&[a, r2]);
        let rule1 = p.rule("rule-1", body1);

        let b = p.literal("b");
        let r3 = p.ref_rule("rule-3");
        let body2 = p.sequence(&[b, r3]);
        p.trigger_rule("rule-2", body2);

        let c = p.literal("c");
        let r4 = p.ref_rule("rule-4");
        let body3 = p.sequence(&[c, r4]);
        p.rule("rule-3", body3);

        let d = p.literal("d");
        p.trigger_rule("rule-4", d);

        rule1
    });

    assert_eq!(
        parser.build_grammar(false),
        format!(
            "root ::= rule-1\n\
             rule-1 ::= \"a\" rule-2\n\
             rule-2 ::= \"b\" rule-3\n\
             rule-3 ::= \"c\" rule-4\n\
             rule-4 ::= \"d\"\n\
             {SPACE_LINE}"
        )
    );

    assert_eq!(
        parser.build_grammar(true),
        format!(
            "root ::= rule-2 | rule-4\n\
             rule-2 ::= \"b\" rule-3\n\
             rule-3 ::= \"c\" rule-4\n\
             rule-4 ::= \"d\"\n\
             {SPACE_LINE}"
        )
    );
}

#[test]
fn schema_wrapped_rules_come_from_the_schema() {
    let schema = json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "limit": {"type": "integer", "minimum": 1, "maximum": 3}
        },
        "required": ["query"]
    });
    let parser = build_parser(|p| {
        let value = p.json();
        p.schema(value, "search-args", schema)
    });
    let gbnf = parser.build_grammar(false);

    assert!(gbnf.contains(
        "search-args ::= \"{\" space search-args-query-kv ( \",\" space search-args-limit-kv )? \"}\" space\n"
    ));
    assert!(gbnf.contains("search-args-query-kv ::= \"\\\"query\\\"\" space \":\" space string\n"));
    assert!(gbnf.contains("int-1-3 ::= (\"1\" | \"2\" | \"3\") space\n"));
    assert!(gbnf.contains("string ::= \"\\\"\" char* \"\\\"\" space\n"));
    // The wrapped child is replaced entirely; nothing references the
    // parse-side JSON rules.
    assert!(!gbnf.contains("json-value"));
}

#[test]
fn schema_enum_as_string_emits_bare_literals() {
    let parser = build_parser(|p| {
        let word = p.chars_repeat("[a-z]", 1, None);
        p.schema_as_string(word, "unit", json!({"enum": ["celsius", "fahrenheit"]}))
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= unit\n{SPACE_LINE}unit ::= \"celsius\" | \"fahrenheit\"\n")
    );
}

#[test]
fn schema_as_string_without_enum_falls_back_to_the_child() {
    let parser = build_parser(|p| {
        let word = p.chars_repeat("[a-z]", 1, None);
        p.schema_as_string(word, "free-text", json!({"type": "string"}))
    });
    assert_eq!(
        parser.build_grammar(false),
        format!("root ::= [a-z]+\n{SPACE_LINE}")
    );
}

#[test]
fn schema_refs_resolve_through_defs() {
    let schema = json!({
        "type": "object",
        "properties": {
            "point": {"$ref": "#/$defs/point"}
        },
        "required": ["point"],
        "$defs": {
            "point": {
                "type": "object",
                "properties": {
                    "x": {"type": "number"},
                    "y": {"type": "number"}
                },
                "required": ["x", "y"]
            }
        }
    });
    let parser = build_parser(|p| {
        let value = p.json();
        p.schema(value, "shape", schema)
    });
    let gbnf = parser.build_grammar(false);
    assert!(gbnf.contains(
        "point ::= \"{\" space point-x-kv \",\" space point-y-kv \"}\" space\n"
    ));
    assert!(gbnf.contains("shape-point-kv ::= \"\\\"point\\\"\" space \":\" space point\n"));
}

#[test]
fn schema_enum_values_keep_json_quoting() {
    let parser = build_parser(|p| {
        let value = p.json();
        p.schema(value, "status", json!({"enum": ["ok", "error", 3]}))
    });
    let gbnf = parser.build_grammar(false);
    assert!(gbnf.contains("status ::= \"\\\"ok\\\"\" space | \"\\\"error\\\"\" space | \"3\" space\n"));
}
