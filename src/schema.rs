//! JSON Schema to GBNF conversion.
//!
//! Covers the subset that tool-call parameter schemas actually use: `type`,
//! `properties` with `required`, `enum`, `items`, integer `minimum` and
//! `maximum`, `oneOf`/`anyOf`, and local `$ref`. Anything outside the
//! subset is an authoring error and panics; a silently ignored constraint
//! would let the model emit output the caller believes is impossible.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use serde_json::Value;

use crate::grammar::{quote_literal, GrammarBuilder};

/// Shared rules for unconstrained JSON fragments, added on demand. Each
/// entry is the rule body plus the other primitives that body references.
static PRIMITIVES: Lazy<HashMap<&str, (&str, &[&str])>> = Lazy::new(|| {
    HashMap::from([
        (
            "value",
            (
                "object | array | string | number | boolean | null",
                &["object", "array", "string", "number", "boolean", "null"][..],
            ),
        ),
        (
            "object",
            (
                "\"{\" space ( string \":\" space value (\",\" space string \":\" space value)* )? \"}\" space",
                &["string", "value"][..],
            ),
        ),
        (
            "array",
            (
                "\"[\" space ( value (\",\" space value)* )? \"]\" space",
                &["value"][..],
            ),
        ),
        ("string", ("\"\\\"\" char* \"\\\"\" space", &["char"][..])),
        (
            "char",
            (
                "[^\"\\\\\\u0000-\\u001F\\u007F] | \"\\\\\" ([\"\\\\/bfnrt] | \"u\" [0-9a-fA-F]{4})",
                &[][..],
            ),
        ),
        (
            "number",
            (
                "(\"-\"? ([0-9] | [1-9] [0-9]*)) (\".\" [0-9]+)? ([eE] [-+]? [0-9]+)? space",
                &[][..],
            ),
        ),
        (
            "integer",
            ("(\"-\"? ([0-9] | [1-9] [0-9]*)) space", &[][..]),
        ),
        ("boolean", ("(\"true\" | \"false\") space", &[][..])),
        ("null", ("\"null\" space", &[][..])),
    ])
});

/// Integer ranges wider than this fall back to the generic rule instead of
/// an enumeration.
const MAX_RANGE_ALTERNATIVES: i64 = 256;

/// Translates one schema into rules on a [`GrammarBuilder`].
pub struct SchemaConverter<'a> {
    gb: &'a mut GrammarBuilder,
    refs: HashMap<String, Value>,
}

impl<'a> SchemaConverter<'a> {
    pub fn new(gb: &'a mut GrammarBuilder) -> Self {
        SchemaConverter { gb, refs: HashMap::new() }
    }

    /// Indexes `$defs`/`definitions` subschemas so later `$ref` pointers
    /// resolve. Scans the whole document, including nested definitions.
    pub fn resolve_refs(&mut self, schema: &Value) {
        for section in ["$defs", "definitions"] {
            if let Some(defs) = schema.get(section).and_then(Value::as_object) {
                for (key, sub) in defs {
                    self.refs.insert(format!("#/{section}/{key}"), sub.clone());
                    self.resolve_refs(sub);
                }
            }
        }
        if let Some(props) = schema.get("properties").and_then(Value::as_object) {
            for sub in props.values() {
                self.resolve_refs(sub);
            }
        }
        if let Some(items) = schema.get("items") {
            self.resolve_refs(items);
        }
    }

    /// Converts `schema`, registering rules as needed, and returns the name
    /// of the rule that matches it.
    pub fn visit(&mut self, schema: &Value, name: &str) -> String {
        if let Some(target) = schema.get("$ref").and_then(Value::as_str) {
            let resolved = self
                .refs
                .get(target)
                .cloned()
                .unwrap_or_else(|| panic!("unresolved $ref '{target}'"));
            let ref_name = target.rsplit('/').next().unwrap_or(target).to_string();
            return self.visit(&resolved, &ref_name);
        }

        if let Some(values) = schema.get("enum").and_then(Value::as_array) {
            // The literal is the value's JSON text, so string members keep
            // their quotes in the output.
            let alts: Vec<String> = values
                .iter()
                .map(|v| format!("{} space", quote_literal(&v.to_string())))
                .collect();
            return self.gb.add_rule(name, &alts.join(" | "));
        }

        for key in ["oneOf", "anyOf"] {
            if let Some(alts) = schema.get(key).and_then(Value::as_array) {
                let parts: Vec<String> = alts
                    .iter()
                    .enumerate()
                    .map(|(i, alt)| self.visit(alt, &format!("{name}-{i}")))
                    .collect();
                return self.gb.add_rule(name, &parts.join(" | "));
            }
        }

        match schema.get("type").and_then(Value::as_str) {
            Some("object") => self.visit_object(schema, name),
            Some("array") => self.visit_array(schema, name),
            Some("string") => self.primitive("string"),
            Some("number") => self.primitive("number"),
            Some("integer") => self.visit_integer(schema),
            Some("boolean") => self.primitive("boolean"),
            Some("null") => self.primitive("null"),
            None => self.primitive("value"),
            Some(other) => panic!("unsupported schema type '{other}'"),
        }
    }

    fn visit_object(&mut self, schema: &Value, name: &str) -> String {
        let Some(props) = schema.get("properties").and_then(Value::as_object) else {
            return self.primitive("object");
        };
        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|keys| keys.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut required_kvs = Vec::new();
        let mut optional_kvs = Vec::new();
        for (key, sub) in props {
            let value_rule = self.visit(sub, &format!("{name}-{key}"));
            let kv_body = format!(
                "{} space \":\" space {value_rule}",
                quote_literal(&format!("\"{key}\""))
            );
            let kv_rule = self.gb.add_rule(&format!("{name}-{key}-kv"), &kv_body);
            if required.contains(key.as_str()) {
                required_kvs.push(kv_rule);
            } else {
                optional_kvs.push(kv_rule);
            }
        }

        // Optional members chain so every comma has a member before it:
        // ( kv1 ( "," space kv2 )? )?
        let opt_chain = optional_kvs
            .iter()
            .rev()
            .fold(String::new(), |tail, kv| {
                if tail.is_empty() {
                    kv.clone()
                } else {
                    format!("{kv} ( \",\" space {tail} )?")
                }
            });

        let mut middle = required_kvs.join(" \",\" space ");
        if !opt_chain.is_empty() {
            if middle.is_empty() {
                middle = format!("( {opt_chain} )?");
            } else {
                middle = format!("{middle} ( \",\" space {opt_chain} )?");
            }
        }

        let body = if middle.is_empty() {
            "\"{\" space \"}\" space".to_string()
        } else {
            format!("\"{{\" space {middle} \"}}\" space")
        };
        self.gb.add_rule(name, &body)
    }

    fn visit_array(&mut self, schema: &Value, name: &str) -> String {
        let Some(items) = schema.get("items") else {
            return self.primitive("array");
        };
        let item = self.visit(items, &format!("{name}-item"));
        let body = format!("\"[\" space ( {item} (\",\" space {item})* )? \"]\" space");
        self.gb.add_rule(name, &body)
    }

    fn visit_integer(&mut self, schema: &Value) -> String {
        let min = schema.get("minimum").and_then(Value::as_i64);
        let max = schema.get("maximum").and_then(Value::as_i64);
        if let (Some(min), Some(max)) = (min, max) {
            if min <= max && max - min < MAX_RANGE_ALTERNATIVES {
                let alts: Vec<String> = (min..=max)
                    .map(|n| quote_literal(&n.to_string()))
                    .collect();
                let body = format!("({}) space", alts.join(" | "));
                let name = format!("int-{min}-{max}");
                return self.gb.add_rule(&name, &body);
            }
        }
        self.primitive("integer")
    }

    fn primitive(&mut self, name: &str) -> String {
        if self.gb.contains(name) {
            return name.to_string();
        }
        let mut work = vec![name];
        while let Some(current) = work.pop() {
            if self.gb.contains(current) {
                continue;
            }
            let (body, deps) = PRIMITIVES
                .get(current)
                .copied()
                .unwrap_or_else(|| panic!("unknown primitive rule '{current}'"));
            self.gb.add_rule(current, body);
            work.extend(deps.iter().copied());
        }
        name.to_string()
    }
}
