//! GBNF synthesis.
//!
//! The same arena that drives parsing compiles to GBNF text for constrained
//! decoding, so the constraint grammar and the parser can never drift
//! apart. Emission is demand driven: a rule's body is lowered only when
//! something reachable references it, which is also what keeps orphan rules
//! out of the output.

use std::collections::BTreeMap;

use crate::arena::{Arena, Node, NodeId};
use crate::builder::SPACE_RULE;
use crate::schema::SchemaConverter;

/// Canonical whitespace rule body. Matches at most two newlines followed by
/// bounded indentation, which stops a constrained model from emitting
/// unbounded blank space.
pub const SPACE_BODY: &str = "| \" \" | \"\\n\"{1,2} [ \\t]{0,20}";

/// GBNF body for a JSON string interior.
const STRING_CONTENT_BODY: &str =
    "([^\"\\\\\\u0000-\\u001F] | \"\\\\\" ([\"\\\\/bfnrt] | \"u\" [0-9a-fA-F]{4}))*";

/// Accumulates named GBNF rules and renders them alphabetically.
pub struct GrammarBuilder {
    rules: BTreeMap<String, String>,
}

impl Default for GrammarBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GrammarBuilder {
    pub fn new() -> Self {
        GrammarBuilder { rules: BTreeMap::new() }
    }

    /// Registers `body` under `name`, renaming on collision. Returns the
    /// name actually used.
    pub fn add_rule(&mut self, name: &str, body: &str) -> String {
        match self.rules.get(name) {
            None => {
                self.rules.insert(name.to_string(), body.to_string());
                name.to_string()
            }
            Some(existing) if existing == body => name.to_string(),
            Some(_) => {
                let mut i = 0usize;
                loop {
                    let candidate = format!("{name}{i}");
                    match self.rules.get(&candidate) {
                        None => {
                            self.rules.insert(candidate.clone(), body.to_string());
                            return candidate;
                        }
                        Some(existing) if existing == body => return candidate,
                        Some(_) => i += 1,
                    }
                }
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Renders `name ::= body` lines sorted by rule name.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, body) in &self.rules {
            out.push_str(name);
            out.push_str(" ::= ");
            out.push_str(body);
            out.push('\n');
        }
        out
    }
}

impl Arena {
    /// Compiles the grammar to GBNF text.
    ///
    /// With `lazy` set, the root becomes an ordered choice of the trigger
    /// rules and only grammar reachable from them is emitted; the host
    /// activates the grammar when the output matches a trigger. Panics if
    /// `lazy` is requested but no trigger rules exist.
    pub fn build_grammar(&self, lazy: bool) -> String {
        let mut lowerer = Lowerer { arena: self, gb: GrammarBuilder::new() };

        let root_body = if lazy {
            let triggers: Vec<&str> = self
                .rules()
                .filter(|(_, rule)| rule.lazy)
                .map(|(name, _)| name)
                .collect();
            assert!(!triggers.is_empty(), "lazy grammar requires trigger rules");
            for name in &triggers {
                lowerer.request_rule(name);
            }
            triggers.join(" | ")
        } else {
            lowerer.lower(self.root()).0
        };
        lowerer.gb.add_rule("root", &root_body);

        let visible: Vec<String> = self
            .rules()
            .filter(|(_, rule)| rule.visible)
            .map(|(name, _)| name.to_string())
            .collect();
        for name in visible {
            lowerer.request_rule(&name);
        }

        lowerer.gb.add_rule(SPACE_RULE, SPACE_BODY);
        lowerer.gb.render()
    }
}

/// Binding strength of a lowered fragment, used to decide parentheses.
#[derive(PartialEq, Clone, Copy)]
enum Prec {
    Atom,
    Seq,
    Choice,
}

struct Lowerer<'a> {
    arena: &'a Arena,
    gb: GrammarBuilder,
}

impl Lowerer<'_> {
    /// Emits the named rule's body if it has not been emitted yet.
    fn request_rule(&mut self, name: &str) {
        if name == SPACE_RULE || self.gb.contains(name) {
            return;
        }
        // Reserve the name first so rule cycles terminate.
        self.gb.add_rule(name, "");
        let node = match self.arena.rule(name) {
            Some(rule) => rule.node,
            None => return,
        };
        let (body, _) = self.lower(node);
        self.gb.rules.insert(name.to_string(), body);
    }

    fn lower(&mut self, id: NodeId) -> (String, Prec) {
        match self.arena.node(id) {
            Node::Literal { text } => (quote_literal(text), Prec::Atom),
            Node::CharClass { ranges } => (lower_class(ranges), Prec::Atom),
            Node::Sequence { children } => self.lower_sequence(children),
            Node::Choice { alternatives } => {
                let parts: Vec<String> = alternatives
                    .iter()
                    .map(|alt| self.lower(*alt).0)
                    .collect();
                (parts.join(" | "), Prec::Choice)
            }
            Node::Repeat { child, min, max } => {
                let (body, prec) = self.lower(*child);
                let body = if prec == Prec::Atom { body } else { format!("({body})") };
                (format!("{body}{}", repeat_suffix(*min, *max)), Prec::Seq)
            }
            Node::RuleRef { name } => {
                self.request_rule(name);
                (name.clone(), Prec::Atom)
            }
            Node::Tag { child, .. } | Node::Atomic { child } => self.lower(*child),
            Node::SchemaWrapped { child, name, schema, as_string } => {
                self.lower_schema(*child, name, schema, *as_string)
            }
            Node::Until { delimiters } => (lower_until(delimiters), Prec::Seq),
            Node::StringContent => (STRING_CONTENT_BODY.to_string(), Prec::Seq),
            // Zero-width constructs have no surface in the token stream.
            Node::Peek { .. } | Node::End | Node::Eps => ("\"\"".to_string(), Prec::Atom),
        }
    }

    fn lower_sequence(&mut self, children: &[NodeId]) -> (String, Prec) {
        let visible: Vec<NodeId> = children
            .iter()
            .copied()
            .filter(|c| {
                !matches!(self.arena.node(*c), Node::Peek { .. } | Node::End | Node::Eps)
            })
            .collect();
        match visible.as_slice() {
            [] => ("\"\"".to_string(), Prec::Atom),
            [single] => self.lower(*single),
            many => {
                let parts: Vec<String> = many
                    .iter()
                    .map(|c| {
                        let (body, prec) = self.lower(*c);
                        if prec == Prec::Choice {
                            format!("({body})")
                        } else {
                            body
                        }
                    })
                    .collect();
                (parts.join(" "), Prec::Seq)
            }
        }
    }

    fn lower_schema(
        &mut self,
        child: NodeId,
        name: &str,
        schema: &serde_json::Value,
        as_string: bool,
    ) -> (String, Prec) {
        if as_string {
            // Only an enumeration constrains the raw span; the values are
            // emitted bare, without JSON quoting.
            if let Some(values) = schema.get("enum").and_then(|v| v.as_array()) {
                let alts: Vec<String> = values
                    .iter()
                    .map(|v| match v.as_str() {
                        Some(s) => quote_literal(s),
                        None => quote_literal(&v.to_string()),
                    })
                    .collect();
                let rule = self.gb.add_rule(name, &alts.join(" | "));
                return (rule, Prec::Atom);
            }
            return self.lower(child);
        }
        let mut converter = SchemaConverter::new(&mut self.gb);
        converter.resolve_refs(schema);
        let rule = converter.visit(schema, name);
        (rule, Prec::Atom)
    }
}

fn repeat_suffix(min: usize, max: Option<usize>) -> String {
    match (min, max) {
        (0, None) => "*".to_string(),
        (1, None) => "+".to_string(),
        (0, Some(1)) => "?".to_string(),
        (m, None) => format!("{{{m},}}"),
        (m, Some(n)) if m == n => format!("{{{n}}}"),
        (m, Some(n)) => format!("{{{m},{n}}}"),
    }
}

/// `([^a] | "a" [^b] | "ab" [^c])*` for delimiter "abc": any amount of text
/// that never completes a delimiter.
fn lower_until(delimiters: &[String]) -> String {
    let mut alts = Vec::new();
    for delim in delimiters {
        let mut prefix = String::new();
        for c in delim.chars() {
            let class = format!("[^{}]", escape_class_char(c));
            if prefix.is_empty() {
                alts.push(class);
            } else {
                alts.push(format!("{} {class}", quote_literal(&prefix)));
            }
            prefix.push(c);
        }
    }
    format!("({})*", alts.join(" | "))
}

pub(crate) fn quote_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn lower_class(ranges: &[(u32, u32)]) -> String {
    if ranges == [(0, 0x10FFFF)] {
        return ".".to_string();
    }
    let mut out = String::from("[");
    for &(lo, hi) in ranges {
        out.push_str(&escape_class_cp(lo));
        if hi > lo {
            out.push('-');
            out.push_str(&escape_class_cp(hi));
        }
    }
    out.push(']');
    out
}

fn escape_class_cp(cp: u32) -> String {
    match char::from_u32(cp) {
        Some(c) => escape_class_char(c),
        None => format!("\\U{cp:08X}"),
    }
}

fn escape_class_char(c: char) -> String {
    match c {
        '\\' => "\\\\".to_string(),
        ']' => "\\]".to_string(),
        '[' => "\\[".to_string(),
        '^' => "\\^".to_string(),
        '-' => "\\-".to_string(),
        '\n' => "\\n".to_string(),
        '\t' => "\\t".to_string(),
        '\r' => "\\r".to_string(),
        c if (c as u32) < 0x20 || c as u32 == 0x7F => format!("\\u{:04X}", c as u32),
        c if c.is_ascii() => c.to_string(),
        c if (c as u32) <= 0xFFFF => format!("\\u{:04X}", c as u32),
        c => format!("\\U{:08X}", c as u32),
    }
}
