//! Grammar construction.
//!
//! A [`Builder`] accumulates nodes and named rules, then [`Builder::finish`]
//! validates the graph and freezes it into an [`Arena`]. Authoring mistakes
//! panic here rather than surfacing later as confusing parse failures:
//! a grammar is static program data, so an invalid one is a bug at the
//! definition site, not a runtime condition to recover from.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::arena::{Arena, Node, NodeId, Rule, TagKind};
use crate::unicode::parse_class_spec;

/// Name of the built-in whitespace rule inserted by [`Builder::with_space`].
pub const SPACE_RULE: &str = "space";

/// Builds an [`Arena`] node by node.
pub struct Builder {
    nodes: Vec<Node>,
    rules: BTreeMap<String, Rule>,
    json_ready: bool,
}

/// Constructs a complete parser in one closure, mirroring how grammars are
/// typically written: define rules, return the root.
pub fn build_parser(define: impl FnOnce(&mut Builder) -> NodeId) -> Arena {
    let mut builder = Builder::new();
    let root = define(&mut builder);
    builder.finish(root)
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            nodes: Vec::new(),
            rules: BTreeMap::new(),
            json_ready: false,
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        id
    }

    // ---- leaves ----

    /// Exact text match.
    pub fn literal(&mut self, text: &str) -> NodeId {
        self.push(Node::Literal { text: text.to_string() })
    }

    /// One codepoint from a class spec like `"[a-z0-9_]"`.
    ///
    /// Panics when the spec does not parse.
    pub fn chars(&mut self, spec: &str) -> NodeId {
        let ranges = parse_class_spec(spec)
            .unwrap_or_else(|err| panic!("invalid char class: {err}"));
        self.push(Node::CharClass { ranges })
    }

    /// A bounded run of class codepoints; `max` of `None` is unbounded.
    pub fn chars_repeat(&mut self, spec: &str, min: usize, max: Option<usize>) -> NodeId {
        let class = self.chars(spec);
        self.repeat(class, min, max)
    }

    /// Any single codepoint.
    pub fn any(&mut self) -> NodeId {
        self.push(Node::CharClass { ranges: vec![(0, 0x10FFFF)] })
    }

    /// Everything remaining in the input, including nothing.
    pub fn rest(&mut self) -> NodeId {
        let any = self.any();
        self.zero_or_more(any)
    }

    /// Consumes text up to (not including) `delimiter`.
    pub fn until(&mut self, delimiter: &str) -> NodeId {
        self.until_one_of(&[delimiter])
    }

    /// Consumes text up to the earliest occurrence of any delimiter.
    pub fn until_one_of(&mut self, delimiters: &[&str]) -> NodeId {
        assert!(
            delimiters.iter().all(|d| !d.is_empty()),
            "until requires non-empty delimiters"
        );
        let delimiters = delimiters.iter().map(|d| d.to_string()).collect();
        self.push(Node::Until { delimiters })
    }

    /// Matches the empty string.
    pub fn eps(&mut self) -> NodeId {
        self.push(Node::Eps)
    }

    /// Matches only at end of input.
    pub fn end(&mut self) -> NodeId {
        self.push(Node::End)
    }

    // ---- combinators ----

    pub fn sequence(&mut self, parts: &[NodeId]) -> NodeId {
        match parts {
            [single] => *single,
            _ => self.push(Node::Sequence { children: parts.to_vec() }),
        }
    }

    pub fn choice(&mut self, alternatives: &[NodeId]) -> NodeId {
        match alternatives {
            [single] => *single,
            _ => self.push(Node::Choice { alternatives: alternatives.to_vec() }),
        }
    }

    pub fn optional(&mut self, child: NodeId) -> NodeId {
        self.repeat(child, 0, Some(1))
    }

    pub fn zero_or_more(&mut self, child: NodeId) -> NodeId {
        self.repeat(child, 0, None)
    }

    pub fn one_or_more(&mut self, child: NodeId) -> NodeId {
        self.repeat(child, 1, None)
    }

    pub fn repeat(&mut self, child: NodeId, min: usize, max: Option<usize>) -> NodeId {
        if let Some(max) = max {
            assert!(min <= max, "repeat bounds inverted: {min} > {max}");
        }
        self.push(Node::Repeat { child, min, max })
    }

    /// Zero-width lookahead.
    pub fn peek(&mut self, child: NodeId) -> NodeId {
        self.push(Node::Peek { child })
    }

    /// Commits the child at the buffer edge when no continuation of the
    /// input could change the outcome.
    pub fn atomic(&mut self, child: NodeId) -> NodeId {
        self.push(Node::Atomic { child })
    }

    /// Sequence with optional whitespace allowed between each part.
    pub fn with_space(&mut self, parts: &[NodeId]) -> NodeId {
        let mut joined = Vec::with_capacity(parts.len() * 2);
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                joined.push(self.space());
            }
            joined.push(*part);
        }
        self.sequence(&joined)
    }

    /// Reference to the built-in optional-whitespace rule.
    pub fn space(&mut self) -> NodeId {
        if !self.rules.contains_key(SPACE_RULE) {
            // Greedy on the parse side; the synthesizer emits the canonical
            // constrained form instead of this body.
            let class = self.chars("[ \\t\\n\\r]");
            let node = self.repeat(class, 0, None);
            self.rules.insert(
                SPACE_RULE.to_string(),
                Rule { node, visible: false, lazy: false },
            );
        }
        self.push(Node::RuleRef { name: SPACE_RULE.to_string() })
    }

    // ---- rules ----

    /// Registers a named rule and returns a reference to it.
    ///
    /// Panics when `name` is already defined.
    pub fn rule(&mut self, name: &str, node: NodeId) -> NodeId {
        self.install_rule(name, node, false, false)
    }

    /// A rule that is always emitted in GBNF output, reachable or not.
    pub fn visible_rule(&mut self, name: &str, node: NodeId) -> NodeId {
        self.install_rule(name, node, true, false)
    }

    /// A rule that becomes a root alternative in trigger-based grammars.
    pub fn trigger_rule(&mut self, name: &str, node: NodeId) -> NodeId {
        self.install_rule(name, node, false, true)
    }

    fn install_rule(&mut self, name: &str, node: NodeId, visible: bool, lazy: bool) -> NodeId {
        let prev = self
            .rules
            .insert(name.to_string(), Rule { node, visible, lazy });
        assert!(prev.is_none(), "duplicate rule '{name}'");
        self.push(Node::RuleRef { name: name.to_string() })
    }

    /// Forward reference to a rule defined elsewhere. Resolution is checked
    /// by [`Builder::finish`].
    pub fn ref_rule(&mut self, name: &str) -> NodeId {
        self.push(Node::RuleRef { name: name.to_string() })
    }

    // ---- tagging ----

    pub fn tag(&mut self, tag: TagKind, child: NodeId) -> NodeId {
        self.push(Node::Tag { tag, child })
    }

    pub fn content(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::Content, child)
    }

    pub fn reasoning(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::Reasoning, child)
    }

    pub fn tool(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::Tool, child)
    }

    pub fn tool_open(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolOpen, child)
    }

    pub fn tool_close(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolClose, child)
    }

    pub fn tool_name(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolName, child)
    }

    pub fn tool_id(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolId, child)
    }

    pub fn tool_args(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArgs, child)
    }

    pub fn tool_arg(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArg, child)
    }

    pub fn tool_arg_open(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArgOpen, child)
    }

    pub fn tool_arg_close(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArgClose, child)
    }

    pub fn tool_arg_name(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArgName, child)
    }

    pub fn tool_arg_string_value(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArgStringValue, child)
    }

    pub fn tool_arg_json_value(&mut self, child: NodeId) -> NodeId {
        self.tag(TagKind::ToolArgJsonValue, child)
    }

    // ---- schema annotation ----

    /// Wraps `child` with a JSON schema; GBNF emission derives the rule
    /// `name` from the schema instead of the child.
    pub fn schema(&mut self, child: NodeId, name: &str, schema: serde_json::Value) -> NodeId {
        self.push(Node::SchemaWrapped {
            child,
            name: name.to_string(),
            schema,
            as_string: false,
        })
    }

    /// Like [`Builder::schema`], but the schema describes the decoded string
    /// value of the span rather than its raw JSON text. Only string-shaped
    /// constraints (notably `enum`) affect emission; anything else falls
    /// back to the child.
    pub fn schema_as_string(
        &mut self,
        child: NodeId,
        name: &str,
        schema: serde_json::Value,
    ) -> NodeId {
        self.push(Node::SchemaWrapped {
            child,
            name: name.to_string(),
            schema,
            as_string: true,
        })
    }

    // ---- JSON sublanguage ----

    /// A complete JSON value. Installs the `json-*` rule family on first
    /// use and returns a reference to `json-value`.
    pub fn json(&mut self) -> NodeId {
        self.ensure_json_rules();
        self.ref_rule("json-value")
    }

    /// The escaped interior of a JSON string, without the quotes.
    pub fn json_string_content(&mut self) -> NodeId {
        self.ensure_json_rules();
        self.ref_rule("json-string-content")
    }

    /// One object member with a fixed key: `"key" : <value>`.
    pub fn json_member(&mut self, key: &str, value: NodeId) -> NodeId {
        self.ensure_json_rules();
        let quoted = self.literal(&format!("\"{key}\""));
        let ws1 = self.ref_rule("json-ws");
        let colon = self.literal(":");
        let ws2 = self.ref_rule("json-ws");
        self.sequence(&[quoted, ws1, colon, ws2, value])
    }

    fn ensure_json_rules(&mut self) {
        if self.json_ready {
            return;
        }
        self.json_ready = true;

        let ws_class = self.chars("[ \\t\\n\\r]");
        let ws_body = self.zero_or_more(ws_class);
        self.rule("json-ws", ws_body);

        // String interior. A dedicated scanning node rather than a repeat
        // over a char class: a repeat would stop at a malformed byte and
        // succeed, but invalid UTF-8 inside a string must fail outright.
        let content_body = self.push(Node::StringContent);
        self.rule("json-string-content", content_body);

        let quote = self.literal("\"");
        let content = self.ref_rule("json-string-content");
        let quote2 = self.literal("\"");
        let string_body = self.sequence(&[quote, content, quote2]);
        self.rule("json-string", string_body);

        // number: -? (0 | [1-9][0-9]*) ("." [0-9]+)? ([eE] [+-]? [0-9]+)?
        let minus = self.literal("-");
        let opt_minus = self.optional(minus);
        let zero = self.literal("0");
        let nonzero = self.chars("[1-9]");
        let digit = self.chars("[0-9]");
        let digits = self.zero_or_more(digit);
        let int_tail = self.sequence(&[nonzero, digits]);
        let int_part = self.choice(&[zero, int_tail]);
        let dot = self.literal(".");
        let digit = self.chars("[0-9]");
        let frac_digits = self.one_or_more(digit);
        let frac = self.sequence(&[dot, frac_digits]);
        let opt_frac = self.optional(frac);
        let e = self.chars("[eE]");
        let sign = self.chars("[+\\-]");
        let opt_sign = self.optional(sign);
        let digit = self.chars("[0-9]");
        let exp_digits = self.one_or_more(digit);
        let exp = self.sequence(&[e, opt_sign, exp_digits]);
        let opt_exp = self.optional(exp);
        let number_body = self.sequence(&[opt_minus, int_part, opt_frac, opt_exp]);
        self.rule("json-number", number_body);

        let t = self.literal("true");
        let f = self.literal("false");
        let boolean_body = self.choice(&[t, f]);
        self.rule("json-boolean", boolean_body);

        let null_body = self.literal("null");
        self.rule("json-null", null_body);

        // object: "{" ws (member ("," ws member)*)? "}"
        // member: json-string ws ":" ws json-value ws
        let key = self.ref_rule("json-string");
        let ws = self.ref_rule("json-ws");
        let colon = self.literal(":");
        let ws2 = self.ref_rule("json-ws");
        let value = self.ref_rule("json-value");
        let ws3 = self.ref_rule("json-ws");
        let member = self.sequence(&[key, ws, colon, ws2, value, ws3]);
        let comma = self.literal(",");
        let ws4 = self.ref_rule("json-ws");
        let more = self.sequence(&[comma, ws4, member]);
        let more_star = self.zero_or_more(more);
        let members = self.sequence(&[member, more_star]);
        let opt_members = self.optional(members);
        let open = self.literal("{");
        let ws5 = self.ref_rule("json-ws");
        let close = self.literal("}");
        let object_body = self.sequence(&[open, ws5, opt_members, close]);
        self.rule("json-object", object_body);

        // array: "[" ws (value ws ("," ws value ws)*)? "]"
        let value = self.ref_rule("json-value");
        let ws = self.ref_rule("json-ws");
        let item = self.sequence(&[value, ws]);
        let comma = self.literal(",");
        let ws2 = self.ref_rule("json-ws");
        let more = self.sequence(&[comma, ws2, item]);
        let more_star = self.zero_or_more(more);
        let items = self.sequence(&[item, more_star]);
        let opt_items = self.optional(items);
        let open = self.literal("[");
        let ws3 = self.ref_rule("json-ws");
        let close = self.literal("]");
        let array_body = self.sequence(&[open, ws3, opt_items, close]);
        self.rule("json-array", array_body);

        let obj = self.ref_rule("json-object");
        let arr = self.ref_rule("json-array");
        let s = self.ref_rule("json-string");
        let n = self.ref_rule("json-number");
        let b = self.ref_rule("json-boolean");
        let nl = self.ref_rule("json-null");
        let value_body = self.choice(&[obj, arr, s, n, b, nl]);
        self.rule("json-value", value_body);
    }

    // ---- finalization ----

    /// Validates the grammar graph and freezes it.
    ///
    /// Panics on unresolved rule references and on non-productive recursion
    /// (a rule that can re-enter itself without consuming input).
    pub fn finish(self, root: NodeId) -> Arena {
        for node in &self.nodes {
            if let Node::RuleRef { name } = node {
                assert!(
                    self.rules.contains_key(name),
                    "undefined rule reference '{name}'"
                );
            }
        }
        self.check_productive();
        Arena {
            nodes: self.nodes,
            rules: self.rules,
            root,
        }
    }

    /// Rejects rules that can recurse into themselves at the same input
    /// position. Plain recursive descent would loop forever on them.
    fn check_productive(&self) {
        let nullable = self.compute_nullable();

        // Edges: rule -> rules its body can reach without consuming input.
        let mut edges: HashMap<&str, HashSet<&str>> = HashMap::new();
        for (name, rule) in &self.rules {
            let mut reach = HashSet::new();
            self.null_reach(rule.node, &nullable, &mut reach);
            edges.insert(name.as_str(), reach);
        }

        for start in self.rules.keys() {
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = edges[start.as_str()].iter().copied().collect();
            while let Some(name) = stack.pop() {
                if name == start {
                    panic!("non-productive recursion in rule '{start}'");
                }
                if seen.insert(name) {
                    stack.extend(edges[name].iter().copied());
                }
            }
        }
    }

    fn compute_nullable(&self) -> HashMap<&str, bool> {
        let mut nullable: HashMap<&str, bool> =
            self.rules.keys().map(|k| (k.as_str(), false)).collect();
        loop {
            let mut changed = false;
            for (name, rule) in &self.rules {
                if !nullable[name.as_str()] && self.is_nullable(rule.node, &nullable) {
                    nullable.insert(name.as_str(), true);
                    changed = true;
                }
            }
            if !changed {
                return nullable;
            }
        }
    }

    fn is_nullable(&self, id: NodeId, rules: &HashMap<&str, bool>) -> bool {
        match &self.nodes[id.0] {
            Node::Literal { text } => text.is_empty(),
            Node::CharClass { .. } => false,
            Node::Sequence { children } => {
                children.iter().all(|c| self.is_nullable(*c, rules))
            }
            Node::Choice { alternatives } => {
                alternatives.iter().any(|c| self.is_nullable(*c, rules))
            }
            Node::Repeat { child, min, .. } => *min == 0 || self.is_nullable(*child, rules),
            Node::RuleRef { name } => rules.get(name.as_str()).copied().unwrap_or(false),
            Node::Tag { child, .. }
            | Node::SchemaWrapped { child, .. }
            | Node::Atomic { child } => self.is_nullable(*child, rules),
            Node::Until { .. }
            | Node::StringContent
            | Node::Peek { .. }
            | Node::End
            | Node::Eps => true,
        }
    }

    fn null_reach<'a>(
        &'a self,
        id: NodeId,
        nullable: &HashMap<&str, bool>,
        out: &mut HashSet<&'a str>,
    ) {
        match &self.nodes[id.0] {
            Node::Sequence { children } => {
                for child in children {
                    self.null_reach(*child, nullable, out);
                    if !self.is_nullable(*child, nullable) {
                        break;
                    }
                }
            }
            Node::Choice { alternatives } => {
                for alt in alternatives {
                    self.null_reach(*alt, nullable, out);
                }
            }
            Node::Repeat { child, .. } => self.null_reach(*child, nullable, out),
            Node::RuleRef { name } => {
                out.insert(name.as_str());
            }
            Node::Tag { child, .. }
            | Node::SchemaWrapped { child, .. }
            | Node::Atomic { child }
            | Node::Peek { child } => self.null_reach(*child, nullable, out),
            Node::Literal { .. }
            | Node::CharClass { .. }
            | Node::Until { .. }
            | Node::StringContent
            | Node::End
            | Node::Eps => {}
        }
    }
}
