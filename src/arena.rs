//! Flat node arena for grammar expressions.
//!
//! Grammars are graphs, not trees: named rules may refer to each other in
//! cycles. Nodes therefore live in one flat `Vec` and refer to children by
//! index, which keeps the whole structure ownership-free and trivially
//! serializable. An [`Arena`] is immutable once built; construction happens
//! through [`Builder`](crate::builder::Builder).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Index of a node in its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Semantic label attached to a matched span via [`Node::Tag`].
///
/// Tags are what make the parse output useful to a chat client: the engine
/// records which tagged region each byte range fell into, and the mapper
/// folds those regions into message fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagKind {
    Content,
    Reasoning,
    Tool,
    ToolOpen,
    ToolClose,
    ToolName,
    ToolId,
    ToolArgs,
    ToolArg,
    ToolArgOpen,
    ToolArgClose,
    ToolArgName,
    ToolArgStringValue,
    ToolArgJsonValue,
}

/// One grammar expression. Children are arena indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Exact byte sequence (always valid UTF-8).
    Literal { text: String },
    /// One codepoint drawn from inclusive ranges.
    CharClass { ranges: Vec<(u32, u32)> },
    /// All children in order.
    Sequence { children: Vec<NodeId> },
    /// First matching alternative wins (ordered choice).
    Choice { alternatives: Vec<NodeId> },
    /// `child` repeated greedily between `min` and `max` times.
    Repeat {
        child: NodeId,
        min: usize,
        max: Option<usize>,
    },
    /// Reference to a named rule.
    RuleRef { name: String },
    /// Labels the child's span in the output AST.
    Tag { tag: TagKind, child: NodeId },
    /// Child annotated with a JSON schema for grammar emission.
    SchemaWrapped {
        child: NodeId,
        name: String,
        schema: serde_json::Value,
        as_string: bool,
    },
    /// Consumes codepoints until one of the delimiters appears.
    Until { delimiters: Vec<String> },
    /// Escaped interior of a JSON string, scanned up to an unescaped `"`.
    StringContent,
    /// Zero-width lookahead; succeeds without consuming.
    Peek { child: NodeId },
    /// Commits the child at the buffer edge when no continuation could
    /// change the outcome.
    Atomic { child: NodeId },
    /// Matches only at end of input.
    End,
    /// Matches the empty string.
    Eps,
}

/// Entry in the arena's rule table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(rename = "index")]
    pub node: NodeId,
    /// Visible rules are always emitted in GBNF output, reachable or not.
    pub visible: bool,
    /// Lazy rules become root alternatives in trigger-based grammars.
    pub lazy: bool,
}

/// Immutable grammar: a node table, a rule table, and a root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arena {
    pub(crate) nodes: Vec<Node>,
    pub(crate) rules: BTreeMap<String, Rule>,
    pub(crate) root: NodeId,
}

impl Arena {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn rules(&self) -> impl Iterator<Item = (&str, &Rule)> {
        self.rules.iter().map(|(name, rule)| (name.as_str(), rule))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
