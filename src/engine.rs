//! Parse execution.
//!
//! The engine walks the arena's node graph over a byte buffer and produces
//! a three-valued [`ParseResult`]: `Success`, `Fail`, or (only when the
//! context is partial) `NeedMoreInput`. The invariant that makes streaming
//! callers work: if a buffer is a strict prefix of something the grammar
//! accepts and the context is partial, the outcome is never `Fail`.
//!
//! Each parse is a fresh evaluation over the whole buffer. Callers that
//! stream re-parse from the start on every chunk; rule results are memoized
//! per position within one call to keep shared subexpressions cheap.

use std::borrow::Cow;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::arena::{Arena, Node, NodeId, TagKind};
use crate::unicode::{class_contains, decode, Utf8Step};

/// Rule nesting bound. Deeply nested input (thousands of `[` for a
/// recursive rule) fails instead of overflowing the stack.
const MAX_RULE_DEPTH: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseResultKind {
    Success,
    Fail,
    NeedMoreInput,
}

/// Outcome of evaluating a node: kind plus the matched byte range.
///
/// On `NeedMoreInput`, `end` is the last position confirmed before the
/// buffer ran out. On `Fail`, `end` is the offset where matching stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseResult {
    pub kind: ParseResultKind,
    pub start: usize,
    pub end: usize,
}

impl ParseResult {
    fn success(start: usize, end: usize) -> Self {
        ParseResult { kind: ParseResultKind::Success, start, end }
    }

    fn fail(start: usize, end: usize) -> Self {
        ParseResult { kind: ParseResultKind::Fail, start, end }
    }

    fn need_more(start: usize, end: usize) -> Self {
        ParseResult { kind: ParseResultKind::NeedMoreInput, start, end }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ParseResultKind::Success
    }

    pub fn is_fail(&self) -> bool {
        self.kind == ParseResultKind::Fail
    }

    pub fn needs_more(&self) -> bool {
        self.kind == ParseResultKind::NeedMoreInput
    }
}

/// A tagged span in the output AST. Only [`Node::Tag`] produces these;
/// untagged structure is transparent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstNode {
    pub tag: TagKind,
    pub start: usize,
    pub end: usize,
    pub children: Vec<AstNode>,
}

/// Input buffer plus completeness flag, and the AST of the last parse.
///
/// The buffer is raw bytes rather than `str` because a streamed chunk can
/// end in the middle of a codepoint.
pub struct ParseContext {
    input: Vec<u8>,
    partial: bool,
    pub ast: Vec<AstNode>,
}

impl ParseContext {
    /// `partial` marks the buffer as a prefix of a longer stream.
    pub fn new(input: impl AsRef<[u8]>, partial: bool) -> Self {
        ParseContext {
            input: input.as_ref().to_vec(),
            partial,
            ast: Vec::new(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.input
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }

    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// The text of a byte range, replacing any ill-formed sequences.
    pub fn text(&self, start: usize, end: usize) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.input[start..end])
    }
}

impl Arena {
    /// Parses the context's buffer against the root expression. The tagged
    /// AST lands in `ctx.ast`, replacing any previous parse.
    pub fn parse(&self, ctx: &mut ParseContext) -> ParseResult {
        let mut eval = Evaluator {
            arena: self,
            input: &ctx.input,
            memo: HashMap::new(),
            depth: 0,
        };
        let (result, ast) = eval.eval(self.root(), 0, ctx.partial);
        ctx.ast = ast;
        result
    }
}

struct Evaluator<'a> {
    arena: &'a Arena,
    input: &'a [u8],
    /// Rule results per (rule node, position, partial).
    memo: HashMap<(usize, usize, bool), (ParseResult, Vec<AstNode>)>,
    depth: usize,
}

impl Evaluator<'_> {
    fn eval(&mut self, id: NodeId, pos: usize, partial: bool) -> (ParseResult, Vec<AstNode>) {
        match self.arena.node(id) {
            Node::Literal { text } => (self.eval_literal(text, pos, partial), Vec::new()),
            Node::CharClass { ranges } => (self.eval_class(ranges, pos, partial), Vec::new()),
            Node::Until { delimiters } => (self.eval_until(delimiters, pos, partial), Vec::new()),
            Node::StringContent => (self.eval_string_content(pos, partial), Vec::new()),
            Node::End => {
                if pos == self.input.len() {
                    (ParseResult::success(pos, pos), Vec::new())
                } else {
                    (ParseResult::fail(pos, pos), Vec::new())
                }
            }
            Node::Eps => (ParseResult::success(pos, pos), Vec::new()),
            Node::Sequence { children } => self.eval_sequence(children, pos, partial),
            Node::Choice { alternatives } => self.eval_choice(alternatives, pos, partial),
            Node::Repeat { child, min, max } => self.eval_repeat(*child, *min, *max, pos, partial),
            Node::RuleRef { name } => self.eval_rule(id, name, pos, partial),
            Node::Tag { tag, child } => {
                let (result, children) = self.eval(*child, pos, partial);
                if result.is_fail() {
                    return (result, Vec::new());
                }
                let node = AstNode { tag: *tag, start: pos, end: result.end, children };
                (result, vec![node])
            }
            Node::SchemaWrapped { child, .. } => self.eval(*child, pos, partial),
            Node::Peek { child } => {
                let (result, _) = self.eval(*child, pos, partial);
                let zero_width = match result.kind {
                    ParseResultKind::Success => ParseResult::success(pos, pos),
                    ParseResultKind::NeedMoreInput => ParseResult::need_more(pos, pos),
                    ParseResultKind::Fail => ParseResult::fail(pos, pos),
                };
                (zero_width, Vec::new())
            }
            Node::Atomic { child } => self.eval_atomic(*child, pos, partial),
        }
    }

    fn eval_literal(&self, text: &str, pos: usize, partial: bool) -> ParseResult {
        let want = text.as_bytes();
        let rest = &self.input[pos..];
        let overlap = rest.len().min(want.len());
        if rest[..overlap] != want[..overlap] {
            return ParseResult::fail(pos, pos);
        }
        if overlap < want.len() {
            // Matched prefix ran into the buffer edge.
            return if partial {
                ParseResult::need_more(pos, pos)
            } else {
                ParseResult::fail(pos, pos)
            };
        }
        ParseResult::success(pos, pos + want.len())
    }

    fn eval_class(&self, ranges: &[(u32, u32)], pos: usize, partial: bool) -> ParseResult {
        match decode(&self.input[pos..]) {
            Utf8Step::Scalar { cp, len } if class_contains(ranges, cp) => {
                ParseResult::success(pos, pos + len)
            }
            Utf8Step::Scalar { .. } | Utf8Step::Malformed => ParseResult::fail(pos, pos),
            Utf8Step::Incomplete => {
                if partial {
                    ParseResult::need_more(pos, pos)
                } else {
                    ParseResult::fail(pos, pos)
                }
            }
        }
    }

    fn eval_until(&self, delimiters: &[String], pos: usize, partial: bool) -> ParseResult {
        let mut cur = pos;
        loop {
            let rest = &self.input[cur..];
            if delimiters.iter().any(|d| rest.starts_with(d.as_bytes())) {
                return ParseResult::success(pos, cur);
            }
            if rest.is_empty() {
                // Without a completeness promise the delimiter is simply
                // absent and everything consumed so far stands.
                return if partial {
                    ParseResult::need_more(pos, cur)
                } else {
                    ParseResult::success(pos, cur)
                };
            }
            // A delimiter prefix touching the buffer edge may still complete.
            if partial
                && delimiters
                    .iter()
                    .any(|d| rest.len() < d.len() && d.as_bytes().starts_with(rest))
            {
                return ParseResult::need_more(pos, cur);
            }
            match decode(rest) {
                Utf8Step::Scalar { len, .. } => cur += len,
                Utf8Step::Incomplete => {
                    return if partial {
                        ParseResult::need_more(pos, cur)
                    } else {
                        ParseResult::fail(pos, cur)
                    };
                }
                Utf8Step::Malformed => return ParseResult::fail(pos, cur),
            }
        }
    }

    /// JSON string interior: scans scalars and escape sequences up to an
    /// unescaped `"`. Unlike a repeat over a char class, a malformed byte
    /// fails the whole node instead of merely ending the run.
    fn eval_string_content(&self, pos: usize, partial: bool) -> ParseResult {
        let mut cur = pos;
        loop {
            let rest = &self.input[cur..];
            if rest.is_empty() {
                return if partial {
                    ParseResult::need_more(pos, cur)
                } else {
                    ParseResult::success(pos, cur)
                };
            }
            match decode(rest) {
                Utf8Step::Scalar { cp: 0x5C, .. } => {
                    let Some(&kind) = rest.get(1) else {
                        return if partial {
                            ParseResult::need_more(pos, cur)
                        } else {
                            ParseResult::fail(pos, cur)
                        };
                    };
                    match kind {
                        b'"' | b'\\' | b'/' | b'b' | b'f' | b'n' | b'r' | b't' => cur += 2,
                        b'u' => {
                            let hex = &rest[2..];
                            let have = hex.len().min(4);
                            if !hex[..have].iter().all(u8::is_ascii_hexdigit) {
                                return ParseResult::fail(pos, cur);
                            }
                            if have < 4 {
                                return if partial {
                                    ParseResult::need_more(pos, cur)
                                } else {
                                    ParseResult::fail(pos, cur)
                                };
                            }
                            cur += 6;
                        }
                        _ => return ParseResult::fail(pos, cur),
                    }
                }
                Utf8Step::Scalar { cp, len } => {
                    // An unescaped quote or a control character ends the
                    // interior; the surrounding grammar decides what follows.
                    if cp == u32::from(b'"') || cp < 0x20 {
                        return ParseResult::success(pos, cur);
                    }
                    cur += len;
                }
                Utf8Step::Incomplete => {
                    return if partial {
                        ParseResult::need_more(pos, cur)
                    } else {
                        ParseResult::fail(pos, cur)
                    };
                }
                Utf8Step::Malformed => return ParseResult::fail(pos, cur),
            }
        }
    }

    fn eval_sequence(
        &mut self,
        children: &[NodeId],
        pos: usize,
        partial: bool,
    ) -> (ParseResult, Vec<AstNode>) {
        let mut ast = Vec::new();
        let mut cur = pos;
        for child in children {
            let (result, nodes) = self.eval(*child, cur, partial);
            match result.kind {
                ParseResultKind::Fail => {
                    return (ParseResult::fail(pos, result.end), Vec::new());
                }
                ParseResultKind::NeedMoreInput => {
                    ast.extend(nodes);
                    return (ParseResult::need_more(pos, result.end), ast);
                }
                ParseResultKind::Success => {
                    ast.extend(nodes);
                    cur = result.end;
                }
            }
        }
        (ParseResult::success(pos, cur), ast)
    }

    fn eval_choice(
        &mut self,
        alternatives: &[NodeId],
        pos: usize,
        partial: bool,
    ) -> (ParseResult, Vec<AstNode>) {
        let mut pending: Option<(ParseResult, Vec<AstNode>)> = None;
        for alt in alternatives {
            let (result, nodes) = self.eval(*alt, pos, partial);
            match result.kind {
                // An earlier undecided alternative outranks a later match:
                // more input could still resolve it, and ordered choice
                // must prefer it when it does.
                ParseResultKind::Success => {
                    return pending.unwrap_or((result, nodes));
                }
                ParseResultKind::NeedMoreInput => {
                    if pending.is_none() {
                        pending = Some((result, nodes));
                    }
                }
                ParseResultKind::Fail => {}
            }
        }
        pending.unwrap_or((ParseResult::fail(pos, pos), Vec::new()))
    }

    fn eval_repeat(
        &mut self,
        child: NodeId,
        min: usize,
        max: Option<usize>,
        pos: usize,
        partial: bool,
    ) -> (ParseResult, Vec<AstNode>) {
        let mut ast = Vec::new();
        let mut cur = pos;
        let mut count = 0usize;
        loop {
            if max.is_some_and(|m| count >= m) {
                break;
            }
            let (result, nodes) = self.eval(child, cur, partial);
            match result.kind {
                ParseResultKind::Success => {
                    if result.end == cur {
                        // Zero-width match would loop forever.
                        break;
                    }
                    ast.extend(nodes);
                    cur = result.end;
                    count += 1;
                }
                ParseResultKind::NeedMoreInput => {
                    // The next iteration may or may not materialize, so the
                    // repeat as a whole is undecided even past `min`.
                    ast.extend(nodes);
                    return (ParseResult::need_more(pos, result.end), ast);
                }
                ParseResultKind::Fail => break,
            }
        }
        if count < min {
            (ParseResult::fail(pos, cur), Vec::new())
        } else {
            (ParseResult::success(pos, cur), ast)
        }
    }

    fn eval_rule(
        &mut self,
        id: NodeId,
        name: &str,
        pos: usize,
        partial: bool,
    ) -> (ParseResult, Vec<AstNode>) {
        let key = (id.index(), pos, partial);
        if let Some(hit) = self.memo.get(&key) {
            return hit.clone();
        }
        if self.depth >= MAX_RULE_DEPTH {
            return (ParseResult::fail(pos, pos), Vec::new());
        }
        // finish() guarantees every reference resolves.
        let body = self.arena.rule(name).map(|r| r.node);
        let Some(body) = body else {
            return (ParseResult::fail(pos, pos), Vec::new());
        };
        self.depth += 1;
        let outcome = self.eval(body, pos, partial);
        self.depth -= 1;
        self.memo.insert(key, outcome.clone());
        outcome
    }

    fn eval_atomic(
        &mut self,
        child: NodeId,
        pos: usize,
        partial: bool,
    ) -> (ParseResult, Vec<AstNode>) {
        let (result, nodes) = self.eval(child, pos, partial);
        if result.needs_more() && partial {
            // Re-read the buffer as if complete. A definite match under
            // that reading cannot be invalidated by more input arriving.
            let (committed, committed_nodes) = self.eval(child, pos, false);
            if committed.is_success() {
                return (committed, committed_nodes);
            }
        }
        (result, nodes)
    }
}
