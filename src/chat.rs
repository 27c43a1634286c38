//! Chat message assembly.
//!
//! Folds the tagged AST of a parse into a [`ChatMessage`]: content and
//! reasoning spans concatenate into text fields, tool spans build up
//! [`ToolCall`] entries. The mapper is stateless across chunks; streaming
//! callers re-map after each re-parse and diff the results themselves.
//!
//! Two tool shapes are supported. Native formats carry arguments as one
//! JSON span tagged `ToolArgs`. Constructed formats mark up each argument
//! (`ToolArgName` plus a string or JSON value tag) and the mapper
//! assembles the arguments object from the pieces.

use serde::{Deserialize, Serialize};

use crate::arena::TagKind;
use crate::engine::{AstNode, ParseContext};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Arguments as a JSON object in text form. May be a truncated prefix
    /// while the underlying parse is still partial.
    pub arguments: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    pub reasoning_content: String,
    pub tool_calls: Vec<ToolCall>,
}

impl ChatMessage {
    /// Maps the AST of the context's last parse into a message.
    pub fn from_context(ctx: &ParseContext) -> ChatMessage {
        let mut assembler = Assembler::default();
        assembler.walk(&ctx.ast, ctx);
        assembler.finalize_tool();
        assembler.msg
    }
}

#[derive(Default)]
struct Assembler {
    msg: ChatMessage,
    tool: Option<ToolCall>,
    /// Whether the active tool came from a `Tool` wrapper, which then owns
    /// finalization.
    wrapped: bool,
    /// Constructed-format arguments gathered so far: key and JSON value
    /// text.
    args: Vec<(String, String)>,
    pending_key: Option<String>,
}

impl Assembler {
    fn walk(&mut self, nodes: &[AstNode], ctx: &ParseContext) {
        for node in nodes {
            let text = || ctx.text(node.start, node.end).into_owned();
            match node.tag {
                TagKind::Content => self.msg.content.push_str(&text()),
                TagKind::Reasoning => self.msg.reasoning_content.push_str(&text()),
                TagKind::Tool => {
                    self.finalize_tool();
                    self.tool = Some(ToolCall::default());
                    self.wrapped = true;
                    self.walk(&node.children, ctx);
                    self.finalize_tool();
                }
                TagKind::ToolOpen => {
                    if self.tool.is_none() {
                        self.tool = Some(ToolCall::default());
                        self.wrapped = false;
                    }
                    self.walk(&node.children, ctx);
                }
                TagKind::ToolClose => {
                    self.walk(&node.children, ctx);
                    if !self.wrapped {
                        self.finalize_tool();
                    }
                }
                TagKind::ToolName => self.active_tool().name = text(),
                TagKind::ToolId => self.active_tool().id = text(),
                TagKind::ToolArgs => self.active_tool().arguments = text(),
                TagKind::ToolArg
                | TagKind::ToolArgOpen
                | TagKind::ToolArgClose => self.walk(&node.children, ctx),
                TagKind::ToolArgName => self.pending_key = Some(text()),
                TagKind::ToolArgStringValue => {
                    let encoded = serde_json::Value::String(text()).to_string();
                    self.push_arg(encoded);
                }
                TagKind::ToolArgJsonValue => self.push_arg(text()),
            }
        }
    }

    fn active_tool(&mut self) -> &mut ToolCall {
        if self.tool.is_none() {
            self.wrapped = false;
        }
        self.tool.get_or_insert_with(ToolCall::default)
    }

    fn push_arg(&mut self, value: String) {
        if let Some(key) = self.pending_key.take() {
            self.args.push((key, value));
        }
    }

    fn finalize_tool(&mut self) {
        let Some(mut tool) = self.tool.take() else {
            self.args.clear();
            self.pending_key = None;
            return;
        };
        if tool.arguments.is_empty() && !self.args.is_empty() {
            let members: Vec<String> = self
                .args
                .drain(..)
                .map(|(key, value)| {
                    format!("{}:{}", serde_json::Value::String(key), value)
                })
                .collect();
            tool.arguments = format!("{{{}}}", members.join(","));
        }
        self.args.clear();
        self.pending_key = None;
        self.wrapped = false;
        self.msg.tool_calls.push(tool);
    }
}
