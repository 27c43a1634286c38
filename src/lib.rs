//! Weft: an incremental PEG engine for streamed model output.
//!
//! A grammar built once with [`Builder`] serves two masters. The parse
//! engine evaluates it over a possibly-incomplete byte buffer and reports
//! one of three outcomes: the input matches, it can never match, or it is a
//! viable prefix and more bytes are needed. The grammar synthesizer
//! compiles the same arena to GBNF text for constrained decoding, so what
//! the model is allowed to emit and what the parser accepts are one
//! definition.
//!
//! ```
//! use weft::{build_parser, ChatMessage, ParseContext};
//!
//! let parser = build_parser(|p| {
//!     let open = p.literal("<think>");
//!     let body = p.until("</think>");
//!     let thought = p.reasoning(body);
//!     let close = p.literal("</think>");
//!     let rest = p.until("\u{0}");
//!     let text = p.content(rest);
//!     p.sequence(&[open, thought, close, text])
//! });
//!
//! let mut ctx = ParseContext::new("<think>hmm</think>hello", false);
//! assert!(parser.parse(&mut ctx).is_success());
//!
//! let msg = ChatMessage::from_context(&ctx);
//! assert_eq!(msg.reasoning_content, "hmm");
//! assert_eq!(msg.content, "hello");
//! ```

pub mod arena;
pub mod builder;
pub mod chat;
pub mod engine;
pub mod errors;
pub mod grammar;
pub mod schema;
pub mod serialize;
pub mod unicode;

pub use crate::arena::{Arena, Node, NodeId, Rule, TagKind};
pub use crate::builder::{build_parser, Builder};
pub use crate::chat::{ChatMessage, ToolCall};
pub use crate::engine::{AstNode, ParseContext, ParseResult, ParseResultKind};
pub use crate::errors::WeftError;
pub use crate::grammar::GrammarBuilder;
pub use crate::schema::SchemaConverter;
