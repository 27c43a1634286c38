//! Error handling for the weft engine.
//!
//! Parse outcomes (`Fail`, `NeedMoreInput`) are ordinary values carried on
//! [`ParseResult`](crate::engine::ParseResult), never errors: `Fail` drives
//! backtracking inside choices, `NeedMoreInput` tells the caller to supply
//! more bytes. `WeftError` covers the one recoverable failure mode, loading
//! a persisted arena document. Authoring mistakes (unresolved rule
//! references, malformed char-class specs, non-productive recursion,
//! unsupported schema constructs) are bugs in the grammar definition itself
//! and panic at construction time.

use miette::Diagnostic;
use thiserror::Error;

/// Unified recoverable error type for the weft engine.
#[derive(Debug, Error, Diagnostic)]
pub enum WeftError {
    /// The persisted arena document could not be parsed as JSON.
    #[error("deserialization error: {message}")]
    #[diagnostic(code(weft::serialize::malformed_document))]
    MalformedDocument {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// A node or rule in the document points outside the node table.
    #[error("deserialization error: node index {index} out of range ({len} nodes)")]
    #[diagnostic(code(weft::serialize::index_out_of_range))]
    IndexOutOfRange { index: usize, len: usize },

    /// A node references a rule name the document does not define.
    #[error("deserialization error: undefined rule reference '{name}'")]
    #[diagnostic(code(weft::serialize::undefined_rule))]
    UndefinedRule { name: String },
}

impl WeftError {
    pub(crate) fn malformed(source: serde_json::Error) -> Self {
        WeftError::MalformedDocument {
            message: source.to_string(),
            source: Some(source),
        }
    }
}
