//! Arena persistence.
//!
//! An [`Arena`] serializes to a flat JSON document: the node table, the
//! rule table, and the root index. Serialization cannot fail for a built
//! arena. Deserialization validates every index and rule reference, since
//! the document may come from an untrusted or stale source.

use crate::arena::{Arena, Node};
use crate::errors::WeftError;

impl Arena {
    /// Renders the arena as a JSON document.
    pub fn to_json(&self) -> String {
        // Arena contains no map keys or values that can fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Loads an arena from a JSON document produced by [`Arena::to_json`].
    pub fn from_json(text: &str) -> Result<Arena, WeftError> {
        let arena: Arena = serde_json::from_str(text).map_err(WeftError::malformed)?;
        arena.validate()?;
        Ok(arena)
    }

    fn validate(&self) -> Result<(), WeftError> {
        let len = self.nodes.len();
        let check = |index: usize| {
            if index < len {
                Ok(())
            } else {
                Err(WeftError::IndexOutOfRange { index, len })
            }
        };

        check(self.root.index())?;
        for rule in self.rules.values() {
            check(rule.node.index())?;
        }
        for node in &self.nodes {
            match node {
                Node::Sequence { children } => {
                    for child in children {
                        check(child.index())?;
                    }
                }
                Node::Choice { alternatives } => {
                    for alt in alternatives {
                        check(alt.index())?;
                    }
                }
                Node::Repeat { child, .. }
                | Node::Tag { child, .. }
                | Node::SchemaWrapped { child, .. }
                | Node::Peek { child }
                | Node::Atomic { child } => check(child.index())?,
                Node::RuleRef { name } => {
                    if !self.rules.contains_key(name) {
                        return Err(WeftError::UndefinedRule { name: name.clone() });
                    }
                }
                Node::Literal { .. }
                | Node::CharClass { .. }
                | Node::Until { .. }
                | Node::StringContent
                | Node::End
                | Node::Eps => {}
            }
        }
        Ok(())
    }
}
