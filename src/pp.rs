//! C preprocessor.
//!
//! Produces text: expanded tokens laid out on their source lines, with
//! `# <line> "<file>"` markers wherever the position jumps.

pub use crate::pp::pp_lexer::{PPToken, PPTokenFlags, PPTokenKind};
pub use crate::pp::preprocessor::{MacroFlags, MacroInfo, PPConfig, PPError, Preprocessor};

mod expr_parser;
pub(crate) mod header_search;
pub(crate) mod pp_lexer;
mod preprocessor;

#[cfg(test)]
mod tests_preprocessor;
