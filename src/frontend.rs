//! The in-process `-cc1` front-end.
//!
//! A job's arguments are parsed into a [`CompilerInvocation`], which a
//! [`CompilerInstance`] pairs with its own diagnostics engine before
//! [`execute_compiler_invocation`] runs the requested action.

mod actions;
mod instance;
mod invocation;

#[cfg(test)]
mod tests_frontend;

pub use actions::execute_compiler_invocation;
pub use instance::CompilerInstance;
pub use invocation::{CompilerInvocation, FrontendAction, InputLanguage};
