//! Code generation module.
//!
//! This module provides the back half of the front-end pipeline:
//! - ClifGen: typed program → Cranelift IR → ELF relocatable object
//! - asm_printer: ELF object → directive-level assembly text for `-S`

pub mod asm_printer;
pub(crate) mod clif_gen;
mod error;

#[cfg(test)]
mod tests_codegen;

pub use error::CodegenError;

use target_lexicon::Triple;

use crate::semantic::typed_ast::Program;

/// Optimization level handed to Cranelift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    SpeedAndSize,
}

impl OptLevel {
    /// Map the value of a `-O` flag (`""` for a bare `-O`).
    pub fn from_flag(level: &str) -> Option<Self> {
        match level {
            "0" => Some(OptLevel::None),
            "" | "1" | "2" | "3" | "fast" => Some(OptLevel::Speed),
            "s" | "z" => Some(OptLevel::SpeedAndSize),
            _ => None,
        }
    }

    pub(crate) fn as_setting(self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodegenOptions {
    pub triple: Triple,
    pub opt_level: OptLevel,
}

/// Compile a checked program to the bytes of an ELF relocatable object.
pub fn emit_object(program: &Program, options: &CodegenOptions) -> Result<Vec<u8>, CodegenError> {
    clif_gen::ClifGen::new(program, options)?.compile()
}
