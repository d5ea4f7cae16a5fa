use thiserror::Error;

use cranelift_codegen::CodegenError as CraneliftCodegenError;

/// An error that can occur during code generation.
#[derive(Error, Debug)]
pub enum CodegenError {
    /// An error from the Cranelift code generator.
    #[error("Cranelift error: {0}")]
    Cranelift(#[from] CraneliftCodegenError),
    /// An error from the Cranelift module.
    #[error("Module error: {0}")]
    Module(#[from] cranelift_module::ModuleError),
    #[error("target '{triple}' is not supported by the code generator: {reason}")]
    UnsupportedTarget { triple: String, reason: String },
    #[error("invalid code generator setting: {0}")]
    Settings(String),
    #[error("failed to write object file: {0}")]
    Object(String),
    /// The typed program contained a construct code generation cannot lower.
    #[error("internal code generation error: {0}")]
    Internal(String),
}
