use thiserror::Error;

/// Why an in-process compilation failed.
///
/// Only the fact of failure crosses the C boundary; the variants exist for Rust
/// callers and for logging. Details are always on the diagnostics stream.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("the driver could not build a compilation from the arguments")]
    Planning,

    #[error("job for '{executable}' starts with '{marker}', which is not an in-process tool")]
    UnknownTool { executable: String, marker: String },

    #[error("invalid {tool} invocation")]
    InvocationParse { tool: &'static str },

    #[error("could not create the compiler diagnostics engine: {0}")]
    DiagnosticsInit(String),

    #[error("front-end action failed")]
    FrontendExecution,

    #[error("assembler failed")]
    AssemblerExecution,
}

/// Error that will stop a tool pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The cause was already reported to the diagnostics engine.
    #[error("compilation failed due to errors")]
    Fatal,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
