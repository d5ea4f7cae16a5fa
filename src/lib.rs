//! An embeddable C compiler driver.
//!
//! A host hands over a `cc`-style argument vector. The driver plans it into
//! jobs, and every job is executed in this process by the built-in `-cc1`
//! front-end or the `-cc1as` assembler. The C entry point is
//! [`ffi::cendol_embed_try_compile`]; Rust callers use [`try_compile`] or
//! [`compile_in_process`].

pub mod assembler;
pub mod codegen;
pub mod diagnostic;
pub mod dispatch;
pub mod driver;
pub(crate) mod elf_relocs;
pub mod error;
pub mod ffi;
pub mod frontend;
pub mod lang_options;
pub mod lexer;
pub mod parser;
pub mod pp;
pub mod semantic;
pub mod types;

use std::path::Path;

use log::debug;
use target_lexicon::Triple;

use diagnostic::{DiagnosticEngine, DiagnosticOptions};
use driver::Driver;
pub use error::DispatchError;

/// Program name used for reports that have no source location
fn program_name(args: &[String]) -> String {
    args.first()
        .and_then(|arg0| Path::new(arg0).file_name())
        .and_then(|name| name.to_str())
        .unwrap_or("cendol-embed")
        .to_string()
}

/// Plan `args` and run every job, reporting to `diags`.
///
/// `args[0]` is the program name. Inputs are not required to exist while
/// planning.
pub fn run_driver(args: &[String], resource_dir: &Path, diags: &mut DiagnosticEngine) -> Result<(), DispatchError> {
    let name = args.first().cloned().unwrap_or_default();
    let mut driver = Driver::new(name, Triple::host(), resource_dir);
    driver.set_check_inputs_exist(false);

    let compilation = driver
        .build_compilation(args, diags)
        .ok_or(DispatchError::Planning)?;
    if !compilation.temp_files().is_empty() {
        debug!("intermediate files: {:?}", compilation.temp_files());
    }
    dispatch::execute_jobs(compilation.jobs(), diags)
}

/// [`run_driver`] with a diagnostics engine printing to stderr.
pub fn compile_in_process(args: &[String], resource_dir: &Path) -> Result<(), DispatchError> {
    let mut diags = DiagnosticEngine::stderr(program_name(args), DiagnosticOptions::default());
    let result = run_driver(args, resource_dir, &mut diags);
    diags.finish();
    result
}

/// Safe counterpart of the C entry point: serialized with other calls, and a
/// panic counts as failure.
pub fn try_compile(args: &[String], resource_dir: &Path) -> bool {
    ffi::guarded(|| compile_in_process(args, resource_dir))
}
