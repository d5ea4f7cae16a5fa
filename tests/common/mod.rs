//! Shared helpers for the in-process integration tests

use std::path::Path;

use cendol_embed::DispatchError;
use cendol_embed::diagnostic::{DiagnosticEngine, DiagnosticOptions, StoredDiagnostics};

pub const TRIPLE: &str = "--target=x86_64-unknown-linux-gnu";

pub fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

pub fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Run a full driver invocation, collecting diagnostics instead of printing them
pub fn run(argv: &[String], resource_dir: &Path) -> (Result<(), DispatchError>, StoredDiagnostics) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let mut diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let result = cendol_embed::run_driver(argv, resource_dir, &mut diags);
    (result, stored)
}
