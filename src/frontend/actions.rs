//! Front-end actions: preprocess, check, emit assembly or an object.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use log::{debug, trace};

use super::{CompilerInstance, CompilerInvocation, FrontendAction, InputLanguage};
use crate::codegen::{self, asm_printer};
use crate::diagnostic::DiagnosticEngine;
use crate::error::PipelineError;
use crate::lexer::Lexer;
use crate::parser;
use crate::pp::Preprocessor;
use crate::semantic::{self, typed_ast::Program};

/// Run the action the invocation asks for.
///
/// Fails when the action fails or any error was reported on the instance's engine.
pub fn execute_compiler_invocation(instance: &mut CompilerInstance) -> bool {
    let Some((invocation, diag)) = instance.parts_mut() else {
        log::warn!("front-end invoked without a diagnostics engine");
        return false;
    };
    debug!(
        "front-end action {:?} on {} -> {}",
        invocation.action,
        invocation.input.display(),
        invocation.output.display()
    );

    let result = match invocation.action {
        FrontendAction::PreprocessOnly => preprocess(invocation, diag).and_then(|text| {
            let text = normalize_preprocessed(text);
            write_output(&invocation.output, text.as_bytes(), diag)
        }),
        FrontendAction::SyntaxOnly => check(invocation, diag).map(|_| ()),
        FrontendAction::EmitAssembly => emit_object(invocation, diag).and_then(|object| {
            let text = asm_printer::print_assembly(&object, &invocation.main_file_name).map_err(|err| {
                diag.error(err.to_string());
                PipelineError::Fatal
            })?;
            write_output(&invocation.output, text.as_bytes(), diag)
        }),
        FrontendAction::EmitObj => {
            emit_object(invocation, diag).and_then(|object| write_output(&invocation.output, &object, diag))
        }
    };

    let ok = match result {
        Ok(()) => !diag.has_error_occurred(),
        Err(PipelineError::Fatal) => false,
        Err(PipelineError::Io(err)) => {
            diag.error(format!("{}: {}", invocation.input.display(), err));
            false
        }
    };
    diag.finish();
    ok
}

fn preprocess(invocation: &CompilerInvocation, diag: &mut DiagnosticEngine) -> Result<String, PipelineError> {
    let text = Preprocessor::new(invocation.preprocessor.clone(), diag).preprocess_file(&invocation.input)?;
    if diag.has_error_occurred() {
        return Err(PipelineError::Fatal);
    }
    Ok(text)
}

/// `-E` output always ends with exactly one newline
fn normalize_preprocessed(mut text: String) -> String {
    if !text.is_empty() && !text.ends_with('\n') {
        text.push('\n');
    }
    text
}

/// Translation unit text: preprocessed, or read as is for `cpp-output`
fn source_text(invocation: &CompilerInvocation, diag: &mut DiagnosticEngine) -> Result<String, PipelineError> {
    if invocation.language != InputLanguage::PreprocessedC {
        return preprocess(invocation, diag);
    }
    trace!("skipping the preprocessor for {}", invocation.input.display());
    if invocation.input.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok(text);
    }
    match fs::read(&invocation.input) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) => {
            diag.error(format!(
                "no such file or directory: '{}': {}",
                invocation.input.display(),
                err
            ));
            Err(PipelineError::Fatal)
        }
    }
}

/// Preprocess, parse and analyze
fn check(invocation: &CompilerInvocation, diag: &mut DiagnosticEngine) -> Result<Program, PipelineError> {
    let text = source_text(invocation, diag)?;
    let file_name = if invocation.input.as_os_str() == "-" {
        "<stdin>".to_string()
    } else {
        invocation.input.display().to_string()
    };
    let tokens = Lexer::new(&text, file_name, diag).tokenize();
    trace!("{} tokens", tokens.len());
    let unit = parser::parse(&tokens, invocation.lang_opts, diag);
    let program = semantic::analyze(&unit, invocation.lang_opts, diag);
    if diag.has_error_occurred() {
        return Err(PipelineError::Fatal);
    }
    Ok(program)
}

fn emit_object(invocation: &CompilerInvocation, diag: &mut DiagnosticEngine) -> Result<Vec<u8>, PipelineError> {
    let program = check(invocation, diag)?;
    codegen::emit_object(&program, &invocation.codegen).map_err(|err| {
        diag.error(err.to_string());
        PipelineError::Fatal
    })
}

/// Write to `path`, or stdout for `-`
fn write_output(path: &Path, bytes: &[u8], diag: &mut DiagnosticEngine) -> Result<(), PipelineError> {
    if path.as_os_str() == "-" {
        let mut stdout = io::stdout().lock();
        stdout.write_all(bytes)?;
        stdout.flush()?;
        return Ok(());
    }
    fs::write(path, bytes).map_err(|err| {
        diag.error(format!("unable to open output file '{}': '{}'", path.display(), err));
        PipelineError::Fatal
    })
}
