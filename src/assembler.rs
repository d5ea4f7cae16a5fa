//! The in-process `-cc1as` assembler.
//!
//! The directive subset needed to rebuild objects from printed assembly is
//! understood: sections, labels, symbol attributes, data, alignment and
//! explicit `.reloc` records. On x86_64, AT&T instructions are encoded by
//! iced-x86; other targets reject instructions.

mod encoder;
mod expr;
mod invocation;
mod lexer;
mod object_writer;
mod parser;

#[cfg(test)]
mod tests_assembler;

use std::fs;
use std::io::{self, Read, Write};

use log::debug;

pub use invocation::{AssemblerInvocation, FileType};

use crate::diagnostic::DiagnosticEngine;
use crate::error::PipelineError;

/// Assemble `inv.input` and write the object to `inv.output`.
///
/// Every problem is reported to `sink` first; the returned error only says
/// that the job failed.
pub fn execute_assembler(inv: &AssemblerInvocation, sink: &mut DiagnosticEngine) -> Result<(), PipelineError> {
    debug!(
        "assembling {} for {} -> {}",
        inv.input.display(),
        inv.triple,
        inv.output.display()
    );
    let Some(arch) = object_writer::target_architecture(&inv.triple) else {
        sink.error(format!("unsupported object format for target '{}'", inv.triple));
        return Err(PipelineError::Fatal);
    };

    let (text, file_name) = read_input(inv, sink)?;
    let mut assembler = parser::Assembler::new(inv, arch, sink);
    assembler.assemble_source(&text, &file_name);
    let module = assembler.finish();
    if sink.has_error_occurred() {
        return Err(PipelineError::Fatal);
    }
    let bytes = object_writer::write_object(&module, arch, sink)?;

    match inv.filetype {
        FileType::Null => {
            debug!("--filetype null: discarding {} bytes", bytes.len());
            Ok(())
        }
        FileType::Obj if inv.output.as_os_str() == "-" => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
            Ok(())
        }
        FileType::Obj => fs::write(&inv.output, &bytes).map_err(|err| {
            sink.error(format!("unable to open output file '{}': '{}'", inv.output.display(), err));
            PipelineError::Fatal
        }),
    }
}

fn read_input(inv: &AssemblerInvocation, sink: &mut DiagnosticEngine) -> Result<(String, String), PipelineError> {
    if inv.input.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text)?;
        return Ok((text, "<stdin>".to_string()));
    }
    match fs::read(&inv.input) {
        Ok(bytes) => Ok((
            String::from_utf8_lossy(&bytes).into_owned(),
            inv.input.display().to_string(),
        )),
        Err(err) => {
            sink.error(format!("could not open '{}': {}", inv.input.display(), err));
            Err(PipelineError::Fatal)
        }
    }
}
