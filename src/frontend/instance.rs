//! Per-job compiler state.

use std::io;

use log::debug;

use super::CompilerInvocation;
use crate::diagnostic::{
    ChainedConsumer, DiagnosticConsumer, DiagnosticEngine, TextDiagnosticPrinter, open_log_file,
};

/// One front-end run: the invocation plus the diagnostics engine it reports to.
pub struct CompilerInstance {
    invocation: CompilerInvocation,
    diagnostics: Option<DiagnosticEngine>,
    prog_name: String,
}

impl CompilerInstance {
    pub fn new(invocation: CompilerInvocation, prog_name: impl Into<String>) -> Self {
        CompilerInstance {
            invocation,
            diagnostics: None,
            prog_name: prog_name.into(),
        }
    }

    pub fn invocation(&self) -> &CompilerInvocation {
        &self.invocation
    }

    /// Build the engine from the invocation's options, rendering to stderr.
    pub fn create_diagnostics(&mut self) -> io::Result<()> {
        let printer = TextDiagnosticPrinter::stderr(
            self.prog_name.clone(),
            self.invocation.diagnostics.show_colors,
        );
        self.create_diagnostics_with(Box::new(printer))
    }

    /// Same as [`create_diagnostics`](Self::create_diagnostics) with a caller-chosen consumer.
    pub fn create_diagnostics_with(&mut self, consumer: Box<dyn DiagnosticConsumer>) -> io::Result<()> {
        let options = self.invocation.diagnostics.clone();
        let consumer: Box<dyn DiagnosticConsumer> = match &options.log_file {
            Some(path) => {
                let file = open_log_file(path)?;
                debug!("copying diagnostics to {}", path.display());
                let log = TextDiagnosticPrinter::new(Box::new(file), self.prog_name.clone(), false);
                Box::new(ChainedConsumer::new(vec![consumer, Box::new(log)]))
            }
            None => consumer,
        };
        self.diagnostics = Some(DiagnosticEngine::new(options, consumer));
        Ok(())
    }

    pub fn has_diagnostics(&self) -> bool {
        self.diagnostics.is_some()
    }

    pub fn diagnostics_mut(&mut self) -> Option<&mut DiagnosticEngine> {
        self.diagnostics.as_mut()
    }

    /// The invocation and the engine, borrowed together
    pub(crate) fn parts_mut(&mut self) -> Option<(&CompilerInvocation, &mut DiagnosticEngine)> {
        let diagnostics = self.diagnostics.as_mut()?;
        Some((&self.invocation, diagnostics))
    }
}
