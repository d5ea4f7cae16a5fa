//! Diagnostics engine shared by the driver, the front-end and the assembler.
//!
//! Every stage reports through a [`DiagnosticEngine`]. The engine applies the
//! configured [`DiagnosticOptions`] (warning promotion, suppression), keeps
//! error/warning counters and forwards each report to a [`DiagnosticConsumer`],
//! which by default renders human readable text on stderr.

use std::cell::RefCell;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Diagnostic severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Remark,
    Note,
    Warning,
    Error,
    Fatal,
}

impl DiagnosticLevel {
    fn as_str(self) -> &'static str {
        match self {
            DiagnosticLevel::Remark => "remark",
            DiagnosticLevel::Note => "note",
            DiagnosticLevel::Warning => "warning",
            DiagnosticLevel::Error => "error",
            DiagnosticLevel::Fatal => "fatal error",
        }
    }

    fn color(self) -> &'static str {
        match self {
            DiagnosticLevel::Remark => "\x1b[1;34m",
            DiagnosticLevel::Note => "\x1b[1;30m",
            DiagnosticLevel::Warning => "\x1b[1;35m",
            DiagnosticLevel::Error | DiagnosticLevel::Fatal => "\x1b[1;31m",
        }
    }
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A presumed source position: file name as spelled by line markers, 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(file: impl Into<String>, line: u32, column: u32) -> Self {
        SourceLoc {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Individual diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub message: String,
    pub location: Option<SourceLoc>,
    /// Warning group controlling this diagnostic, e.g. `return-type`.
    pub code: Option<&'static str>,
}

impl Diagnostic {
    pub fn new(level: DiagnosticLevel, message: impl Into<String>) -> Self {
        Diagnostic {
            level,
            message: message.into(),
            location: None,
            code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Warning, message)
    }

    pub fn note(message: impl Into<String>) -> Self {
        Self::new(DiagnosticLevel::Note, message)
    }

    pub fn at(mut self, location: SourceLoc) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_code(mut self, code: &'static str) -> Self {
        self.code = Some(code);
        self
    }
}

/// Options controlling how reports are filtered and rendered.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticOptions {
    /// `-Werror`
    pub warnings_as_errors: bool,
    /// `-w`
    pub ignore_warnings: bool,
    /// Warning groups disabled with `-Wno-<group>`
    pub disabled_groups: Vec<String>,
    /// `-fcolor-diagnostics`
    pub show_colors: bool,
    /// Stop forwarding reports once this many errors were seen (0 = unlimited).
    pub error_limit: usize,
    /// Append a copy of every rendered report to this file.
    pub log_file: Option<PathBuf>,
}

impl DiagnosticOptions {
    /// Build options from `-W` values and the `-w` flag.
    pub fn from_warnings(warnings: &[String], ignore_warnings: bool) -> Self {
        let mut opts = DiagnosticOptions {
            ignore_warnings,
            ..Default::default()
        };
        for w in warnings {
            match w.as_str() {
                "error" => opts.warnings_as_errors = true,
                "no-error" => opts.warnings_as_errors = false,
                "everything" | "all" | "extra" => {}
                other => {
                    if let Some(group) = other.strip_prefix("no-") {
                        opts.disabled_groups.push(group.to_string());
                    }
                }
            }
        }
        opts
    }
}

/// Receives every diagnostic that survives the engine's filtering.
pub trait DiagnosticConsumer {
    fn handle_diagnostic(&mut self, diag: &Diagnostic);

    fn finish(&mut self) {}
}

/// Renders diagnostics as text in the familiar `file:line:col: error: message` shape.
pub struct TextDiagnosticPrinter {
    out: Box<dyn Write>,
    prog_name: String,
    show_colors: bool,
}

impl TextDiagnosticPrinter {
    pub fn new(out: Box<dyn Write>, prog_name: impl Into<String>, show_colors: bool) -> Self {
        TextDiagnosticPrinter {
            out,
            prog_name: prog_name.into(),
            show_colors,
        }
    }

    /// Printer writing to the process's standard error stream.
    pub fn stderr(prog_name: impl Into<String>, show_colors: bool) -> Self {
        Self::new(Box::new(io::stderr()), prog_name, show_colors)
    }

    pub fn format_diagnostic(&self, diag: &Diagnostic) -> String {
        let prefix = match &diag.location {
            Some(loc) => loc.to_string(),
            None => self.prog_name.clone(),
        };
        let level = if self.show_colors {
            format!("{}{}:\x1b[0m", diag.level.color(), diag.level)
        } else {
            format!("{}:", diag.level)
        };
        match diag.code {
            Some(code) if diag.level == DiagnosticLevel::Warning => {
                format!("{}: {} {} [-W{}]", prefix, level, diag.message, code)
            }
            Some(code) if diag.level == DiagnosticLevel::Error => {
                format!("{}: {} {} [-Werror,-W{}]", prefix, level, diag.message, code)
            }
            _ => format!("{}: {} {}", prefix, level, diag.message),
        }
    }
}

impl DiagnosticConsumer for TextDiagnosticPrinter {
    fn handle_diagnostic(&mut self, diag: &Diagnostic) {
        let text = self.format_diagnostic(diag);
        // Nothing sensible can be done when stderr itself is gone.
        let _ = writeln!(self.out, "{}", text);
    }

    fn finish(&mut self) {
        let _ = self.out.flush();
    }
}

/// Keeps reports in memory; clones share the same storage.
#[derive(Clone, Default)]
pub struct StoredDiagnostics {
    stored: Rc<RefCell<Vec<Diagnostic>>>,
}

impl StoredDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.stored.borrow().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.stored
            .borrow()
            .iter()
            .map(|d| format!("{}: {}", d.level, d.message))
            .collect()
    }
}

impl DiagnosticConsumer for StoredDiagnostics {
    fn handle_diagnostic(&mut self, diag: &Diagnostic) {
        self.stored.borrow_mut().push(diag.clone());
    }
}

/// Forwards every report to several consumers in order.
pub struct ChainedConsumer {
    consumers: Vec<Box<dyn DiagnosticConsumer>>,
}

impl ChainedConsumer {
    pub fn new(consumers: Vec<Box<dyn DiagnosticConsumer>>) -> Self {
        ChainedConsumer { consumers }
    }
}

impl DiagnosticConsumer for ChainedConsumer {
    fn handle_diagnostic(&mut self, diag: &Diagnostic) {
        for consumer in &mut self.consumers {
            consumer.handle_diagnostic(diag);
        }
    }

    fn finish(&mut self) {
        for consumer in &mut self.consumers {
            consumer.finish();
        }
    }
}

/// Open `path` for appending rendered diagnostics.
pub fn open_log_file(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Diagnostic engine for collecting and reporting errors and warnings
pub struct DiagnosticEngine {
    options: DiagnosticOptions,
    consumer: Box<dyn DiagnosticConsumer>,
    num_errors: usize,
    num_warnings: usize,
    fatal_occurred: bool,
}

impl DiagnosticEngine {
    pub fn new(options: DiagnosticOptions, consumer: Box<dyn DiagnosticConsumer>) -> Self {
        DiagnosticEngine {
            options,
            consumer,
            num_errors: 0,
            num_warnings: 0,
            fatal_occurred: false,
        }
    }

    /// Engine rendering text to stderr, prefixed by `prog_name` for unlocated reports.
    pub fn stderr(prog_name: impl Into<String>, options: DiagnosticOptions) -> Self {
        let printer = TextDiagnosticPrinter::stderr(prog_name, options.show_colors);
        Self::new(options, Box::new(printer))
    }

    pub fn options(&self) -> &DiagnosticOptions {
        &self.options
    }

    pub fn report(&mut self, mut diag: Diagnostic) {
        if diag.level == DiagnosticLevel::Warning {
            if self.options.ignore_warnings {
                return;
            }
            if let Some(code) = diag.code {
                if self.options.disabled_groups.iter().any(|g| g == code) {
                    return;
                }
            }
            if self.options.warnings_as_errors {
                diag.level = DiagnosticLevel::Error;
            }
        }

        match diag.level {
            DiagnosticLevel::Error => self.num_errors += 1,
            DiagnosticLevel::Fatal => {
                self.num_errors += 1;
                self.fatal_occurred = true;
            }
            DiagnosticLevel::Warning => self.num_warnings += 1,
            DiagnosticLevel::Note | DiagnosticLevel::Remark => {}
        }

        if self.options.error_limit != 0 && self.num_errors > self.options.error_limit {
            return;
        }
        log::trace!("diagnostic: {:?}", diag);
        self.consumer.handle_diagnostic(&diag);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::error(message));
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.report(Diagnostic::warning(message));
    }

    pub fn has_error_occurred(&self) -> bool {
        self.num_errors > 0
    }

    pub fn has_fatal_error_occurred(&self) -> bool {
        self.fatal_occurred
    }

    pub fn num_errors(&self) -> usize {
        self.num_errors
    }

    pub fn num_warnings(&self) -> usize {
        self.num_warnings
    }

    /// Flush the consumer; called when a stage is done reporting.
    pub fn finish(&mut self) {
        self.consumer.finish();
    }
}

impl Drop for DiagnosticEngine {
    fn drop(&mut self) {
        self.consumer.finish();
    }
}

#[cfg(test)]
mod tests_diagnostic;
