use super::*;

fn engine(options: DiagnosticOptions) -> (DiagnosticEngine, StoredDiagnostics) {
    let stored = StoredDiagnostics::new();
    (DiagnosticEngine::new(options, Box::new(stored.clone())), stored)
}

#[test]
fn test_warnings_do_not_count_as_errors() {
    let (mut diags, stored) = engine(DiagnosticOptions::default());
    diags.warning("argument unused during compilation: '-g'");
    assert!(!diags.has_error_occurred());
    assert_eq!(diags.num_warnings(), 1);
    assert_eq!(stored.messages(), vec!["warning: argument unused during compilation: '-g'"]);
}

#[test]
fn test_werror_promotes_warnings() {
    let opts = DiagnosticOptions::from_warnings(&["error".to_string()], false);
    let (mut diags, stored) = engine(opts);
    diags.report(Diagnostic::warning("non-void function does not return a value").with_code("return-type"));
    assert!(diags.has_error_occurred());
    assert_eq!(stored.diagnostics()[0].level, DiagnosticLevel::Error);
}

#[test]
fn test_ignored_and_disabled_warnings_are_dropped() {
    let (mut diags, stored) = engine(DiagnosticOptions::from_warnings(&[], true));
    diags.warning("dropped");
    assert!(stored.diagnostics().is_empty());

    let opts = DiagnosticOptions::from_warnings(&["no-return-type".to_string()], false);
    let (mut diags, stored) = engine(opts);
    diags.report(Diagnostic::warning("dropped").with_code("return-type"));
    diags.report(Diagnostic::warning("kept"));
    assert_eq!(stored.messages(), vec!["warning: kept"]);
}

#[test]
fn test_text_printer_format() {
    let printer = TextDiagnosticPrinter::new(Box::new(Vec::new()), "cendol", false);
    let located = Diagnostic::error("use of undeclared identifier 'x'").at(SourceLoc::new("foo.c", 3, 12));
    assert_eq!(
        printer.format_diagnostic(&located),
        "foo.c:3:12: error: use of undeclared identifier 'x'"
    );
    let unlocated = Diagnostic::error("no input files");
    assert_eq!(printer.format_diagnostic(&unlocated), "cendol: error: no input files");
    let grouped = Diagnostic::warning("non-void function does not return a value").with_code("return-type");
    assert_eq!(
        printer.format_diagnostic(&grouped),
        "cendol: warning: non-void function does not return a value [-Wreturn-type]"
    );
}

#[test]
fn test_fatal_counts_as_error() {
    let (mut diags, _) = engine(DiagnosticOptions::default());
    diags.report(Diagnostic::new(DiagnosticLevel::Fatal, "'missing.h' file not found"));
    assert!(diags.has_error_occurred());
    assert!(diags.has_fatal_error_occurred());
}
