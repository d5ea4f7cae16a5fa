use super::*;
use crate::diagnostic::{DiagnosticEngine, DiagnosticOptions, StoredDiagnostics};
use std::path::Path;

/// Run the preprocessor over `src` and return its text plus every diagnostic
fn preprocess_with(config: PPConfig, src: &str) -> (String, StoredDiagnostics) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let mut diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let out = Preprocessor::new(config, &mut diags).preprocess_source(src, Path::new("<test>"));
    (out, stored)
}

/// Same as `cc -E -P`
fn preprocess(src: &str) -> (String, StoredDiagnostics) {
    let config = PPConfig {
        line_markers: false,
        ..Default::default()
    };
    preprocess_with(config, src)
}

#[test]
fn test_object_macro_expansion() {
    let (out, stored) = preprocess("\n#define TEN 10\nint x = TEN;\n");
    assert_eq!(out, "int x = 10;\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_line_markers_track_source_lines() {
    let (out, _) = preprocess_with(PPConfig::default(), "\n\nint a;\n");
    assert_eq!(out, "# 1 \"<test>\"\n\n\nint a;\n");
}

#[test]
fn test_stringify_and_paste() {
    let src = r#"#define STR(x) #x
#define CAT(a, b) a ## b
const char *s = STR(hello world);
int CAT(foo, bar) = 1;
"#;
    let (out, stored) = preprocess(src);
    assert_eq!(out, "const char *s = \"hello world\";\nint foobar = 1;\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_conditional_groups() {
    let src = r#"#define A 2
#if A > 1 && defined(A)
yes
#elif 1
no1
#else
no2
#endif
#ifdef B
no3
#endif
"#;
    let (out, stored) = preprocess(src);
    assert_eq!(out, "yes\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_nested_skipped_group_stays_skipped() {
    let src = "#if 0\n#if 1\na\n#else\nb\n#endif\n#else\nc\n#endif\n";
    let (out, _) = preprocess(src);
    assert_eq!(out, "c\n");
}

#[test]
fn test_self_reference_is_not_reexpanded() {
    let (out, _) = preprocess("#define foo foo + 1\nfoo\n");
    assert_eq!(out, "foo + 1\n");
}

#[test]
fn test_variadic_macro_with_comma_elision() {
    let src = r#"#define LOG(fmt, ...) printf(fmt, ## __VA_ARGS__)
LOG("a");
LOG("b", 1, 2);
"#;
    let (out, stored) = preprocess(src);
    assert_eq!(out, "printf(\"a\");\nprintf(\"b\", 1, 2);\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_file_and_line_builtins() {
    let (out, _) = preprocess("__FILE__ __LINE__\n");
    assert_eq!(out, "\"<test>\" 1\n");
}

#[test]
fn test_command_line_defines() {
    let config = PPConfig {
        defines: vec!["X=3".to_string(), "Y".to_string()],
        undefines: vec!["Y".to_string()],
        line_markers: false,
        ..Default::default()
    };
    let (out, _) = preprocess_with(config, "X Y\n");
    assert_eq!(out, "3 Y\n");
}

#[test]
fn test_include_with_pragma_once() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("inc.h"), "#pragma once\nint from_header;\n").unwrap();
    let main = dir.path().join("main.c");
    std::fs::write(&main, "#include \"inc.h\"\n#include \"inc.h\"\nint main_file;\n").unwrap();

    let stored = StoredDiagnostics::new();
    let mut diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let config = PPConfig {
        line_markers: false,
        ..Default::default()
    };
    let out = Preprocessor::new(config, &mut diags).preprocess_file(&main).unwrap();
    assert_eq!(out, "int from_header;\nint main_file;\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_angled_include_uses_search_paths() {
    let dir = tempfile::tempdir().unwrap();
    let sys = dir.path().join("sys");
    std::fs::create_dir(&sys).unwrap();
    std::fs::write(sys.join("lib.h"), "#define FROM_SYS 7\n").unwrap();

    let config = PPConfig {
        system_include_paths: vec![sys],
        line_markers: false,
        ..Default::default()
    };
    let src = "#if __has_include(<lib.h>)\n#include <lib.h>\n#endif\nFROM_SYS\n";
    let (out, stored) = preprocess_with(config, src);
    assert_eq!(out, "7\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_missing_include_is_fatal() {
    let (_, stored) = preprocess("#include \"nope.h\"\nint after;\n");
    assert_eq!(stored.messages(), vec!["fatal error: 'nope.h' file not found"]);
    let diag = &stored.diagnostics()[0];
    assert_eq!(diag.location.as_ref().map(|l| l.line), Some(1));
}

#[test]
fn test_error_directive() {
    let (_, stored) = preprocess("#error boom here\n");
    assert_eq!(stored.messages(), vec!["error: boom here"]);
}

#[test]
fn test_bad_expressions_are_reported() {
    let (_, stored) = preprocess("#if 1 /\n#endif\n#if 1/0\n#endif\n");
    assert_eq!(
        stored.messages(),
        vec![
            "error: expected value in expression",
            "error: division by zero in preprocessor expression"
        ]
    );
}

#[test]
fn test_overflowing_division_wraps() {
    let (out, stored) = preprocess(
        "#if (-9223372036854775807 - 1) / -1 < 0\nwrapped\n#endif\n#if (-9223372036854775807 - 1) % -1 == 0\nzero\n#endif\n",
    );
    assert!(stored.diagnostics().is_empty(), "{:?}", stored.messages());
    assert!(out.contains("wrapped") && out.contains("zero"), "{}", out);
}

#[test]
fn test_unterminated_conditional() {
    let (_, stored) = preprocess("#if 1\nint a;\n");
    assert_eq!(stored.messages(), vec!["error: unterminated conditional directive"]);
}

#[test]
fn test_assembler_comments_are_not_directives() {
    let config = PPConfig {
        lang_opts: crate::lang_options::LangOptions {
            asm_preprocessor: true,
            ..Default::default()
        },
        line_markers: false,
        ..Default::default()
    };
    let (out, stored) = preprocess_with(config, "# comment\nmovl $1, %eax\n");
    assert_eq!(out, "movl $1, %eax\n");
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_macro_redefinition_warns() {
    let (_, stored) = preprocess("#define A 1\n#define A 1\n#define A 2\n");
    let diags = stored.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, Some("macro-redefined"));
}
