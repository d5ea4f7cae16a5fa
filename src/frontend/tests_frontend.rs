use std::fs;
use std::path::Path;

use object::read::{Object, ObjectSymbol};

use super::*;
use crate::codegen::OptLevel;
use crate::diagnostic::{DiagnosticEngine, DiagnosticOptions, StoredDiagnostics};
use crate::lang_options::CStandard;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn parse(list: &[&str]) -> (Option<CompilerInvocation>, Vec<String>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let mut diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let mut invocation = CompilerInvocation::default();
    let ok = CompilerInvocation::create_from_args(&mut invocation, &args(list), &mut diags);
    (ok.then_some(invocation), stored.messages())
}

/// Run a `-cc1` job over `source` written to `dir/name`
fn run(dir: &Path, name: &str, source: &str, extra: &[&str]) -> (bool, Vec<String>) {
    let input = dir.join(name);
    fs::write(&input, source).expect("write input");
    let input = input.display().to_string();
    let mut list = vec!["-cc1", "--triple", "x86_64-unknown-linux-gnu"];
    list.extend_from_slice(extra);
    list.push(&input);
    let (invocation, messages) = parse(&list);
    let invocation = invocation.unwrap_or_else(|| panic!("bad invocation: {:?}", messages));

    let stored = StoredDiagnostics::new();
    let mut instance = CompilerInstance::new(invocation, "cendol-embed");
    assert!(!instance.has_diagnostics());
    instance
        .create_diagnostics_with(Box::new(stored.clone()))
        .expect("diagnostics");
    assert!(instance.has_diagnostics());
    let ok = execute_compiler_invocation(&mut instance);
    (ok, stored.messages())
}

#[test]
fn test_invocation_from_driver_arguments() {
    let (invocation, messages) = parse(&[
        "-cc1",
        "--triple",
        "aarch64-unknown-linux-gnu",
        "--emit-obj",
        "--main-file-name",
        "hello.c",
        "--internal-isystem",
        "/res/include",
        "-I",
        "inc",
        "-D",
        "FOO=1",
        "-U",
        "BAR",
        "-O2",
        "-Werror",
        "--std",
        "c99",
        "-o",
        "hello.o",
        "-x",
        "c",
        "hello.c",
    ]);
    assert!(messages.is_empty(), "{:?}", messages);
    let invocation = invocation.expect("valid invocation");
    assert_eq!(invocation.action, FrontendAction::EmitObj);
    assert_eq!(invocation.language, InputLanguage::C);
    assert_eq!(invocation.output, Path::new("hello.o"));
    assert_eq!(invocation.main_file_name, "hello.c");
    assert_eq!(invocation.codegen.opt_level, OptLevel::Speed);
    assert_eq!(invocation.codegen.triple.to_string(), "aarch64-unknown-linux-gnu");
    assert_eq!(invocation.lang_opts.c_standard, CStandard::C99);
    assert!(invocation.diagnostics.warnings_as_errors);
    assert_eq!(invocation.preprocessor.defines, vec!["FOO=1".to_string()]);
    assert_eq!(invocation.preprocessor.undefines, vec!["BAR".to_string()]);
    assert_eq!(invocation.preprocessor.system_include_paths, vec![Path::new("/res/include")]);
    assert!(invocation.preprocessor.optimize && invocation.preprocessor.line_markers);
}

#[test]
fn test_invocation_defaults() {
    let (invocation, _) = parse(&["-cc1", "--triple", "x86_64-unknown-linux-gnu", "in.i"]);
    let invocation = invocation.expect("valid invocation");
    assert_eq!(invocation.action, FrontendAction::SyntaxOnly);
    assert_eq!(invocation.language, InputLanguage::PreprocessedC);
    assert_eq!(invocation.output, Path::new("-"));
}

#[test]
fn test_invocation_errors() {
    let cases: &[(&[&str], &str)] = &[
        (&["-cc1", "in.c"], "required arguments were not provided"),
        (&["-cc1", "--triple", "x86_64-unknown-linux-gnu", "-x", "fortran", "in.c"], "invalid value 'fortran' in '-x fortran'"),
        (&["-cc1", "--triple", "x86_64-unknown-linux-gnu", "--std", "c2y", "in.c"], "invalid value 'c2y' in '-std=c2y'"),
        (&["-cc1", "--triple", "not-a-real-triple-at-all", "in.c"], "unknown target triple"),
        (&["-cc1", "--triple", "x86_64-apple-darwin", "--emit-obj", "in.c"], "unsupported object format"),
        (&["-cc1", "--triple", "x86_64-unknown-linux-gnu", "-E", "-S", "in.c"], "cannot be used with"),
        (&["-cc1", "--triple", "x86_64-unknown-linux-gnu", "a.c", "b.c"], "'b.c'"),
    ];
    for (list, expected) in cases {
        let (invocation, messages) = parse(list);
        assert!(invocation.is_none(), "{:?} should be rejected", list);
        assert!(
            messages.iter().any(|m| m.contains(expected)),
            "{:?}: expected {:?} in {:?}",
            list,
            expected,
            messages
        );
    }
}

#[test]
fn test_preprocess_only_writes_output() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("out.i");
    let out_arg = out.display().to_string();
    let (ok, messages) = run(
        dir.path(),
        "pp.c",
        "#define ANSWER 42\nint answer = ANSWER;\n",
        &["-E", "-P", "-o", &out_arg],
    );
    assert!(ok, "{:?}", messages);
    let text = fs::read_to_string(&out).expect("output");
    assert!(text.contains("int answer = 42;"), "{}", text);
    assert!(!text.contains("# 1"), "{}", text);
}

#[test]
fn test_syntax_only_reports_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (ok, messages) = run(dir.path(), "bad.c", "int main(void) { return missing; }\n", &["--fsyntax-only"]);
    assert!(!ok);
    assert_eq!(messages, vec!["error: use of undeclared identifier 'missing'"]);

    let (ok, messages) = run(dir.path(), "warn.c", "int f(void) { }\n", &["--fsyntax-only", "-Werror"]);
    assert!(!ok);
    assert_eq!(messages, vec!["error: non-void function does not return a value"]);
}

#[test]
fn test_emit_obj_and_assembly() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = "int counter = 3;\nint bump(int by) { counter += by; return counter; }\n";

    let obj = dir.path().join("bump.o");
    let obj_arg = obj.display().to_string();
    let (ok, messages) = run(dir.path(), "bump.c", source, &["--emit-obj", "-o", &obj_arg]);
    assert!(ok, "{:?}", messages);
    let bytes = fs::read(&obj).expect("object");
    let file = object::File::parse(&*bytes).expect("valid object");
    assert!(file.symbol_by_name("bump").is_some_and(|s| s.is_global()));
    assert!(file.symbol_by_name("counter").is_some_and(|s| s.is_global()));

    let asm = dir.path().join("bump.s");
    let asm_arg = asm.display().to_string();
    let (ok, messages) = run(
        dir.path(),
        "bump.c",
        source,
        &["-S", "--main-file-name", "bump.c", "-o", &asm_arg],
    );
    assert!(ok, "{:?}", messages);
    let text = fs::read_to_string(&asm).expect("assembly");
    assert!(text.starts_with("\t.file\t\"bump.c\"\n"), "{}", text);
    assert!(text.contains("\t.type\tbump,@function\n"), "{}", text);
    assert!(text.contains("\ncounter:\n"), "{}", text);
}

#[test]
fn test_preprocessed_input_skips_preprocessor() {
    let dir = tempfile::tempdir().expect("tempdir");
    // line markers in `.i` input are read by the lexer itself
    let (ok, messages) = run(
        dir.path(),
        "pre.i",
        "# 1 \"orig.c\"\nint f(void) { return 1; }\n",
        &["--fsyntax-only"],
    );
    assert!(ok, "{:?}", messages);
}

#[test]
fn test_unwritable_output_fails() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("missing-dir").join("x.o");
    let out_arg = out.display().to_string();
    let (ok, messages) = run(dir.path(), "x.c", "int x;\n", &["--emit-obj", "-o", &out_arg]);
    assert!(!ok);
    assert!(messages[0].starts_with("error: unable to open output file"), "{:?}", messages);
}
