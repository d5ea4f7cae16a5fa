mod common;

use std::fs;

use object::{Object, ObjectSection, ObjectSymbol};

use cendol_embed::DispatchError;
use common::{TRIPLE, args, path_arg, run};

#[test]
fn test_compile_only_writes_object() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("square.c");
    fs::write(&source, "int square(int x) { return x * x; }\n").expect("write");
    let object = dir.path().join("square.o");

    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]);
    let (result, stored) = run(&argv, dir.path());
    assert!(result.is_ok(), "{:?}", stored.messages());
    assert!(stored.messages().is_empty());

    let bytes = fs::read(&object).expect("object written");
    let file = object::File::parse(&*bytes).expect("valid object");
    assert!(file.symbols().any(|s| s.name() == Ok("square") && s.is_definition()));
}

#[test]
fn test_repeated_runs_give_identical_objects() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("count.c");
    fs::write(
        &source,
        "static int counter;\nint bump(void) { counter = counter + 1; return counter; }\n",
    )
    .expect("write");
    let object = dir.path().join("count.o");
    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]);

    let (first, _) = run(&argv, dir.path());
    first.expect("first run");
    let first_bytes = fs::read(&object).expect("object");
    let (second, _) = run(&argv, dir.path());
    second.expect("second run");
    assert_eq!(first_bytes, fs::read(&object).expect("object"));
}

#[test]
fn test_emit_assembly_then_assemble() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("pair.c");
    fs::write(
        &source,
        "int base = 3;\nint next(int x) { return x + base; }\n",
    )
    .expect("write");
    let assembly = dir.path().join("pair.s");
    let object = dir.path().join("pair.o");

    let (result, stored) = run(
        &args(&["cc", TRIPLE, "-S", &path_arg(&source), "-o", &path_arg(&assembly)]),
        dir.path(),
    );
    assert!(result.is_ok(), "{:?}", stored.messages());
    let text = fs::read_to_string(&assembly).expect("assembly written");
    assert!(text.contains("next:"));

    let (result, stored) = run(
        &args(&["cc", TRIPLE, "-c", &path_arg(&assembly), "-o", &path_arg(&object)]),
        dir.path(),
    );
    assert!(result.is_ok(), "{:?}", stored.messages());
    let bytes = fs::read(&object).expect("object written");
    let file = object::File::parse(&*bytes).expect("valid object");
    assert!(file.symbols().any(|s| s.name() == Ok("next")));
    assert!(file.symbols().any(|s| s.name() == Ok("base")));
}

#[test]
fn test_preprocessed_assembly_is_assembled() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("table.S");
    fs::write(
        &source,
        "#define ENTRIES 3\n\t.data\n\t.globl table\ntable:\n\t.long ENTRIES, ENTRIES * 2\n",
    )
    .expect("write");
    let object = dir.path().join("table.o");

    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object), "-save-temps=obj"]);
    let (result, stored) = run(&argv, dir.path());
    assert!(result.is_ok(), "{:?}", stored.messages());

    let intermediate = fs::read_to_string(dir.path().join("table.s")).expect("intermediate kept");
    assert!(intermediate.contains("3 * 2"), "{}", intermediate);

    let bytes = fs::read(&object).expect("object written");
    let file = object::File::parse(&*bytes).expect("valid object");
    let data = file.section_by_name(".data").expect("data section");
    assert_eq!(data.data().expect("contents"), &[3, 0, 0, 0, 6, 0, 0, 0]);
}

#[test]
fn test_hand_written_assembly_is_encoded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("answer.S");
    fs::write(
        &source,
        "#define ANSWER 42\n\t.text\n\t.globl answer\n\t.type answer, @function\nanswer:\n\tmovl $ANSWER, %eax\n\tret\n",
    )
    .expect("write");
    let object = dir.path().join("answer.o");

    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]);
    assert!(cendol_embed::try_compile(&argv, dir.path()));

    let bytes = fs::read(&object).expect("object written");
    let file = object::File::parse(&*bytes).expect("valid object");
    let text = file.section_by_name(".text").expect("text section");
    assert_eq!(text.data().expect("contents"), &[0xb8, 42, 0, 0, 0, 0xc3]);
    assert!(file.symbol_by_name("answer").is_some_and(|s| s.is_global()));
}

#[test]
fn test_oversized_fill_fails_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("huge.s");
    fs::write(&source, "\t.data\n\t.zero 0x7fffffffffffffff\n").expect("write");
    let object = dir.path().join("huge.o");

    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]);
    let (result, stored) = run(&argv, dir.path());
    assert!(matches!(result, Err(DispatchError::AssemblerExecution)));
    assert_eq!(
        stored.messages(),
        vec!["error: fill of 9223372036854775807 bytes is too large"]
    );
    assert!(!cendol_embed::try_compile(&argv, dir.path()));
    assert!(!object.exists());
}

#[test]
fn test_failed_assembly_leaves_intermediate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("broken.S");
    fs::write(&source, "#define OP frobnicate\n\t.text\n\tOP %rax\n").expect("write");
    let object = dir.path().join("broken.o");

    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object), "-save-temps=obj"]);
    let (result, stored) = run(&argv, dir.path());
    assert!(matches!(result, Err(DispatchError::AssemblerExecution)));
    assert!(dir.path().join("broken.s").exists());
    assert!(!object.exists());
    assert_eq!(
        stored.messages(),
        vec!["error: unknown instruction 'frobnicate'"]
    );
}

#[test]
fn test_planning_failure_runs_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (result, stored) = run(&args(&["cc", "-c", "--no-such-flag", "x.c"]), dir.path());
    assert!(matches!(result, Err(DispatchError::Planning)));
    assert_eq!(stored.messages(), vec!["error: unknown argument: '--no-such-flag'"]);

    let (result, stored) = run(&args(&["cc"]), dir.path());
    assert!(matches!(result, Err(DispatchError::Planning)));
    assert_eq!(stored.messages(), vec!["error: no input files"]);
}

#[test]
fn test_version_plans_no_jobs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (result, stored) = run(&args(&["cc", "--version"]), dir.path());
    assert!(result.is_ok());
    assert!(stored.messages().is_empty());
}

#[test]
fn test_link_step_is_not_built_in() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("main.c");
    fs::write(&source, "int main(void) { return 0; }\n").expect("write");
    let output = dir.path().join("a.out");

    let (result, stored) = run(
        &args(&["cc", TRIPLE, &path_arg(&source), "-o", &path_arg(&output)]),
        dir.path(),
    );
    assert!(matches!(
        result,
        Err(DispatchError::UnknownTool { ref executable, .. }) if executable == "ld"
    ));
    assert_eq!(stored.messages(), vec!["error: unable to execute 'ld': it is not a built-in tool"]);
    assert!(!output.exists());
}

#[test]
fn test_front_end_errors_fail_the_run() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("bad.c");
    fs::write(&source, "int f(void) { return undeclared; }\n").expect("write");
    let object = dir.path().join("bad.o");

    let (result, _) = run(
        &args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]),
        dir.path(),
    );
    assert!(matches!(result, Err(DispatchError::FrontendExecution)));
    assert!(!object.exists());
}

#[test]
fn test_try_compile_reports_only_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("ok.c");
    fs::write(&source, "long widen(int x) { return x; }\n").expect("write");
    let object = dir.path().join("ok.o");

    let good = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]);
    assert!(cendol_embed::try_compile(&good, dir.path()));
    assert!(!cendol_embed::try_compile(&args(&["cc", "-c"]), dir.path()));
}

#[test]
fn test_builtin_headers_come_from_resource_dir() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("sizes.c");
    fs::write(
        &source,
        "#include <stddef.h>\n#include <stdint.h>\nsize_t width(uint32_t x) { return x; }\n",
    )
    .expect("write");
    let object = dir.path().join("sizes.o");
    let argv = args(&["cc", TRIPLE, "-c", &path_arg(&source), "-o", &path_arg(&object)]);

    let resources = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("resources");
    let (result, stored) = run(&argv, &resources);
    assert!(result.is_ok(), "{:?}", stored.messages());
    assert!(object.exists());

    // the same source cannot find the headers without them
    fs::remove_file(&object).expect("remove");
    let (result, _) = run(&argv, dir.path());
    assert!(matches!(result, Err(DispatchError::FrontendExecution)));
}
