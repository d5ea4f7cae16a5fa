use std::fs;

use super::*;
use crate::diagnostic::{DiagnosticOptions, StoredDiagnostics};

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn engine() -> (DiagnosticEngine, StoredDiagnostics) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    (diags, stored)
}

#[test]
fn test_classify_by_leading_marker() {
    assert_eq!(Tool::classify(&args(&["-cc1", "--emit-obj"])), Some(Tool::Compile));
    assert_eq!(Tool::classify(&args(&["-cc1as", "-o", "x.o"])), Some(Tool::Assemble));
    assert_eq!(Tool::classify(&args(&["-cc1asm"])), None);
    assert_eq!(Tool::classify(&args(&["-o", "a.out"])), None);
    assert_eq!(Tool::classify(&[]), None);
    assert_eq!(Tool::Assemble.marker(), "-cc1as");
}

#[test]
fn test_unknown_tool_is_not_executed() {
    let (mut diags, stored) = engine();
    let job = Job::new("ld", args(&["-o", "a.out", "main.o"]));
    let err = execute_job(&job, &mut diags).expect_err("linking is not built in");
    assert!(matches!(
        err,
        DispatchError::UnknownTool { ref executable, ref marker } if executable == "ld" && marker == "-o"
    ));
    assert_eq!(stored.messages(), vec!["error: unable to execute 'ld': it is not a built-in tool"]);
}

#[test]
fn test_invalid_invocations() {
    let (mut diags, _) = engine();
    let job = Job::new("cc", args(&["-cc1", "--bogus-flag", "x.c"]));
    assert!(matches!(
        execute_job(&job, &mut diags),
        Err(DispatchError::InvocationParse { tool: "-cc1" })
    ));

    let (mut diags, _) = engine();
    let job = Job::new("cc", args(&["-cc1as", "-o", "x.o", "x.s"]));
    assert!(matches!(
        execute_job(&job, &mut diags),
        Err(DispatchError::InvocationParse { tool: "-cc1as" })
    ));
}

#[test]
fn test_jobs_run_in_order_and_stop_at_first_failure() {
    let dir = tempfile::tempdir().expect("tempdir");
    let good = dir.path().join("good.s");
    let bad = dir.path().join("bad.s");
    fs::write(&good, ".data\n.globl value\nvalue:\n.long 7\n").expect("write");
    fs::write(&bad, "frobnicate\n").expect("write");
    let good_obj = dir.path().join("good.o");
    let bad_obj = dir.path().join("bad.o");
    let never_obj = dir.path().join("never.o");
    let cc1as = |input: &std::path::Path, output: &std::path::Path| {
        Job::new(
            "cc",
            args(&[
                "-cc1as",
                "--triple",
                "x86_64-unknown-linux-gnu",
                "--filetype",
                "obj",
                "-o",
                &output.display().to_string(),
                &input.display().to_string(),
            ]),
        )
    };
    let jobs = vec![
        cc1as(&good, &good_obj),
        cc1as(&bad, &bad_obj),
        cc1as(&good, &never_obj),
    ];

    let (mut diags, stored) = engine();
    let err = execute_jobs(&jobs, &mut diags).expect_err("second job fails");
    assert!(matches!(err, DispatchError::AssemblerExecution));
    assert!(good_obj.exists(), "completed jobs keep their output");
    assert!(!bad_obj.exists());
    assert!(!never_obj.exists(), "jobs after a failure never run");
    assert_eq!(
        stored.messages(),
        vec!["error: unknown instruction 'frobnicate'"]
    );
}

#[test]
fn test_frontend_job_writes_object() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("unit.c");
    fs::write(&source, "int twice(int x) { return x + x; }\n").expect("write");
    let object = dir.path().join("unit.o");
    let job = Job::new(
        "cc",
        args(&[
            "-cc1",
            "--triple",
            "x86_64-unknown-linux-gnu",
            "--emit-obj",
            "-o",
            &object.display().to_string(),
            &source.display().to_string(),
        ]),
    );
    let (mut diags, stored) = engine();
    execute_jobs(&[job], &mut diags).expect("compiles");
    assert!(stored.messages().is_empty());
    let bytes = fs::read(&object).expect("object written");
    assert_eq!(&bytes[..4], b"\x7fELF");
}

#[test]
fn test_empty_plan_succeeds() {
    let (mut diags, _) = engine();
    assert!(execute_jobs(&[], &mut diags).is_ok());
}
