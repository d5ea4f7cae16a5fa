use super::*;
use crate::diagnostic::{DiagnosticOptions, StoredDiagnostics};
use itertools::Itertools;
use target_lexicon::Architecture;

fn driver(name: &str) -> Driver {
    let mut driver = Driver::new(name, Triple::host(), "/res");
    driver.set_check_inputs_exist(false);
    driver
}

fn plan(driver: &Driver, args: &[&str]) -> (Option<Compilation>, StoredDiagnostics) {
    let stored = StoredDiagnostics::new();
    let mut diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    (driver.build_compilation(&args, &mut diags), stored)
}

fn render(compilation: &Compilation) -> String {
    compilation.jobs().iter().map(|j| j.to_string().trim_start().to_string()).join("\n")
}

#[test]
fn test_compile_only_single_input() {
    let (compilation, stored) = plan(
        &driver("cendol"),
        &[
            "cendol",
            "--target=x86_64-unknown-linux-gnu",
            "-c",
            "foo.c",
            "-o",
            "foo.o",
            "-DX=1",
            "-I",
            "inc",
            "-O2",
        ],
    );
    let compilation = compilation.expect("planning succeeds");
    assert!(stored.diagnostics().is_empty());
    insta::assert_snapshot!(render(&compilation), @r#""cendol" -cc1 --triple x86_64-unknown-linux-gnu --emit-obj --main-file-name foo.c --resource-dir /res --internal-isystem /res/include -I inc -D X=1 -O2 -o foo.o -x c foo.c"#);
}

#[test]
fn test_emit_assembly_per_input() {
    let (compilation, _) = plan(
        &driver("cendol"),
        &["cendol", "--target=x86_64-unknown-linux-gnu", "-S", "a.c", "b.c"],
    );
    let compilation = compilation.expect("planning succeeds");
    let outputs: Vec<&str> = compilation
        .jobs()
        .iter()
        .map(|job| {
            let args = job.arguments();
            let pos = args.iter().position(|a| a == "-o").expect("output flag");
            args[pos + 1].as_str()
        })
        .collect();
    assert_eq!(outputs, vec!["a.s", "b.s"]);
    assert!(compilation.jobs().iter().all(|j| j.arguments()[0] == CC1_MARKER));
}

#[test]
fn test_default_outputs_follow_the_phase() {
    let output_of = |list: &[&str]| {
        let (compilation, stored) = plan(&driver("cendol"), list);
        let compilation = compilation.unwrap_or_else(|| panic!("{:?}", stored.messages()));
        let args = compilation.jobs()[0].arguments();
        let pos = args.iter().position(|a| a == "-o").expect("output flag");
        args[pos + 1].clone()
    };
    assert_eq!(output_of(&["cendol", "--target=x86_64-unknown-linux-gnu", "-E", "src/a.c"]), "-");
    assert_eq!(output_of(&["cendol", "--target=x86_64-unknown-linux-gnu", "-c", "src/b.c"]), "b.o");
    assert_eq!(output_of(&["cendol", "--target=x86_64-unknown-linux-gnu", "-c", "start.s"]), "start.o");
    assert_eq!(
        output_of(&["cendol", "--target=x86_64-unknown-linux-gnu", "-c", "src/b.c", "-o", "out/b.o"]),
        "out/b.o"
    );
}

#[test]
fn test_assembler_input_gets_cc1as_job() {
    let (compilation, _) = plan(
        &driver("cendol"),
        &["cendol", "--target=x86_64-unknown-linux-gnu", "-c", "start.s"],
    );
    let compilation = compilation.expect("planning succeeds");
    insta::assert_snapshot!(render(&compilation), @r#""cendol" -cc1as --triple x86_64-unknown-linux-gnu --filetype obj --main-file-name start.s -o start.o start.s"#);
}

#[test]
fn test_output_with_multiple_outputs_is_rejected() {
    let (compilation, stored) = plan(&driver("cendol"), &["cendol", "-c", "a.c", "b.c", "-o", "x.o"]);
    assert!(compilation.is_none());
    assert_eq!(
        stored.messages(),
        vec!["error: cannot specify -o when generating multiple output files"]
    );
}

#[test]
fn test_no_input_files() {
    let (compilation, stored) = plan(&driver("cendol"), &["cendol", "-c"]);
    assert!(compilation.is_none());
    assert_eq!(stored.messages(), vec!["error: no input files"]);
}

#[test]
fn test_version_without_inputs_plans_nothing() {
    let (compilation, stored) = plan(&driver("cendol"), &["cendol", "--version"]);
    assert!(compilation.expect("version is not an error").is_empty());
    assert!(stored.diagnostics().is_empty());
}

#[test]
fn test_unknown_argument() {
    let (compilation, stored) = plan(&driver("cendol"), &["cendol", "--bogus", "foo.c"]);
    assert!(compilation.is_none());
    assert_eq!(stored.messages(), vec!["error: unknown argument: '--bogus'"]);
}

#[test]
fn test_invalid_standard() {
    let (compilation, stored) = plan(&driver("cendol"), &["cendol", "-std=c2049", "-c", "foo.c"]);
    assert!(compilation.is_none());
    assert_eq!(stored.messages(), vec!["error: invalid value 'c2049' in '-std=c2049'"]);
}

#[test]
fn test_missing_input_is_reported_when_checking() {
    let mut driver = driver("cendol");
    driver.set_check_inputs_exist(true);
    let (compilation, stored) = plan(&driver, &["cendol", "-c", "/nonexistent/dir/foo.c"]);
    assert!(compilation.is_none());
    assert_eq!(
        stored.messages(),
        vec!["error: no such file or directory: '/nonexistent/dir/foo.c'"]
    );
}

#[test]
fn test_link_plan_ends_with_linker_job() {
    let (compilation, _) = plan(&driver("cendol"), &["cendol", "foo.c", "bar.o", "-Wl,-rpath,/opt/lib"]);
    let compilation = compilation.expect("planning succeeds");
    let jobs = compilation.jobs();
    assert_eq!(jobs.len(), 2);

    let cc1 = jobs[0].arguments();
    let pos = cc1.iter().position(|a| a == "-o").expect("output flag");
    let object = cc1[pos + 1].clone();

    assert_eq!(jobs[1].executable(), LINKER);
    assert_eq!(
        jobs[1].arguments(),
        &["-o", "a.out", object.as_str(), "bar.o", "-rpath", "/opt/lib"]
    );
    assert_eq!(compilation.temp_files().len(), 1);
    for temp in compilation.temp_files() {
        let _ = std::fs::remove_file(temp);
    }
}

#[test]
fn test_unused_linker_input_warns() {
    let (compilation, stored) = plan(&driver("cendol"), &["cendol", "-c", "foo.c", "bar.o"]);
    let compilation = compilation.expect("warnings do not stop planning");
    assert_eq!(compilation.jobs().len(), 1);
    let diags = stored.diagnostics();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, Some("unused-command-line-argument"));
}

#[test]
fn test_language_override_is_positional() {
    let (compilation, _) = plan(
        &driver("cendol"),
        &["cendol", "-c", "-x", "assembler", "boot.txt", "-x", "none", "main.c"],
    );
    let compilation = compilation.expect("planning succeeds");
    let markers: Vec<&str> = compilation.jobs().iter().map(|j| j.arguments()[0].as_str()).collect();
    assert_eq!(markers, vec![CC1AS_MARKER, CC1_MARKER]);
}

#[test]
fn test_target_from_program_name() {
    let d = driver("/usr/bin/aarch64-linux-gnu-cc");
    let triple = d.target_from_program_name().expect("prefix is a triple");
    assert_eq!(triple.architecture, Architecture::Aarch64(target_lexicon::Aarch64Architecture::Aarch64));
    assert!(driver("cendol").target_from_program_name().is_none());
    assert!(driver("not-a-cc").target_from_program_name().is_none());
}
