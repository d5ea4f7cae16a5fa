use std::ffi::CString;
use std::fs;
use std::ptr;

use super::*;

fn c_args(list: &[&str]) -> Vec<CString> {
    list.iter().map(|s| CString::new(*s).expect("no interior NUL")).collect()
}

fn call(args: &[CString], resources: &CString) -> bool {
    let argv: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();
    unsafe { cendol_embed_try_compile(argv.len() as c_int, argv.as_ptr(), resources.as_ptr()) }
}

#[test]
fn test_null_and_empty_arguments_fail() {
    let _ = env_logger::builder().is_test(true).try_init();
    let resources = CString::new("/nonexistent").expect("cstring");
    let args = c_args(&["cc", "--version"]);
    let argv: Vec<*const c_char> = args.iter().map(|a| a.as_ptr()).collect();

    unsafe {
        assert!(!cendol_embed_try_compile(0, argv.as_ptr(), resources.as_ptr()));
        assert!(!cendol_embed_try_compile(-1, argv.as_ptr(), resources.as_ptr()));
        assert!(!cendol_embed_try_compile(2, ptr::null(), resources.as_ptr()));
        assert!(!cendol_embed_try_compile(2, argv.as_ptr(), ptr::null()));
    }

    let with_null = [args[0].as_ptr(), ptr::null()];
    assert!(!unsafe { cendol_embed_try_compile(2, with_null.as_ptr(), resources.as_ptr()) });
}

#[test]
fn test_compiles_through_c_entry_point() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("tempdir");
    let source = dir.path().join("add.c");
    fs::write(&source, "int add(int a, int b) { return a + b; }\n").expect("write");
    let object = dir.path().join("add.o");
    let resources = CString::new(dir.path().display().to_string()).expect("cstring");

    let args = c_args(&[
        "cc",
        "--target=x86_64-unknown-linux-gnu",
        "-c",
        &source.display().to_string(),
        "-o",
        &object.display().to_string(),
    ]);
    assert!(call(&args, &resources));
    assert_eq!(&fs::read(&object).expect("object")[..4], b"\x7fELF");

    // reentrant use after a success
    let bad = c_args(&["cc", "-c", "--no-such-option", &source.display().to_string()]);
    assert!(!call(&bad, &resources));
    assert!(call(&args, &resources));
}

#[test]
fn test_panic_is_contained_and_lock_recovers() {
    let _ = env_logger::builder().is_test(true).try_init();
    assert!(!guarded(|| panic!("boom")));
    assert!(guarded(|| Ok(())));
    assert!(!guarded(|| Err(DispatchError::Planning)));
}
