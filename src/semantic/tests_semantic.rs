use super::*;
use crate::diagnostic::{DiagnosticOptions, StoredDiagnostics};
use crate::lang_options::CStandard;
use crate::lexer::Lexer;
use crate::parser;

fn analyze_with(src: &str, lang_opts: LangOptions) -> (Program, StoredDiagnostics) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let mut diag = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let tokens = Lexer::new(src, "test.c", &mut diag).tokenize();
    let unit = parser::parse(&tokens, lang_opts, &mut diag);
    let program = analyze(&unit, lang_opts, &mut diag);
    (program, stored)
}

fn analyze_source(src: &str) -> (Program, StoredDiagnostics) {
    analyze_with(src, LangOptions::default())
}

fn messages(src: &str) -> Vec<String> {
    analyze_source(src).1.messages()
}

#[test]
fn test_static_initializers_are_laid_out() {
    let src = r#"
int table[3] = {1, 2, 3};
int *p = table + 1;
const char msg[] = "hi";
static long counter;
extern int ext;
int f(int a, char *s) { return a + s[0]; }
"#;
    let (program, stored) = analyze_source(src);
    assert!(stored.messages().is_empty(), "{:?}", stored.messages());

    let table = program.global("table").expect("table");
    assert_eq!(
        table.init,
        GlobalInit::Data {
            bytes: vec![1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0],
            relocs: vec![]
        }
    );

    let p = program.global("p").expect("p");
    assert_eq!(
        p.init,
        GlobalInit::Data {
            bytes: vec![0; 8],
            relocs: vec![DataReloc {
                offset: 0,
                target: SymbolTarget::Global("table".into()),
                addend: 4
            }]
        }
    );

    let msg = program.global("msg").expect("msg");
    assert_eq!(msg.ty, CType::Array(Box::new(CType::CHAR), Some(3)));
    assert!(msg.readonly);
    assert!(matches!(&msg.init, GlobalInit::Data { bytes, .. } if bytes == b"hi\0"));

    let counter = program.global("counter").expect("counter");
    assert_eq!((counter.linkage, counter.init.clone()), (Linkage::Internal, GlobalInit::Zero));
    assert_eq!(program.global("ext").map(|g| g.init.clone()), Some(GlobalInit::Extern));

    assert_eq!(program.functions.len(), 1);
    assert_eq!(program.functions[0].params, vec![0, 1]);
}

#[test]
fn test_expression_errors() {
    let src = r#"
int f(void) { return x; }
int g(void) { return h(1); }
int k(int a) { return a; }
int m(void) { return k(1, 2); }
void v(void) { return 1; }
const int c = 1;
void w(void) { c = 2; 3 = 4; break; }
int n(void) { }
"#;
    assert_eq!(
        messages(src),
        vec![
            "error: use of undeclared identifier 'x'",
            "error: call to undeclared function 'h'; ISO C99 and later do not support implicit function declarations",
            "error: too many arguments to function call, expected 1, have 2",
            "error: void function 'v' should not return a value",
            "error: cannot assign to variable 'c' with const-qualified type 'const int'",
            "error: expression is not assignable",
            "error: 'break' statement not in loop or switch statement",
            "warning: non-void function does not return a value",
        ]
    );
}

#[test]
fn test_redeclarations() {
    let src = r#"
int x;
int x;
int x = 1;
int x = 2;
long x;
int f(int);
long f(int);
int g(void) { return 0; }
int g(void) { return 1; }
int s;
static int s;
"#;
    assert_eq!(
        messages(src),
        vec![
            "error: redefinition of 'x'",
            "error: redefinition of 'x' with a different type: 'long' vs 'int'",
            "error: conflicting types for 'f'",
            "error: redefinition of 'g'",
            "error: static declaration of 's' follows non-static declaration",
        ]
    );
}

#[test]
fn test_switch_and_loop_constraints() {
    let src = r#"
int f(int v) {
    switch (v) { case 1: return 1; case 1: return 2; default: break; default: break; }
    continue;
    return 0;
}
"#;
    assert_eq!(
        messages(src),
        vec![
            "error: duplicate case value '1'",
            "error: multiple default labels in one switch",
            "error: 'continue' statement not in loop statement",
        ]
    );
}

#[test]
fn test_constant_expressions() {
    let src = r#"
int a[1 / 0];
int n = 3;
int b[n];
int c = n;
_Static_assert(sizeof(long) == 4, "long is 4 bytes");
enum { A = 5, B };
_Static_assert(B == 6, "enum");
"#;
    assert_eq!(
        messages(src),
        vec![
            "warning: division by zero is undefined",
            "error: division by zero in constant expression",
            "error: variable length arrays are not supported",
            "error: initializer element is not a compile-time constant",
            "error: static assertion failed: long is 4 bytes",
        ]
    );
}

#[test]
fn test_local_initializers_and_statics() {
    let src = "int f(void) { char s[] = \"ab\"; int m[2][2] = {1, 2, {3}}; static int calls; return calls++; }";
    let (program, stored) = analyze_source(src);
    assert!(stored.messages().is_empty(), "{:?}", stored.messages());

    let f = &program.functions[0];
    assert_eq!(f.locals[0].ty, CType::Array(Box::new(CType::CHAR), Some(3)));
    let offsets: Vec<Vec<(u64, Option<i64>)>> = f
        .body
        .iter()
        .filter_map(|stmt| match stmt {
            TStmt::InitLocal { items, zero_fill, .. } => {
                assert!(zero_fill);
                Some(items.iter().map(|(off, e)| (*off, e.as_const())).collect())
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        offsets,
        vec![
            vec![(0, Some(97)), (1, Some(98))],
            vec![(0, Some(1)), (4, Some(2)), (8, Some(3))],
        ]
    );

    let calls = program.global("f.calls").expect("block-scope static");
    assert_eq!((calls.linkage, calls.init.clone()), (Linkage::Internal, GlobalInit::Zero));
}

#[test]
fn test_implicit_declaration_in_c89() {
    let lang_opts = LangOptions {
        c_standard: CStandard::C89,
        ..LangOptions::default()
    };
    let (program, stored) = analyze_with("int main(void) { return foo(2); }", lang_opts);
    assert_eq!(stored.messages(), vec!["warning: implicit declaration of function 'foo'"]);
    let foo = program.function_decl("foo").expect("implicit declaration");
    assert!(!foo.defined && !foo.ty.prototyped);
    let Some(TStmt::Return(Some(call))) = program.functions[0].body.first() else {
        panic!("expected a return");
    };
    assert!(matches!(
        call.kind,
        TExprKind::Call {
            fixed_signature: false,
            ..
        }
    ));
}

#[test]
fn test_pointer_conversions() {
    let src = "int *p;\nlong *q;\nvoid f(void) { p = q; p = 5; p = 0; }\n";
    assert_eq!(
        messages(src),
        vec![
            "warning: incompatible pointer types assigning to 'int *' from 'long *'",
            "error: incompatible integer to pointer conversion assigning to 'int *' from 'int'",
        ]
    );
}

#[test]
fn test_missing_return_on_some_paths() {
    let src = "int f(int a) { if (a) return 1; }\nint g(int a) { while (1) { if (a) return 2; } }\n";
    assert_eq!(
        messages(src),
        vec!["warning: non-void function does not return a value in all control paths"]
    );
}

#[test]
fn test_pointer_arithmetic_is_scaled() {
    let (program, stored) = analyze_source("long f(int *p, int *q) { return (p + 2) - q; }");
    assert!(stored.messages().is_empty(), "{:?}", stored.messages());
    let Some(TStmt::Return(Some(value))) = program.functions[0].body.first() else {
        panic!("expected a return");
    };
    // (p + 8) - q, as a byte difference divided by the element size
    let TExprKind::Binary(BinOp::Div, diff, size) = &value.kind else {
        panic!("expected a division, got {:?}", value.kind);
    };
    assert_eq!(size.as_const(), Some(4));
    let TExprKind::Binary(BinOp::Sub, lhs, _) = &diff.kind else {
        panic!("expected a subtraction");
    };
    let TExprKind::Cast(sum) = &lhs.kind else {
        panic!("expected a cast");
    };
    let TExprKind::Binary(BinOp::Add, _, offset) = &sum.kind else {
        panic!("expected an addition");
    };
    assert_eq!(offset.as_const(), Some(8));
}
