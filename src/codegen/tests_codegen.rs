use std::str::FromStr;

use object::read::{Object, ObjectSection, ObjectSymbol, RelocationTarget};
use object::SymbolKind;
use target_lexicon::Triple;

use super::*;
use crate::diagnostic::{DiagnosticEngine, DiagnosticOptions, StoredDiagnostics};
use crate::lang_options::LangOptions;
use crate::lexer::Lexer;
use crate::parser;
use crate::semantic;

fn options() -> CodegenOptions {
    CodegenOptions {
        triple: Triple::from_str("x86_64-unknown-linux-gnu").expect("triple"),
        opt_level: OptLevel::None,
    }
}

fn compile(src: &str) -> Vec<u8> {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let mut diag = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    let lang_opts = LangOptions::default();
    let tokens = Lexer::new(src, "test.c", &mut diag).tokenize();
    let unit = parser::parse(&tokens, lang_opts, &mut diag);
    let program = semantic::analyze(&unit, lang_opts, &mut diag);
    assert!(stored.messages().is_empty(), "{:?}", stored.messages());
    emit_object(&program, &options()).expect("codegen")
}

fn relocation_targets(file: &object::File) -> Vec<String> {
    let mut targets = Vec::new();
    for section in file.sections() {
        for (_, reloc) in section.relocations() {
            if let RelocationTarget::Symbol(index) = reloc.target() {
                let symbol = file.symbol_by_index(index).expect("symbol");
                targets.push(symbol.name().unwrap_or_default().to_string());
            }
        }
    }
    targets
}

#[test]
fn test_opt_level_flags() {
    assert_eq!(OptLevel::from_flag("0"), Some(OptLevel::None));
    assert_eq!(OptLevel::from_flag(""), Some(OptLevel::Speed));
    assert_eq!(OptLevel::from_flag("3"), Some(OptLevel::Speed));
    assert_eq!(OptLevel::from_flag("z"), Some(OptLevel::SpeedAndSize));
    assert_eq!(OptLevel::from_flag("9"), None);
    assert_eq!(OptLevel::SpeedAndSize.as_setting(), "speed_and_size");
}

#[test]
fn test_functions_and_linkage() {
    let bytes = compile(
        r#"
extern int puts(const char *);
static int helper(int x) { return x * 2; }
int main(void) { puts("hello"); return helper(21); }
"#,
    );
    let file = object::File::parse(&*bytes).expect("valid object");
    assert_eq!(file.architecture(), object::Architecture::X86_64);

    let main = file.symbol_by_name("main").expect("main");
    assert!(main.is_global() && main.is_definition());
    assert_eq!(main.kind(), SymbolKind::Text);

    let helper = file.symbol_by_name("helper").expect("helper");
    assert!(helper.is_local());

    let puts = file.symbol_by_name("puts").expect("puts");
    assert!(puts.is_undefined());

    let targets = relocation_targets(&file);
    assert!(targets.iter().any(|t| t == "puts"), "{:?}", targets);
    assert!(targets.iter().any(|t| t == ".L.str.0"), "{:?}", targets);
}

#[test]
fn test_control_flow_lowers() {
    // exercises every statement form; the verifier rejects malformed IR
    let bytes = compile(
        r#"
int g;
int classify(int v) {
    int total = 0;
    switch (v) {
    case 0: total = 1;
    case 1: total += 2; break;
    default: total = -1;
    }
    for (int i = 0; i < v; i++) { if (i == 3) continue; if (i > 5) break; total += i; }
    while (total > 100) total /= 2;
    do { total--; } while (total > 50 && v || !g);
    return total ? total : (v, 7);
}
void tail(void) { if (g) return; g = g << 2; }
int forever(void) { for (;;) { g++; } }
"#,
    );
    let file = object::File::parse(&*bytes).expect("valid object");
    for name in ["classify", "tail", "forever"] {
        assert!(file.symbol_by_name(name).is_some(), "missing {}", name);
    }
}

#[test]
fn test_blocks_ending_in_terminators() {
    // a second terminator in one block fails verification
    let bytes = compile(
        r#"
int pick(int v) { if (v) return 1; else return 2; }
int first(int v) { while (1) { if (v) break; return 3; } return 4; }
int scan(int v) { switch (v) { case 1: return 10; default: break; } return 0; }
void nothing(void) { }
int main(void) { }
"#,
    );
    let file = object::File::parse(&*bytes).expect("valid object");
    for name in ["pick", "first", "scan", "nothing", "main"] {
        assert!(file.symbol_by_name(name).is_some(), "missing {}", name);
    }
}

#[test]
fn test_variadic_call_sets_al() {
    let bytes = compile(
        r#"
int printf(const char *fmt, ...);
int main(void) { char c = 'x'; return printf("%c %d\n", c, 1); }
"#,
    );
    let file = object::File::parse(&*bytes).expect("valid object");
    let helper = file.symbol_by_name("__cendol_set_al").expect("set_al helper");
    assert!(helper.is_local());
    assert!(file.symbol_by_name("printf").is_some_and(|s| s.is_undefined()));
}

#[test]
fn test_data_symbols() {
    let bytes = compile(
        r#"
int table[3] = {1, 2, 3};
int *p = table + 1;
const char msg[] = "hi";
static long counter;
extern int ext;
int (*fp)(void);
int read_ext(void) { return ext + counter; }
"#,
    );
    let file = object::File::parse(&*bytes).expect("valid object");
    let table = file.symbol_by_name("table").expect("table");
    assert_eq!((table.kind(), table.size()), (SymbolKind::Data, 12));
    let section = file.section_by_index(table.section_index().expect("section")).expect("section");
    let data = section.data().expect("data");
    let offset = (table.address() - section.address()) as usize;
    assert_eq!(&data[offset..offset + 12], &[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0]);

    let counter = file.symbol_by_name("counter").expect("counter");
    assert!(counter.is_local());
    assert!(file.symbol_by_name("ext").is_some_and(|s| s.is_undefined()));
    assert!(file.symbol_by_name("fp").is_some_and(|s| s.is_global()));

    let targets = relocation_targets(&file);
    assert!(targets.iter().any(|t| t == "table"), "{:?}", targets);
}

#[test]
fn test_printed_assembly_lists_data() {
    let bytes = compile("int answer = 42;\nconst char msg[] = \"hi\";\nint *ptr = &answer;\nstatic int zeroes[8];\n");
    let text = asm_printer::print_assembly(&bytes, "test.c").expect("printable");
    for line in [
        "\t.file\t\"test.c\"",
        "\t.globl\tanswer",
        "\t.type\tanswer,@object",
        "\t.size\tanswer, 4",
        "answer:",
        "\t.byte\t0x2a,0x00,0x00,0x00",
        "\t.byte\t0x68,0x69,0x00",
        "\t.reloc\t., R_X86_64_64, answer",
        "zeroes:",
        "\t.zero\t32",
    ] {
        assert!(text.lines().any(|l| l.starts_with(line)), "missing {:?} in:\n{}", line, text);
    }
    assert!(!text.contains("\t.globl\tzeroes"));
}
