use std::fs;
use std::path::Path;
use std::str::FromStr;

use object::read::{Object, ObjectSection, ObjectSymbol, RelocationTarget};
use object::{RelocationFlags, SectionKind, SymbolKind, SymbolSection, elf};
use target_lexicon::Triple;

use super::*;
use crate::codegen::{self, CodegenOptions, OptLevel, asm_printer};
use crate::diagnostic::{Diagnostic, DiagnosticOptions, SourceLoc, StoredDiagnostics};
use crate::lang_options::LangOptions;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn engine() -> (DiagnosticEngine, StoredDiagnostics) {
    let _ = env_logger::builder().is_test(true).try_init();
    let stored = StoredDiagnostics::new();
    let diags = DiagnosticEngine::new(DiagnosticOptions::default(), Box::new(stored.clone()));
    (diags, stored)
}

/// Assemble `source` for `triple`; the object bytes on success, and everything reported
fn assemble_for(triple: &str, source: &str, extra: &[&str]) -> (Option<Vec<u8>>, Vec<Diagnostic>) {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("input.s");
    fs::write(&input, source).expect("write input");
    let output = dir.path().join("out.o");
    let mut list = vec!["--triple", triple, "-o"];
    let output_arg = output.display().to_string();
    let input_arg = input.display().to_string();
    list.push(&output_arg);
    list.extend_from_slice(extra);
    list.push(&input_arg);

    let (mut diags, stored) = engine();
    let invocation = AssemblerInvocation::create_from_args(&args(&list), &mut diags).expect("valid invocation");
    let result = execute_assembler(&invocation, &mut diags);
    let bytes = result.ok().and_then(|_| fs::read(&output).ok());
    (bytes, stored.diagnostics())
}

fn assemble(source: &str) -> Vec<u8> {
    let (bytes, diagnostics) = assemble_for("x86_64-unknown-linux-gnu", source, &[]);
    bytes.unwrap_or_else(|| panic!("assembly failed: {:?}", diagnostics))
}

fn assemble_err(source: &str) -> Vec<Diagnostic> {
    let (bytes, diagnostics) = assemble_for("x86_64-unknown-linux-gnu", source, &[]);
    assert!(bytes.is_none(), "{:?} should not assemble", source);
    diagnostics
}

/// `(offset, type, target name, addend)`; section symbols are named after their section
fn relocations(file: &object::File, section: &str) -> Vec<(u64, u32, String, i64)> {
    let section = file.section_by_name(section).expect("section");
    section
        .relocations()
        .map(|(offset, reloc)| {
            let RelocationFlags::Elf { r_type } = reloc.flags() else {
                panic!("not an ELF relocation");
            };
            let RelocationTarget::Symbol(index) = reloc.target() else {
                panic!("not a symbol relocation");
            };
            let symbol = file.symbol_by_index(index).expect("symbol");
            let name = match symbol.kind() {
                SymbolKind::Section => file
                    .section_by_index(symbol.section_index().expect("section index"))
                    .expect("section")
                    .name()
                    .expect("name")
                    .to_string(),
                _ => symbol.name().expect("name").to_string(),
            };
            (offset, r_type, name, reloc.addend())
        })
        .collect()
}

#[test]
fn test_invocation_arguments() {
    let (mut diags, stored) = engine();
    let invocation = AssemblerInvocation::create_from_args(
        &args(&[
            "--triple",
            "aarch64-unknown-linux-gnu",
            "--filetype",
            "null",
            "-I",
            "inc",
            "--main-file-name",
            "start.S",
            "-g",
            "--fatal-warnings",
            "-o",
            "start.o",
            "start.s",
        ]),
        &mut diags,
    )
    .expect("valid invocation");
    assert!(stored.messages().is_empty());
    assert_eq!(invocation.triple.to_string(), "aarch64-unknown-linux-gnu");
    assert_eq!(invocation.filetype, FileType::Null);
    assert_eq!(invocation.include_paths, vec![Path::new("inc")]);
    assert_eq!(invocation.main_file_name.as_deref(), Some("start.S"));
    assert!(invocation.debug_info && invocation.fatal_warnings);
    assert_eq!(invocation.output, Path::new("start.o"));
    assert_eq!(invocation.input, Path::new("start.s"));

    let invocation = AssemblerInvocation::create_from_args(&args(&["--triple", "x86_64-unknown-linux-gnu"]), &mut diags)
        .expect("valid invocation");
    assert_eq!(invocation.input, Path::new("-"));
    assert_eq!(invocation.output, Path::new("-"));
    assert_eq!(invocation.filetype, FileType::Obj);
}

#[test]
fn test_invocation_errors() {
    let cases: &[(&[&str], &str)] = &[
        (&["in.s"], "required arguments were not provided"),
        (&["--triple", "x86_64-unknown-linux-gnu", "--filetype", "asm", "in.s"], "invalid value 'asm'"),
        (&["--triple", "nonsense-triple-value-here", "in.s"], "unknown target triple"),
    ];
    for (list, expected) in cases {
        let (mut diags, stored) = engine();
        assert!(AssemblerInvocation::create_from_args(&args(list), &mut diags).is_none());
        let messages = stored.messages();
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
fn test_data_and_symbols() {
    let bytes = assemble(
        r#"
        .file "data.c"
        .data
        .globl table
        .type table, @object
        .p2align 3
table:
        .quad 1, 0x10, -1
        .long 'A', 0b101 ; .short 0777
        .byte 1 + 2 * 3, (1 << 4) | 1, ~0 & 0xf
        .size table, . - table
counter:
        .long 7
        .section .rodata,"a",@progbits
.Lmsg:
        .asciz "hi\n"
        .ascii "ok"
        .bss
        .local scratch
scratch:
        .zero 64
        .comm shared, 16, 8
        .set answer, 40 + 2
"#,
    );
    let file = object::File::parse(&*bytes).expect("object");

    let data = file.section_by_name(".data").expect(".data");
    assert_eq!(data.align(), 8);
    let contents = data.data().expect("contents");
    assert_eq!(&contents[..8], &1u64.to_le_bytes());
    assert_eq!(&contents[16..24], &u64::MAX.to_le_bytes());
    assert_eq!(&contents[24..34], &[0x41, 0, 0, 0, 5, 0, 0, 0, 0xff, 0x01]);
    assert_eq!(&contents[34..37], &[7, 0x11, 0xf]);

    let table = file.symbol_by_name("table").expect("table");
    assert!(table.is_global());
    assert_eq!(table.kind(), SymbolKind::Data);
    assert_eq!(table.size(), 37);
    let counter = file.symbol_by_name("counter").expect("counter");
    assert!(counter.is_local());
    assert_eq!(counter.address() - data.address(), 37);

    let rodata = file.section_by_name(".rodata").expect(".rodata");
    assert_eq!(rodata.kind(), SectionKind::ReadOnlyData);
    assert_eq!(rodata.data().expect("contents"), b"hi\n\0ok");
    assert!(file.symbol_by_name(".Lmsg").is_none());

    let bss = file.section_by_name(".bss").expect(".bss");
    assert_eq!(bss.kind(), SectionKind::UninitializedData);
    assert_eq!(bss.size(), 64);
    assert!(file.symbol_by_name("scratch").is_some_and(|s| s.is_local()));

    let shared = file.symbol_by_name("shared").expect("shared");
    assert!(shared.is_common());
    assert_eq!(shared.size(), 16);

    let answer = file.symbol_by_name("answer").expect("answer");
    assert_eq!(answer.address(), 42);

    let file_symbol = file.symbols().find(|s| s.kind() == SymbolKind::File).expect("file symbol");
    assert_eq!(file_symbol.name().expect("name"), "data.c");
}

#[test]
fn test_untyped_symbols_are_written() {
    let bytes = assemble(
        "
        .data
        .globl table
table:
        .long 4
        .globl limit
        .set limit, 64
",
    );
    let file = object::File::parse(&*bytes).expect("object");
    let data = file.section_by_name(".data").expect(".data");

    // STT_NOTYPE reads back as an unknown kind
    let table = file.symbol_by_name("table").expect("table");
    assert!(table.is_global() && !table.is_undefined());
    assert_eq!(table.kind(), SymbolKind::Unknown);
    assert_eq!(table.section_index(), Some(data.index()));

    let limit = file.symbol_by_name("limit").expect("limit");
    assert!(limit.is_global());
    assert_eq!(limit.section(), SymbolSection::Absolute);
    assert_eq!(limit.address(), 64);
}

#[test]
fn test_oversized_fill_and_alignment() {
    let cases: &[(&str, &str)] = &[
        (".data\n.byte 1\n.p2align 63\n", "alignment 2^63 is too large"),
        (".data\n.balign 0x4000000000000000\n", "alignment 4611686018427387904 is too large"),
        (".data\n.byte 1\n.p2align 32\n", "fill of 4294967295 bytes is too large"),
        (".data\n.zero 0x7fffffffffffffff\n", "fill of 9223372036854775807 bytes is too large"),
        (".text\n.skip 1 << 40\n", "fill of 1099511627776 bytes is too large"),
    ];
    for (source, expected) in cases {
        let diagnostics = assemble_err(source);
        assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
        assert_eq!(diagnostics[0].message, *expected, "{:?}", source);
    }

    // the largest accepted alignment does not allocate in a section without contents
    let file_bytes = assemble(".bss\n.byte 0\n.p2align 32\n");
    let file = object::File::parse(&*file_bytes).expect("object");
    let bss = file.section_by_name(".bss").expect(".bss");
    assert_eq!(bss.size(), 1 << 32);
}

#[test]
fn test_x86_64_function() {
    let bytes = assemble(
        "
        .text
        .globl main
        .type main, @function
main:
        pushq %rbp
        movq %rsp, %rbp
        leaq msg(%rip), %rdi
        call puts@PLT
        testl %eax, %eax
        jne .Ldone
        movl $1, %eax
.Ldone:
        popq %rbp
        ret
        .size main, . - main
        .section .rodata
msg:
        .asciz \"hi\"
",
    );
    let file = object::File::parse(&*bytes).expect("object");
    let text = file.section_by_name(".text").expect(".text");
    assert_eq!(
        text.data().expect("contents"),
        &[
            0x55, // pushq %rbp
            0x48, 0x89, 0xe5, // movq %rsp, %rbp
            0x48, 0x8d, 0x3d, 0, 0, 0, 0, // leaq msg(%rip), %rdi
            0xe8, 0, 0, 0, 0, // call puts@PLT
            0x85, 0xc0, // testl %eax, %eax
            0x0f, 0x85, 5, 0, 0, 0, // jne .Ldone
            0xb8, 1, 0, 0, 0, // movl $1, %eax
            0x5d, // popq %rbp
            0xc3, // ret
        ]
    );
    assert_eq!(
        relocations(&file, ".text"),
        vec![
            (7, elf::R_X86_64_PC32, "msg".to_string(), -4),
            (12, elf::R_X86_64_PLT32, "puts".to_string(), -4),
        ]
    );
    let main = file.symbol_by_name("main").expect("main");
    assert_eq!(main.kind(), SymbolKind::Text);
    assert_eq!(main.size(), 31);
}

#[test]
fn test_x86_64_operand_forms() {
    let cases: &[(&str, &[u8])] = &[
        ("movl -4(%rbp), %eax", &[0x8b, 0x45, 0xfc]),
        ("movq %rax, 8(%rsp)", &[0x48, 0x89, 0x44, 0x24, 0x08]),
        ("movl (%rax,%rcx,4), %edx", &[0x8b, 0x14, 0x88]),
        ("movzbl (%rdi), %eax", &[0x0f, 0xb6, 0x07]),
        ("movslq %edi, %rax", &[0x48, 0x63, 0xc7]),
        ("cltq", &[0x48, 0x98]),
        ("addq $16, %rsp", &[0x48, 0x83, 0xc4, 0x10]),
        ("imull $100, %esi, %eax", &[0x6b, 0xc6, 0x64]),
        ("shlq %cl, %rax", &[0x48, 0xd3, 0xe0]),
        ("xorl %eax, %eax", &[0x31, 0xc0]),
        ("call *%rax", &[0xff, 0xd0]),
        ("movabsq $0x123456789, %rax", &[0x48, 0xb8, 0x89, 0x67, 0x45, 0x23, 0x01, 0, 0, 0]),
    ];
    for (line, expected) in cases {
        let bytes = assemble(&format!(".text\n{}\n", line));
        let file = object::File::parse(&*bytes).expect("object");
        let text = file.section_by_name(".text").expect(".text");
        assert_eq!(text.data().expect("contents"), *expected, "{}", line);
    }
}

#[test]
fn test_x86_64_symbolic_operands() {
    let bytes = assemble(
        "
        .text
.Ltop:
        movl $counter, %eax
        movq $counter+8, %rax
        movl counter, %ecx
        jmp .Ltop
        .data
counter:
        .quad 0
",
    );
    let file = object::File::parse(&*bytes).expect("object");
    let text = file.section_by_name(".text").expect(".text");
    assert_eq!(
        text.data().expect("contents"),
        &[
            0xb8, 0, 0, 0, 0, // movl $counter, %eax
            0x48, 0xc7, 0xc0, 0, 0, 0, 0, // movq $counter+8, %rax
            0x8b, 0x0c, 0x25, 0, 0, 0, 0, // movl counter, %ecx
            0xe9, 0xe8, 0xff, 0xff, 0xff, // jmp .Ltop
        ]
    );
    assert_eq!(
        relocations(&file, ".text"),
        vec![
            (1, elf::R_X86_64_32, "counter".to_string(), 0),
            (8, elf::R_X86_64_32S, "counter".to_string(), 8),
            (15, elf::R_X86_64_32S, "counter".to_string(), 0),
        ]
    );
}

#[test]
fn test_division_overflow_wraps() {
    let bytes = assemble(".data\n.quad (-0x7fffffffffffffff - 1) / -1, (-0x7fffffffffffffff - 1) % -1\n");
    let file = object::File::parse(&*bytes).expect("object");
    let contents = file.section_by_name(".data").expect(".data").data().expect("contents").to_vec();
    assert_eq!(&contents[..8], &i64::MIN.to_le_bytes());
    assert_eq!(&contents[8..], &0i64.to_le_bytes());
}

#[test]
fn test_symbol_references_emit_relocations() {
    let bytes = assemble(
        "
        .section .data.rel.ro,\"aw\"
        .quad puts
        .quad .Lstr + 2
        .long later - 4
        .quad .text
        .section .rodata
.Lstr:
        .string \"hello\"
        .text
        .globl later
later:
        .byte 0xc3
        .reloc ., R_X86_64_PLT32, puts-4
        .byte 0, 0, 0, 0
",
    );
    let file = object::File::parse(&*bytes).expect("object");
    assert_eq!(
        relocations(&file, ".data.rel.ro"),
        vec![
            (0, elf::R_X86_64_64, "puts".to_string(), 0),
            (8, elf::R_X86_64_64, ".rodata".to_string(), 2),
            (16, elf::R_X86_64_32, "later".to_string(), -4),
            (20, elf::R_X86_64_64, ".text".to_string(), 0),
        ]
    );
    assert_eq!(
        relocations(&file, ".text"),
        vec![(1, elf::R_X86_64_PLT32, "puts".to_string(), -4)]
    );
    let puts = file.symbol_by_name("puts").expect("puts");
    assert!(puts.is_undefined() && puts.is_global());
}

#[test]
fn test_alignment_and_section_stack() {
    let bytes = assemble(
        "
        .text
        .byte 0xc3
        .p2align 4
        .byte 0xc3
        .balign 4, 0xcc
        .pushsection .data
        .byte 1
        .align 8
        .byte 2
        .popsection
        .byte 0xc3
        .section .init_array,\"aw\",@init_array
        .p2align 3
        .quad 0
        .previous
        .byte 0xc3
",
    );
    let file = object::File::parse(&*bytes).expect("object");
    let text = file.section_by_name(".text").expect(".text");
    let contents = text.data().expect("contents");
    assert_eq!(contents.len(), 22);
    assert_eq!(contents[0], 0xc3);
    assert!(contents[1..16].iter().all(|b| *b == 0x90));
    assert_eq!(&contents[16..22], &[0xc3, 0xcc, 0xcc, 0xcc, 0xc3, 0xc3]);
    assert_eq!(text.align(), 16);

    let data = file.section_by_name(".data").expect(".data");
    assert_eq!(data.data().expect("contents"), &[1, 0, 0, 0, 0, 0, 0, 0, 2]);
    let init_array = file.section_by_name(".init_array").expect(".init_array");
    assert_eq!(init_array.size(), 8);
    assert_eq!(init_array.align(), 8);
}

#[test]
fn test_comments_and_line_markers() {
    let diagnostics = assemble_err(
        "/* leading\n   block comment */\n# a comment line\n.byte 1 // trailing\n# 40 \"original.S\"\n\n  .bogus 1\n",
    );
    assert_eq!(diagnostics.len(), 1, "{:?}", diagnostics);
    assert_eq!(diagnostics[0].message, "unknown directive '.bogus'");
    assert_eq!(diagnostics[0].location, Some(SourceLoc::new("original.S", 41, 3)));
}

#[test]
fn test_reported_errors() {
    let cases: &[(&str, &str)] = &[
        ("frobnicate %rax\n", "unknown instruction 'frobnicate'"),
        ("movl %rax, %ebx\n", "invalid operands for 'movl'"),
        ("inc (%rax)\n", "ambiguous operand size for 'inc'; add a size suffix"),
        ("movl %foo, %eax\n", "bad register name '%foo'"),
        ("movl (%rax,%rbx,3), %eax\n", "scale factor must be 1, 2, 4 or 8"),
        ("call 16\n", "branch target must be a label or symbol"),
        ("movl $x@GOT, %eax\n", "unsupported relocation specifier '@GOT'"),
        ("jne .Lnowhere\n", "undefined temporary symbol '.Lnowhere'"),
        ("a:\na:\n", "symbol 'a' is already defined"),
        (".set x, missing + 1\n", "cannot set 'x': operand 'missing' is undefined"),
        (".reloc ., R_X86_64_BOGUS, foo\n", "unknown relocation name 'R_X86_64_BOGUS'"),
        (".byte (1 +\n", "expected expression"),
        (".quad a * 2\n", "operands of '*' must be absolute"),
        (".bss\n.byte 1\n", "non-zero value in section '.bss' which has no contents"),
        (".p2align 3\n.balign 3\n", "alignment must be a power of 2"),
        (".include \"nowhere.s\"\n", "could not find include file 'nowhere.s'"),
        (".quad .Lnever\n", "undefined temporary symbol '.Lnever'"),
        ("1:\n", "numeric local labels are not supported"),
    ];
    for (source, expected) in cases {
        let diagnostics = assemble_err(source);
        assert!(
            diagnostics.iter().any(|d| d.message == *expected),
            "{:?}: expected {:?} in {:?}",
            source,
            expected,
            diagnostics
        );
    }
}

#[test]
fn test_fatal_warnings() {
    let (bytes, diagnostics) = assemble_for("x86_64-unknown-linux-gnu", ".byte 300\n", &[]);
    assert!(bytes.is_some());
    assert_eq!(diagnostics[0].message, "value 0x12c truncated to 0x2c");

    let (bytes, diagnostics) = assemble_for("x86_64-unknown-linux-gnu", ".byte 300\n", &["--fatal-warnings"]);
    assert!(bytes.is_none());
    assert_eq!(diagnostics[0].level, crate::diagnostic::DiagnosticLevel::Error);
}

#[test]
fn test_unsupported_target() {
    let (bytes, diagnostics) = assemble_for("x86_64-apple-darwin", ".byte 1\n", &[]);
    assert!(bytes.is_none());
    assert!(diagnostics[0].message.starts_with("unsupported object format"), "{:?}", diagnostics);
}

#[test]
fn test_include_searches_include_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let inc = dir.path().join("inc");
    fs::create_dir(&inc).expect("mkdir");
    fs::write(inc.join("defs.s"), ".set WIDTH, 8\n").expect("write include");
    let inc_arg = inc.display().to_string();
    let (bytes, diagnostics) = assemble_for(
        "x86_64-unknown-linux-gnu",
        ".include \"defs.s\"\n.data\n.zero WIDTH\n",
        &["-I", &inc_arg],
    );
    let bytes = bytes.unwrap_or_else(|| panic!("{:?}", diagnostics));
    let file = object::File::parse(&*bytes).expect("object");
    assert_eq!(file.section_by_name(".data").expect(".data").size(), 8);
}

#[test]
fn test_aarch64_object() {
    let (bytes, diagnostics) = assemble_for(
        "aarch64-unknown-linux-gnu",
        ".text\n.globl f\nf:\n.4byte 0xd65f03c0\n.reloc ., R_AARCH64_CALL26, g\n.4byte 0x94000000\n.data\n.8byte f\n",
        &[],
    );
    let bytes = bytes.unwrap_or_else(|| panic!("{:?}", diagnostics));
    let file = object::File::parse(&*bytes).expect("object");
    assert_eq!(file.architecture(), object::Architecture::Aarch64);
    assert_eq!(
        relocations(&file, ".text"),
        vec![(4, elf::R_AARCH64_CALL26, "g".to_string(), 0)]
    );
    assert_eq!(
        relocations(&file, ".data"),
        vec![(0, elf::R_AARCH64_ABS64, "f".to_string(), 0)]
    );

    let (bytes, diagnostics) = assemble_for("aarch64-unknown-linux-gnu", ".text\nret\n", &[]);
    assert!(bytes.is_none());
    assert_eq!(diagnostics[0].message, "instructions are not supported for this target: 'ret'");
}

#[test]
fn test_printed_assembly_reassembles() {
    let source = "
        extern int puts(const char *);
        static const char *greeting = \"hello\";
        int calls;
        static int helper(int x) { return x * 3; }
        int main(void) { calls++; puts(greeting); return helper(calls); }
    ";
    let (mut diags, stored) = engine();
    let lang_opts = LangOptions::default();
    let tokens = crate::lexer::Lexer::new(source, "main.c", &mut diags).tokenize();
    let unit = crate::parser::parse(&tokens, lang_opts, &mut diags);
    let program = crate::semantic::analyze(&unit, lang_opts, &mut diags);
    assert!(stored.messages().is_empty(), "{:?}", stored.messages());
    let options = CodegenOptions {
        triple: Triple::from_str("x86_64-unknown-linux-gnu").expect("triple"),
        opt_level: OptLevel::None,
    };
    let original = codegen::emit_object(&program, &options).expect("codegen");
    let text = asm_printer::print_assembly(&original, "main.c").expect("printable");

    let (rebuilt, diagnostics) = assemble_for("x86_64-unknown-linux-gnu", &text, &[]);
    let rebuilt = rebuilt.unwrap_or_else(|| panic!("{:?}\n{}", diagnostics, text));
    let original = object::File::parse(&*original).expect("original");
    let rebuilt = object::File::parse(&*rebuilt).expect("rebuilt");

    assert_eq!(
        original.section_by_name(".text").and_then(|s| s.data().ok()),
        rebuilt.section_by_name(".text").and_then(|s| s.data().ok())
    );
    for name in ["main", "calls", "helper", "puts"] {
        let before = original.symbol_by_name(name).expect(name);
        let after = rebuilt.symbol_by_name(name).expect(name);
        assert_eq!(before.is_global(), after.is_global(), "{}", name);
        assert_eq!(before.is_undefined(), after.is_undefined(), "{}", name);
        assert_eq!(before.size(), after.size(), "{}", name);
    }
    let count = |file: &object::File| file.sections().map(|s| s.relocations().count()).sum::<usize>();
    assert_eq!(count(&original), count(&rebuilt));
}
