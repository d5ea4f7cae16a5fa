//! Prints a relocatable object as directive-level assembly.
//!
//! Code is not disassembled: every section is written out as `.byte` data
//! with `.reloc` directives at the relocated offsets, which is enough for
//! the built-in assembler to rebuild an equivalent object.

use std::fmt::Write;

use object::read::{Object, ObjectSection, ObjectSymbol, RelocationTarget};
use object::{RelocationFlags, SectionFlags, SectionKind, SymbolKind};

use super::CodegenError;
use crate::elf_relocs;

const BYTES_PER_LINE: usize = 16;

/// One thing to print at a section offset
enum Event {
    Label(LabelInfo),
    Reloc { name: String, target: String, addend: i64 },
}

struct LabelInfo {
    name: String,
    global: bool,
    weak: bool,
    kind: SymbolKind,
    size: u64,
}

pub fn print_assembly(object_bytes: &[u8], source_name: &str) -> Result<String, CodegenError> {
    let file = object::File::parse(object_bytes).map_err(|e| CodegenError::Object(e.to_string()))?;
    let arch = file.architecture();
    let mut out = String::new();
    let fmt_err = |e: std::fmt::Error| CodegenError::Object(e.to_string());

    writeln!(out, "\t.file\t\"{}\"", source_name).map_err(fmt_err)?;
    for section in file.sections() {
        let SectionFlags::Elf { sh_flags } = section.flags() else {
            return Err(CodegenError::Object("only ELF objects can be printed".into()));
        };
        if sh_flags & u64::from(object::elf::SHF_ALLOC) == 0 || section.size() == 0 {
            continue;
        }
        let name = section.name().map_err(|e| CodegenError::Object(e.to_string()))?;
        let nobits = section.kind() == SectionKind::UninitializedData;

        let mut events: Vec<(u64, Event)> = Vec::new();
        for symbol in file.symbols() {
            if symbol.section_index() != Some(section.index())
                || matches!(symbol.kind(), SymbolKind::Section | SymbolKind::File)
            {
                continue;
            }
            let Ok(sym_name) = symbol.name() else { continue };
            if sym_name.is_empty() {
                continue;
            }
            events.push((
                symbol.address() - section.address(),
                Event::Label(LabelInfo {
                    name: sym_name.to_string(),
                    global: symbol.is_global(),
                    weak: symbol.is_weak(),
                    kind: symbol.kind(),
                    size: symbol.size(),
                }),
            ));
        }
        for (offset, reloc) in section.relocations() {
            let RelocationFlags::Elf { r_type } = reloc.flags() else {
                return Err(CodegenError::Object("only ELF relocations can be printed".into()));
            };
            let reloc_name = elf_relocs::name(arch, r_type)
                .ok_or_else(|| CodegenError::Object(format!("unknown relocation type {} at {}+{:#x}", r_type, name, offset)))?;
            let target = match reloc.target() {
                RelocationTarget::Symbol(index) => {
                    let symbol = file
                        .symbol_by_index(index)
                        .map_err(|e| CodegenError::Object(e.to_string()))?;
                    match (symbol.kind(), symbol.section_index()) {
                        (SymbolKind::Section, Some(target_section)) => file
                            .section_by_index(target_section)
                            .and_then(|s| s.name().map(str::to_string))
                            .map_err(|e| CodegenError::Object(e.to_string()))?,
                        _ => symbol.name().map_err(|e| CodegenError::Object(e.to_string()))?.to_string(),
                    }
                }
                other => {
                    return Err(CodegenError::Object(format!("unsupported relocation target {:?}", other)));
                }
            };
            events.push((
                offset,
                Event::Reloc {
                    name: reloc_name.to_string(),
                    target,
                    addend: reloc.addend(),
                },
            ));
        }
        // labels before relocations at the same offset
        events.sort_by_key(|(offset, event)| (*offset, matches!(event, Event::Reloc { .. })));

        let (flags, kind) = section_flags(sh_flags, nobits);
        writeln!(out).map_err(fmt_err)?;
        writeln!(out, "\t.section\t{},\"{}\",@{}", name, flags, kind).map_err(fmt_err)?;
        let align = section.align().max(1);
        if align > 1 {
            writeln!(out, "\t.p2align\t{}", align.trailing_zeros()).map_err(fmt_err)?;
        }

        let data = if nobits {
            Vec::new()
        } else {
            section
                .data()
                .map_err(|e| CodegenError::Object(e.to_string()))?
                .to_vec()
        };
        let mut cursor = 0u64;
        for (offset, event) in &events {
            emit_contents(&mut out, &data, nobits, cursor, *offset).map_err(fmt_err)?;
            cursor = cursor.max(*offset);
            match event {
                Event::Label(label) => emit_label(&mut out, label).map_err(fmt_err)?,
                Event::Reloc { name, target, addend } => {
                    let addend = match addend {
                        0 => String::new(),
                        a if *a > 0 => format!("+{}", a),
                        a => a.to_string(),
                    };
                    writeln!(out, "\t.reloc\t., {}, {}{}", name, target, addend).map_err(fmt_err)?;
                }
            }
        }
        emit_contents(&mut out, &data, nobits, cursor, section.size()).map_err(fmt_err)?;
    }
    Ok(out)
}

fn section_flags(sh_flags: u64, nobits: bool) -> (String, &'static str) {
    let mut flags = String::new();
    if sh_flags & u64::from(object::elf::SHF_ALLOC) != 0 {
        flags.push('a');
    }
    if sh_flags & u64::from(object::elf::SHF_WRITE) != 0 {
        flags.push('w');
    }
    if sh_flags & u64::from(object::elf::SHF_EXECINSTR) != 0 {
        flags.push('x');
    }
    (flags, if nobits { "nobits" } else { "progbits" })
}

fn emit_label(out: &mut String, label: &LabelInfo) -> std::fmt::Result {
    if label.weak {
        writeln!(out, "\t.weak\t{}", label.name)?;
    } else if label.global {
        writeln!(out, "\t.globl\t{}", label.name)?;
    }
    match label.kind {
        SymbolKind::Text => writeln!(out, "\t.type\t{},@function", label.name)?,
        SymbolKind::Data => writeln!(out, "\t.type\t{},@object", label.name)?,
        _ => {}
    }
    if label.size > 0 {
        writeln!(out, "\t.size\t{}, {}", label.name, label.size)?;
    }
    writeln!(out, "{}:", label.name)
}

/// Bytes in `[from, to)`, with long zero runs folded into `.zero`
fn emit_contents(out: &mut String, data: &[u8], nobits: bool, from: u64, to: u64) -> std::fmt::Result {
    if to <= from {
        return Ok(());
    }
    if nobits {
        return writeln!(out, "\t.zero\t{}", to - from);
    }
    let end = (to as usize).min(data.len());
    let mut bytes = data.get(from as usize..end).unwrap_or_default();
    while !bytes.is_empty() {
        let zeros = bytes.iter().take_while(|b| **b == 0).count();
        if zeros >= BYTES_PER_LINE {
            writeln!(out, "\t.zero\t{}", zeros)?;
            bytes = &bytes[zeros..];
            continue;
        }
        let line = &bytes[..bytes.len().min(BYTES_PER_LINE)];
        let text: Vec<String> = line.iter().map(|b| format!("0x{:02x}", b)).collect();
        writeln!(out, "\t.byte\t{}", text.join(","))?;
        bytes = &bytes[line.len()..];
    }
    Ok(())
}
