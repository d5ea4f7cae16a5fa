//! Lowers an assembled module to an ELF relocatable object.

use hashbrown::HashMap;
use log::debug;
use object::write::{self, Object, Relocation, SectionId, SymbolId, SymbolSection};
use object::{
    Architecture, BinaryFormat, Endianness, RelocationFlags, SectionFlags, SectionKind, SymbolFlags, SymbolKind,
    SymbolScope, elf,
};
use target_lexicon::Triple;

use super::parser::{AsmModule, Binding, RelocTarget, Section, SymbolDef, SymbolType, is_temporary};
use crate::diagnostic::{Diagnostic, DiagnosticEngine};
use crate::error::PipelineError;

/// ELF architectures the assembler can write
pub(crate) fn target_architecture(triple: &Triple) -> Option<Architecture> {
    if triple.binary_format != target_lexicon::BinaryFormat::Elf
        || triple.endianness().ok()? != target_lexicon::Endianness::Little
    {
        return None;
    }
    match triple.architecture {
        target_lexicon::Architecture::X86_64 => Some(Architecture::X86_64),
        target_lexicon::Architecture::Aarch64(_) => Some(Architecture::Aarch64),
        _ => None,
    }
}

fn section_kind(section: &Section) -> SectionKind {
    let flags = section.sh_flags;
    let has = |flag: u32| flags & flag as u64 != 0;
    match section.sh_type {
        elf::SHT_NOBITS if has(elf::SHF_TLS) => SectionKind::UninitializedTls,
        elf::SHT_NOBITS => SectionKind::UninitializedData,
        elf::SHT_NOTE => SectionKind::Note,
        elf::SHT_PROGBITS if has(elf::SHF_EXECINSTR) => SectionKind::Text,
        elf::SHT_PROGBITS if has(elf::SHF_TLS) => SectionKind::Tls,
        elf::SHT_PROGBITS if has(elf::SHF_WRITE) => SectionKind::Data,
        elf::SHT_PROGBITS if has(elf::SHF_STRINGS) => SectionKind::ReadOnlyString,
        elf::SHT_PROGBITS if has(elf::SHF_ALLOC) => SectionKind::ReadOnlyData,
        elf::SHT_PROGBITS => SectionKind::Other,
        other => SectionKind::Elf(other),
    }
}

pub(crate) fn write_object(
    module: &AsmModule,
    arch: Architecture,
    diag: &mut DiagnosticEngine,
) -> Result<Vec<u8>, PipelineError> {
    let mut obj = Object::new(BinaryFormat::Elf, arch, Endianness::Little);
    if let Some(file) = &module.file_name {
        obj.add_file_symbol(file.as_bytes().to_vec());
    }

    let mut section_ids: Vec<SectionId> = Vec::with_capacity(module.sections.len());
    for section in &module.sections {
        let id = obj.add_section(Vec::new(), section.name.as_bytes().to_vec(), section_kind(section));
        obj.section_mut(id).flags = SectionFlags::Elf {
            sh_flags: section.sh_flags,
        };
        if section.is_nobits() {
            obj.append_section_bss(id, section.bss_size, section.align);
        } else {
            obj.set_section_data(id, section.data.as_slice(), section.align);
        }
        section_ids.push(id);
    }

    let mut symbol_ids: HashMap<&str, SymbolId> = HashMap::new();
    for (name, info) in &module.symbols {
        if is_temporary(name) {
            continue;
        }
        // a bare section name refers to the section itself
        if info.definition.is_none() && module.section_index(name).is_some() {
            continue;
        }
        let scope = match (info.binding, info.definition) {
            (Binding::Local, Some(_)) => SymbolScope::Compilation,
            _ if info.hidden => SymbolScope::Linkage,
            _ => SymbolScope::Dynamic,
        };
        // untyped definitions are STT_NOTYPE, `.comm` symbols are objects
        let kind = match (info.kind, info.definition) {
            (SymbolType::Function, _) => SymbolKind::Text,
            (SymbolType::Object, _) | (SymbolType::NoType, Some(SymbolDef::Common { .. })) => SymbolKind::Data,
            (SymbolType::NoType, Some(_)) => SymbolKind::Label,
            (SymbolType::NoType, None) => SymbolKind::Unknown,
        };
        let mut symbol = write::Symbol {
            name: name.as_bytes().to_vec(),
            value: 0,
            size: info.size.unwrap_or(0),
            kind,
            scope,
            weak: info.binding == Binding::Weak,
            section: SymbolSection::Undefined,
            flags: SymbolFlags::None,
        };
        let id = match info.definition {
            Some(SymbolDef::Label { section, offset }) => {
                symbol.value = offset;
                symbol.section = SymbolSection::Section(section_ids[section]);
                obj.add_symbol(symbol)
            }
            Some(SymbolDef::Absolute(value)) => {
                symbol.value = value as u64;
                symbol.section = SymbolSection::Absolute;
                obj.add_symbol(symbol)
            }
            Some(SymbolDef::Common { size, align }) => obj.add_common_symbol(symbol, size, align),
            None => obj.add_symbol(symbol),
        };
        symbol_ids.insert(name.as_str(), id);
    }

    for (index, section) in module.sections.iter().enumerate() {
        for reloc in &section.relocs {
            let (symbol, addend) = match &reloc.target {
                RelocTarget::Section(target) => (obj.section_symbol(section_ids[*target]), reloc.addend),
                RelocTarget::Symbol(name) => match symbol_ids.get(name.as_str()) {
                    Some(id) => (*id, reloc.addend),
                    None => {
                        match (
                            module.symbols.get(name).and_then(|s| s.definition),
                            module.section_index(name),
                        ) {
                            (Some(SymbolDef::Label { section, offset }), _) => {
                                (obj.section_symbol(section_ids[section]), reloc.addend + offset as i64)
                            }
                            (None, Some(section)) => (obj.section_symbol(section_ids[section]), reloc.addend),
                            _ => {
                                diag.report(
                                    Diagnostic::error(format!("undefined temporary symbol '{}'", name))
                                        .at(reloc.loc.clone()),
                                );
                                continue;
                            }
                        }
                    }
                },
            };
            let relocation = Relocation {
                offset: reloc.offset,
                symbol,
                addend,
                flags: RelocationFlags::Elf { r_type: reloc.r_type },
            };
            if let Err(err) = obj.add_relocation(section_ids[index], relocation) {
                diag.report(Diagnostic::error(err.to_string()).at(reloc.loc.clone()));
            }
        }
    }
    if diag.has_error_occurred() {
        return Err(PipelineError::Fatal);
    }

    let bytes = obj.write().map_err(|err| {
        diag.error(format!("cannot write object file: {}", err));
        PipelineError::Fatal
    })?;
    debug!(
        "wrote {} bytes: {} sections, {} symbols",
        bytes.len(),
        module.sections.len(),
        symbol_ids.len()
    );
    Ok(bytes)
}
