//! Statement interpreter: builds sections, symbols and relocations.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, trace};
use object::{Architecture, elf};
use thiserror::Error;

use super::AssemblerInvocation;
use super::encoder::X86Encoder;
use super::expr::{SymbolEnv, Value, parse_absolute, parse_expr};
use super::lexer::{Lexer, Statement, Token, TokenCursor, TokenKind};
use crate::diagnostic::{Diagnostic, DiagnosticEngine, SourceLoc};
use crate::elf_relocs;

const MAX_INCLUDE_DEPTH: usize = 64;
/// Largest exponent `.p2align` accepts
const MAX_ALIGN_POWER: i64 = 32;
/// Largest single `.zero` or alignment fill in a section with contents
const MAX_FILL: u64 = 1 << 30;

/// Error tied to a statement; reported and then assembly goes on
#[derive(Debug, Error)]
#[error("{message}")]
pub(crate) struct AsmError {
    pub loc: SourceLoc,
    pub message: String,
}

impl AsmError {
    pub fn new(loc: SourceLoc, message: impl Into<String>) -> Self {
        AsmError {
            loc,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Section {
    pub name: String,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub data: Vec<u8>,
    /// Size of an `SHT_NOBITS` section
    pub bss_size: u64,
    pub align: u64,
    pub relocs: Vec<PendingReloc>,
}

impl Section {
    fn new(name: &str, sh_type: u32, sh_flags: u64) -> Self {
        Section {
            name: name.to_string(),
            sh_type,
            sh_flags,
            data: Vec::new(),
            bss_size: 0,
            align: 1,
            relocs: Vec::new(),
        }
    }

    pub fn is_nobits(&self) -> bool {
        self.sh_type == elf::SHT_NOBITS
    }

    pub fn len(&self) -> u64 {
        if self.is_nobits() {
            self.bss_size
        } else {
            self.data.len() as u64
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum RelocTarget {
    Symbol(String),
    Section(usize),
}

#[derive(Debug, Clone)]
pub(crate) struct PendingReloc {
    pub offset: u64,
    pub r_type: u32,
    pub target: RelocTarget,
    pub addend: i64,
    /// PC-relative field that is filled in when its target lands in the same section
    pub pc_relative: bool,
    pub loc: SourceLoc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum Binding {
    #[default]
    Local,
    Global,
    Weak,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum SymbolType {
    #[default]
    NoType,
    Function,
    Object,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SymbolDef {
    Label { section: usize, offset: u64 },
    Absolute(i64),
    Common { size: u64, align: u64 },
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SymbolInfo {
    pub definition: Option<SymbolDef>,
    pub binding: Binding,
    pub kind: SymbolType,
    pub size: Option<u64>,
    pub hidden: bool,
    /// Defined by `.set`, which may be repeated
    pub equate: bool,
}

/// Everything the object writer needs
#[derive(Debug, Default)]
pub(crate) struct AsmModule {
    pub sections: Vec<Section>,
    pub symbols: IndexMap<String, SymbolInfo>,
    /// Name for the `STT_FILE` symbol
    pub file_name: Option<String>,
}

impl AsmModule {
    pub fn section_index(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }
}

pub(crate) fn is_temporary(name: &str) -> bool {
    name.starts_with(".L")
}

/// Name lookup against the module as built so far
struct ModuleEnv<'m> {
    module: &'m AsmModule,
    /// Location `.` stands for
    dot: (usize, u64),
}

impl SymbolEnv for ModuleEnv<'_> {
    fn resolve(&mut self, name: &str) -> Value {
        if name == "." {
            return Value::Loc {
                section: self.dot.0,
                offset: self.dot.1 as i64,
            };
        }
        match self.module.symbols.get(name).and_then(|s| s.definition) {
            Some(SymbolDef::Absolute(n)) => Value::Abs(n),
            Some(SymbolDef::Label { section, offset }) if is_temporary(name) => Value::Loc {
                section,
                offset: offset as i64,
            },
            Some(SymbolDef::Label { section, offset }) => Value::Sym {
                name: name.to_string(),
                addend: 0,
                defined: Some((section, offset as i64)),
            },
            Some(SymbolDef::Common { .. }) | None => match self.module.section_index(name) {
                Some(section) if !self.module.symbols.contains_key(name) => Value::Loc { section, offset: 0 },
                _ => Value::Sym {
                    name: name.to_string(),
                    addend: 0,
                    defined: None,
                },
            },
        }
    }
}

struct PendingSize {
    name: String,
    tokens: Vec<Token>,
    dot: (usize, u64),
    loc: SourceLoc,
}

pub(crate) struct Assembler<'i, 'd> {
    inv: &'i AssemblerInvocation,
    arch: Architecture,
    diag: &'d mut DiagnosticEngine,
    module: AsmModule,
    current: usize,
    previous: usize,
    section_stack: Vec<(usize, usize)>,
    pending_sizes: Vec<PendingSize>,
    /// Directories of the files being assembled, innermost last
    file_dirs: Vec<PathBuf>,
    /// Built on the first instruction
    x86: Option<X86Encoder>,
}

impl<'i, 'd> Assembler<'i, 'd> {
    pub fn new(inv: &'i AssemblerInvocation, arch: Architecture, diag: &'d mut DiagnosticEngine) -> Self {
        let mut module = AsmModule::default();
        module.sections.push(Section::new(
            ".text",
            elf::SHT_PROGBITS,
            (elf::SHF_ALLOC | elf::SHF_EXECINSTR) as u64,
        ));
        module.file_name = inv.main_file_name.clone();
        Assembler {
            inv,
            arch,
            diag,
            module,
            current: 0,
            previous: 0,
            section_stack: Vec::new(),
            pending_sizes: Vec::new(),
            file_dirs: Vec::new(),
            x86: None,
        }
    }

    fn report(&mut self, err: AsmError) {
        self.diag.report(Diagnostic::error(err.message).at(err.loc));
    }

    fn warn(&mut self, loc: SourceLoc, message: impl Into<String>) {
        let diag = if self.inv.fatal_warnings {
            Diagnostic::error(message)
        } else {
            Diagnostic::warning(message)
        };
        self.diag.report(diag.at(loc));
    }

    pub fn assemble_source(&mut self, text: &str, file_name: &str) {
        let dir = Path::new(file_name)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.file_dirs.push(dir);
        let statements = Lexer::new(text, file_name, self.diag).statements();
        trace!("{}: {} statements", file_name, statements.len());
        for statement in &statements {
            if let Err(err) = self.statement(statement) {
                self.report(err);
            }
        }
        self.file_dirs.pop();
    }

    /// Resolve deferred `.size` expressions and hand over the module.
    pub fn finish(mut self) -> AsmModule {
        for pending in std::mem::take(&mut self.pending_sizes) {
            let mut cursor = TokenCursor::new(&pending.tokens, pending.loc.clone());
            let mut env = ModuleEnv {
                module: &self.module,
                dot: pending.dot,
            };
            match parse_absolute(&mut cursor, &mut env) {
                Ok(size) => self.symbol_mut(&pending.name).size = Some(size as u64),
                Err(_) => self.report(AsmError::new(
                    pending.loc,
                    format!(".size expression for '{}' does not evaluate to a constant", pending.name),
                )),
            }
        }
        self.resolve_pc_relative();
        self.module
    }

    /// Fill in PC-relative fields whose target is in the same section
    fn resolve_pc_relative(&mut self) {
        let AsmModule { sections, symbols, .. } = &mut self.module;
        for (index, section) in sections.iter_mut().enumerate() {
            let Section { data, relocs, .. } = section;
            relocs.retain(|reloc| {
                if !reloc.pc_relative {
                    return true;
                }
                let place = match &reloc.target {
                    RelocTarget::Section(target) => Some((*target, 0)),
                    RelocTarget::Symbol(name) if is_temporary(name) => {
                        match symbols.get(name).and_then(|s| s.definition) {
                            Some(SymbolDef::Label { section, offset }) => Some((section, offset as i64)),
                            _ => None,
                        }
                    }
                    RelocTarget::Symbol(_) => None,
                };
                let Some((_, offset)) = place.filter(|(target, _)| *target == index) else {
                    return true;
                };
                let start = reloc.offset as usize;
                let Ok(value) = i32::try_from(offset + reloc.addend - reloc.offset as i64) else {
                    return true;
                };
                let Some(field) = data.get_mut(start..start + 4) else {
                    return true;
                };
                field.copy_from_slice(&value.to_le_bytes());
                trace!("resolved {:#x} in section {} to {}", reloc.offset, index, value);
                false
            });
        }
    }

    fn section(&self) -> &Section {
        &self.module.sections[self.current]
    }

    fn dot(&self) -> (usize, u64) {
        (self.current, self.section().len())
    }

    fn eval(&self, cursor: &mut TokenCursor<'_>) -> Result<Value, AsmError> {
        let mut env = ModuleEnv {
            module: &self.module,
            dot: self.dot(),
        };
        parse_expr(cursor, &mut env)
    }

    fn eval_absolute(&self, cursor: &mut TokenCursor<'_>) -> Result<i64, AsmError> {
        let mut env = ModuleEnv {
            module: &self.module,
            dot: self.dot(),
        };
        parse_absolute(cursor, &mut env)
    }

    fn symbol_mut(&mut self, name: &str) -> &mut SymbolInfo {
        self.module.symbols.entry(name.to_string()).or_default()
    }

    fn statement(&mut self, statement: &Statement) -> Result<(), AsmError> {
        let tokens = &statement.tokens;
        let end = tokens.last().map_or_else(|| statement.loc.clone(), |t| t.loc.clone());
        let mut cursor = TokenCursor::new(tokens, end);

        // leading labels
        loop {
            let Some(token) = cursor.peek() else {
                return Ok(());
            };
            let followed_by_colon = matches!(cursor.peek_at(1).map(|t| &t.kind), Some(TokenKind::Punct(":")));
            match &token.kind {
                TokenKind::Ident(name) if followed_by_colon && name != "." => {
                    self.define_label(name, &token.loc)?;
                    cursor.advance();
                    cursor.advance();
                }
                TokenKind::Int(_) if followed_by_colon => {
                    return Err(AsmError::new(token.loc.clone(), "numeric local labels are not supported"));
                }
                _ => break,
            }
        }

        let loc = cursor.loc();
        let name = match cursor.next().map(|t| &t.kind) {
            Some(TokenKind::Ident(name)) => name.as_str(),
            _ => return Err(AsmError::new(loc, "expected a directive or label")),
        };
        if cursor.eat_punct("=") {
            return self.assign(name, &mut cursor, &loc);
        }
        if !name.starts_with('.') {
            let operands = remaining(&mut cursor);
            return self.instruction(name, &operands, &loc);
        }
        self.directive(name, &mut cursor, &loc)
    }

    fn instruction(&mut self, name: &str, operands: &[Token], loc: &SourceLoc) -> Result<(), AsmError> {
        if self.arch != Architecture::X86_64 {
            return Err(AsmError::new(
                loc.clone(),
                format!("instructions are not supported for this target: '{}'", name),
            ));
        }
        let mut env = ModuleEnv {
            module: &self.module,
            dot: self.dot(),
        };
        let encoder = self.x86.get_or_insert_with(X86Encoder::new);
        let encoded = encoder.encode(name, operands, loc, &mut env)?;

        let start = self.section().len();
        self.emit_bytes(&encoded.bytes, loc)?;
        for fixup in encoded.fixups {
            let (target, addend) = self.relocation_target(fixup.value, loc)?;
            self.module.sections[self.current].relocs.push(PendingReloc {
                offset: start + fixup.offset as u64,
                r_type: fixup.r_type,
                target,
                addend: addend + fixup.addend,
                pc_relative: matches!(fixup.r_type, elf::R_X86_64_PC32 | elf::R_X86_64_PLT32),
                loc: loc.clone(),
            });
        }
        Ok(())
    }

    fn define_label(&mut self, name: &str, loc: &SourceLoc) -> Result<(), AsmError> {
        let (section, offset) = self.dot();
        let symbol = self.symbol_mut(name);
        if symbol.definition.is_some() {
            return Err(AsmError::new(loc.clone(), format!("symbol '{}' is already defined", name)));
        }
        symbol.definition = Some(SymbolDef::Label { section, offset });
        Ok(())
    }

    fn directive(&mut self, name: &str, cursor: &mut TokenCursor<'_>, loc: &SourceLoc) -> Result<(), AsmError> {
        match name {
            ".text" => self.switch_to(".text", None, loc)?,
            ".data" => self.switch_to(".data", None, loc)?,
            ".bss" => self.switch_to(".bss", None, loc)?,
            ".section" => return self.section_directive(cursor, loc, false),
            ".pushsection" => return self.section_directive(cursor, loc, true),
            ".popsection" => {
                let (current, previous) = self
                    .section_stack
                    .pop()
                    .ok_or_else(|| AsmError::new(loc.clone(), ".popsection without matching .pushsection"))?;
                self.current = current;
                self.previous = previous;
            }
            ".previous" => std::mem::swap(&mut self.current, &mut self.previous),

            ".globl" | ".global" => self.for_each_symbol(cursor, |s| s.binding = Binding::Global)?,
            ".weak" => self.for_each_symbol(cursor, |s| s.binding = Binding::Weak)?,
            ".local" => self.for_each_symbol(cursor, |s| s.binding = Binding::Local)?,
            ".hidden" => self.for_each_symbol(cursor, |s| s.hidden = true)?,
            ".type" => self.type_directive(cursor)?,
            ".size" => {
                let symbol = cursor.expect_ident()?;
                cursor.expect_punct(",")?;
                let tokens = remaining(cursor);
                self.pending_sizes.push(PendingSize {
                    name: symbol.to_string(),
                    tokens,
                    dot: self.dot(),
                    loc: loc.clone(),
                });
                return Ok(());
            }
            ".set" | ".equ" => {
                let symbol = cursor.expect_ident()?;
                cursor.expect_punct(",")?;
                return self.assign(symbol, cursor, loc);
            }
            ".comm" => self.comm_directive(cursor, loc)?,

            ".byte" => self.data_directive(cursor, 1)?,
            ".short" | ".2byte" | ".hword" | ".value" => self.data_directive(cursor, 2)?,
            ".long" | ".int" | ".4byte" => self.data_directive(cursor, 4)?,
            ".quad" | ".8byte" => self.data_directive(cursor, 8)?,
            ".ascii" => self.string_directive(cursor, false, loc)?,
            ".asciz" | ".string" => self.string_directive(cursor, true, loc)?,
            ".zero" | ".skip" | ".space" => {
                let size = self.eval_absolute(cursor)?;
                let fill = if cursor.eat_punct(",") {
                    self.eval_absolute(cursor)? as u8
                } else {
                    0
                };
                if size < 0 {
                    return Err(AsmError::new(loc.clone(), format!("negative size {} in '{}'", size, name)));
                }
                self.fill(size as u64, fill, loc)?;
            }

            ".p2align" => self.align_directive(cursor, loc, true)?,
            ".balign" => self.align_directive(cursor, loc, false)?,
            // byte count on x86, power of two elsewhere
            ".align" => self.align_directive(cursor, loc, self.arch != Architecture::X86_64)?,

            ".reloc" => self.reloc_directive(cursor, loc)?,
            ".include" => {
                let path = cursor.expect_string()?;
                cursor.expect_end()?;
                let path = String::from_utf8_lossy(path).into_owned();
                return self.include(&path, loc);
            }
            ".file" => {
                // `.file 1 "x.c"` is a DWARF file entry; only the plain form names the object
                if let Some(TokenKind::Str(bytes)) = cursor.peek().map(|t| &t.kind) {
                    if self.inv.main_file_name.is_none() {
                        self.module.file_name = Some(String::from_utf8_lossy(bytes).into_owned());
                    }
                }
                return Ok(());
            }
            ".ident" | ".addrsig" | ".addrsig_sym" => return Ok(()),
            _ if name.starts_with(".cfi_") => return Ok(()),
            _ => return Err(AsmError::new(loc.clone(), format!("unknown directive '{}'", name))),
        }
        cursor.expect_end()
    }

    fn assign(&mut self, name: &str, cursor: &mut TokenCursor<'_>, loc: &SourceLoc) -> Result<(), AsmError> {
        let value = self.eval(cursor)?;
        cursor.expect_end()?;
        let definition = match value {
            Value::Abs(n) => SymbolDef::Absolute(n),
            Value::Loc { section, offset } => SymbolDef::Label {
                section,
                offset: offset as u64,
            },
            Value::Sym {
                addend,
                defined: Some((section, offset)),
                ..
            } => SymbolDef::Label {
                section,
                offset: (offset + addend) as u64,
            },
            Value::Sym {
                name: operand,
                defined: None,
                ..
            } => {
                return Err(AsmError::new(
                    loc.clone(),
                    format!("cannot set '{}': operand '{}' is undefined", name, operand),
                ));
            }
        };
        let symbol = self.symbol_mut(name);
        if symbol.definition.is_some() && !symbol.equate {
            return Err(AsmError::new(loc.clone(), format!("symbol '{}' is already defined", name)));
        }
        symbol.definition = Some(definition);
        symbol.equate = true;
        trace!("{} = {:?}", name, definition);
        Ok(())
    }

    fn for_each_symbol(
        &mut self,
        cursor: &mut TokenCursor<'_>,
        mut apply: impl FnMut(&mut SymbolInfo),
    ) -> Result<(), AsmError> {
        loop {
            let name = cursor.expect_ident()?;
            apply(self.symbol_mut(name));
            if !cursor.eat_punct(",") {
                return Ok(());
            }
        }
    }

    fn type_directive(&mut self, cursor: &mut TokenCursor<'_>) -> Result<(), AsmError> {
        let name = cursor.expect_ident()?;
        cursor.expect_punct(",")?;
        let loc = cursor.loc();
        let kind = match cursor.next().map(|t| &t.kind) {
            Some(TokenKind::Punct("@" | "%")) => cursor.expect_ident()?.to_string(),
            Some(TokenKind::Ident(kind)) => kind.clone(),
            Some(TokenKind::Str(kind)) => String::from_utf8_lossy(kind).into_owned(),
            _ => return Err(AsmError::new(loc, "expected symbol type")),
        };
        let kind = match kind.as_str() {
            "function" | "STT_FUNC" => SymbolType::Function,
            "object" | "STT_OBJECT" => SymbolType::Object,
            "notype" | "STT_NOTYPE" => SymbolType::NoType,
            other => return Err(AsmError::new(loc, format!("unsupported symbol type '{}'", other))),
        };
        self.symbol_mut(name).kind = kind;
        Ok(())
    }

    fn comm_directive(&mut self, cursor: &mut TokenCursor<'_>, loc: &SourceLoc) -> Result<(), AsmError> {
        let name = cursor.expect_ident()?;
        cursor.expect_punct(",")?;
        let size = self.eval_absolute(cursor)?;
        let align = if cursor.eat_punct(",") {
            self.eval_absolute(cursor)?
        } else {
            1
        };
        if size < 0 || align <= 0 || (align & (align - 1)) != 0 {
            return Err(AsmError::new(loc.clone(), format!("invalid size or alignment for '.comm {}'", name)));
        }
        let symbol = self.symbol_mut(name);
        match symbol.definition {
            Some(SymbolDef::Common { .. }) | None => {}
            Some(_) => return Err(AsmError::new(loc.clone(), format!("symbol '{}' is already defined", name))),
        }
        symbol.definition = Some(SymbolDef::Common {
            size: size as u64,
            align: align as u64,
        });
        symbol.binding = Binding::Global;
        symbol.kind = SymbolType::Object;
        Ok(())
    }

    /// Default type and flags of a section known by name
    fn section_defaults(name: &str) -> (u32, u64) {
        let alloc = elf::SHF_ALLOC as u64;
        let write = elf::SHF_WRITE as u64;
        let exec = elf::SHF_EXECINSTR as u64;
        let tls = elf::SHF_TLS as u64;
        let prefixed = |base: &str| name == base || name.starts_with(&format!("{}.", base));
        if prefixed(".text") {
            (elf::SHT_PROGBITS, alloc | exec)
        } else if prefixed(".bss") {
            (elf::SHT_NOBITS, alloc | write)
        } else if prefixed(".tbss") {
            (elf::SHT_NOBITS, alloc | write | tls)
        } else if prefixed(".tdata") {
            (elf::SHT_PROGBITS, alloc | write | tls)
        } else if prefixed(".data") || prefixed(".data.rel.ro") {
            (elf::SHT_PROGBITS, alloc | write)
        } else if prefixed(".rodata") {
            (elf::SHT_PROGBITS, alloc)
        } else if prefixed(".init_array") {
            (elf::SHT_INIT_ARRAY, alloc | write)
        } else if prefixed(".fini_array") {
            (elf::SHT_FINI_ARRAY, alloc | write)
        } else if name.starts_with(".note") {
            (elf::SHT_NOTE, 0)
        } else {
            (elf::SHT_PROGBITS, 0)
        }
    }

    fn switch_to(&mut self, name: &str, attrs: Option<(u32, u64)>, loc: &SourceLoc) -> Result<(), AsmError> {
        let index = match self.module.section_index(name) {
            Some(index) => {
                let section = &self.module.sections[index];
                if attrs.is_some_and(|(sh_type, sh_flags)| sh_type != section.sh_type || sh_flags != section.sh_flags) {
                    self.warn(loc.clone(), format!("ignoring changed section attributes for {}", name));
                }
                index
            }
            None => {
                let (sh_type, sh_flags) = attrs.unwrap_or_else(|| Self::section_defaults(name));
                debug!("new section {} type {} flags {:#x}", name, sh_type, sh_flags);
                self.module.sections.push(Section::new(name, sh_type, sh_flags));
                self.module.sections.len() - 1
            }
        };
        if index != self.current {
            self.previous = self.current;
            self.current = index;
        }
        Ok(())
    }

    /// `.section name[, "flags"[, @type[, entsize]]]`
    fn section_directive(&mut self, cursor: &mut TokenCursor<'_>, loc: &SourceLoc, push: bool) -> Result<(), AsmError> {
        let name_loc = cursor.loc();
        let name = match cursor.next().map(|t| &t.kind) {
            Some(TokenKind::Ident(name)) => name.clone(),
            Some(TokenKind::Str(name)) => String::from_utf8_lossy(name).into_owned(),
            _ => return Err(AsmError::new(name_loc, "expected section name")),
        };

        let mut attrs = None;
        if cursor.eat_punct(",") {
            let flags_loc = cursor.loc();
            let flags = cursor.expect_string()?;
            let (mut sh_type, _) = Self::section_defaults(&name);
            let mut sh_flags = 0u64;
            for flag in flags {
                let bit = match flag {
                    b'a' => elf::SHF_ALLOC,
                    b'w' => elf::SHF_WRITE,
                    b'x' => elf::SHF_EXECINSTR,
                    b'M' => elf::SHF_MERGE,
                    b'S' => elf::SHF_STRINGS,
                    b'T' => elf::SHF_TLS,
                    other => {
                        return Err(AsmError::new(
                            flags_loc,
                            format!("unsupported section flag '{}'", *other as char),
                        ));
                    }
                };
                sh_flags |= bit as u64;
            }
            if cursor.eat_punct(",") {
                let type_loc = cursor.loc();
                if !cursor.eat_punct("@") && !cursor.eat_punct("%") {
                    return Err(AsmError::new(type_loc, "expected '@' before section type"));
                }
                sh_type = match cursor.expect_ident()? {
                    "progbits" => elf::SHT_PROGBITS,
                    "nobits" => elf::SHT_NOBITS,
                    "note" => elf::SHT_NOTE,
                    "init_array" => elf::SHT_INIT_ARRAY,
                    "fini_array" => elf::SHT_FINI_ARRAY,
                    other => return Err(AsmError::new(type_loc, format!("unknown section type '{}'", other))),
                };
                // entity size of mergeable sections
                if cursor.eat_punct(",") {
                    self.eval_absolute(cursor)?;
                }
            }
            attrs = Some((sh_type, sh_flags));
        }
        cursor.expect_end()?;

        if push {
            self.section_stack.push((self.current, self.previous));
        }
        self.switch_to(&name, attrs, loc)
    }

    fn data_directive(&mut self, cursor: &mut TokenCursor<'_>, size: u8) -> Result<(), AsmError> {
        loop {
            let loc = cursor.loc();
            let value = self.eval(cursor)?;
            self.emit_value(size, value, &loc)?;
            if !cursor.eat_punct(",") {
                return Ok(());
            }
        }
    }

    fn emit_value(&mut self, size: u8, value: Value, loc: &SourceLoc) -> Result<(), AsmError> {
        let (target, addend) = match value {
            Value::Abs(n) => {
                let bits = size as u32 * 8;
                if bits < 64 {
                    let fits_unsigned = (n as u64) >> bits == 0;
                    let fits_signed = n >> (bits - 1) == -1;
                    if !fits_unsigned && !fits_signed {
                        let truncated = (n as u64) & ((1u64 << bits) - 1);
                        self.warn(loc.clone(), format!("value {:#x} truncated to {:#x}", n, truncated));
                    }
                }
                return self.emit_bytes(&n.to_le_bytes()[..size as usize], loc);
            }
            other => self.relocation_target(other, loc)?,
        };
        let r_type = elf_relocs::absolute(self.arch, size).ok_or_else(|| {
            AsmError::new(loc.clone(), format!("cannot emit a {}-byte relocation on this target", size))
        })?;
        let offset = self.section().len();
        self.module.sections[self.current].relocs.push(PendingReloc {
            offset,
            r_type,
            target,
            addend,
            pc_relative: false,
            loc: loc.clone(),
        });
        self.emit_bytes(&vec![0; size as usize], loc)
    }

    /// Relocation target and addend for a value that is not a constant
    fn relocation_target(&mut self, value: Value, loc: &SourceLoc) -> Result<(RelocTarget, i64), AsmError> {
        match value {
            Value::Abs(_) => Err(AsmError::new(loc.clone(), "expected a relocatable value")),
            Value::Loc { section, offset } => Ok((RelocTarget::Section(section), offset)),
            Value::Sym {
                name,
                addend,
                defined: Some((section, offset)),
            } if is_temporary(&name) => Ok((RelocTarget::Section(section), offset + addend)),
            Value::Sym { name, addend, .. } => {
                self.symbol_mut(&name);
                Ok((RelocTarget::Symbol(name), addend))
            }
        }
    }

    fn emit_bytes(&mut self, bytes: &[u8], loc: &SourceLoc) -> Result<(), AsmError> {
        let section = &mut self.module.sections[self.current];
        if section.is_nobits() {
            if bytes.iter().any(|b| *b != 0) {
                return Err(AsmError::new(
                    loc.clone(),
                    format!("non-zero value in section '{}' which has no contents", section.name),
                ));
            }
            section.bss_size += bytes.len() as u64;
        } else {
            section.data.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn fill(&mut self, count: u64, byte: u8, loc: &SourceLoc) -> Result<(), AsmError> {
        let section = &mut self.module.sections[self.current];
        if section.is_nobits() {
            if byte != 0 && count != 0 {
                return Err(AsmError::new(
                    loc.clone(),
                    format!("non-zero value in section '{}' which has no contents", section.name),
                ));
            }
            section.bss_size = section
                .bss_size
                .checked_add(count)
                .ok_or_else(|| AsmError::new(loc.clone(), format!("section '{}' is too large", section.name)))?;
            return Ok(());
        }
        if count > MAX_FILL {
            return Err(AsmError::new(loc.clone(), format!("fill of {} bytes is too large", count)));
        }
        let len = section.data.len();
        section
            .data
            .try_reserve(count as usize)
            .map_err(|_| AsmError::new(loc.clone(), format!("cannot allocate {} bytes of fill", count)))?;
        section.data.resize(len + count as usize, byte);
        Ok(())
    }

    fn string_directive(&mut self, cursor: &mut TokenCursor<'_>, terminate: bool, loc: &SourceLoc) -> Result<(), AsmError> {
        loop {
            let mut bytes = cursor.expect_string()?.to_vec();
            if terminate {
                bytes.push(0);
            }
            self.emit_bytes(&bytes, loc)?;
            if !cursor.eat_punct(",") {
                return Ok(());
            }
        }
    }

    /// `.p2align`/`.balign`: `amount[, fill[, max]]`
    fn align_directive(&mut self, cursor: &mut TokenCursor<'_>, loc: &SourceLoc, power_of_two: bool) -> Result<(), AsmError> {
        let amount = self.eval_absolute(cursor)?;
        let mut fill = None;
        let mut max = None;
        if cursor.eat_punct(",") {
            if cursor.peek_punct() != Some(",") {
                fill = Some(self.eval_absolute(cursor)? as u8);
            }
            if cursor.eat_punct(",") {
                max = Some(self.eval_absolute(cursor)? as u64);
            }
        }
        let align = if power_of_two {
            if amount < 0 {
                return Err(AsmError::new(loc.clone(), format!("invalid alignment exponent {}", amount)));
            }
            if amount > MAX_ALIGN_POWER {
                return Err(AsmError::new(loc.clone(), format!("alignment 2^{} is too large", amount)));
            }
            1u64 << amount
        } else {
            if amount < 0 || (amount != 0 && (amount & (amount - 1)) != 0) {
                return Err(AsmError::new(loc.clone(), "alignment must be a power of 2"));
            }
            if amount > 1 << MAX_ALIGN_POWER {
                return Err(AsmError::new(loc.clone(), format!("alignment {} is too large", amount)));
            }
            (amount as u64).max(1)
        };

        let len = self.section().len();
        let padding = len.next_multiple_of(align) - len;
        if max.is_some_and(|max| padding > max) {
            return Ok(());
        }
        let section = &mut self.module.sections[self.current];
        section.align = section.align.max(align);
        let code = section.sh_flags & elf::SHF_EXECINSTR as u64 != 0;
        let byte = fill.unwrap_or(if code && self.arch == Architecture::X86_64 { 0x90 } else { 0 });
        self.fill(padding, byte, loc)
    }

    /// `.reloc offset, R_NAME[, target]`
    fn reloc_directive(&mut self, cursor: &mut TokenCursor<'_>, loc: &SourceLoc) -> Result<(), AsmError> {
        let offset_loc = cursor.loc();
        let (section, offset) = match self.eval(cursor)? {
            Value::Abs(offset) => (self.current, offset),
            Value::Loc { section, offset } => (section, offset),
            Value::Sym {
                addend,
                defined: Some((section, offset)),
                ..
            } => (section, offset + addend),
            Value::Sym { .. } => return Err(AsmError::new(offset_loc, ".reloc offset is not known")),
        };
        cursor.expect_punct(",")?;
        let name_loc = cursor.loc();
        let reloc_name = cursor.expect_ident()?;
        let r_type = elf_relocs::lookup(self.arch, reloc_name)
            .ok_or_else(|| AsmError::new(name_loc, format!("unknown relocation name '{}'", reloc_name)))?;

        let (target, addend) = if cursor.eat_punct(",") {
            let target_loc = cursor.loc();
            match self.eval(cursor)? {
                Value::Loc { section, offset } => (RelocTarget::Section(section), offset),
                Value::Sym {
                    name,
                    addend,
                    defined: Some((section, offset)),
                } if is_temporary(&name) => (RelocTarget::Section(section), offset + addend),
                Value::Sym { name, addend, .. } => {
                    self.symbol_mut(&name);
                    (RelocTarget::Symbol(name), addend)
                }
                Value::Abs(_) => return Err(AsmError::new(target_loc, "relocation target must be a symbol")),
            }
        } else {
            (RelocTarget::Section(section), 0)
        };
        cursor.expect_end()?;

        trace!("reloc {} at {}+{:#x}", reloc_name, self.module.sections[section].name, offset);
        self.module.sections[section].relocs.push(PendingReloc {
            offset: offset as u64,
            r_type,
            target,
            addend,
            pc_relative: false,
            loc: loc.clone(),
        });
        Ok(())
    }

    fn include(&mut self, path: &str, loc: &SourceLoc) -> Result<(), AsmError> {
        if self.file_dirs.len() >= MAX_INCLUDE_DEPTH {
            return Err(AsmError::new(loc.clone(), "too many nested .include files"));
        }
        let requested = Path::new(path);
        let candidates = self
            .file_dirs
            .last()
            .into_iter()
            .chain(self.inv.include_paths.iter())
            .map(|dir| dir.join(requested))
            .chain(std::iter::once(requested.to_path_buf()));
        let mut found = None;
        for candidate in candidates {
            if let Ok(bytes) = fs::read(&candidate) {
                found = Some((candidate, bytes));
                break;
            }
        }
        let Some((resolved, bytes)) = found else {
            return Err(AsmError::new(loc.clone(), format!("could not find include file '{}'", path)));
        };
        debug!("including {}", resolved.display());
        let text = String::from_utf8_lossy(&bytes).into_owned();
        self.assemble_source(&text, &resolved.display().to_string());
        Ok(())
    }
}

fn remaining(cursor: &mut TokenCursor<'_>) -> Vec<Token> {
    let mut tokens = Vec::new();
    while let Some(token) = cursor.next() {
        tokens.push(token.clone());
    }
    tokens
}
