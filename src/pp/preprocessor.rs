use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::Local;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use log::{debug, trace};
use target_lexicon::{Architecture, BinaryFormat, Endianness, OperatingSystem, Triple};
use thiserror::Error;

use crate::diagnostic::{Diagnostic, DiagnosticEngine, DiagnosticLevel, SourceLoc};
use crate::error::PipelineError;
use crate::lang_options::LangOptions;
use crate::pp::expr_parser::ExpressionParser;
use crate::pp::header_search::{FoundHeader, HeaderSearch};
use crate::pp::pp_lexer::{PPLexer, PPToken, PPTokenFlags, PPTokenKind, lex_fragment, needs_separator};

const MAX_INCLUDE_DEPTH: usize = 200;

/// Preprocessor configuration
#[derive(Debug, Clone)]
pub struct PPConfig {
    /// `-I` directories
    pub include_paths: Vec<PathBuf>,
    /// `-internal-isystem` directories
    pub system_include_paths: Vec<PathBuf>,
    /// `-D` values (`NAME` or `NAME=VALUE`)
    pub defines: Vec<String>,
    /// `-U` names
    pub undefines: Vec<String>,
    pub lang_opts: LangOptions,
    pub triple: Triple,
    /// Any `-O` level above zero
    pub optimize: bool,
    /// Emit `# <line> "<file>"` markers (off for `-P`)
    pub line_markers: bool,
}

impl Default for PPConfig {
    fn default() -> Self {
        PPConfig {
            include_paths: Vec::new(),
            system_include_paths: Vec::new(),
            defines: Vec::new(),
            undefines: Vec::new(),
            lang_opts: LangOptions::default(),
            triple: Triple::host(),
            optimize: false,
            line_markers: true,
        }
    }
}

/// Preprocessor errors
#[derive(Debug, Error)]
pub enum PPError {
    #[error("'{0}' file not found")]
    FileNotFound(String),
    #[error("#include nested too deeply")]
    IncludeDepthExceeded,
    #[error("expected \"FILENAME\" or <FILENAME>")]
    ExpectedFilename,
    #[error("invalid preprocessing directive")]
    InvalidDirective,
    #[error("macro name missing")]
    MacroNameMissing,
    #[error("macro name must be an identifier")]
    MacroNameNotIdentifier,
    #[error("'defined' cannot be used as a macro name")]
    DefinedAsMacroName,
    #[error("invalid token in macro parameter list")]
    InvalidMacroParameter,
    #[error("'#' is not followed by a macro parameter")]
    StringifyNonParameter,
    #[error("'##' cannot appear at either end of a macro expansion")]
    PasteAtEdge,
    #[error("pasting formed '{0}', an invalid preprocessing token")]
    InvalidPaste(String),
    #[error("unterminated function-like macro invocation")]
    UnterminatedInvocation,
    #[error("too few arguments provided to function-like macro invocation")]
    TooFewArguments,
    #[error("too many arguments provided to function-like macro invocation")]
    TooManyArguments,
    #[error("unterminated conditional directive")]
    UnterminatedConditional,
    #[error("#{0} without #if")]
    WithoutIf(&'static str),
    #[error("#{0} after #else")]
    AfterElse(&'static str),
    #[error("expected value in expression")]
    MissingExpression,
    #[error("invalid token '{0}' in preprocessor expression")]
    InvalidExpressionToken(String),
    #[error("expected ':' in conditional expression")]
    ExpectedColon,
    #[error("expected ')' in preprocessor expression")]
    ExpectedRightParen,
    #[error("division by zero in preprocessor expression")]
    DivisionByZero,
    #[error("invalid integer constant '{0}' in preprocessor expression")]
    InvalidInteger(String),
    #[error("#line directive requires a positive integer argument")]
    InvalidLineDirective,
    #[error("{0}")]
    ErrorDirective(String),
    #[error("cannot open file '{0}': {1}")]
    Unreadable(String, std::io::Error),
}

// Packed boolean flags for macro properties
bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MacroFlags: u8 {
        const FUNCTION_LIKE = 1 << 0;
        const VARIADIC = 1 << 1;
        const BUILTIN = 1 << 2;
    }
}

/// Represents a macro definition
#[derive(Clone, Debug)]
pub struct MacroInfo {
    pub flags: MacroFlags,
    /// Parameter names; a variadic macro's last entry names the variable part
    pub params: Vec<String>,
    pub tokens: Vec<PPToken>,
}

impl MacroInfo {
    fn is_function_like(&self) -> bool {
        self.flags.contains(MacroFlags::FUNCTION_LIKE)
    }

    fn param_index(&self, tok: &PPToken) -> Option<usize> {
        if !self.is_function_like() || tok.kind != PPTokenKind::Identifier {
            return None;
        }
        self.params.iter().position(|p| *p == tok.text)
    }

    /// Same definition up to whitespace amount
    fn is_equivalent(&self, other: &MacroInfo) -> bool {
        self.flags == other.flags
            && self.params == other.params
            && self.tokens.len() == other.tokens.len()
            && self
                .tokens
                .iter()
                .zip(&other.tokens)
                .all(|(a, b)| a.text == b.text && a.has_leading_space() == b.has_leading_space())
    }
}

/// Represents conditional compilation state
#[derive(Debug, Clone)]
struct PPConditionalInfo {
    loc: SourceLoc,
    was_skipping: bool,
    found_else: bool,
    found_non_skipping: bool,
}

/// Per-file state while its lines are processed
struct FileContext {
    path: PathBuf,
    dir: PathBuf,
    found_in: Option<usize>,
    base_depth: usize,
    /// Set by `#line`: (line delta, presumed file id)
    remap: Option<(i64, usize)>,
}

/// Text sink that keeps output lines in step with source lines.
struct OutputWriter {
    text: String,
    line_markers: bool,
    cur_file: Option<usize>,
    cur_line: u32,
    at_line_start: bool,
    prev: Option<PPToken>,
}

impl OutputWriter {
    fn new(line_markers: bool) -> Self {
        OutputWriter {
            text: String::new(),
            line_markers,
            cur_file: None,
            cur_line: 1,
            at_line_start: true,
            prev: None,
        }
    }

    fn end_line(&mut self) {
        if !self.at_line_start {
            self.text.push('\n');
            self.cur_line += 1;
            self.at_line_start = true;
        }
    }

    fn marker(&mut self, file: usize, line: u32, files: &[String]) {
        self.end_line();
        if self.line_markers {
            let _ = writeln!(self.text, "# {} \"{}\"", line, escape_string(&files[file]));
        }
        self.cur_file = Some(file);
        self.cur_line = line;
    }

    fn move_to(&mut self, file: usize, line: u32, files: &[String]) {
        let far = line < self.cur_line || line > self.cur_line + 8;
        if self.cur_file != Some(file) || (far && self.line_markers) {
            self.marker(file, line, files);
        } else if line != self.cur_line {
            if self.line_markers {
                for _ in self.cur_line..line {
                    self.text.push('\n');
                }
            } else if !self.at_line_start {
                self.text.push('\n');
            }
            self.cur_line = line;
            self.at_line_start = true;
        }
    }

    fn emit(&mut self, tok: &PPToken, files: &[String]) {
        self.move_to(tok.file, tok.line, files);
        if !self.at_line_start {
            let pastes = self.prev.as_ref().is_some_and(|prev| needs_separator(prev, tok));
            if tok.has_leading_space() || pastes {
                self.text.push(' ');
            }
        }
        self.text.push_str(&tok.text);
        self.at_line_start = false;
        self.prev = Some(tok.clone());
    }

    fn finish(mut self) -> String {
        self.end_line();
        self.text
    }
}

/// C preprocessor producing text output with line markers
pub struct Preprocessor<'a> {
    diag: &'a mut DiagnosticEngine,
    config: PPConfig,
    header_search: HeaderSearch,
    macros: HashMap<String, MacroInfo>,
    /// Presumed file names, indexed by token `file`
    files: Vec<String>,
    once_included: HashSet<PathBuf>,
    conditional_stack: Vec<PPConditionalInfo>,
    include_depth: usize,
    skipping: bool,
    fatal: bool,
    out: OutputWriter,
}

impl<'a> Preprocessor<'a> {
    /// Create a new preprocessor with the builtin and command-line macros defined
    pub fn new(config: PPConfig, diag: &'a mut DiagnosticEngine) -> Self {
        let header_search = HeaderSearch::new(config.include_paths.clone(), config.system_include_paths.clone());
        let out = OutputWriter::new(config.line_markers);
        let mut pp = Preprocessor {
            diag,
            config,
            header_search,
            macros: HashMap::new(),
            files: Vec::new(),
            once_included: HashSet::new(),
            conditional_stack: Vec::new(),
            include_depth: 0,
            skipping: false,
            fatal: false,
            out,
        };

        let builtins = pp.builtin_predefines();
        pp.process_predefines(&builtins, "<built-in>");
        for def in pp.macros.values_mut() {
            def.flags |= MacroFlags::BUILTIN;
        }
        let command_line = pp.command_line_predefines();
        pp.process_predefines(&command_line, "<command line>");
        pp
    }

    pub fn is_macro_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    /// Preprocess `path` (`-` for stdin) and return the output text.
    pub fn preprocess_file(self, path: &Path) -> Result<String, PipelineError> {
        let source = if path.as_os_str() == "-" {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        } else {
            match fs::read(path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(err) => {
                    self.diag
                        .error(format!("no such file or directory: '{}': {}", path.display(), err));
                    return Err(PipelineError::Fatal);
                }
            }
        };
        Ok(self.preprocess_source(&source, path))
    }

    /// Preprocess in-memory source presumed to come from `path`.
    pub fn preprocess_source(mut self, source: &str, path: &Path) -> String {
        let name = if path.as_os_str() == "-" {
            "<stdin>".to_string()
        } else {
            path.display().to_string()
        };
        debug!("preprocessing {}", name);
        let id = self.add_file(name);
        self.out.marker(id, 1, &self.files);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.process_source(
            source,
            id,
            FileContext {
                path: path.to_path_buf(),
                dir,
                found_in: None,
                base_depth: 0,
                remap: None,
            },
        );
        self.out.finish()
    }

    fn add_file(&mut self, name: String) -> usize {
        self.files.push(name);
        self.files.len() - 1
    }

    fn builtin_predefines(&self) -> String {
        let lang = self.config.lang_opts;
        let triple = &self.config.triple;
        let pointer_bytes = triple.pointer_width().map(|w| w.bytes()).unwrap_or(8);
        let long_bytes = if triple.operating_system == OperatingSystem::Windows {
            4
        } else {
            pointer_bytes
        };

        let mut defs: Vec<(String, String)> = vec![
            ("__STDC__".into(), "1".into()),
            ("__STDC_HOSTED__".into(), "1".into()),
            ("__GNUC__".into(), "4".into()),
            ("__GNUC_MINOR__".into(), "2".into()),
            ("__CENDOL__".into(), "1".into()),
            ("__CHAR_BIT__".into(), "8".into()),
            ("__SIZEOF_SHORT__".into(), "2".into()),
            ("__SIZEOF_INT__".into(), "4".into()),
            ("__SIZEOF_LONG__".into(), long_bytes.to_string()),
            ("__SIZEOF_LONG_LONG__".into(), "8".into()),
            ("__SIZEOF_POINTER__".into(), pointer_bytes.to_string()),
            ("__SIZEOF_SIZE_T__".into(), pointer_bytes.to_string()),
            ("__SCHAR_MAX__".into(), "127".into()),
            ("__SHRT_MAX__".into(), "32767".into()),
            ("__INT_MAX__".into(), "2147483647".into()),
            ("__LONG_LONG_MAX__".into(), "9223372036854775807LL".into()),
            ("__SIZE_TYPE__".into(), "unsigned long".into()),
            ("__PTRDIFF_TYPE__".into(), "long".into()),
            ("__INTPTR_TYPE__".into(), "long".into()),
            ("__WCHAR_TYPE__".into(), "int".into()),
            ("__ORDER_LITTLE_ENDIAN__".into(), "1234".into()),
            ("__ORDER_BIG_ENDIAN__".into(), "4321".into()),
        ];
        let long_max = if long_bytes == 8 {
            "9223372036854775807L"
        } else {
            "2147483647L"
        };
        defs.push(("__LONG_MAX__".into(), long_max.into()));

        if let Some(version) = lang.c_standard.stdc_version() {
            defs.push(("__STDC_VERSION__".into(), version.into()));
        }
        if !lang.gnu_mode() {
            defs.push(("__STRICT_ANSI__".into(), "1".into()));
        }
        if lang.asm_preprocessor {
            defs.push(("__ASSEMBLER__".into(), "1".into()));
        }
        if self.config.optimize {
            defs.push(("__OPTIMIZE__".into(), "1".into()));
        }
        if pointer_bytes == 8 && long_bytes == 8 {
            defs.push(("__LP64__".into(), "1".into()));
            defs.push(("_LP64".into(), "1".into()));
        }
        let byte_order = match triple.endianness() {
            Ok(Endianness::Big) => "__ORDER_BIG_ENDIAN__",
            _ => "__ORDER_LITTLE_ENDIAN__",
        };
        defs.push(("__BYTE_ORDER__".into(), byte_order.into()));

        let arch_macros: &[&str] = match triple.architecture {
            Architecture::X86_64 => &["__x86_64__", "__x86_64", "__amd64__", "__amd64"],
            Architecture::Aarch64(_) => &["__aarch64__"],
            Architecture::X86_32(_) => &["__i386__", "__i386"],
            Architecture::Riscv64(_) => &["__riscv"],
            _ => &[],
        };
        let os_macros: &[&str] = match triple.operating_system {
            OperatingSystem::Linux => &["__linux__", "__linux", "__unix__", "__unix"],
            OperatingSystem::Windows => &["_WIN32"],
            _ => &[],
        };
        let format_macros: &[&str] = match triple.binary_format {
            BinaryFormat::Elf => &["__ELF__"],
            BinaryFormat::Macho => &["__APPLE__", "__MACH__"],
            _ => &[],
        };
        for name in arch_macros.iter().chain(os_macros).chain(format_macros) {
            defs.push((name.to_string(), "1".into()));
        }
        if lang.gnu_mode() && triple.operating_system == OperatingSystem::Linux {
            defs.push(("linux".into(), "1".into()));
            defs.push(("unix".into(), "1".into()));
        }

        defs.iter()
            .map(|(name, value)| format!("#define {} {}\n", name, value))
            .collect()
    }

    fn command_line_predefines(&self) -> String {
        let mut text = String::new();
        for def in &self.config.defines {
            let (name, value) = def.split_once('=').unwrap_or((def.as_str(), "1"));
            let _ = writeln!(text, "#define {} {}", name, value);
        }
        for undef in &self.config.undefines {
            let _ = writeln!(text, "#undef {}", undef);
        }
        text
    }

    fn process_predefines(&mut self, text: &str, name: &str) {
        let id = self.add_file(name.to_string());
        let ctx = FileContext {
            path: PathBuf::from(name),
            dir: PathBuf::new(),
            found_in: None,
            base_depth: self.conditional_stack.len(),
            remap: None,
        };
        self.process_source(text, id, ctx);
    }

    fn process_source(&mut self, source: &str, file_id: usize, mut ctx: FileContext) {
        let tokens = PPLexer::new(source, file_id).tokenize();
        let mut pending: Vec<PPToken> = Vec::new();

        for mut line in split_lines(tokens) {
            if self.fatal {
                return;
            }
            let raw_line = line[0].line;
            if let Some((delta, file)) = ctx.remap {
                for tok in &mut line {
                    tok.line = (tok.line as i64 + delta).max(1) as u32;
                    tok.file = file;
                }
            }
            if line[0].is_punct("#") {
                self.flush(&mut pending);
                self.handle_directive(line, raw_line, &mut ctx);
            } else if !self.skipping {
                pending.extend(line);
            }
        }
        if !self.skipping {
            self.flush(&mut pending);
        }

        while self.conditional_stack.len() > ctx.base_depth {
            if let Some(info) = self.conditional_stack.pop() {
                self.skipping = info.was_skipping;
                self.report(PPError::UnterminatedConditional, info.loc);
            }
        }
    }

    fn flush(&mut self, pending: &mut Vec<PPToken>) {
        if pending.is_empty() {
            return;
        }
        let expanded = self.expand(std::mem::take(pending));
        for tok in &expanded {
            self.out.emit(tok, &self.files);
        }
    }

    fn loc(&self, tok: &PPToken) -> SourceLoc {
        let file = self.files.get(tok.file).cloned().unwrap_or_default();
        SourceLoc::new(file, tok.line, tok.column)
    }

    fn report(&mut self, err: PPError, loc: SourceLoc) {
        let level = match err {
            PPError::FileNotFound(_) | PPError::IncludeDepthExceeded => {
                self.fatal = true;
                DiagnosticLevel::Fatal
            }
            _ => DiagnosticLevel::Error,
        };
        self.diag.report(Diagnostic::new(level, err.to_string()).at(loc));
    }

    fn handle_directive(&mut self, line: Vec<PPToken>, raw_line: u32, ctx: &mut FileContext) {
        let loc = self.loc(&line[0]);
        // null directive
        let Some(name_tok) = line.get(1) else { return };
        let args = &line[2..];

        let name = match name_tok.kind {
            PPTokenKind::Identifier => name_tok.text.as_str(),
            // GNU line marker: # 33 "file.c" 2
            PPTokenKind::Number => "line",
            _ if self.skipping || self.config.lang_opts.asm_preprocessor => return,
            _ => {
                self.report(PPError::InvalidDirective, loc);
                return;
            }
        };
        let args = if name_tok.kind == PPTokenKind::Number { &line[1..] } else { args };
        trace!("directive #{} at {}", name, loc);

        let result = match name {
            "if" => {
                let cond = !self.skipping && self.eval_condition(args, ctx, &loc);
                self.push_conditional(cond, loc.clone());
                Ok(())
            }
            "ifdef" | "ifndef" => {
                let cond = !self.skipping && self.eval_ifdef(args, name == "ifndef", &loc);
                self.push_conditional(cond, loc.clone());
                Ok(())
            }
            "elif" => self.handle_elif(args, ctx),
            "else" => self.handle_else(ctx),
            "endif" => self.handle_endif(ctx),
            _ if self.skipping => Ok(()),
            "define" => self.handle_define(args),
            "undef" => self.handle_undef(args),
            "include" => self.handle_include(args, ctx, false),
            "include_next" => self.handle_include(args, ctx, true),
            "line" => self.handle_line(args, raw_line, ctx),
            "pragma" => {
                self.handle_pragma(&line, ctx);
                Ok(())
            }
            "error" => Err(PPError::ErrorDirective(spell(args))),
            "warning" => {
                self.diag
                    .report(Diagnostic::warning(spell(args)).with_code("#warnings").at(loc.clone()));
                Ok(())
            }
            _ if self.config.lang_opts.asm_preprocessor => Ok(()),
            _ => Err(PPError::InvalidDirective),
        };
        if let Err(err) = result {
            self.report(err, loc);
        }
    }

    fn push_conditional(&mut self, condition: bool, loc: SourceLoc) {
        self.conditional_stack.push(PPConditionalInfo {
            loc,
            was_skipping: self.skipping,
            found_else: false,
            // an enclosing skipped group keeps every branch inactive
            found_non_skipping: condition || self.skipping,
        });
        self.skipping = !condition;
    }

    fn handle_elif(&mut self, args: &[PPToken], ctx: &FileContext) -> Result<(), PPError> {
        if self.conditional_stack.len() <= ctx.base_depth {
            return Err(PPError::WithoutIf("elif"));
        }
        let Some(current) = self.conditional_stack.last() else {
            return Err(PPError::WithoutIf("elif"));
        };
        if current.found_else {
            return Err(PPError::AfterElse("elif"));
        }
        if current.found_non_skipping {
            self.skipping = true;
            return Ok(());
        }
        let loc = current.loc.clone();
        self.skipping = false;
        let condition = self.eval_condition(args, ctx, &loc);
        if let Some(current) = self.conditional_stack.last_mut() {
            current.found_non_skipping = condition;
        }
        self.skipping = !condition;
        Ok(())
    }

    fn handle_else(&mut self, ctx: &FileContext) -> Result<(), PPError> {
        if self.conditional_stack.len() <= ctx.base_depth {
            return Err(PPError::WithoutIf("else"));
        }
        let Some(current) = self.conditional_stack.last_mut() else {
            return Err(PPError::WithoutIf("else"));
        };
        if current.found_else {
            return Err(PPError::AfterElse("else"));
        }
        current.found_else = true;
        self.skipping = current.found_non_skipping;
        current.found_non_skipping = true;
        Ok(())
    }

    fn handle_endif(&mut self, ctx: &FileContext) -> Result<(), PPError> {
        if self.conditional_stack.len() <= ctx.base_depth {
            return Err(PPError::WithoutIf("endif"));
        }
        if let Some(info) = self.conditional_stack.pop() {
            self.skipping = info.was_skipping;
        }
        Ok(())
    }

    fn eval_ifdef(&mut self, args: &[PPToken], negate: bool, loc: &SourceLoc) -> bool {
        match args.first() {
            Some(tok) if tok.kind == PPTokenKind::Identifier => self.macros.contains_key(&tok.text) != negate,
            Some(_) => {
                self.report(PPError::MacroNameNotIdentifier, loc.clone());
                false
            }
            None => {
                self.report(PPError::MacroNameMissing, loc.clone());
                false
            }
        }
    }

    fn eval_condition(&mut self, args: &[PPToken], ctx: &FileContext, loc: &SourceLoc) -> bool {
        let result = self
            .fold_defined(args, ctx)
            .map(|folded| self.expand(folded))
            .and_then(|expanded| ExpressionParser::new(&expanded).parse_all()?.evaluate());
        match result {
            Ok(value) => value != 0,
            Err(err) => {
                self.report(err, loc.clone());
                false
            }
        }
    }

    /// Replace `defined X` and `__has_include(...)` with 0/1 before expansion.
    fn fold_defined(&self, args: &[PPToken], ctx: &FileContext) -> Result<Vec<PPToken>, PPError> {
        let mut out = Vec::with_capacity(args.len());
        let mut i = 0;
        while i < args.len() {
            let tok = &args[i];
            if tok.is_ident("defined") {
                let (name, consumed) = match (args.get(i + 1), args.get(i + 2), args.get(i + 3)) {
                    (Some(p), Some(n), Some(r)) if p.is_punct("(") && r.is_punct(")") => (n, 4),
                    (Some(n), _, _) if !n.is_punct("(") => (n, 2),
                    _ => return Err(PPError::MacroNameMissing),
                };
                if name.kind != PPTokenKind::Identifier {
                    return Err(PPError::MacroNameNotIdentifier);
                }
                let defined = self.macros.contains_key(&name.text) || name.text == "__has_include";
                out.push(number_like(tok, defined as i64));
                i += consumed;
            } else if tok.is_ident("__has_include") || tok.is_ident("__has_include_next") {
                let close = args[i..]
                    .iter()
                    .position(|t| t.is_punct(")"))
                    .ok_or(PPError::ExpectedRightParen)?;
                let inner = args.get(i + 2..i + close).ok_or(PPError::ExpectedFilename)?;
                let (name, angled) = header_name(inner).ok_or(PPError::ExpectedFilename)?;
                let found = if tok.is_ident("__has_include_next") {
                    self.header_search.resolve_next_path(&name, ctx.found_in)
                } else {
                    self.header_search.resolve_path(&name, angled, &ctx.dir)
                };
                out.push(number_like(tok, found.is_some() as i64));
                i += close + 1;
            } else {
                out.push(tok.clone());
                i += 1;
            }
        }
        Ok(out)
    }

    fn handle_define(&mut self, args: &[PPToken]) -> Result<(), PPError> {
        let name_tok = args.first().ok_or(PPError::MacroNameMissing)?;
        if name_tok.kind != PPTokenKind::Identifier {
            return Err(PPError::MacroNameNotIdentifier);
        }
        if name_tok.text == "defined" {
            return Err(PPError::DefinedAsMacroName);
        }

        let mut flags = MacroFlags::empty();
        let mut params = Vec::new();
        let mut body_start = 1;
        if args.get(1).is_some_and(|t| t.is_punct("(") && !t.has_leading_space()) {
            flags |= MacroFlags::FUNCTION_LIKE;
            let mut i = 2;
            loop {
                let tok = args.get(i).ok_or(PPError::InvalidMacroParameter)?;
                if tok.is_punct(")") && params.is_empty() {
                    i += 1;
                    break;
                }
                if tok.is_punct("...") {
                    flags |= MacroFlags::VARIADIC;
                    params.push("__VA_ARGS__".to_string());
                    i += 1;
                } else if tok.kind == PPTokenKind::Identifier && !params.contains(&tok.text) {
                    params.push(tok.text.clone());
                    i += 1;
                    // GNU named variadic parameter
                    if args.get(i).is_some_and(|t| t.is_punct("...")) {
                        flags |= MacroFlags::VARIADIC;
                        i += 1;
                    }
                } else {
                    return Err(PPError::InvalidMacroParameter);
                }
                match args.get(i) {
                    Some(t) if t.is_punct(")") => {
                        i += 1;
                        break;
                    }
                    Some(t) if t.is_punct(",") && !flags.contains(MacroFlags::VARIADIC) => i += 1,
                    _ => return Err(PPError::InvalidMacroParameter),
                }
            }
            body_start = i;
        }

        let mut tokens: Vec<PPToken> = args[body_start..].to_vec();
        for tok in &mut tokens {
            tok.flags.remove(PPTokenFlags::STARTS_LINE);
        }
        if let Some(first) = tokens.first_mut() {
            first.flags.remove(PPTokenFlags::LEADING_SPACE);
        }
        if tokens.first().is_some_and(|t| t.is_punct("##")) || tokens.last().is_some_and(|t| t.is_punct("##")) {
            return Err(PPError::PasteAtEdge);
        }

        let info = MacroInfo { flags, params, tokens };
        if info.is_function_like() {
            for (i, tok) in info.tokens.iter().enumerate() {
                if tok.is_punct("#") && info.tokens.get(i + 1).and_then(|t| info.param_index(t)).is_none() {
                    return Err(PPError::StringifyNonParameter);
                }
            }
        }

        let name = name_tok.text.clone();
        if let Some(existing) = self.macros.get(&name) {
            let builtin = existing.flags.contains(MacroFlags::BUILTIN);
            if builtin || !existing.is_equivalent(&info) {
                let (msg, code) = if builtin {
                    (format!("redefining builtin macro '{}'", name), "builtin-macro-redefined")
                } else {
                    (format!("'{}' macro redefined", name), "macro-redefined")
                };
                let loc = self.loc(name_tok);
                self.diag.report(Diagnostic::warning(msg).with_code(code).at(loc));
            }
        }
        self.macros.insert(name, info);
        Ok(())
    }

    fn handle_undef(&mut self, args: &[PPToken]) -> Result<(), PPError> {
        let name_tok = args.first().ok_or(PPError::MacroNameMissing)?;
        if name_tok.kind != PPTokenKind::Identifier {
            return Err(PPError::MacroNameNotIdentifier);
        }
        self.macros.remove(&name_tok.text);
        Ok(())
    }

    fn handle_include(&mut self, args: &[PPToken], ctx: &FileContext, next: bool) -> Result<(), PPError> {
        let (name, angled) = match header_name(args) {
            Some(found) => found,
            // computed include
            None => {
                let expanded = self.expand(args.to_vec());
                header_name(&expanded).ok_or(PPError::ExpectedFilename)?
            }
        };

        let found = if next && self.include_depth > 0 {
            self.header_search.resolve_next_path(&name, ctx.found_in)
        } else {
            self.header_search.resolve_path(&name, angled, &ctx.dir)
        };
        let Some(FoundHeader { path, index }) = found else {
            return Err(PPError::FileNotFound(name));
        };

        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
        if self.once_included.contains(&canonical) {
            return Ok(());
        }
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(PPError::IncludeDepthExceeded);
        }
        let source = fs::read(&path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .map_err(|err| PPError::Unreadable(path.display().to_string(), err))?;

        if self.header_search.is_system_header(index) {
            trace!("entering system header {}", path.display());
        }
        let id = self.add_file(path.display().to_string());
        let child = FileContext {
            dir: path.parent().map(Path::to_path_buf).unwrap_or_default(),
            path,
            found_in: index,
            base_depth: self.conditional_stack.len(),
            remap: None,
        };
        self.include_depth += 1;
        self.process_source(&source, id, child);
        self.include_depth -= 1;
        Ok(())
    }

    fn handle_line(&mut self, args: &[PPToken], raw_line: u32, ctx: &mut FileContext) -> Result<(), PPError> {
        let expanded = self.expand(args.to_vec());
        let number = expanded
            .first()
            .filter(|t| t.kind == PPTokenKind::Number && t.text.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|t| t.text.parse::<i64>().ok())
            .filter(|n| *n > 0)
            .ok_or(PPError::InvalidLineDirective)?;

        let file = match expanded.get(1) {
            Some(tok) if tok.kind == PPTokenKind::StringLiteral => {
                let name = unescape_string(&tok.text);
                self.add_file(name)
            }
            Some(_) => return Err(PPError::InvalidLineDirective),
            None => match ctx.remap {
                Some((_, file)) => file,
                None => args.first().map_or(0, |t| t.file),
            },
        };
        ctx.remap = Some((number - (raw_line as i64 + 1), file));
        Ok(())
    }

    fn handle_pragma(&mut self, line: &[PPToken], ctx: &FileContext) {
        if line.get(2).is_some_and(|t| t.is_ident("once")) {
            let canonical = fs::canonicalize(&ctx.path).unwrap_or_else(|_| ctx.path.clone());
            self.once_included.insert(canonical);
            return;
        }
        // other pragmas are passed through for the compiler
        if self.config.lang_opts.asm_preprocessor {
            return;
        }
        self.out.end_line();
        for tok in line {
            self.out.emit(tok, &self.files);
        }
        self.out.end_line();
    }

    fn expand_builtin(&self, tok: &PPToken) -> Option<PPToken> {
        let (kind, text) = match tok.text.as_str() {
            "__FILE__" => {
                let name = self.files.get(tok.file).map(String::as_str).unwrap_or_default();
                (PPTokenKind::StringLiteral, format!("\"{}\"", escape_string(name)))
            }
            "__LINE__" => (PPTokenKind::Number, tok.line.to_string()),
            "__INCLUDE_LEVEL__" => (PPTokenKind::Number, self.include_depth.to_string()),
            "__DATE__" => (
                PPTokenKind::StringLiteral,
                format!("\"{}\"", Local::now().format("%b %e %Y")),
            ),
            "__TIME__" => (
                PPTokenKind::StringLiteral,
                format!("\"{}\"", Local::now().format("%H:%M:%S")),
            ),
            _ => return None,
        };
        Some(PPToken {
            kind,
            text,
            ..tok.clone()
        })
    }

    /// Macro-expand a token sequence
    fn expand(&mut self, tokens: Vec<PPToken>) -> Vec<PPToken> {
        let mut queue: VecDeque<PPToken> = tokens.into();
        let mut out = Vec::new();

        while let Some(tok) = queue.pop_front() {
            if tok.kind != PPTokenKind::Identifier || tok.hideset.contains(&tok.text) {
                out.push(tok);
                continue;
            }
            if let Some(builtin) = self.expand_builtin(&tok) {
                out.push(builtin);
                continue;
            }
            let Some(info) = self.macros.get(&tok.text).cloned() else {
                out.push(tok);
                continue;
            };

            let mut hideset = tok.hideset.clone();
            let args = if info.is_function_like() {
                if !queue.front().is_some_and(|t| t.is_punct("(")) {
                    out.push(tok);
                    continue;
                }
                match collect_args(&mut queue, &info) {
                    Ok((args, rparen)) => {
                        hideset.retain(|name| rparen.hideset.contains(name));
                        args
                    }
                    Err(err) => {
                        let loc = self.loc(&tok);
                        self.report(err, loc);
                        continue;
                    }
                }
            } else {
                Vec::new()
            };
            hideset.push(tok.text.clone());

            let body = self.substitute(&info, &args, &tok);
            for mut t in body.into_iter().rev() {
                t.file = tok.file;
                t.line = tok.line;
                t.column = tok.column;
                t.flags.remove(PPTokenFlags::STARTS_LINE);
                for name in &hideset {
                    if !t.hideset.contains(name) {
                        t.hideset.push(name.clone());
                    }
                }
                queue.push_front(t);
            }
            if let Some(first) = queue.front_mut() {
                if first.hideset.contains(&tok.text) {
                    first.flags.set(PPTokenFlags::LEADING_SPACE, tok.has_leading_space());
                }
            }
        }
        out
    }

    fn substitute(&mut self, info: &MacroInfo, args: &[Vec<PPToken>], invocation: &PPToken) -> Vec<PPToken> {
        let body = &info.tokens;
        let variadic = info.flags.contains(MacroFlags::VARIADIC);
        let mut result: Vec<PPToken> = Vec::new();
        let mut i = 0;

        while i < body.len() {
            let tok = &body[i];
            if info.is_function_like() && tok.is_punct("#") {
                if let Some(idx) = body.get(i + 1).and_then(|t| info.param_index(t)) {
                    let mut s = stringize(&args[idx]);
                    s.flags = tok.flags;
                    result.push(s);
                    i += 2;
                    continue;
                }
            }

            let prev_is_paste = i > 0 && body[i - 1].is_punct("##");
            let next_is_paste = body.get(i + 1).is_some_and(|t| t.is_punct("##"));
            match info.param_index(tok) {
                Some(idx) => {
                    let arg = &args[idx];
                    let is_va = variadic && idx + 1 == info.params.len();
                    // GNU: `, ## __VA_ARGS__` drops the comma when there are no variable arguments
                    if prev_is_paste && is_va && result.len() >= 2 && result[result.len() - 2].is_punct(",") {
                        result.pop();
                        if arg.is_empty() {
                            result.pop();
                        } else {
                            result.extend(arg.iter().cloned());
                        }
                        i += 1;
                        continue;
                    }
                    let mut replacement = if prev_is_paste || next_is_paste {
                        arg.clone()
                    } else {
                        self.expand(arg.clone())
                    };
                    if replacement.is_empty() && (prev_is_paste || next_is_paste) {
                        replacement.push(placemarker(tok));
                    }
                    if let Some(first) = replacement.first_mut() {
                        first.flags.set(PPTokenFlags::LEADING_SPACE, tok.has_leading_space());
                    }
                    result.extend(replacement);
                }
                None => result.push(tok.clone()),
            }
            i += 1;
        }

        let pasted = self.paste_all(result, invocation);
        pasted.into_iter().filter(|t| !t.text.is_empty()).collect()
    }

    fn paste_all(&mut self, tokens: Vec<PPToken>, invocation: &PPToken) -> Vec<PPToken> {
        let mut out: Vec<PPToken> = Vec::with_capacity(tokens.len());
        let mut iter = tokens.into_iter();
        while let Some(tok) = iter.next() {
            if !tok.is_punct("##") || out.is_empty() {
                out.push(tok);
                continue;
            }
            let Some(rhs) = iter.next() else {
                out.push(tok);
                break;
            };
            let Some(lhs) = out.pop() else { break };
            if lhs.text.is_empty() {
                out.push(rhs);
                continue;
            }
            if rhs.text.is_empty() {
                out.push(lhs);
                continue;
            }
            let joined = format!("{}{}", lhs.text, rhs.text);
            let relexed = lex_fragment(&joined);
            if relexed.len() == 1 {
                out.push(PPToken {
                    kind: relexed[0].kind,
                    text: joined,
                    ..lhs
                });
            } else {
                let loc = self.loc(invocation);
                self.report(PPError::InvalidPaste(joined), loc);
                out.push(lhs);
                out.push(rhs);
            }
        }
        out
    }
}

/// Split a token stream into logical lines
fn split_lines(tokens: Vec<PPToken>) -> Vec<Vec<PPToken>> {
    let mut lines: Vec<Vec<PPToken>> = Vec::new();
    for tok in tokens {
        match lines.last_mut() {
            Some(line) if !tok.starts_line() => line.push(tok),
            _ => lines.push(vec![tok]),
        }
    }
    lines
}

/// Collect the arguments of a function-like macro call. The queue starts at `(`.
fn collect_args(queue: &mut VecDeque<PPToken>, info: &MacroInfo) -> Result<(Vec<Vec<PPToken>>, PPToken), PPError> {
    queue.pop_front();
    let variadic = info.flags.contains(MacroFlags::VARIADIC);
    let mut args: Vec<Vec<PPToken>> = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;

    let rparen = loop {
        let Some(mut tok) = queue.pop_front() else {
            return Err(PPError::UnterminatedInvocation);
        };
        if tok.starts_line() {
            tok.flags.remove(PPTokenFlags::STARTS_LINE);
            tok.flags.insert(PPTokenFlags::LEADING_SPACE);
        }
        if tok.is_punct("(") {
            depth += 1;
        } else if tok.is_punct(")") {
            if depth == 0 {
                args.push(std::mem::take(&mut current));
                break tok;
            }
            depth -= 1;
        } else if tok.is_punct(",") && depth == 0 && !(variadic && args.len() + 1 >= info.params.len()) {
            args.push(std::mem::take(&mut current));
            continue;
        }
        current.push(tok);
    };

    let params = info.params.len();
    if params == 0 && args.len() == 1 && args[0].is_empty() {
        return Ok((Vec::new(), rparen));
    }
    if variadic && args.len() + 1 == params {
        args.push(Vec::new());
    }
    if args.len() < params {
        return Err(PPError::TooFewArguments);
    }
    if args.len() > params {
        return Err(PPError::TooManyArguments);
    }
    Ok((args, rparen))
}

fn stringize(arg: &[PPToken]) -> PPToken {
    let mut text = String::from("\"");
    for (i, tok) in arg.iter().enumerate() {
        if i > 0 && (tok.has_leading_space() || tok.starts_line()) {
            text.push(' ');
        }
        if matches!(tok.kind, PPTokenKind::StringLiteral | PPTokenKind::CharLiteral) {
            text.push_str(&escape_string(&tok.text));
        } else {
            text.push_str(&tok.text);
        }
    }
    text.push('"');
    PPToken::new(PPTokenKind::StringLiteral, text)
}

fn placemarker(at: &PPToken) -> PPToken {
    PPToken {
        kind: PPTokenKind::Other,
        text: String::new(),
        ..at.clone()
    }
}

fn number_like(at: &PPToken, value: i64) -> PPToken {
    PPToken {
        kind: PPTokenKind::Number,
        text: value.to_string(),
        ..at.clone()
    }
}

/// `"name"` or `< name >` as found in an include directive
fn header_name(tokens: &[PPToken]) -> Option<(String, bool)> {
    let first = tokens.first()?;
    if first.kind == PPTokenKind::StringLiteral && first.text.starts_with('"') {
        return Some((first.text[1..first.text.len() - 1].to_string(), false));
    }
    if first.is_punct("<") {
        let close = tokens.iter().position(|t| t.is_punct(">"))?;
        let name: String = tokens[1..close]
            .iter()
            .enumerate()
            .map(|(i, t)| {
                if i > 0 && t.has_leading_space() {
                    format!(" {}", t.text)
                } else {
                    t.text.clone()
                }
            })
            .collect();
        return Some((name, true));
    }
    None
}

/// Spelling of a directive's argument tokens, as used for `#error`.
fn spell(tokens: &[PPToken]) -> String {
    tokens
        .iter()
        .enumerate()
        .map(|(i, t)| {
            if i > 0 && t.has_leading_space() {
                format!(" {}", t.text)
            } else {
                t.text.clone()
            }
        })
        .join("")
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn unescape_string(literal: &str) -> String {
    let inner = literal.trim_start_matches('"').trim_end_matches('"');
    inner.replace("\\\\", "\\").replace("\\\"", "\"")
}
