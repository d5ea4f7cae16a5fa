//! `-cc1` argument grammar and the validated invocation built from it.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{ArgAction, ArgGroup, CommandFactory, FromArgMatches, Parser as CliParser};
use log::debug;
use target_lexicon::{Architecture, BinaryFormat, Triple};

use crate::codegen::{CodegenOptions, OptLevel};
use crate::diagnostic::{DiagnosticEngine, DiagnosticOptions};
use crate::driver::cli::describe_error;
use crate::lang_options::{CStandard, LangOptions};
use crate::pp::PPConfig;

/// `-cc1` command line
#[derive(CliParser, Debug, Default)]
#[clap(name = "-cc1", disable_help_flag = true, disable_version_flag = true)]
#[clap(group(ArgGroup::new("action").multiple(false)))]
struct Cc1Args {
    /// Preprocess only
    #[clap(short = 'E', group = "action")]
    preprocess: bool,

    /// Parse and check only (the default action)
    #[clap(long = "fsyntax-only", group = "action")]
    syntax_only: bool,

    /// Emit assembly
    #[clap(short = 'S', group = "action")]
    emit_assembly: bool,

    /// Emit an object file
    #[clap(long = "emit-obj", group = "action")]
    emit_obj: bool,

    #[clap(long = "triple", value_name = "TRIPLE", required = true)]
    triple: String,

    #[clap(short = 'I', value_name = "DIR", action = ArgAction::Append)]
    include_paths: Vec<PathBuf>,

    #[clap(long = "internal-isystem", value_name = "DIR", action = ArgAction::Append)]
    system_include_paths: Vec<PathBuf>,

    #[clap(long = "resource-dir", value_name = "DIR")]
    resource_dir: Option<PathBuf>,

    #[clap(short = 'D', value_name = "NAME[=VALUE]", action = ArgAction::Append)]
    defines: Vec<String>,

    #[clap(short = 'U', value_name = "NAME", action = ArgAction::Append)]
    undefines: Vec<String>,

    /// Omit line markers from `-E` output
    #[clap(short = 'P')]
    no_line_markers: bool,

    #[clap(short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    #[clap(short = 'x', value_name = "LANG")]
    language: Option<String>,

    #[clap(long = "main-file-name", value_name = "NAME")]
    main_file_name: Option<String>,

    #[clap(long = "std", value_name = "STANDARD")]
    c_standard: Option<String>,

    #[clap(long = "pedantic")]
    pedantic: bool,

    #[clap(short = 'O', value_name = "LEVEL")]
    optimization: Option<String>,

    #[clap(short = 'W', value_name = "WARNING", action = ArgAction::Append)]
    warnings: Vec<String>,

    #[clap(short = 'w')]
    no_warnings: bool,

    #[clap(short = 'g')]
    debug_info: bool,

    #[clap(long = "fcolor-diagnostics")]
    color_diagnostics: bool,

    #[clap(long = "diagnostic-log-file", value_name = "FILE")]
    diagnostic_log_file: Option<PathBuf>,

    #[clap(value_name = "INPUT", required = true)]
    input: PathBuf,
}

/// What the front-end produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontendAction {
    PreprocessOnly,
    #[default]
    SyntaxOnly,
    EmitAssembly,
    EmitObj,
}

impl FrontendAction {
    /// Actions that run code generation
    pub fn needs_codegen(self) -> bool {
        matches!(self, FrontendAction::EmitAssembly | FrontendAction::EmitObj)
    }
}

/// Language of the front-end input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputLanguage {
    #[default]
    C,
    /// Already preprocessed C; the preprocessor is skipped
    PreprocessedC,
    AsmWithCpp,
}

impl InputLanguage {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "c" => Some(InputLanguage::C),
            "cpp-output" => Some(InputLanguage::PreprocessedC),
            "assembler-with-cpp" => Some(InputLanguage::AsmWithCpp),
            _ => None,
        }
    }

    fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("i") => InputLanguage::PreprocessedC,
            Some("S") | Some("sx") => InputLanguage::AsmWithCpp,
            _ => InputLanguage::C,
        }
    }
}

/// Everything one front-end run needs, validated
#[derive(Debug, Clone)]
pub struct CompilerInvocation {
    pub action: FrontendAction,
    pub input: PathBuf,
    /// `-` writes to stdout
    pub output: PathBuf,
    pub language: InputLanguage,
    /// Source name recorded in printed assembly
    pub main_file_name: String,
    pub resource_dir: Option<PathBuf>,
    pub lang_opts: LangOptions,
    pub preprocessor: PPConfig,
    pub codegen: CodegenOptions,
    pub diagnostics: DiagnosticOptions,
    pub debug_info: bool,
}

impl Default for CompilerInvocation {
    fn default() -> Self {
        CompilerInvocation {
            action: FrontendAction::default(),
            input: PathBuf::from("-"),
            output: PathBuf::from("-"),
            language: InputLanguage::default(),
            main_file_name: "-".to_string(),
            resource_dir: None,
            lang_opts: LangOptions::default(),
            preprocessor: PPConfig::default(),
            codegen: CodegenOptions {
                triple: Triple::host(),
                opt_level: OptLevel::None,
            },
            diagnostics: DiagnosticOptions::default(),
            debug_info: false,
        }
    }
}

impl CompilerInvocation {
    /// Fill `invocation` from a `-cc1` argument list whose first element is the marker.
    ///
    /// Problems are reported to `diags`; returns `false` when any was found.
    pub fn create_from_args(invocation: &mut CompilerInvocation, args: &[String], diags: &mut DiagnosticEngine) -> bool {
        debug!("-cc1 arguments: {:?}", args);
        let parsed = match Cc1Args::command()
            .try_get_matches_from(args)
            .and_then(|matches| Cc1Args::from_arg_matches(&matches))
        {
            Ok(parsed) => parsed,
            Err(err) => {
                diags.error(describe_error(&err));
                return false;
            }
        };

        let errors_before = diags.num_errors();
        let action = if parsed.preprocess {
            FrontendAction::PreprocessOnly
        } else if parsed.emit_assembly {
            FrontendAction::EmitAssembly
        } else if parsed.emit_obj {
            FrontendAction::EmitObj
        } else {
            FrontendAction::SyntaxOnly
        };

        let language = match &parsed.language {
            Some(name) => InputLanguage::from_name(name).unwrap_or_else(|| {
                diags.error(format!("invalid value '{}' in '-x {}'", name, name));
                InputLanguage::C
            }),
            None => InputLanguage::from_path(&parsed.input),
        };
        if language == InputLanguage::AsmWithCpp && action != FrontendAction::PreprocessOnly {
            diags.error("assembler-with-cpp input can only be preprocessed by the front-end");
        }

        let c_standard = match &parsed.c_standard {
            Some(std) => CStandard::parse(std).unwrap_or_else(|| {
                diags.error(format!("invalid value '{}' in '-std={}'", std, std));
                CStandard::default()
            }),
            None => CStandard::default(),
        };

        let triple = match Triple::from_str(&parsed.triple) {
            Ok(triple) => triple,
            Err(_) => {
                diags.error(format!("unknown target triple '{}'", parsed.triple));
                Triple::host()
            }
        };
        if action.needs_codegen() {
            if triple.binary_format != BinaryFormat::Elf {
                diags.error(format!("unsupported object format for target '{}'", triple));
            } else if !matches!(triple.architecture, Architecture::X86_64 | Architecture::Aarch64(_)) {
                diags.error(format!("no code generator for target '{}'", triple));
            }
        }

        let opt_level = match &parsed.optimization {
            Some(level) => OptLevel::from_flag(level).unwrap_or_else(|| {
                diags.error(format!("invalid integral value '{}' in '-O{}'", level, level));
                OptLevel::None
            }),
            None => OptLevel::None,
        };

        if diags.num_errors() > errors_before {
            return false;
        }

        let lang_opts = LangOptions {
            c_standard,
            pedantic: parsed.pedantic,
            asm_preprocessor: language == InputLanguage::AsmWithCpp,
        };
        let mut diagnostics = DiagnosticOptions::from_warnings(&parsed.warnings, parsed.no_warnings);
        diagnostics.show_colors = parsed.color_diagnostics;
        diagnostics.log_file = parsed.diagnostic_log_file;

        *invocation = CompilerInvocation {
            action,
            main_file_name: parsed
                .main_file_name
                .unwrap_or_else(|| parsed.input.display().to_string()),
            output: parsed.output.unwrap_or_else(|| PathBuf::from("-")),
            input: parsed.input,
            language,
            resource_dir: parsed.resource_dir,
            lang_opts,
            preprocessor: PPConfig {
                include_paths: parsed.include_paths,
                system_include_paths: parsed.system_include_paths,
                defines: parsed.defines,
                undefines: parsed.undefines,
                lang_opts,
                triple: triple.clone(),
                optimize: opt_level != OptLevel::None,
                line_markers: !parsed.no_line_markers,
            },
            codegen: CodegenOptions { triple, opt_level },
            diagnostics,
            debug_info: parsed.debug_info,
        };
        true
    }
}
