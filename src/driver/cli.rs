//! Driver command-line grammar.
//!
//! The driver speaks the usual `cc` dialect. Clap handles the short options
//! directly (`-Wall`, `-O2`, `-DFOO=1`, `-fsyntax-only` are short options with
//! attached values); the few single-dash long spellings are rewritten to their
//! `--` form by [`normalize_args`] first.

use std::path::PathBuf;

use clap::error::{ContextKind, ContextValue, ErrorKind};
use clap::{ArgAction, ArgMatches, Parser as CliParser};

use super::types::InputType;

/// CLI interface using clap
#[derive(CliParser, Debug, Default)]
#[clap(name = "cendol", disable_help_flag = true, disable_version_flag = true)]
pub struct DriverArgs {
    /// Input files
    #[clap(value_name = "INPUT")]
    pub inputs: Vec<PathBuf>,

    /// Compile and assemble, but do not link
    #[clap(short = 'c')]
    pub compile_only: bool,

    /// Compile only; emit assembly
    #[clap(short = 'S')]
    pub emit_assembly: bool,

    /// Preprocess only
    #[clap(short = 'E')]
    pub preprocess_only: bool,

    /// Output file
    #[clap(short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Include search paths
    #[clap(short = 'I', value_name = "DIR", action = ArgAction::Append)]
    pub include_paths: Vec<PathBuf>,

    /// Preprocessor macro definitions
    #[clap(short = 'D', value_name = "NAME[=VALUE]", action = ArgAction::Append)]
    pub defines: Vec<String>,

    /// Undefine a macro
    #[clap(short = 'U', value_name = "NAME", action = ArgAction::Append)]
    pub undefines: Vec<String>,

    /// Warning options, also `-Wl,<args>` for the linker
    #[clap(short = 'W', value_name = "WARNING", action = ArgAction::Append)]
    pub warnings: Vec<String>,

    /// Suppress all warnings
    #[clap(short = 'w')]
    pub no_warnings: bool,

    /// Optimization level
    #[clap(short = 'O', value_name = "LEVEL")]
    pub optimization: Option<String>,

    /// Generate debug information
    #[clap(short = 'g')]
    pub debug_info: bool,

    /// Feature flags (`-fsyntax-only`, `-fcolor-diagnostics`, ...)
    #[clap(short = 'f', value_name = "FEATURE", action = ArgAction::Append)]
    pub features: Vec<String>,

    /// Treat subsequent inputs as having this language
    #[clap(short = 'x', value_name = "LANG", action = ArgAction::Append)]
    pub languages: Vec<String>,

    /// Suppress line markers in preprocessor output
    #[clap(short = 'P')]
    pub suppress_line_markers: bool,

    /// Show commands to run
    #[clap(short = 'v')]
    pub verbose: bool,

    /// Print version information
    #[clap(long = "version")]
    pub print_version: bool,

    /// Generate code for the given target
    #[clap(long = "target", value_name = "TRIPLE")]
    pub target: Option<String>,

    /// Language standard to compile for
    #[clap(long = "std", value_name = "STANDARD")]
    pub c_standard: Option<String>,

    /// Warn about non-standard constructs
    #[clap(long = "pedantic")]
    pub pedantic: bool,

    /// Override the builtin resource directory
    #[clap(long = "resource-dir", value_name = "DIR")]
    pub resource_dir: Option<PathBuf>,

    /// Keep intermediate files (`cwd` or `obj`)
    #[clap(long = "save-temps", value_name = "WHERE", num_args = 0..=1, require_equals = true, default_missing_value = "cwd")]
    pub save_temps: Option<String>,
}

/// Rewrite `cc` spellings clap cannot express into equivalent clap spellings.
///
/// `args[0]` is the program name and is kept as is.
pub fn normalize_args(args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.iter();
    if let Some(program) = iter.next() {
        out.push(program.clone());
    }

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-O" => out.push("-O1".to_string()),
            "-g0" => {}
            "-target" | "-resource-dir" => {
                out.push(format!("-{}", arg));
                if let Some(value) = iter.next() {
                    out.push(value.clone());
                }
            }
            "-pedantic" | "-pedantic-errors" => out.push("--pedantic".to_string()),
            "-save-temps" => out.push("--save-temps".to_string()),
            a if a.starts_with("-g") && a.len() > 2 => out.push("-g".to_string()),
            a if a.starts_with("-std=") || a.starts_with("-save-temps=") || a.starts_with("-resource-dir=") => {
                out.push(format!("-{}", a))
            }
            _ => out.push(arg.clone()),
        }
    }
    out
}

/// One line describing a clap failure, phrased like a driver diagnostic.
pub fn describe_error(err: &clap::Error) -> String {
    match (err.kind(), err.get(ContextKind::InvalidArg)) {
        (ErrorKind::UnknownArgument, Some(ContextValue::String(arg))) => {
            format!("unknown argument: '{}'", arg)
        }
        _ => {
            let rendered = err.render().to_string();
            rendered
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ")
                .to_string()
        }
    }
}

/// Pair every input with its type, honoring the position of each `-x`.
pub fn typed_inputs(matches: &ArgMatches, args: &DriverArgs) -> Result<Vec<(PathBuf, InputType)>, String> {
    // (position, language) for each -x, in command-line order
    let languages: Vec<(usize, &str)> = matches
        .indices_of("languages")
        .map(|indices| indices.zip(args.languages.iter().map(String::as_str)).collect())
        .unwrap_or_default();

    for (_, lang) in &languages {
        if *lang != "none" && InputType::from_language(lang).is_none() {
            return Err(format!("language not recognized: '{}'", lang));
        }
    }

    let input_indices: Vec<usize> = matches
        .indices_of("inputs")
        .map(|indices| indices.collect())
        .unwrap_or_default();

    let typed = args
        .inputs
        .iter()
        .zip(input_indices)
        .map(|(path, position)| {
            let forced = languages
                .iter()
                .rev()
                .find(|(lang_pos, _)| *lang_pos < position)
                .and_then(|(_, lang)| InputType::from_language(lang));
            let ty = forced.unwrap_or_else(|| InputType::from_path(path));
            (path.clone(), ty)
        })
        .collect();
    Ok(typed)
}
