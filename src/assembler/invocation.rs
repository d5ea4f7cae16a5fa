use std::path::PathBuf;
use std::str::FromStr;

use clap::{ArgAction, CommandFactory, FromArgMatches, Parser as CliParser, ValueEnum};
use log::debug;
use target_lexicon::Triple;

use crate::diagnostic::DiagnosticEngine;
use crate::driver::cli::describe_error;

/// `-cc1as` command line
#[derive(CliParser, Debug)]
#[clap(name = "-cc1as", disable_help_flag = true, disable_version_flag = true)]
struct Cc1asArgs {
    #[clap(long = "triple", value_name = "TRIPLE", required = true)]
    triple: String,

    #[clap(short = 'o', value_name = "FILE", default_value = "-")]
    output: PathBuf,

    #[clap(long = "filetype", value_enum, default_value = "obj")]
    filetype: FileType,

    #[clap(short = 'I', value_name = "DIR", action = ArgAction::Append)]
    include_paths: Vec<PathBuf>,

    #[clap(long = "main-file-name", value_name = "NAME")]
    main_file_name: Option<String>,

    #[clap(short = 'g')]
    debug_info: bool,

    #[clap(long = "fatal-warnings")]
    fatal_warnings: bool,

    #[clap(value_name = "INPUT", default_value = "-")]
    input: PathBuf,
}

/// What the assembler writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FileType {
    #[default]
    Obj,
    /// Assemble and check, write nothing
    Null,
}

#[derive(Debug, Clone)]
pub struct AssemblerInvocation {
    pub triple: Triple,
    pub input: PathBuf,
    pub output: PathBuf,
    pub filetype: FileType,
    pub include_paths: Vec<PathBuf>,
    pub main_file_name: Option<String>,
    pub debug_info: bool,
    /// Report warnings as errors
    pub fatal_warnings: bool,
}

impl AssemblerInvocation {
    /// Parse the arguments that follow the `-cc1as` marker.
    pub fn create_from_args(args: &[String], sink: &mut DiagnosticEngine) -> Option<AssemblerInvocation> {
        debug!("-cc1as arguments: {:?}", args);
        let argv = std::iter::once("-cc1as").chain(args.iter().map(String::as_str));
        let parsed = match Cc1asArgs::command()
            .try_get_matches_from(argv)
            .and_then(|matches| Cc1asArgs::from_arg_matches(&matches))
        {
            Ok(parsed) => parsed,
            Err(err) => {
                sink.error(describe_error(&err));
                return None;
            }
        };

        let Ok(triple) = Triple::from_str(&parsed.triple) else {
            sink.error(format!("unknown target triple '{}'", parsed.triple));
            return None;
        };

        Some(AssemblerInvocation {
            triple,
            input: parsed.input,
            output: parsed.output,
            filetype: parsed.filetype,
            include_paths: parsed.include_paths,
            main_file_name: parsed.main_file_name,
            debug_info: parsed.debug_info,
            fatal_warnings: parsed.fatal_warnings,
        })
    }
}
