//! Compiler driver: turns a `cc`-style command line into a list of jobs.
//!
//! The driver never runs anything. It decides, per input, which in-process
//! tool invocations (`-cc1` front-end, `-cc1as` assembler) and which external
//! link step are needed and returns them as a [`Compilation`].

pub mod cli;
pub mod compilation;
pub mod types;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::{CommandFactory, FromArgMatches};
use log::debug;
use target_lexicon::{Architecture, Triple};

use crate::diagnostic::{Diagnostic, DiagnosticEngine};
use crate::lang_options::CStandard;

use cli::DriverArgs;
pub use compilation::{Compilation, Job};
use types::{InputType, Phase};

/// Marker of a front-end job.
pub const CC1_MARKER: &str = "-cc1";
/// Marker of a standalone assembler job.
pub const CC1AS_MARKER: &str = "-cc1as";
/// Executable used for link jobs.
pub const LINKER: &str = "ld";

const ACCEPTED_FEATURES: &[&str] = &[
    "syntax-only",
    "color-diagnostics",
    "no-color-diagnostics",
    "PIC",
    "pic",
    "no-PIC",
    "no-pic",
];

/// Main compiler driver
#[derive(Debug, Clone)]
pub struct Driver {
    name: String,
    default_triple: Triple,
    pub resource_dir: PathBuf,
    check_inputs_exist: bool,
}

/// Everything the planner derived from the command line.
struct PlanOptions {
    args: DriverArgs,
    triple: Triple,
    resource_dir: PathBuf,
    phase: Phase,
    color_diagnostics: bool,
    linker_args: Vec<String>,
    warnings: Vec<String>,
}

impl Driver {
    pub fn new(name: impl Into<String>, default_triple: Triple, resource_dir: impl Into<PathBuf>) -> Self {
        Driver {
            name: name.into(),
            default_triple,
            resource_dir: resource_dir.into(),
            check_inputs_exist: true,
        }
    }

    pub fn set_check_inputs_exist(&mut self, check: bool) {
        self.check_inputs_exist = check;
    }

    pub fn check_inputs_exist(&self) -> bool {
        self.check_inputs_exist
    }

    /// Program name as given in `argv[0]`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Target implied by a prefixed program name such as `aarch64-linux-gnu-cc`.
    pub fn target_from_program_name(&self) -> Option<Triple> {
        let file_name = Path::new(&self.name).file_name()?.to_str()?;
        let (prefix, _) = file_name.rsplit_once('-')?;
        let triple = Triple::from_str(prefix).ok()?;
        (triple.architecture != Architecture::Unknown).then_some(triple)
    }

    /// Plan the jobs for `args`. Returns `None` after reporting errors.
    pub fn build_compilation(&self, args: &[String], diags: &mut DiagnosticEngine) -> Option<Compilation> {
        if args.is_empty() {
            diags.error("empty argument vector");
            return None;
        }

        let normalized = cli::normalize_args(args);
        debug!("driver arguments: {:?}", normalized);
        let matches = match DriverArgs::command().try_get_matches_from(&normalized) {
            Ok(matches) => matches,
            Err(err) => {
                diags.error(cli::describe_error(&err));
                return None;
            }
        };
        let parsed = match DriverArgs::from_arg_matches(&matches) {
            Ok(parsed) => parsed,
            Err(err) => {
                diags.error(cli::describe_error(&err));
                return None;
            }
        };

        let inputs = match cli::typed_inputs(&matches, &parsed) {
            Ok(inputs) => inputs,
            Err(msg) => {
                diags.error(msg);
                return None;
            }
        };

        let opts = self.plan_options(parsed, diags)?;

        if opts.args.verbose || opts.args.print_version {
            let version = format!(
                "cendol-embed version {}\nTarget: {}",
                env!("CARGO_PKG_VERSION"),
                opts.triple
            );
            if opts.args.print_version {
                println!("{}", version);
            } else {
                eprintln!("{}", version);
            }
        }

        if inputs.is_empty() {
            if opts.args.print_version {
                return Some(Compilation::new());
            }
            diags.error("no input files");
            return None;
        }

        if self.check_inputs_exist {
            for (path, _) in &inputs {
                if path.as_os_str() != "-" && !path.exists() {
                    diags.error(format!("no such file or directory: '{}'", path.display()));
                }
            }
            if diags.has_error_occurred() {
                return None;
            }
        }

        let compilation = self.build_jobs(&opts, &inputs, diags)?;
        if opts.args.verbose {
            for job in compilation.jobs() {
                eprintln!("{}", job);
            }
        }
        debug!("planned {} job(s)", compilation.jobs().len());
        Some(compilation)
    }

    fn plan_options(&self, args: DriverArgs, diags: &mut DiagnosticEngine) -> Option<PlanOptions> {
        let triple = match &args.target {
            Some(target) => match Triple::from_str(target) {
                Ok(triple) => triple,
                Err(err) => {
                    diags.error(format!("unknown target triple '{}': {}", target, err));
                    return None;
                }
            },
            None => self
                .target_from_program_name()
                .unwrap_or_else(|| self.default_triple.clone()),
        };

        if let Some(std) = &args.c_standard {
            if CStandard::parse(std).is_none() {
                diags.error(format!("invalid value '{}' in '-std={}'", std, std));
                return None;
            }
        }

        if let Some(level) = &args.optimization {
            if !matches!(level.as_str(), "0" | "1" | "2" | "3" | "s" | "z" | "fast") {
                diags.error(format!("invalid integral value '{}' in '-O{}'", level, level));
                return None;
            }
        }

        if let Some(place) = &args.save_temps {
            if place != "cwd" && place != "obj" {
                diags.error(format!("invalid value '{}' in '-save-temps={}'", place, place));
                return None;
            }
        }

        let mut color_diagnostics = false;
        let mut syntax_only = false;
        for feature in &args.features {
            if !ACCEPTED_FEATURES.contains(&feature.as_str()) {
                diags.error(format!("unknown argument: '-f{}'", feature));
                continue;
            }
            match feature.as_str() {
                "syntax-only" => syntax_only = true,
                "color-diagnostics" => color_diagnostics = true,
                "no-color-diagnostics" => color_diagnostics = false,
                _ => {}
            }
        }
        if diags.has_error_occurred() {
            return None;
        }

        // -Wl,a,b goes to the linker, everything else to the tools
        let mut linker_args = Vec::new();
        let mut warnings = Vec::new();
        for w in &args.warnings {
            match w.strip_prefix("l,") {
                Some(rest) => linker_args.extend(rest.split(',').filter(|s| !s.is_empty()).map(String::from)),
                None => warnings.push(w.clone()),
            }
        }

        let phase = if args.preprocess_only {
            Phase::Preprocess
        } else if syntax_only {
            Phase::SyntaxOnly
        } else if args.emit_assembly {
            Phase::Compile
        } else if args.compile_only {
            Phase::Assemble
        } else {
            Phase::Link
        };

        let resource_dir = args.resource_dir.clone().unwrap_or_else(|| self.resource_dir.clone());

        Some(PlanOptions {
            args,
            triple,
            resource_dir,
            phase,
            color_diagnostics,
            linker_args,
            warnings,
        })
    }

    fn build_jobs(
        &self,
        opts: &PlanOptions,
        inputs: &[(PathBuf, InputType)],
        diags: &mut DiagnosticEngine,
    ) -> Option<Compilation> {
        let mut compilation = Compilation::new();
        let phase = opts.phase;

        // inputs that survive to this invocation's final phase
        let used: Vec<&(PathBuf, InputType)> = inputs
            .iter()
            .filter(|(path, ty)| {
                let used = input_is_used(*ty, phase);
                if !used {
                    let kind = if *ty == InputType::Object { "linker" } else { "assembler" };
                    diags.report(
                        Diagnostic::warning(format!("{}: '{}' input unused", path.display(), kind))
                            .with_code("unused-command-line-argument"),
                    );
                }
                used
            })
            .collect();

        let produces_outputs = matches!(phase, Phase::Preprocess | Phase::Compile | Phase::Assemble);
        if produces_outputs && opts.args.output.is_some() && used.len() > 1 {
            diags.error("cannot specify -o when generating multiple output files");
            return None;
        }

        let mut link_inputs = Vec::new();
        for (path, ty) in used {
            if *ty == InputType::Object {
                link_inputs.push(path.display().to_string());
                continue;
            }
            if let Some(object) = self.plan_input(opts, path, *ty, &mut compilation, diags) {
                link_inputs.push(object);
            }
            if diags.has_error_occurred() {
                return None;
            }
        }

        if phase == Phase::Link {
            let output = opts
                .args
                .output
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "a.out".to_string());
            let mut arguments = vec!["-o".to_string(), output];
            arguments.extend(link_inputs);
            arguments.extend(opts.linker_args.iter().cloned());
            compilation.add_job(Job::new(LINKER, arguments));
        }

        Some(compilation)
    }

    /// Add the jobs for one source input. Returns the object handed to the
    /// link step when linking.
    fn plan_input(
        &self,
        opts: &PlanOptions,
        path: &Path,
        ty: InputType,
        compilation: &mut Compilation,
        diags: &mut DiagnosticEngine,
    ) -> Option<String> {
        let phase = opts.phase;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty() && *s != "-")
            .unwrap_or("stdin")
            .to_string();

        match (ty, phase) {
            (InputType::C | InputType::PreprocessedC, Phase::Preprocess) => {
                let output = self.final_output(opts, "-");
                compilation.add_job(self.cc1_job(opts, "-E", ty, path, &output));
                None
            }
            (InputType::C | InputType::PreprocessedC, Phase::SyntaxOnly) => {
                compilation.add_job(self.cc1_job(opts, "--fsyntax-only", ty, path, "-"));
                None
            }
            (InputType::C | InputType::PreprocessedC, Phase::Compile) => {
                let output = self.final_output(opts, &format!("{}.s", stem));
                compilation.add_job(self.cc1_job(opts, "-S", ty, path, &output));
                None
            }
            (InputType::C | InputType::PreprocessedC, Phase::Assemble) => {
                let output = self.final_output(opts, &format!("{}.o", stem));
                compilation.add_job(self.cc1_job(opts, "--emit-obj", ty, path, &output));
                None
            }
            (InputType::C | InputType::PreprocessedC, Phase::Link) => {
                let object = self.intermediate(opts, &stem, "o", compilation, diags)?;
                compilation.add_job(self.cc1_job(opts, "--emit-obj", ty, path, &object));
                Some(object)
            }
            (InputType::AsmWithCpp, Phase::Preprocess) => {
                let output = self.final_output(opts, "-");
                compilation.add_job(self.cc1_job(opts, "-E", ty, path, &output));
                None
            }
            (InputType::AsmWithCpp, Phase::Compile) => {
                let output = self.final_output(opts, &format!("{}.s", stem));
                compilation.add_job(self.cc1_job(opts, "-E", ty, path, &output));
                None
            }
            (InputType::AsmWithCpp, Phase::Assemble | Phase::Link) => {
                let preprocessed = self.intermediate(opts, &stem, "s", compilation, diags)?;
                compilation.add_job(self.cc1_job(opts, "-E", ty, path, &preprocessed));
                self.plan_assemble(opts, Path::new(&preprocessed), &stem, compilation, diags)
            }
            (InputType::Asm, Phase::Assemble | Phase::Link) => {
                self.plan_assemble(opts, path, &stem, compilation, diags)
            }
            // filtered out by input_is_used
            (InputType::Asm, _) | (InputType::AsmWithCpp, _) | (InputType::Object, _) => None,
        }
    }

    fn plan_assemble(
        &self,
        opts: &PlanOptions,
        input: &Path,
        stem: &str,
        compilation: &mut Compilation,
        diags: &mut DiagnosticEngine,
    ) -> Option<String> {
        if opts.phase == Phase::Link {
            let object = self.intermediate(opts, stem, "o", compilation, diags)?;
            compilation.add_job(self.cc1as_job(opts, input, &object));
            Some(object)
        } else {
            let output = self.final_output(opts, &format!("{}.o", stem));
            compilation.add_job(self.cc1as_job(opts, input, &output));
            None
        }
    }

    fn final_output(&self, opts: &PlanOptions, default: &str) -> String {
        match &opts.args.output {
            Some(path) => path.display().to_string(),
            None => default.to_string(),
        }
    }

    /// Path for an intermediate file. Temporary files are kept on disk.
    fn intermediate(
        &self,
        opts: &PlanOptions,
        stem: &str,
        suffix: &str,
        compilation: &mut Compilation,
        diags: &mut DiagnosticEngine,
    ) -> Option<String> {
        let file_name = format!("{}.{}", stem, suffix);
        let path = match opts.args.save_temps.as_deref() {
            Some("obj") => match opts.args.output.as_ref().and_then(|o| o.parent()) {
                Some(dir) => dir.join(&file_name),
                None => PathBuf::from(&file_name),
            },
            Some(_) => PathBuf::from(&file_name),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix(&format!("{}-", stem))
                    .suffix(&format!(".{}", suffix))
                    .tempfile()
                    .and_then(|file| file.into_temp_path().keep().map_err(|e| e.error));
                match temp {
                    Ok(path) => path,
                    Err(err) => {
                        diags.error(format!("unable to make temporary file: {}", err));
                        return None;
                    }
                }
            }
        };
        compilation.add_temp_file(path.clone());
        Some(path.display().to_string())
    }

    fn cc1_job(&self, opts: &PlanOptions, action: &str, ty: InputType, input: &Path, output: &str) -> Job {
        let args = &opts.args;
        let mut cc1 = vec![
            CC1_MARKER.to_string(),
            "--triple".to_string(),
            opts.triple.to_string(),
            action.to_string(),
            "--main-file-name".to_string(),
            main_file_name(input),
            "--resource-dir".to_string(),
            opts.resource_dir.display().to_string(),
            "--internal-isystem".to_string(),
            opts.resource_dir.join("include").display().to_string(),
        ];
        for dir in &args.include_paths {
            cc1.push("-I".to_string());
            cc1.push(dir.display().to_string());
        }
        for def in &args.defines {
            cc1.push("-D".to_string());
            cc1.push(def.clone());
        }
        for undef in &args.undefines {
            cc1.push("-U".to_string());
            cc1.push(undef.clone());
        }
        if let Some(level) = &args.optimization {
            cc1.push(format!("-O{}", level));
        }
        for w in &opts.warnings {
            cc1.push(format!("-W{}", w));
        }
        if args.no_warnings {
            cc1.push("-w".to_string());
        }
        if args.debug_info {
            cc1.push("-g".to_string());
        }
        if let Some(std) = &args.c_standard {
            cc1.push("--std".to_string());
            cc1.push(std.clone());
        }
        if args.pedantic {
            cc1.push("--pedantic".to_string());
        }
        if args.suppress_line_markers && action == "-E" {
            cc1.push("-P".to_string());
        }
        if opts.color_diagnostics {
            cc1.push("--fcolor-diagnostics".to_string());
        }
        cc1.extend([
            "-o".to_string(),
            output.to_string(),
            "-x".to_string(),
            ty.language_name().to_string(),
            input.display().to_string(),
        ]);
        Job::new(&self.name, cc1)
    }

    fn cc1as_job(&self, opts: &PlanOptions, input: &Path, output: &str) -> Job {
        let mut cc1as = vec![
            CC1AS_MARKER.to_string(),
            "--triple".to_string(),
            opts.triple.to_string(),
            "--filetype".to_string(),
            "obj".to_string(),
            "--main-file-name".to_string(),
            main_file_name(input),
        ];
        for dir in &opts.args.include_paths {
            cc1as.push("-I".to_string());
            cc1as.push(dir.display().to_string());
        }
        if opts.args.debug_info {
            cc1as.push("-g".to_string());
        }
        if opts.warnings.iter().any(|w| w == "error") {
            cc1as.push("--fatal-warnings".to_string());
        }
        cc1as.extend(["-o".to_string(), output.to_string(), input.display().to_string()]);
        Job::new(&self.name, cc1as)
    }
}

fn input_is_used(ty: InputType, phase: Phase) -> bool {
    match ty {
        InputType::C | InputType::PreprocessedC => true,
        InputType::AsmWithCpp => phase != Phase::SyntaxOnly,
        InputType::Asm => phase >= Phase::Assemble,
        InputType::Object => phase == Phase::Link,
    }
}

fn main_file_name(input: &Path) -> String {
    input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests_driver;
