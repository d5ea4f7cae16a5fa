//! Planned work produced by the driver.

use std::fmt;
use std::path::PathBuf;

use itertools::Itertools;

/// A single command the driver wants executed.
///
/// `arguments` does not include the executable. For in-process tools the first
/// argument is the tool marker (`-cc1`, `-cc1as`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    executable: String,
    arguments: Vec<String>,
}

impl Job {
    pub fn new(executable: impl Into<String>, arguments: Vec<String>) -> Self {
        Job {
            executable: executable.into(),
            arguments,
        }
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.arguments
    }
}

impl fmt::Display for Job {
    /// Shell-like rendering used by `-v`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            " \"{}\" {}",
            self.executable,
            self.arguments.iter().map(|a| quote_arg(a)).join(" ")
        )
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_ascii_alphanumeric() || "-_=+/.,:".contains(c)) {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// The ordered job list for one driver invocation.
#[derive(Debug, Default)]
pub struct Compilation {
    jobs: Vec<Job>,
    /// Intermediate files created while planning. They are left on disk.
    temp_files: Vec<PathBuf>,
}

impl Compilation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_job(&mut self, job: Job) {
        self.jobs.push(job);
    }

    pub fn add_temp_file(&mut self, path: PathBuf) {
        self.temp_files.push(path);
    }

    pub fn jobs(&self) -> &[Job] {
        &self.jobs
    }

    pub fn temp_files(&self) -> &[PathBuf] {
        &self.temp_files
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
