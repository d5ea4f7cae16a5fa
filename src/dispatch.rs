//! Runs planned jobs in-process, in order, stopping at the first failure.
//!
//! A job is routed by its first argument: `-cc1` goes to the front-end with a
//! diagnostics engine of its own, `-cc1as` goes to the assembler, which reports
//! to the caller's engine. Nothing else is handled here, linking included.

use log::{debug, warn};

use crate::assembler::{self, AssemblerInvocation};
use crate::diagnostic::DiagnosticEngine;
use crate::driver::{CC1_MARKER, CC1AS_MARKER, Job};
use crate::error::DispatchError;
use crate::frontend::{CompilerInstance, CompilerInvocation, execute_compiler_invocation};

/// Built-in tools a job can target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    Compile,
    Assemble,
}

impl Tool {
    /// Tool selected by a job's leading marker
    pub fn classify(arguments: &[String]) -> Option<Tool> {
        match arguments.first().map(String::as_str) {
            Some(CC1_MARKER) => Some(Tool::Compile),
            Some(CC1AS_MARKER) => Some(Tool::Assemble),
            _ => None,
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            Tool::Compile => CC1_MARKER,
            Tool::Assemble => CC1AS_MARKER,
        }
    }
}

/// Execute every job in plan order.
pub fn execute_jobs(jobs: &[Job], diags: &mut DiagnosticEngine) -> Result<(), DispatchError> {
    for (index, job) in jobs.iter().enumerate() {
        debug!("job {}/{}:{}", index + 1, jobs.len(), job);
        execute_job(job, diags).inspect_err(|err| debug!("job {} failed: {}", index + 1, err))?;
    }
    Ok(())
}

pub fn execute_job(job: &Job, diags: &mut DiagnosticEngine) -> Result<(), DispatchError> {
    let Some(tool) = Tool::classify(job.arguments()) else {
        let marker = job.arguments().first().cloned().unwrap_or_default();
        warn!("no in-process tool for '{}' (leading argument '{}')", job.executable(), marker);
        diags.error(format!(
            "unable to execute '{}': it is not a built-in tool",
            job.executable()
        ));
        return Err(DispatchError::UnknownTool {
            executable: job.executable().to_string(),
            marker,
        });
    };

    debug!("dispatching to {}", tool.marker());
    match tool {
        Tool::Compile => run_frontend(job, diags),
        Tool::Assemble => run_assembler(job, diags),
    }
}

fn run_frontend(job: &Job, diags: &mut DiagnosticEngine) -> Result<(), DispatchError> {
    let mut invocation = CompilerInvocation::default();
    if !CompilerInvocation::create_from_args(&mut invocation, job.arguments(), diags) {
        return Err(DispatchError::InvocationParse { tool: CC1_MARKER });
    }

    let mut instance = CompilerInstance::new(invocation, job.executable());
    if let Err(err) = instance.create_diagnostics() {
        let log_file = instance
            .invocation()
            .diagnostics
            .log_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        diags.error(format!("unable to open diagnostic log file '{}': {}", log_file, err));
        return Err(DispatchError::DiagnosticsInit(err.to_string()));
    }

    if !execute_compiler_invocation(&mut instance) {
        return Err(DispatchError::FrontendExecution);
    }
    Ok(())
}

fn run_assembler(job: &Job, diags: &mut DiagnosticEngine) -> Result<(), DispatchError> {
    let arguments = &job.arguments()[1..];
    let Some(invocation) = AssemblerInvocation::create_from_args(arguments, diags) else {
        return Err(DispatchError::InvocationParse { tool: CC1AS_MARKER });
    };
    if diags.has_error_occurred() {
        return Err(DispatchError::InvocationParse { tool: CC1AS_MARKER });
    }
    assembler::execute_assembler(&invocation, diags).map_err(|err| {
        debug!("assembler: {}", err);
        DispatchError::AssemblerExecution
    })
}

#[cfg(test)]
mod tests_dispatch;
