//! End-to-end execution of one workflow step.
//!
//! The step moves through a fixed sequence: resolve directories, create
//! them, stage copies, invoke the unit of work, surface the job log, tear
//! the scratch workspace down. Teardown runs on every exit path, including
//! early fatal ones, so a step never leaves scratch state behind unless
//! asked to retain it.

use std::env;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tokio::process::Command;
use tracing::{debug, error, info, warn};

use crate::error::StepError;
use crate::plan::{self, CopySpec, DirectoryPlan};
use crate::template::{TemplateContext, TemplateSpec};

/// What happens to the scratch workspace once the step is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupPolicy {
    Discard,
    Retain,
}

impl CleanupPolicy {
    pub fn from_retain(retain: bool) -> Self {
        if retain {
            CleanupPolicy::Retain
        } else {
            CleanupPolicy::Discard
        }
    }
}

/// Result of one unit-of-work invocation. Immutable after creation.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(i32),
}

pub fn classify(result: &ExecutionResult) -> Outcome {
    match result.exit_code {
        0 => Outcome::Success,
        code => Outcome::Failure(code),
    }
}

/// Immutable configuration for one step invocation, assembled once by the
/// caller. The runner reads nothing from the process environment itself.
#[derive(Debug, Clone)]
pub struct StepConfig {
    pub cycle_date: String,
    pub cycle_hour: String,
    pub member_count: usize,
    pub dir_specs: Vec<TemplateSpec>,
    pub member_dir_specs: Vec<TemplateSpec>,
    pub copies: Vec<CopySpec>,
    pub extra_vars: Vec<(String, String)>,
    pub unit_of_work: String,
    /// Scratch workspace owned by this invocation.
    pub scratch: PathBuf,
    /// Known-good directory to land in before removing the scratch tree.
    pub scratch_root: PathBuf,
    pub log_file: Option<PathBuf>,
    pub cleanup: CleanupPolicy,
    pub capture_output: bool,
}

pub struct StepRunner {
    config: StepConfig,
}

impl StepRunner {
    pub fn new(config: StepConfig) -> Self {
        Self { config }
    }

    /// Run the step to completion and return the final exit code. The
    /// unit of work's non-zero status is propagated unchanged; teardown
    /// runs whether the step succeeded or not.
    pub async fn run(&self) -> i32 {
        let guard = WorkspaceGuard::new(
            &self.config.scratch,
            &self.config.scratch_root,
            self.config.cleanup,
        );
        let step = self.execute().await;

        if let Some(path) = &self.config.log_file {
            surface_log(path);
        }
        let cleanup = guard.finish();

        let step_code = match step {
            Ok(result) => match classify(&result) {
                Outcome::Success => 0,
                Outcome::Failure(code) => {
                    let err = StepError::UnitOfWorkFailure(code);
                    error!(error = %err, "step failed");
                    err.exit_code()
                }
            },
            Err(err) => {
                error!(error = %err, "step failed");
                err.exit_code()
            }
        };

        match cleanup {
            Ok(()) => step_code,
            Err(err) => {
                error!(error = %err, "teardown failed");
                // the step's own failure stays the reported one
                if step_code == 0 {
                    err.exit_code()
                } else {
                    step_code
                }
            }
        }
    }

    async fn execute(&self) -> Result<ExecutionResult, StepError> {
        let ctx = self.context();

        let mut dirs = plan::resolve_directories(&ctx, &self.config.dir_specs)?;
        for spec in &self.config.member_dir_specs {
            for entry in plan::expand_for_ensemble(&ctx, self.config.member_count, spec) {
                dirs.push(entry?)?;
            }
        }
        debug!(directories = dirs.len(), "directories resolved");

        fs::create_dir_all(&self.config.scratch).map_err(|source| StepError::CreateDir {
            path: self.config.scratch.clone(),
            source,
        })?;
        plan::ensure_directories(&dirs)?;
        debug!("directories created");

        plan::stage_copies(&ctx, &self.config.copies)?;

        let child_env = child_env(&ctx, &dirs, &self.config.scratch);
        info!(command = %self.config.unit_of_work, "invoking unit of work");
        invoke(
            &self.config.unit_of_work,
            &child_env,
            &self.config.scratch,
            self.config.capture_output,
        )
        .await
    }

    fn context(&self) -> TemplateContext {
        let mut ctx = TemplateContext::new()
            .with_var("cycle_date", self.config.cycle_date.as_str())
            .with_var("cycle_hour", self.config.cycle_hour.as_str())
            .with_var("scratch", self.config.scratch.to_string_lossy());
        for (key, value) in &self.config.extra_vars {
            ctx.set(key.as_str(), value.as_str());
        }
        ctx
    }
}

/// Scope guard owning the scratch workspace for one step invocation.
/// `finish` performs teardown and reports its result; dropping the guard
/// without finishing (an unwind path) still runs teardown, with failures
/// logged instead of propagated.
struct WorkspaceGuard {
    scratch: PathBuf,
    root: PathBuf,
    policy: CleanupPolicy,
    armed: bool,
}

impl WorkspaceGuard {
    fn new(scratch: &Path, root: &Path, policy: CleanupPolicy) -> Self {
        Self {
            scratch: scratch.to_path_buf(),
            root: root.to_path_buf(),
            policy,
            armed: true,
        }
    }

    fn finish(mut self) -> Result<(), StepError> {
        self.armed = false;
        teardown(&self.scratch, &self.root, self.policy)
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = teardown(&self.scratch, &self.root, self.policy) {
                error!(error = %err, "teardown failed during unwind");
            }
        }
    }
}

/// Environment handed to the unit of work: every context variable as-is,
/// the scratch path as `STEPRUN_DATA`, and each plan entry as
/// `STEPRUN_DIR_<NAME>`.
fn child_env(ctx: &TemplateContext, dirs: &DirectoryPlan, scratch: &Path) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = ctx
        .vars()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    env.push((
        "STEPRUN_DATA".to_string(),
        scratch.to_string_lossy().into_owned(),
    ));
    for entry in dirs.entries() {
        let key: String = entry
            .name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        env.push((
            format!("STEPRUN_DIR_{key}"),
            entry.path.to_string_lossy().into_owned(),
        ));
    }
    env
}

/// Run the unit of work through `/bin/sh -c` inside the scratch workspace
/// and wait for it, unbounded. No retry: the job owns its own correctness,
/// this layer only reports its status.
pub async fn invoke(
    command: &str,
    env: &[(String, String)],
    workdir: &Path,
    capture: bool,
) -> Result<ExecutionResult, StepError> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    if capture {
        let output = cmd.output().await.map_err(|source| StepError::Spawn {
            command: command.to_string(),
            source,
        })?;
        // forward both captured streams so the operator still sees them
        let _ = io::stdout().write_all(&output.stdout);
        let _ = io::stderr().write_all(&output.stderr);
        Ok(ExecutionResult {
            exit_code: exit_code_of(&output.status),
            stdout: Some(String::from_utf8_lossy(&output.stdout).into_owned()),
            stderr: Some(String::from_utf8_lossy(&output.stderr).into_owned()),
        })
    } else {
        let status = cmd.status().await.map_err(|source| StepError::Spawn {
            command: command.to_string(),
            source,
        })?;
        Ok(ExecutionResult {
            exit_code: exit_code_of(&status),
            stdout: None,
            stderr: None,
        })
    }
}

#[cfg(unix)]
fn exit_code_of(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    // killed by a signal: report 128 + signo, the shell convention
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(not(unix))]
fn exit_code_of(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

/// Stream an optional job log artifact to stdout. Absence is fine; it is
/// instrumentation, not a required product.
pub fn surface_log(path: &Path) {
    match fs::File::open(path) {
        Ok(mut file) => {
            info!(log = %path.display(), "surfacing job log");
            if let Err(err) = io::copy(&mut file, &mut io::stdout()) {
                warn!(error = %err, "could not stream job log");
            }
        }
        Err(_) => debug!(log = %path.display(), "no job log to surface"),
    }
}

/// Leave the scratch workspace behind: land in the known root first, then
/// remove the scratch tree iff the policy says discard.
pub fn teardown(scratch: &Path, root: &Path, policy: CleanupPolicy) -> Result<(), StepError> {
    env::set_current_dir(root).map_err(|source| StepError::InaccessibleRoot {
        path: root.to_path_buf(),
        source,
    })?;
    match policy {
        CleanupPolicy::Retain => {
            info!(scratch = %scratch.display(), "retaining scratch workspace");
            Ok(())
        }
        CleanupPolicy::Discard => {
            if scratch.exists() {
                fs::remove_dir_all(scratch).map_err(|source| StepError::Remove {
                    path: scratch.to_path_buf(),
                    source,
                })?;
                info!(scratch = %scratch.display(), "scratch workspace removed");
            }
            Ok(())
        }
    }
}
