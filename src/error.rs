//! Step error taxonomy. Every variant is terminal for the step.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
    #[error("template `{template}` references undefined variable `{name}`")]
    MissingVariable { template: String, name: String },

    #[error("template `{template}` has an unterminated `${{` substitution")]
    MalformedTemplate { template: String },

    #[error("invalid template spec `{0}` (expected NAME=PATTERN)")]
    InvalidSpec(String),

    #[error("duplicate logical directory name `{0}`")]
    DuplicateName(String),

    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {src} to {dest}")]
    Copy {
        src: PathBuf,
        dest: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to remove {path}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to spawn unit of work `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unit of work exited with status {0}")]
    UnitOfWorkFailure(i32),

    #[error("cannot change to root directory {path}")]
    InaccessibleRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StepError {
    /// Exit code this error maps to at the process boundary. A failed unit
    /// of work keeps its own code; everything else is an environment
    /// problem reported as 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            StepError::UnitOfWorkFailure(code) => *code,
            _ => 1,
        }
    }
}
