//! steprun: run one workflow step of a cycling pipeline.
//!
//! Expands templated directory paths for a forecast cycle, creates them,
//! invokes the external unit of work, propagates its exit code verbatim,
//! and removes the scratch workspace on every exit path unless told to
//! keep it.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod plan;
pub mod runner;
pub mod template;
