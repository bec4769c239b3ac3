use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::{ArgGroup, Parser};

use crate::config::Config;
use crate::plan::StagePlan;
use crate::runner::{CleanupPolicy, StepConfig};
use crate::template::TemplateSpec;

#[derive(Parser, Debug, Clone)]
#[command(name = "steprun", about = "Run one templated workflow step", version)]
#[command(group(ArgGroup::new("cleanup_switch").args(["keep", "discard"]).multiple(false)))]
pub struct Cli {
    /// Default unit of work to run; the UNIT_OF_WORK config key overrides it.
    #[arg(value_name = "COMMAND")]
    pub command: Option<String>,

    /// Cycle date (YYYYMMDD), or CYCLE_DATE from config/env.
    #[arg(long = "date")]
    pub cycle_date: Option<String>,

    /// Cycle hour (HH), or CYCLE_HOUR from config/env.
    #[arg(long = "hour")]
    pub cycle_hour: Option<String>,

    /// Ensemble member count; 0 disables per-member expansion.
    #[arg(long)]
    pub members: Option<usize>,

    /// Directory role as NAME=PATTERN, e.g.
    /// analysis='${com}/gdas.${cycle_date}/${cycle_hour}/analysis'.
    /// Can be used multiple times.
    #[arg(long = "template", action = clap::ArgAction::Append)]
    pub templates: Vec<String>,

    /// Per-member directory role as NAME=PATTERN; expanded once per member
    /// with ${member} bound to mem001..memNNN. Can be used multiple times.
    #[arg(long = "member-template", action = clap::ArgAction::Append)]
    pub member_templates: Vec<String>,

    /// Extra substitution variable as KEY=VALUE. Can be used multiple times.
    #[arg(long = "var", action = clap::ArgAction::Append)]
    pub vars: Vec<String>,

    /// JSON stage plan describing dirs/member_dirs/copy/vars.
    #[arg(long = "stage-plan")]
    pub stage_plan: Option<PathBuf>,

    /// Scratch workspace path (default: SCRATCH_ROOT/<date><hour>).
    #[arg(long)]
    pub scratch: Option<PathBuf>,

    /// Keep the scratch workspace after the step.
    #[arg(long)]
    pub keep: bool,
    /// Remove the scratch workspace after the step (default).
    #[arg(long)]
    pub discard: bool,

    /// Job log artifact to print at the end of the run, if it exists.
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Capture unit-of-work stdout instead of streaming it.
    #[arg(long)]
    pub capture: bool,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Assemble the immutable step configuration from these arguments, the
    /// stage-plan file, and config/env defaults. CLI beats config, config
    /// beats built-in defaults. The unit of work is the exception: the
    /// UNIT_OF_WORK override replaces the command given on the command line.
    pub fn step_config(self, cfg: &Config) -> Result<StepConfig> {
        let cycle_date = self
            .cycle_date
            .or_else(|| cfg.get("CYCLE_DATE"))
            .ok_or_else(|| anyhow!("cycle date missing: pass --date or set CYCLE_DATE"))?;
        let cycle_hour = self
            .cycle_hour
            .or_else(|| cfg.get("CYCLE_HOUR"))
            .ok_or_else(|| anyhow!("cycle hour missing: pass --hour or set CYCLE_HOUR"))?;
        let member_count = self
            .members
            .or_else(|| cfg.get_usize("ENSEMBLE_MEMBERS"))
            .unwrap_or(0);

        let mut dir_specs = Vec::new();
        for spec in &self.templates {
            dir_specs.push(TemplateSpec::parse(spec)?);
        }
        let mut member_dir_specs = Vec::new();
        for spec in &self.member_templates {
            member_dir_specs.push(TemplateSpec::parse(spec)?);
        }

        let mut copies = Vec::new();
        let mut extra_vars: Vec<(String, String)> = Vec::new();
        if let Some(path) = &self.stage_plan {
            let stage = StagePlan::load(path)?;
            dir_specs.extend(stage.dirs);
            member_dir_specs.extend(stage.member_dirs);
            copies.extend(stage.copy);
            extra_vars.extend(stage.vars);
        }
        // --var after the stage plan, so the command line wins
        for var in &self.vars {
            let (k, v) = var
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid --var `{var}` (expected KEY=VALUE)"))?;
            extra_vars.push((k.trim().to_string(), v.to_string()));
        }

        let unit_of_work = cfg
            .get("UNIT_OF_WORK")
            .or(self.command)
            .ok_or_else(|| anyhow!("no unit of work: pass COMMAND or set UNIT_OF_WORK"))?;

        let scratch = match self.scratch {
            Some(path) => path,
            None => cfg
                .get_path("SCRATCH_ROOT")
                .unwrap_or_else(|| env::temp_dir().join("steprun"))
                .join(format!("{cycle_date}{cycle_hour}")),
        };
        let scratch_root = match scratch.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("/"),
        };

        let retain = if self.keep {
            true
        } else if self.discard {
            false
        } else {
            cfg.get_bool("RETAIN_WORKSPACE")
        };
        let log_file = self.log_file.or_else(|| cfg.get_path("STEP_LOG_FILE"));

        Ok(StepConfig {
            cycle_date,
            cycle_hour,
            member_count,
            dir_specs,
            member_dir_specs,
            copies,
            extra_vars,
            unit_of_work,
            scratch,
            scratch_root,
            log_file,
            cleanup: CleanupPolicy::from_retain(retain),
            capture_output: self.capture,
        })
    }
}
