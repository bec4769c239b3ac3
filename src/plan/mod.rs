//! Directory staging: resolved plans, idempotent creation, ensemble
//! expansion, and optional file copies described by a stage-plan file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::error::StepError;
use crate::template::{member_label, TemplateContext, TemplateSpec};

/// One resolved directory: logical role name and concrete path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub name: String,
    pub path: PathBuf,
}

/// Ordered set of resolved directories, unique per logical name.
#[derive(Debug, Clone, Default)]
pub struct DirectoryPlan {
    entries: Vec<PlanEntry>,
}

impl DirectoryPlan {
    pub fn entries(&self) -> &[PlanEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.path.as_path())
    }

    pub fn push(&mut self, entry: PlanEntry) -> Result<(), StepError> {
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(StepError::DuplicateName(entry.name));
        }
        self.entries.push(entry);
        Ok(())
    }
}

/// Expand every template spec against the context. Pure: touches nothing
/// on disk, so a missing variable fails the step before any directory
/// exists.
pub fn resolve_directories(
    ctx: &TemplateContext,
    specs: &[TemplateSpec],
) -> Result<DirectoryPlan, StepError> {
    let mut plan = DirectoryPlan::default();
    for spec in specs {
        let path = ctx.expand(&spec.template)?;
        plan.push(PlanEntry {
            name: spec.name.clone(),
            path: PathBuf::from(path),
        })?;
    }
    Ok(plan)
}

/// Create every directory in the plan, parents included. Pre-existing
/// directories are not an error; any I/O failure is fatal, no retry.
pub fn ensure_directories(plan: &DirectoryPlan) -> Result<(), StepError> {
    for entry in plan.entries() {
        debug!(name = %entry.name, path = %entry.path.display(), "ensure directory");
        fs::create_dir_all(&entry.path).map_err(|source| StepError::CreateDir {
            path: entry.path.clone(),
            source,
        })?;
    }
    Ok(())
}

/// One plan entry per ensemble member `1..=member_count`, with the
/// zero-padded label bound to `member` before expansion. Lazy and
/// recomputable on demand; `member_count = 0` yields nothing.
pub fn expand_for_ensemble<'a>(
    ctx: &'a TemplateContext,
    member_count: usize,
    spec: &'a TemplateSpec,
) -> impl Iterator<Item = Result<PlanEntry, StepError>> + 'a {
    (1..=member_count).map(move |index| {
        let label = member_label(index);
        let path = ctx.with_member(&label).expand(&spec.template)?;
        Ok(PlanEntry {
            name: format!("{}.{}", spec.name, label),
            path: PathBuf::from(path),
        })
    })
}

/// One file to stage: source and destination path patterns.
#[derive(Debug, Clone, Deserialize)]
pub struct CopySpec {
    pub src: String,
    pub dest: String,
}

/// Copy staged files after expansion, creating destination parents first.
pub fn stage_copies(ctx: &TemplateContext, copies: &[CopySpec]) -> Result<(), StepError> {
    for copy in copies {
        let src = PathBuf::from(ctx.expand(&copy.src)?);
        let dest = PathBuf::from(ctx.expand(&copy.dest)?);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|source| StepError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        debug!(src = %src.display(), dest = %dest.display(), "stage copy");
        fs::copy(&src, &dest).map_err(|source| StepError::Copy {
            src,
            dest,
            source,
        })?;
    }
    Ok(())
}

/// Staging description loaded from a JSON file: directory roles, file
/// copies, and extra substitution variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StagePlan {
    #[serde(default)]
    pub dirs: Vec<TemplateSpec>,
    #[serde(default)]
    pub member_dirs: Vec<TemplateSpec>,
    #[serde(default)]
    pub copy: Vec<CopySpec>,
    #[serde(default)]
    pub vars: std::collections::BTreeMap<String, String>,
}

impl StagePlan {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("cannot read stage plan {}", path.display()))?;
        let plan: StagePlan = serde_json::from_str(&text)
            .with_context(|| format!("invalid stage plan {}", path.display()))?;
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(root: &Path) -> TemplateContext {
        TemplateContext::new()
            .with_var("root", root.to_string_lossy())
            .with_var("cycle_date", "20240101")
            .with_var("cycle_hour", "00")
    }

    #[test]
    fn resolve_then_ensure_creates_every_directory() {
        let tmp = TempDir::new().unwrap();
        let specs = vec![
            TemplateSpec::new("analysis", "${root}/${cycle_date}/${cycle_hour}/anl"),
            TemplateSpec::new("diags", "${root}/${cycle_date}/${cycle_hour}/diags"),
        ];
        let plan = resolve_directories(&ctx(tmp.path()), &specs).unwrap();
        assert_eq!(plan.len(), 2);

        ensure_directories(&plan).unwrap();
        for entry in plan.entries() {
            assert!(entry.path.is_dir());
        }

        // idempotent on re-run
        ensure_directories(&plan).unwrap();
    }

    #[test]
    fn resolution_is_pure_on_failure() {
        let tmp = TempDir::new().unwrap();
        let specs = vec![TemplateSpec::new("analysis", "${root}/${undefined}/anl")];
        let err = resolve_directories(&ctx(tmp.path()), &specs).unwrap_err();
        assert!(matches!(err, StepError::MissingVariable { .. }));
        // nothing was created under the root
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn duplicate_logical_names_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let specs = vec![
            TemplateSpec::new("analysis", "${root}/a"),
            TemplateSpec::new("analysis", "${root}/b"),
        ];
        let err = resolve_directories(&ctx(tmp.path()), &specs).unwrap_err();
        assert!(matches!(err, StepError::DuplicateName(ref n) if n == "analysis"));
    }

    #[test]
    fn ensemble_expansion_yields_one_entry_per_member() {
        let tmp = TempDir::new().unwrap();
        let spec = TemplateSpec::new("ens", "${root}/${cycle_date}/${member}");
        let entries: Vec<_> = expand_for_ensemble(&ctx(tmp.path()), 3, &spec)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "ens.mem001");
        assert_eq!(entries[2].name, "ens.mem003");
        assert!(entries[1].path.ends_with("20240101/mem002"));

        // restartable: a fresh iterator produces the same sequence
        let again: Vec<_> = expand_for_ensemble(&ctx(tmp.path()), 3, &spec)
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(entries, again);
    }

    #[test]
    fn zero_members_yield_an_empty_sequence() {
        let tmp = TempDir::new().unwrap();
        let spec = TemplateSpec::new("ens", "${root}/${member}");
        assert_eq!(expand_for_ensemble(&ctx(tmp.path()), 0, &spec).count(), 0);
    }

    #[test]
    fn copies_create_destination_parents() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("bkg.nc");
        fs::write(&src, b"snow").unwrap();

        let copies = vec![CopySpec {
            src: "${root}/bkg.nc".into(),
            dest: "${root}/${cycle_date}/bkg/bkg.nc".into(),
        }];
        stage_copies(&ctx(tmp.path()), &copies).unwrap();
        let dest = tmp.path().join("20240101/bkg/bkg.nc");
        assert_eq!(fs::read(dest).unwrap(), b"snow");
    }

    #[test]
    fn missing_copy_source_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let copies = vec![CopySpec {
            src: "${root}/absent.nc".into(),
            dest: "${root}/out/absent.nc".into(),
        }];
        let err = stage_copies(&ctx(tmp.path()), &copies).unwrap_err();
        assert!(matches!(err, StepError::Copy { .. }));
    }

    #[test]
    fn loads_stage_plan_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("stage.json");
        fs::write(
            &path,
            r#"{
                "dirs": [{"name": "analysis", "template": "${root}/anl"}],
                "member_dirs": [{"name": "ens", "template": "${root}/${member}"}],
                "copy": [{"src": "${root}/a", "dest": "${root}/b"}],
                "vars": {"run": "gdas"}
            }"#,
        )
        .unwrap();

        let plan = StagePlan::load(&path).unwrap();
        assert_eq!(plan.dirs.len(), 1);
        assert_eq!(plan.member_dirs.len(), 1);
        assert_eq!(plan.copy.len(), 1);
        assert_eq!(plan.vars.get("run").map(String::as_str), Some("gdas"));
    }
}
