//! Path templating: `${VAR}` substitution against an immutable context.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::StepError;

/// Zero-padded three-digit ensemble member label (`mem001`, `mem042`, ...).
pub fn member_label(index: usize) -> String {
    format!("mem{index:03}")
}

/// Immutable set of substitution variables for path expansion.
///
/// Built once per step from the cycle configuration; per-member contexts
/// are derived with [`TemplateContext::with_member`] rather than mutated.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Derive a per-member context with `member` bound to the given label.
    pub fn with_member(&self, label: &str) -> Self {
        self.clone().with_var("member", label)
    }

    /// Expand every `${VAR}` occurrence in `template`. Characters outside
    /// substitutions pass through untouched, including bare `$`.
    pub fn expand(&self, template: &str) -> Result<String, StepError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("${") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = after.find('}').ok_or_else(|| StepError::MalformedTemplate {
                template: template.to_string(),
            })?;
            let name = &after[..end];
            let value = self.get(name).ok_or_else(|| StepError::MissingVariable {
                template: template.to_string(),
                name: name.to_string(),
            })?;
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// One directory role: a logical name and the path pattern it expands from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    pub template: String,
}

impl TemplateSpec {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Parse the `NAME=PATTERN` form used on the command line.
    pub fn parse(spec: &str) -> Result<Self, StepError> {
        match spec.split_once('=') {
            Some((name, template)) if !name.trim().is_empty() && !template.is_empty() => {
                Ok(Self::new(name.trim(), template))
            }
            _ => Err(StepError::InvalidSpec(spec.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TemplateContext {
        TemplateContext::new()
            .with_var("cycle_date", "20240101")
            .with_var("cycle_hour", "00")
            .with_var("run", "gdas")
    }

    #[test]
    fn expands_variables() {
        let path = ctx()
            .expand("/com/${run}.${cycle_date}/${cycle_hour}/snow")
            .unwrap();
        assert_eq!(path, "/com/gdas.20240101/00/snow");
    }

    #[test]
    fn passes_through_literal_text() {
        assert_eq!(ctx().expand("/tmp/plain$path").unwrap(), "/tmp/plain$path");
    }

    #[test]
    fn missing_variable_is_an_error() {
        let err = ctx().expand("${rotdir}/${cycle_date}").unwrap_err();
        assert!(matches!(err, StepError::MissingVariable { ref name, .. } if name == "rotdir"));
    }

    #[test]
    fn unterminated_substitution_is_an_error() {
        let err = ctx().expand("/com/${cycle_date").unwrap_err();
        assert!(matches!(err, StepError::MalformedTemplate { .. }));
    }

    #[test]
    fn member_labels_are_zero_padded() {
        assert_eq!(member_label(1), "mem001");
        assert_eq!(member_label(42), "mem042");
        assert_eq!(member_label(100), "mem100");
    }

    #[test]
    fn with_member_overrides_label() {
        let c = ctx().with_var("member", "mem000");
        let derived = c.with_member("mem007");
        assert_eq!(derived.get("member"), Some("mem007"));
        // parent context untouched
        assert_eq!(c.get("member"), Some("mem000"));
    }

    #[test]
    fn parses_cli_spec() {
        let spec = TemplateSpec::parse("analysis=${rotdir}/${cycle_date}/anl").unwrap();
        assert_eq!(spec.name, "analysis");
        assert_eq!(spec.template, "${rotdir}/${cycle_date}/anl");
        assert!(TemplateSpec::parse("no-equals-here").is_err());
        assert!(TemplateSpec::parse("=pattern").is_err());
    }
}
