//! Catalog validation of template variable references

use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use super::substitution::referenced_vars;

/// Template references variables outside the allowed catalog
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Template references unknown variables: {}", .missing_vars.join(", "))]
pub struct TemplateValidationError {
    pub missing_vars: Vec<String>,
    pub referenced_vars: Vec<String>,
}

/// Variables a template references, split by catalog membership
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TemplateVarReport {
    pub referenced_vars: Vec<String>,
    pub missing_vars: Vec<String>,
}

/// Check that subject and body only reference catalog variables.
///
/// Templates without any placeholder are valid.
pub fn validate_template(
    allowed_keys: &BTreeSet<String>,
    subject_template: Option<&str>,
    body_template: &str,
) -> Result<TemplateVarReport, TemplateValidationError> {
    let referenced = referenced_vars(subject_template, body_template);
    let missing: Vec<String> = referenced
        .iter()
        .filter(|key| !allowed_keys.contains(*key))
        .cloned()
        .collect();

    if !missing.is_empty() {
        return Err(TemplateValidationError {
            missing_vars: missing,
            referenced_vars: referenced,
        });
    }

    Ok(TemplateVarReport {
        referenced_vars: referenced,
        missing_vars: Vec::new(),
    })
}
