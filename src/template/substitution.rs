//! Variable extraction and substitution engine for templates

use std::collections::BTreeSet;

use crate::notification::Payload;

use super::types::{
    NotificationTemplate, RenderDiagnostics, RenderOptions, RenderedMessage, TemplateError,
    TemplateResult,
};

/// One `{{ name }}` occurrence: its byte span in the text and the name.
struct Placeholder<'a> {
    start: usize,
    end: usize,
    name: &'a str,
}

/// Placeholders in `text`, left to right, non-overlapping. Whitespace inside
/// the braces is ignored; names are `[A-Za-z_][A-Za-z0-9_]*`.
fn placeholders(text: &str) -> impl Iterator<Item = Placeholder<'_>> {
    let mut from = 0;
    std::iter::from_fn(move || {
        while let Some(offset) = text[from..].find("{{") {
            let start = from + offset;
            if let Some(placeholder) = placeholder_at(text, start) {
                from = placeholder.end;
                return Some(placeholder);
            }
            from = start + 1;
        }
        None
    })
}

fn placeholder_at(text: &str, start: usize) -> Option<Placeholder<'_>> {
    let inner = text[start + 2..].trim_start();
    let name_len = inner
        .char_indices()
        .take_while(|&(i, c)| c == '_' || c.is_ascii_alphabetic() || (i > 0 && c.is_ascii_digit()))
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    let rest = inner[name_len..].trim_start().strip_prefix("}}")?;
    Some(Placeholder {
        start,
        end: text.len() - rest.len(),
        name: &inner[..name_len],
    })
}

/// Distinct variable names referenced by `text`, in first-seen order.
pub fn extract_vars(text: &str) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for placeholder in placeholders(text) {
        if !seen.iter().any(|s| s == placeholder.name) {
            seen.push(placeholder.name.to_string());
        }
    }
    seen
}

/// Union of subject and body variables, subject first.
pub fn referenced_vars(subject: Option<&str>, body: &str) -> Vec<String> {
    let mut vars = subject.map(extract_vars).unwrap_or_default();
    for var in extract_vars(body) {
        if !vars.contains(&var) {
            vars.push(var);
        }
    }
    vars
}

/// Placeholder written in place of a missing payload value
pub fn missing_marker(key: &str) -> String {
    format!("⟦MISSING:{}⟧", key)
}

/// Render a template against a payload.
///
/// Variables outside `allowed_keys` fail fast with `UnknownVariable`: a stored
/// template is validated on write, so this only happens on catalog drift.
pub fn render_template(
    template: &NotificationTemplate,
    allowed_keys: &BTreeSet<String>,
    payload: &Payload,
    options: RenderOptions,
) -> TemplateResult<RenderedMessage> {
    let referenced = referenced_vars(template.subject_template.as_deref(), &template.body_template);

    let unknown: Vec<String> = referenced
        .iter()
        .filter(|key| !allowed_keys.contains(*key))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        tracing::error!(
            template_id = %template.id,
            unknown = ?unknown,
            "Stored template references variables missing from the catalog"
        );
        return Err(TemplateError::UnknownVariable(unknown));
    }

    let mut missing = Vec::new();
    let subject = template
        .subject_template
        .as_deref()
        .map(|s| substitute_string(s, payload, &mut missing));
    let body = substitute_string(&template.body_template, payload, &mut missing);

    if options.throw_on_missing_payload && !missing.is_empty() {
        return Err(TemplateError::MissingPayload(missing));
    }

    Ok(RenderedMessage {
        subject,
        body,
        diagnostics: RenderDiagnostics {
            referenced_vars: referenced,
            missing_vars: missing,
        },
    })
}

fn substitute_string(template: &str, payload: &Payload, missing: &mut Vec<String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut copied = 0;
    for placeholder in placeholders(template) {
        result.push_str(&template[copied..placeholder.start]);
        let key = placeholder.name;
        match payload.get(key).and_then(|v| v.render()) {
            Some(value) => result.push_str(&value),
            None => {
                if !missing.iter().any(|m| m == key) {
                    missing.push(key.to_string());
                }
                result.push_str(&missing_marker(key));
            }
        }
        copied = placeholder.end;
    }
    result.push_str(&template[copied..]);
    result
}
