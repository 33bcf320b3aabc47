//! Rendering of the task description template.
//!
//! Workflows describe their task in natural language with `{{variable}}`
//! placeholders. Rendering is strict: an unresolved placeholder is a fatal
//! error rather than a silently-empty instruction to the model.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("unclosed placeholder starting at byte {offset}")]
    UnclosedPlaceholder { offset: usize },

    #[error("empty placeholder at byte {offset}")]
    EmptyPlaceholder { offset: usize },

    #[error("no value for template variable '{name}'")]
    MissingVariable { name: String },
}

/// Render `template`, substituting every `{{name}}` placeholder from
/// `variables`. String values are inserted verbatim; other JSON values are
/// inserted in compact JSON form.
pub fn render(
    template: &str,
    variables: &BTreeMap<String, Value>,
) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut consumed = 0usize;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 2..];
        let close = after_open
            .find("}}")
            .ok_or(TemplateError::UnclosedPlaceholder {
                offset: consumed + start,
            })?;
        let name = after_open[..close].trim();
        if name.is_empty() {
            return Err(TemplateError::EmptyPlaceholder {
                offset: consumed + start,
            });
        }
        let value = variables
            .get(name)
            .ok_or_else(|| TemplateError::MissingVariable {
                name: name.to_string(),
            })?;
        out.push_str(&value_to_text(value));
        let advance = start + 2 + close + 2;
        consumed += advance;
        rest = &rest[advance..];
    }
    out.push_str(rest);
    Ok(out)
}

/// All placeholder names in `template`, in first-appearance order, deduped.
pub fn placeholders(template: &str) -> Result<Vec<String>, TemplateError> {
    let mut names = Vec::new();
    let mut rest = template;
    let mut consumed = 0usize;

    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let close = after_open
            .find("}}")
            .ok_or(TemplateError::UnclosedPlaceholder {
                offset: consumed + start,
            })?;
        let name = after_open[..close].trim();
        if name.is_empty() {
            return Err(TemplateError::EmptyPlaceholder {
                offset: consumed + start,
            });
        }
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        let advance = start + 2 + close + 2;
        consumed += advance;
        rest = &rest[advance..];
    }
    Ok(names)
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
