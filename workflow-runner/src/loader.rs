//! Thin YAML workflow-file loader.
//!
//! A workflow file carries an id, a natural-language task description with
//! `{{variable}}` placeholders, a declared tool allow-list, and default
//! variables:
//!
//! ```yaml
//! id: summarize-src
//! name: Summarize sources
//! description: |
//!   Read the files under {{dir}} and write a summary to {{output_path}}.
//! tools:
//!   - file-list
//!   - file-read
//!   - file-write
//! variables:
//!   dir: src
//!   output_path: SUMMARY.md
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use workflow_runner_sdk::WorkflowSource;

#[derive(Debug, Deserialize)]
struct WorkflowFile {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    description: String,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    variables: BTreeMap<String, Value>,
}

/// Load and parse a workflow file into a [`WorkflowSource`].
///
/// The id defaults to the file stem; the raw text is kept verbatim for
/// resume compatibility checks.
pub fn load_workflow(path: &Path) -> Result<WorkflowSource> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file: {}", path.display()))?;
    let file: WorkflowFile = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse workflow YAML: {}", path.display()))?;

    let id = file.id.unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("workflow")
            .to_string()
    });
    let name = file.name.unwrap_or_else(|| id.clone());

    Ok(WorkflowSource {
        id,
        name,
        template: file.description,
        tools: file.tools,
        variables: file.variables,
        raw,
        file_path: Some(path.to_path_buf()),
    })
}
