//! Built-in tools registered by the bundled CLI.
//!
//! These are ordinary [`WorkflowTool`] plugins; the engine knows nothing
//! about them. Each validates its own parameters and returns a JSON
//! payload.

use std::sync::Arc;

use serde_json::{json, Value};
use workflow_runner_sdk::{
    async_trait, log_file_saved, CancellationToken, ToolOutcome, ToolRegistry, WorkflowTool,
};

/// Registry with the bundled file tools.
pub fn builtin_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FileReadTool));
    registry.register(Arc::new(FileWriteTool));
    registry.register(Arc::new(FileListTool));
    registry
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, ToolOutcome> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolOutcome::failure(format!("missing required parameter '{}'", key)))
}

pub struct FileReadTool;

#[async_trait]
impl WorkflowTool for FileReadTool {
    fn name(&self) -> &str {
        "file-read"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file and return its content"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File path to read" }
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, params: Value, _cancel: CancellationToken) -> ToolOutcome {
        let path = match required_str(&params, "path") {
            Ok(path) => path,
            Err(failure) => return failure,
        };
        match tokio::fs::read_to_string(path).await {
            Ok(content) => ToolOutcome::success(
                json!({ "path": path, "content": content }).to_string(),
            ),
            Err(e) => ToolOutcome::failure(format!("failed to read '{}': {}", path, e)),
        }
    }
}

pub struct FileWriteTool;

#[async_trait]
impl WorkflowTool for FileWriteTool {
    fn name(&self) -> &str {
        "file-write"
    }

    fn description(&self) -> &str {
        "Write text content to a file, creating parent directories"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Destination file path" },
                "content": { "type": "string", "description": "Text content to write" }
            },
            "required": ["path", "content"]
        })
    }

    async fn invoke(&self, params: Value, _cancel: CancellationToken) -> ToolOutcome {
        let path = match required_str(&params, "path") {
            Ok(path) => path,
            Err(failure) => return failure,
        };
        let content = match required_str(&params, "content") {
            Ok(content) => content,
            Err(failure) => return failure,
        };

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return ToolOutcome::failure(format!(
                        "failed to create parent directories for '{}': {}",
                        path, e
                    ));
                }
            }
        }
        match tokio::fs::write(path, content).await {
            Ok(()) => {
                log_file_saved!(path);
                ToolOutcome::success(
                    json!({ "path": path, "bytes_written": content.len() }).to_string(),
                )
                .with_context_update("last_written_path", json!(path))
            }
            Err(e) => ToolOutcome::failure(format!("failed to write '{}': {}", path, e)),
        }
    }
}

pub struct FileListTool;

#[async_trait]
impl WorkflowTool for FileListTool {
    fn name(&self) -> &str {
        "file-list"
    }

    fn description(&self) -> &str {
        "List the entries of a directory"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory to list" }
            },
            "required": ["path"]
        })
    }

    async fn invoke(&self, params: Value, _cancel: CancellationToken) -> ToolOutcome {
        let path = match required_str(&params, "path") {
            Ok(path) => path,
            Err(failure) => return failure,
        };
        let mut read_dir = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(e) => {
                return ToolOutcome::failure(format!("failed to list '{}': {}", path, e))
            }
        };

        let mut entries = Vec::new();
        while let Ok(Some(entry)) = read_dir.next_entry().await {
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
        entries.sort();
        ToolOutcome::success(json!({ "path": path, "entries": entries }).to_string())
    }
}
