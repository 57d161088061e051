//! Dynamic tool registry and subprocess-backed tool execution.
//!
//! Agent-authored tools live as TypeScript sources under `<workspace>/tools/`
//! with a companion test file. The registry (`tools/registry.json`) is the
//! single source of truth for activation; only entries the validator has
//! moved to `active` are ever loaded. Registry rewrites are whole-file and
//! atomic, written only by the validator.
//!
//! A loaded tool runs as a subprocess: the runtime executes the source, the
//! tool input arrives as JSON on stdin, and stdout is the tool result.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::{ToolError, ValidatorError};
use crate::llm::ToolDefinition;

/// Runtime used to execute dynamic tool sources. Overridable via
/// `SEALTEAM_TOOL_RUNTIME`.
pub const DEFAULT_TOOL_RUNTIME: &str = "bun";

/// Wall-clock limit for one dynamic tool invocation.
const EXECUTION_TIMEOUT: Duration = Duration::from_secs(60);
/// Wall-clock limit for a `--definition` probe.
const DEFINITION_TIMEOUT: Duration = Duration::from_secs(10);

pub fn tool_runtime() -> String {
    std::env::var("SEALTEAM_TOOL_RUNTIME").unwrap_or_else(|_| DEFAULT_TOOL_RUNTIME.to_string())
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Activation state of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryStatus {
    Pending,
    Active,
    Disabled,
}

/// One dynamic tool's registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRegistryEntry {
    pub name: String,
    /// Source path relative to the workspace root.
    pub path: String,
    pub status: RegistryStatus,
    pub validated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The on-disk registry file (`tools/registry.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRegistry {
    pub tools: Vec<ToolRegistryEntry>,
}

impl ToolRegistry {
    pub fn active_entries(&self) -> impl Iterator<Item = &ToolRegistryEntry> {
        self.tools
            .iter()
            .filter(|e| e.status == RegistryStatus::Active)
    }

    /// Insert or replace the entry with the same name.
    pub fn upsert(&mut self, entry: ToolRegistryEntry) {
        if let Some(existing) = self.tools.iter_mut().find(|e| e.name == entry.name) {
            *existing = entry;
        } else {
            self.tools.push(entry);
        }
    }
}

pub fn registry_path(workspace: &Path) -> PathBuf {
    workspace.join("tools").join("registry.json")
}

/// Read the registry, defaulting to empty when the file does not exist.
pub fn read_registry(workspace: &Path) -> Result<ToolRegistry, ValidatorError> {
    let path = registry_path(workspace);
    match std::fs::read_to_string(&path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|e| ValidatorError::Registry(format!("parse {}: {e}", path.display()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ToolRegistry::default()),
        Err(e) => Err(ValidatorError::Registry(format!(
            "read {}: {e}",
            path.display()
        ))),
    }
}

/// Atomically rewrite the whole registry file (temp file + rename).
pub fn write_registry(workspace: &Path, registry: &ToolRegistry) -> Result<(), ValidatorError> {
    let path = registry_path(workspace);
    let parent = path.parent().expect("registry path has a parent");
    std::fs::create_dir_all(parent)
        .map_err(|e| ValidatorError::Registry(format!("create {}: {e}", parent.display())))?;

    let mut buf = serde_json::to_string_pretty(registry)
        .map_err(|e| ValidatorError::Registry(e.to_string()))?;
    buf.push('\n');

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &buf)
        .map_err(|e| ValidatorError::Registry(format!("write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| ValidatorError::Registry(format!("replace {}: {e}", path.display())))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Loaded tools
// ---------------------------------------------------------------------------

/// An active dynamic tool ready for dispatch.
#[derive(Debug, Clone)]
pub struct DynamicTool {
    pub definition: ToolDefinition,
    pub source_path: PathBuf,
}

impl DynamicTool {
    /// Execute the tool: input JSON on stdin, stdout is the result text.
    pub async fn execute(&self, input: &serde_json::Value) -> Result<String, ToolError> {
        let runtime = tool_runtime();
        let mut child = Command::new(&runtime)
            .arg(&self.source_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::Failed {
                name: self.definition.name.clone(),
                message: format!("spawn {runtime}: {e}"),
            })?;

        let payload = serde_json::to_vec(input).map_err(|e| ToolError::BadInput {
            name: self.definition.name.clone(),
            message: e.to_string(),
        })?;
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(&payload).await;
            // Dropping stdin closes the pipe so the tool sees EOF.
        }

        let output = tokio::time::timeout(EXECUTION_TIMEOUT, child.wait_with_output())
            .await
            .map_err(|_| ToolError::Failed {
                name: self.definition.name.clone(),
                message: format!("timed out after {}s", EXECUTION_TIMEOUT.as_secs()),
            })?
            .map_err(|e| ToolError::Failed {
                name: self.definition.name.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(ToolError::Failed {
                name: self.definition.name.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Probe a tool source for its definition by invoking it with `--definition`.
/// The tool must print its JSON descriptor to stdout and exit zero.
pub async fn probe_definition(source_path: &Path) -> Result<ToolDefinition, ValidatorError> {
    let runtime = tool_runtime();
    let output = tokio::time::timeout(
        DEFINITION_TIMEOUT,
        Command::new(&runtime)
            .arg(source_path)
            .arg("--definition")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| ValidatorError::Runtime("definition probe timed out".to_string()))?
    .map_err(|e| ValidatorError::Runtime(format!("spawn {runtime}: {e}")))?;

    if !output.status.success() {
        return Err(ValidatorError::Runtime(format!(
            "definition probe exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let raw = String::from_utf8_lossy(&output.stdout);
    let definition: ToolDefinition = serde_json::from_str(raw.trim())
        .map_err(|e| ValidatorError::Runtime(format!("definition is not valid JSON: {e}")))?;

    if definition.name.is_empty() || definition.description.is_empty() {
        return Err(ValidatorError::Runtime(
            "definition must carry a non-empty name and description".to_string(),
        ));
    }
    if !definition.input_schema.is_object() {
        return Err(ValidatorError::Runtime(
            "input_schema must be a JSON object".to_string(),
        ));
    }
    Ok(definition)
}

/// Load every `active` registry entry as an executable tool. Entries whose
/// definition probe fails are skipped with a warning; activation stays with
/// the validator.
pub async fn load_active_tools(workspace: &Path) -> Result<Vec<DynamicTool>, ValidatorError> {
    let registry = read_registry(workspace)?;
    let mut loaded = Vec::new();

    for entry in registry.active_entries() {
        let source_path = workspace.join(&entry.path);
        if !source_path.exists() {
            tracing::warn!(tool = %entry.name, "active tool source missing, skipping");
            continue;
        }
        match probe_definition(&source_path).await {
            Ok(definition) => loaded.push(DynamicTool {
                definition,
                source_path,
            }),
            Err(e) => {
                tracing::warn!(tool = %entry.name, error = %e, "failed to load active tool");
            }
        }
    }
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(name: &str, status: RegistryStatus) -> ToolRegistryEntry {
        ToolRegistryEntry {
            name: name.to_string(),
            path: format!("tools/{name}.ts"),
            status,
            validated_at: "2026-01-01T00:00:00Z".to_string(),
            error: None,
        }
    }

    #[test]
    fn registry_round_trips() {
        let tmp = TempDir::new().unwrap();
        let mut registry = ToolRegistry::default();
        registry.upsert(entry("word-count", RegistryStatus::Active));
        registry.upsert(entry("broken", RegistryStatus::Disabled));

        write_registry(tmp.path(), &registry).unwrap();
        let loaded = read_registry(tmp.path()).unwrap();
        assert_eq!(loaded.tools.len(), 2);
        assert_eq!(loaded.active_entries().count(), 1);
    }

    #[test]
    fn missing_registry_reads_as_empty() {
        let tmp = TempDir::new().unwrap();
        let registry = read_registry(tmp.path()).unwrap();
        assert!(registry.tools.is_empty());
    }

    #[test]
    fn upsert_replaces_by_name() {
        let mut registry = ToolRegistry::default();
        registry.upsert(entry("t", RegistryStatus::Pending));
        let mut updated = entry("t", RegistryStatus::Disabled);
        updated.error = Some("tests failed".to_string());
        registry.upsert(updated);

        assert_eq!(registry.tools.len(), 1);
        assert_eq!(registry.tools[0].status, RegistryStatus::Disabled);
        assert_eq!(registry.tools[0].error.as_deref(), Some("tests failed"));
    }
}
