//! Tool host: built-in tool registration, per-agent binding, dispatch, and
//! dynamic tool loading.
//!
//! Every tool exposes a uniform surface: a JSON-schema descriptor plus a
//! handler returning text. Two categories exist:
//!
//! - **Local tools** execute in-process (or as child processes the host
//!   controls): file I/O, shell, git, queue send, worker spawn, tool
//!   authoring, and validated dynamic tools.
//! - **Server-hosted tools** (web search/fetch) are advertised to the API as
//!   capability descriptors only; the provider executes them and their
//!   results appear inline in the model's response.
//!
//! The host binds the agent's identity, working directory, and message bus
//! into handlers at construction, so the life loop dispatches by name only.

pub mod dynamic;
pub mod shell;
pub mod spawn;

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::bus::{MessageBus, MessageKind, QueueMessage, MAIN_ADDR, SHARED_ADDR};
use crate::config::AgentConfig;
use crate::error::ToolError;
use crate::gitops;
use crate::llm::ToolDefinition;
use crate::validator;

use dynamic::DynamicTool;
use spawn::SpawnRequest;

/// Timeout for `bash` tool commands.
const SHELL_TIMEOUT_SECS: u64 = 120;

/// Names the provider executes on its side.
const SERVER_TOOL_NAMES: &[&str] = &["web-search", "web-fetch", "web_search", "web_fetch"];

/// Per-agent bindings shared by all handlers.
pub struct ToolContext {
    pub config: AgentConfig,
    pub agent_dir: PathBuf,
    pub bus: MessageBus,
}

/// Registry of built-in tools plus loaded dynamic tools, bound to one agent.
pub struct ToolHost {
    ctx: ToolContext,
    dynamic: Vec<DynamicTool>,
    registry_mtime: Option<std::time::SystemTime>,
    scanned: bool,
}

impl ToolHost {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            dynamic: Vec::new(),
            registry_mtime: None,
            scanned: false,
        }
    }

    /// Descriptors for locally-executed tools in `allowed`, plus every loaded
    /// dynamic tool. Server-hosted names are skipped here.
    pub fn local_tool_defs(&self, allowed: &[String]) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = builtin_defs()
            .into_iter()
            .filter(|def| allowed.iter().any(|a| a == &def.name))
            .collect();
        defs.extend(self.dynamic.iter().map(|t| t.definition.clone()));
        defs
    }

    /// Provider-side capability descriptors for the server-hosted names in
    /// `allowed`.
    pub fn server_tool_specs(&self, allowed: &[String]) -> Vec<Value> {
        let mut specs = Vec::new();
        if allowed.iter().any(|a| a == "web-search") {
            specs.push(json!({
                "type": "web_search_20250305",
                "name": "web_search",
                "max_uses": 5
            }));
        }
        if allowed.iter().any(|a| a == "web-fetch") {
            specs.push(json!({
                "type": "web_fetch_20250910",
                "name": "web_fetch",
                "max_uses": 10
            }));
        }
        specs
    }

    pub fn is_server_tool(&self, name: &str) -> bool {
        SERVER_TOOL_NAMES.contains(&name)
    }

    /// Reread the dynamic tool registry and load newly-activated entries.
    /// Cheap when the registry file has not changed since the last scan.
    pub async fn scan_dynamic(&mut self, workspace: &Path) -> anyhow::Result<usize> {
        let mtime = std::fs::metadata(dynamic::registry_path(workspace))
            .and_then(|m| m.modified())
            .ok();
        if self.scanned && mtime == self.registry_mtime {
            return Ok(self.dynamic.len());
        }
        self.scanned = true;
        self.registry_mtime = mtime;
        self.dynamic = dynamic::load_active_tools(workspace).await?;
        Ok(self.dynamic.len())
    }

    /// Execute a local tool by name. Server-hosted and unknown names error;
    /// handler failures are returned as `ToolError::Failed` for the tool
    /// sub-loop to stringify back to the model.
    pub async fn execute(&self, name: &str, input: &Value) -> Result<String, ToolError> {
        if self.is_server_tool(name) {
            return Err(ToolError::ServerHosted(name.to_string()));
        }

        match name {
            "file-read" => self.file_read(input).await,
            "file-write" => self.file_write(input).await,
            "bash" => self.bash(input).await,
            "git" => self.git(input).await,
            "send" => self.send(input).await,
            "spawn" => self.spawn(input).await,
            "create-tool" => self.create_tool(input).await,
            other => {
                if let Some(tool) = self.dynamic.iter().find(|t| t.definition.name == other) {
                    tool.execute(input).await
                } else {
                    Err(ToolError::Unknown(other.to_string()))
                }
            }
        }
    }

    // -- Built-in handlers ---------------------------------------------------

    async fn file_read(&self, input: &Value) -> Result<String, ToolError> {
        let path_str = require_str(input, "path", "file-read")?;
        let full_path = if Path::new(path_str).is_absolute() {
            PathBuf::from(path_str)
        } else {
            self.ctx.agent_dir.join(path_str)
        };
        tokio::fs::read_to_string(&full_path)
            .await
            .map_err(|e| ToolError::Failed {
                name: "file-read".to_string(),
                message: format!("{}: {e}", full_path.display()),
            })
    }

    async fn file_write(&self, input: &Value) -> Result<String, ToolError> {
        let path_str = require_str(input, "path", "file-write")?;
        let content = require_str(input, "content", "file-write")?;

        if Path::new(path_str).is_absolute() || path_str.split('/').any(|seg| seg == "..") {
            return Err(ToolError::BadInput {
                name: "file-write".to_string(),
                message: format!("path '{path_str}' must stay inside the agent directory"),
            });
        }

        let full_path = self.ctx.agent_dir.join(path_str);
        if let Some(parent) = full_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Failed {
                    name: "file-write".to_string(),
                    message: e.to_string(),
                })?;
        }
        tokio::fs::write(&full_path, content)
            .await
            .map_err(|e| ToolError::Failed {
                name: "file-write".to_string(),
                message: e.to_string(),
            })?;

        Ok(json!({"written_bytes": content.len(), "path": path_str}).to_string())
    }

    async fn bash(&self, input: &Value) -> Result<String, ToolError> {
        let command = require_str(input, "command", "bash")?;
        let result = shell::execute_shell(command, &self.ctx.agent_dir, SHELL_TIMEOUT_SECS)
            .await
            .map_err(|e| ToolError::Failed {
                name: "bash".to_string(),
                message: e.to_string(),
            })?;
        serde_json::to_string(&result).map_err(|e| ToolError::Failed {
            name: "bash".to_string(),
            message: format!("serialize result: {e}"),
        })
    }

    async fn git(&self, input: &Value) -> Result<String, ToolError> {
        let args: Vec<String> = match input.get("args") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            Some(Value::String(s)) => s.split_whitespace().map(|s| s.to_string()).collect(),
            _ => {
                return Err(ToolError::BadInput {
                    name: "git".to_string(),
                    message: "missing 'args' (array of strings)".to_string(),
                })
            }
        };
        let arg_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();
        gitops::run_git(&self.ctx.agent_dir, &arg_refs)
            .await
            .map_err(|e| ToolError::Failed {
                name: "git".to_string(),
                message: e.to_string(),
            })
    }

    async fn send(&self, input: &Value) -> Result<String, ToolError> {
        let to = require_str(input, "to", "send")?;
        let kind_str = require_str(input, "type", "send")?;
        let content = require_str(input, "content", "send")?;

        let kind: MessageKind = serde_json::from_value(Value::String(kind_str.to_string()))
            .map_err(|_| ToolError::BadInput {
                name: "send".to_string(),
                message: format!("unknown message type '{kind_str}'"),
            })?;

        let msg = QueueMessage::new(&self.ctx.config.name, to, kind, content);
        self.ctx
            .bus
            .send(&msg, Some(&self.ctx.config.workspace))
            .await
            .map_err(|e| ToolError::Failed {
                name: "send".to_string(),
                message: e.to_string(),
            })?;
        Ok(format!("Message {} sent to {to}", msg.id))
    }

    async fn spawn(&self, input: &Value) -> Result<String, ToolError> {
        if !self.ctx.config.is_leader() {
            return Err(ToolError::Failed {
                name: "spawn".to_string(),
                message: "only the leader can spawn workers".to_string(),
            });
        }
        let request: SpawnRequest =
            serde_json::from_value(input.clone()).map_err(|e| ToolError::BadInput {
                name: "spawn".to_string(),
                message: e.to_string(),
            })?;
        spawn::spawn_worker(&self.ctx.config.workspace, &self.ctx.config, &self.ctx.bus, request)
            .await
            .map_err(|e| ToolError::Failed {
                name: "spawn".to_string(),
                message: format!("{e:#}"),
            })
    }

    async fn create_tool(&self, input: &Value) -> Result<String, ToolError> {
        let name = require_str(input, "name", "create-tool")?;
        let source = require_str(input, "source", "create-tool")?;
        let test_source = require_str(input, "test_source", "create-tool")?;

        let report = validator::create_and_validate(
            &self.ctx.config.workspace,
            name,
            source,
            test_source,
        )
        .await
        .map_err(|e| ToolError::Failed {
            name: "create-tool".to_string(),
            message: e.to_string(),
        })?;

        // Validation verdicts (including failures) go back to the authoring
        // agent as the tool result, not as an error.
        Ok(report.render())
    }
}

fn require_str<'a>(input: &'a Value, field: &str, tool: &str) -> Result<&'a str, ToolError> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::BadInput {
            name: tool.to_string(),
            message: format!("missing or invalid '{field}' argument"),
        })
}

/// Descriptors for every built-in local tool.
pub fn builtin_defs() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "file-read".to_string(),
            description: "Read a file. Relative paths resolve against your agent directory; \
                          absolute paths are read as-is."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "File path to read"}
                },
                "required": ["path"]
            }),
        },
        ToolDefinition {
            name: "file-write".to_string(),
            description: "Write a file inside your agent directory. Parent directories are \
                          created automatically; writes outside the directory are rejected."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Path relative to your agent directory"},
                    "content": {"type": "string", "description": "Content to write"}
                },
                "required": ["path", "content"]
            }),
        },
        ToolDefinition {
            name: "bash".to_string(),
            description: "Execute a shell command via `sh -c` in your agent directory. Returns \
                          JSON with stdout, stderr, exit_code, and timed_out fields."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "command": {"type": "string", "description": "The shell command to execute"}
                },
                "required": ["command"]
            }),
        },
        ToolDefinition {
            name: "git".to_string(),
            description: "Run a git command in your repository, e.g. {\"args\": [\"status\"]} or \
                          {\"args\": [\"merge\", \"agent-alice/agent/alice\"]}."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "args": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Arguments passed to git"
                    }
                },
                "required": ["args"]
            }),
        },
        ToolDefinition {
            name: "send".to_string(),
            description: format!(
                "Send a message to another agent's queue. 'to' is an agent name, '{SHARED_ADDR}' \
                 (every running agent), or '{MAIN_ADDR}' (the supervisor). 'type' is one of \
                 task, status, review, complete, error, cancel, all-complete."
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "to": {"type": "string", "description": "Recipient agent name or address"},
                    "type": {"type": "string", "description": "Message type"},
                    "content": {"type": "string", "description": "Message body"}
                },
                "required": ["to", "type", "content"]
            }),
        },
        ToolDefinition {
            name: "spawn".to_string(),
            description: "Spawn a worker agent with its own repository clone, branch, queue, and \
                          budget. The worker immediately receives its purpose as a task."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Unique worker name"},
                    "role": {"type": "string", "description": "Short role label, e.g. 'researcher'"},
                    "purpose": {"type": "string", "description": "Completion condition for this worker"},
                    "tools": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional tool allowlist; defaults to the standard worker set"
                    }
                },
                "required": ["name", "role", "purpose"]
            }),
        },
        ToolDefinition {
            name: "create-tool".to_string(),
            description: "Author a dynamic tool. Provide TypeScript source exporting a definition \
                          and handler, plus a test file. The tool only activates if the definition \
                          parses, the source passes the security scan, and all tests pass."
                .to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string", "description": "Tool name (also the file stem)"},
                    "source": {"type": "string", "description": "TypeScript tool source"},
                    "test_source": {"type": "string", "description": "Companion test file source"}
                },
                "required": ["name", "source", "test_source"]
            }),
        },
    ]
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::memory::MemoryBackend;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_host(tmp: &TempDir) -> ToolHost {
        let workspace = tmp.path().to_path_buf();
        let agent_dir = workspace.join("alice");
        std::fs::create_dir_all(&agent_dir).unwrap();

        let config = AgentConfig {
            name: "alice".to_string(),
            role: "worker".to_string(),
            purpose: "test".to_string(),
            allowed_tools: vec!["file-read".into(), "file-write".into(), "bash".into()],
            model: "m".to_string(),
            token_budget: 1000,
            max_iterations: 5,
            max_tool_turns: 5,
            workspace,
            queue_url: "valkey://localhost:6379".to_string(),
        };
        ToolHost::new(ToolContext {
            config,
            agent_dir,
            bus: MessageBus::new(Arc::new(MemoryBackend::new())),
        })
    }

    #[test]
    fn local_defs_filter_by_allowlist() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let defs = host.local_tool_defs(&["bash".to_string(), "send".to_string()]);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["bash", "send"]);
    }

    #[test]
    fn server_specs_cover_search_and_fetch() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let specs = host.server_tool_specs(&["web-search".to_string(), "web-fetch".to_string()]);
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0]["name"], "web_search");
        assert_eq!(specs[1]["name"], "web_fetch");

        assert!(host.is_server_tool("web_search"));
        assert!(host.is_server_tool("web-fetch"));
        assert!(!host.is_server_tool("bash"));
    }

    #[tokio::test]
    async fn execute_rejects_server_and_unknown_names() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let err = host.execute("web-search", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::ServerHosted(_)));

        let err = host.execute("no-such-tool", &json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Unknown(_)));
    }

    #[tokio::test]
    async fn file_write_then_read_round_trips() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let written = host
            .execute("file-write", &json!({"path": "notes.md", "content": "hello"}))
            .await
            .unwrap();
        assert!(written.contains("notes.md"));

        let content = host
            .execute("file-read", &json!({"path": "notes.md"}))
            .await
            .unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn file_write_rejects_escape_attempts() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let err = host
            .execute("file-write", &json!({"path": "../escape.txt", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadInput { .. }));
        assert!(!tmp.path().join("escape.txt").exists());

        let err = host
            .execute("file-write", &json!({"path": "/etc/passwd", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadInput { .. }));
    }

    #[tokio::test]
    async fn bash_returns_structured_result() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let result = host
            .execute("bash", &json!({"command": "echo hi"}))
            .await
            .unwrap();
        let parsed: Value = serde_json::from_str(&result).unwrap();
        assert_eq!(parsed["stdout"].as_str().unwrap().trim(), "hi");
        assert_eq!(parsed["exit_code"], 0);
    }

    #[tokio::test]
    async fn send_delivers_to_recipient_queue() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        host.execute(
            "send",
            &json!({"to": "bob", "type": "status", "content": "halfway there"}),
        )
        .await
        .unwrap();

        let received = host
            .ctx
            .bus
            .receive_non_blocking("bob")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.from, "alice");
        assert_eq!(received.kind, MessageKind::Status);
        assert_eq!(received.content, "halfway there");
    }

    #[tokio::test]
    async fn send_rejects_unknown_message_type() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let err = host
            .execute("send", &json!({"to": "bob", "type": "gossip", "content": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::BadInput { .. }));
    }

    #[tokio::test]
    async fn spawn_is_leader_only() {
        let tmp = TempDir::new().unwrap();
        let host = test_host(&tmp);

        let err = host
            .execute(
                "spawn",
                &json!({"name": "carol", "role": "r", "purpose": "p"}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { message, .. } if message.contains("leader")));
    }
}
