//! The leader's `spawn` tool: bring a new worker agent into the session.
//!
//! Spawning a worker means cloning the leader repository onto an
//! `agent/<name>` branch, appending a session entry the spawn tool owns,
//! launching this same binary as a subprocess with the serialized
//! [`AgentConfig`] in its environment, and enqueueing the worker's first
//! task message. Worker defaults (model, budget, iteration cap) come from
//! the inherited `SEALTEAM_*` environment.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::Deserialize;

use crate::bus::{MessageBus, MessageKind, QueueMessage, MAIN_ADDR, SHARED_ADDR};
use crate::config::{
    AgentConfig, AGENT_CONFIG_ENV, DEFAULT_BUDGET, DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_TOOL_TURNS,
    DEFAULT_MAX_WORKERS, DEFAULT_TEAM_MODEL, LEADER_NAME, MAX_WORKERS_CEILING,
};
use crate::gitops;
use crate::state::{self, AgentSessionEntry, AgentStatus};

/// Tool input for `spawn`.
#[derive(Debug, Deserialize)]
pub struct SpawnRequest {
    pub name: String,
    pub role: String,
    pub purpose: String,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
}

/// Default tool set for workers. Workers cannot spawn or author tools.
fn default_worker_tools() -> Vec<String> {
    [
        "file-read",
        "file-write",
        "bash",
        "git",
        "send",
        "web-search",
        "web-fetch",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Spawn a worker agent. Returns a human-readable summary for the model.
pub async fn spawn_worker(
    workspace: &Path,
    leader: &AgentConfig,
    bus: &MessageBus,
    request: SpawnRequest,
) -> Result<String> {
    validate_name(&request.name)?;

    let mut session = state::read_session_state(workspace)
        .await
        .context("read session state")?
        .context("no session state; cannot spawn before the session is initialized")?;

    if session.agents.iter().any(|a| a.config.name == request.name) {
        bail!("an agent named '{}' already exists in this session", request.name);
    }

    let max_workers = env_u32("SEALTEAM_MAX_AGENTS", DEFAULT_MAX_WORKERS)
        .clamp(1, MAX_WORKERS_CEILING);
    let running_workers = session
        .agents
        .iter()
        .filter(|a| a.status == AgentStatus::Running && a.config.name != LEADER_NAME)
        .count() as u32;
    if running_workers >= max_workers {
        bail!("worker limit reached ({running_workers}/{max_workers}); wait for a worker to finish");
    }

    let config = AgentConfig {
        name: request.name.clone(),
        role: request.role,
        purpose: request.purpose.clone(),
        allowed_tools: request.tools.unwrap_or_else(default_worker_tools),
        model: std::env::var("SEALTEAM_TEAM_MODEL")
            .unwrap_or_else(|_| DEFAULT_TEAM_MODEL.to_string()),
        token_budget: env_u64("SEALTEAM_DEFAULT_BUDGET", DEFAULT_BUDGET),
        max_iterations: env_u32("SEALTEAM_DEFAULT_MAX_ITERATIONS", DEFAULT_MAX_ITERATIONS),
        max_tool_turns: DEFAULT_MAX_TOOL_TURNS,
        workspace: workspace.to_path_buf(),
        queue_url: leader.queue_url.clone(),
    };

    // Give the worker its own clone on its own branch.
    let leader_repo = workspace.join(LEADER_NAME);
    let worker_dir = workspace.join(&config.name);
    gitops::clone_for_worker(&leader_repo, &worker_dir, &config.name)
        .await
        .context("clone worker repository")?;

    // Launch the worker as a subprocess of this binary.
    let exe = std::env::current_exe().context("resolve current executable")?;
    let serialized = serde_json::to_string(&config).context("serialize agent config")?;
    let mut child = tokio::process::Command::new(exe)
        .env(AGENT_CONFIG_ENV, serialized)
        .spawn()
        .context("spawn worker process")?;
    let pid = child.id().context("worker pid unavailable")?;

    // Reap the worker on exit so pid liveness probes stay truthful. The
    // supervisor tracks the worker's fate through the session file.
    tokio::spawn(async move {
        let _ = child.wait().await;
    });

    // The spawn tool owns exactly the entry it appends.
    session.agents.push(AgentSessionEntry {
        config: config.clone(),
        pid,
        status: AgentStatus::Running,
        start_time: Utc::now().to_rfc3339(),
        end_time: None,
    });
    state::write_session_state(workspace, &session)
        .await
        .context("append worker session entry")?;

    // First task: the worker's purpose.
    let task = QueueMessage::new(LEADER_NAME, &config.name, MessageKind::Task, &request.purpose);
    bus.send(&task, Some(workspace))
        .await
        .context("enqueue worker's initial task")?;

    Ok(format!(
        "Spawned worker '{}' (pid {pid}) on branch agent/{} with purpose: {}",
        config.name, config.name, request.purpose
    ))
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("worker name must not be empty");
    }
    if name == LEADER_NAME || name == MAIN_ADDR || name == SHARED_ADDR {
        bail!("'{name}' is a reserved name");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        bail!("worker name '{name}' may only contain alphanumerics, '-' and '_'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_and_malformed_names_are_rejected() {
        assert!(validate_name("bob").is_err());
        assert!(validate_name("main").is_err());
        assert!(validate_name("shared").is_err());
        assert!(validate_name("").is_err());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("worker-2").is_ok());
    }

    #[test]
    fn worker_defaults_exclude_spawn_and_create_tool() {
        let tools = default_worker_tools();
        assert!(!tools.contains(&"spawn".to_string()));
        assert!(!tools.contains(&"create-tool".to_string()));
        assert!(tools.contains(&"bash".to_string()));
        assert!(tools.contains(&"send".to_string()));
    }
}
