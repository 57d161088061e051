use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// The leader agent's fixed name. Workers address completion and error
/// messages here; the supervisor listens on `main`.
pub const LEADER_NAME: &str = "bob";

/// Default per-agent token budget.
pub const DEFAULT_BUDGET: u64 = 100_000;
/// Default per-agent iteration cap.
pub const DEFAULT_MAX_ITERATIONS: u32 = 50;
/// Default maximum tool-loop turns for workers.
pub const DEFAULT_MAX_TOOL_TURNS: u32 = 25;
/// Maximum tool-loop turns for the leader.
pub const LEADER_MAX_TOOL_TURNS: u32 = 75;
/// The leader's token budget is this multiple of the worker budget.
pub const LEADER_BUDGET_MULTIPLIER: u64 = 2;
/// Default maximum concurrent workers, clamped to 1..=12.
pub const DEFAULT_MAX_WORKERS: u32 = 6;
pub const MAX_WORKERS_CEILING: u32 = 12;

pub const DEFAULT_QUEUE_URL: &str = "valkey://localhost:6379";
pub const DEFAULT_LEADER_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_TEAM_MODEL: &str = "claude-haiku-4-5-20251001";

/// The TOML file structure for sealteam.toml (workspace or global).
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    pub general: Option<GeneralConfig>,
    pub limits: Option<LimitsConfig>,
}

#[derive(Debug, Deserialize)]
pub struct GeneralConfig {
    pub workspace: Option<String>,
    pub valkey_url: Option<String>,
    pub leader_model: Option<String>,
    pub team_model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitsConfig {
    pub workers: Option<u32>,
    pub budget: Option<u64>,
    pub max_iterations: Option<u32>,
}

impl ConfigFile {
    pub fn to_partial(&self) -> PartialConfig {
        PartialConfig {
            workspace: self
                .general
                .as_ref()
                .and_then(|g| g.workspace.as_ref().map(PathBuf::from)),
            queue_url: self.general.as_ref().and_then(|g| g.valkey_url.clone()),
            leader_model: self.general.as_ref().and_then(|g| g.leader_model.clone()),
            team_model: self.general.as_ref().and_then(|g| g.team_model.clone()),
            max_workers: self.limits.as_ref().and_then(|l| l.workers),
            worker_budget: self.limits.as_ref().and_then(|l| l.budget),
            max_iterations: self.limits.as_ref().and_then(|l| l.max_iterations),
        }
    }
}

/// Immutable per-agent configuration, serialized whole into the spawned
/// process's `AGENT_CONFIG` environment variable. `name` is the unique key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub role: String,
    pub purpose: String,
    pub allowed_tools: Vec<String>,
    pub model: String,
    pub token_budget: u64,
    pub max_iterations: u32,
    pub max_tool_turns: u32,
    pub workspace: PathBuf,
    pub queue_url: String,
}

impl AgentConfig {
    /// The agent's own directory under the workspace (`bob/` for the leader,
    /// `<name>/` for workers).
    pub fn agent_dir(&self) -> PathBuf {
        self.workspace.join(&self.name)
    }

    pub fn is_leader(&self) -> bool {
        self.name == LEADER_NAME
    }
}

/// Fully-resolved supervisor configuration. All fields have values.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub goal: String,
    pub workspace: PathBuf,
    pub max_workers: u32,
    pub worker_budget: u64,
    pub max_iterations: u32,
    pub queue_url: String,
    pub leader_model: String,
    pub team_model: String,
    pub resume_from: Option<PathBuf>,
}

/// Partial config used during merge. All fields are Option so that
/// missing fields don't override lower-priority values.
#[derive(Debug, Clone, Default)]
pub struct PartialConfig {
    pub workspace: Option<PathBuf>,
    pub queue_url: Option<String>,
    pub leader_model: Option<String>,
    pub team_model: Option<String>,
    pub max_workers: Option<u32>,
    pub worker_budget: Option<u64>,
    pub max_iterations: Option<u32>,
}
