pub mod merge;
pub mod schema;

pub use schema::*;

use crate::cli::Cli;
use crate::error::ConfigError;
use std::path::Path;

/// Environment variable carrying the serialized [`AgentConfig`] into a
/// spawned agent process. Its presence selects agent mode in `main`.
pub const AGENT_CONFIG_ENV: &str = "AGENT_CONFIG";

/// Environment variable naming the resume token (`<iteration>-<step>`) for a
/// respawned agent.
pub const RESUME_FROM_ENV: &str = "RESUME_FROM";

/// Load supervisor configuration by merging CLI/env, workspace, and global
/// sources. Precedence: CLI (with env fallbacks) > workspace sealteam.toml >
/// global sealteam.toml > defaults.
///
/// Missing config files are handled gracefully (defaults apply).
pub fn load_config(cli: &Cli) -> Result<SupervisorConfig, ConfigError> {
    let cli_partial = cli.to_partial();

    // Workspace config lives at <workspace>/sealteam.toml; the workspace path
    // itself may come from the CLI or the global config.
    let global = load_global_config();
    let workspace_path = cli_partial
        .workspace
        .clone()
        .or_else(|| global.workspace.clone())
        .unwrap_or_else(|| std::path::PathBuf::from("./workspace"));
    let workspace = load_workspace_config(&workspace_path);

    let goal = cli.goal.clone().unwrap_or_default();
    Ok(cli_partial
        .with_fallback(workspace)
        .with_fallback(global)
        .finalize(goal, cli.resume_from.clone()))
}

/// Deserialize the agent configuration from the `AGENT_CONFIG` environment
/// variable, or `None` if the process was not spawned as an agent.
pub fn agent_config_from_env() -> Result<Option<AgentConfig>, ConfigError> {
    match std::env::var(AGENT_CONFIG_ENV) {
        Ok(raw) => {
            let config = serde_json::from_str(&raw)
                .map_err(|e| ConfigError::BadAgentConfig(e.to_string()))?;
            Ok(Some(config))
        }
        Err(_) => Ok(None),
    }
}

/// Read the resume token from `RESUME_FROM`, if set.
pub fn resume_token_from_env() -> Option<String> {
    std::env::var(RESUME_FROM_ENV).ok().filter(|s| !s.is_empty())
}

fn load_global_config() -> PartialConfig {
    let path = directories::ProjectDirs::from("", "", "sealteam")
        .map(|dirs| dirs.config_dir().join("sealteam.toml"));
    match path {
        Some(p) => load_toml_file(&p).unwrap_or_default(),
        None => {
            tracing::debug!("Could not determine global config directory");
            PartialConfig::default()
        }
    }
}

fn load_workspace_config(workspace_path: &Path) -> PartialConfig {
    load_toml_file(&workspace_path.join("sealteam.toml")).unwrap_or_default()
}

/// Load and parse a TOML config file into a PartialConfig.
/// File-not-found yields None; parse errors are logged and skipped.
fn load_toml_file(path: &Path) -> Option<PartialConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(config_file) => {
                tracing::info!("Loaded config from {}", path.display());
                Some(config_file.to_partial())
            }
            Err(e) => {
                tracing::warn!("Config parse error in {}: {e}", path.display());
                None
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config file at {}, using defaults", path.display());
            None
        }
        Err(e) => {
            tracing::warn!("Failed to read config at {}: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_config_round_trips_through_json() {
        let config = AgentConfig {
            name: "alice".to_string(),
            role: "researcher".to_string(),
            purpose: "survey prior art".to_string(),
            allowed_tools: vec!["bash".to_string(), "file-read".to_string()],
            model: "claude-haiku-4-5-20251001".to_string(),
            token_budget: 100_000,
            max_iterations: 50,
            max_tool_turns: 25,
            workspace: "/tmp/ws".into(),
            queue_url: "valkey://localhost:6379".to_string(),
        };

        let raw = serde_json::to_string(&config).unwrap();
        let parsed: AgentConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.name, "alice");
        assert_eq!(parsed.allowed_tools.len(), 2);
        assert_eq!(parsed.agent_dir(), std::path::PathBuf::from("/tmp/ws/alice"));
        assert!(!parsed.is_leader());
    }

    #[test]
    fn leader_is_recognized_by_name() {
        let mut config: AgentConfig = serde_json::from_value(serde_json::json!({
            "name": "bob",
            "role": "leader",
            "purpose": "coordinate",
            "allowed_tools": [],
            "model": "m",
            "token_budget": 1,
            "max_iterations": 1,
            "max_tool_turns": 1,
            "workspace": "/tmp/ws",
            "queue_url": "valkey://localhost:6379"
        }))
        .unwrap();
        assert!(config.is_leader());
        config.name = "carol".to_string();
        assert!(!config.is_leader());
    }
}
