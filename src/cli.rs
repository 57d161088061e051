use clap::Parser;
use std::path::PathBuf;

use crate::config::PartialConfig;

/// `sealteam [flags] "<goal>"`: orchestrate a team of agents toward a goal.
#[derive(Parser, Debug)]
#[command(
    name = "sealteam",
    version,
    about = "Multi-agent goal orchestrator: a supervisor, a leader, and a dynamic team of workers"
)]
pub struct Cli {
    /// Maximum concurrent workers (clamped to 1..=12)
    #[arg(long, env = "SEALTEAM_MAX_AGENTS")]
    pub workers: Option<u32>,

    /// Per-agent token budget (the leader gets double)
    #[arg(long, env = "SEALTEAM_DEFAULT_BUDGET")]
    pub budget: Option<u64>,

    /// Per-agent iteration cap
    #[arg(long = "max-iterations", env = "SEALTEAM_DEFAULT_MAX_ITERATIONS")]
    pub max_iterations: Option<u32>,

    /// Output root for session state, logs, and agent repositories
    #[arg(long, env = "SEALTEAM_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Queue endpoint (valkey://host:port or redis://host:port)
    #[arg(long = "valkey-url", env = "VALKEY_URL")]
    pub valkey_url: Option<String>,

    /// Model identifier for the leader agent
    #[arg(long = "leader-model", env = "SEALTEAM_LEADER_MODEL")]
    pub leader_model: Option<String>,

    /// Model identifier for worker agents
    #[arg(long = "team-model", env = "SEALTEAM_TEAM_MODEL")]
    pub team_model: Option<String>,

    /// Recover an interrupted session from this workspace
    #[arg(long = "resume-from")]
    pub resume_from: Option<PathBuf>,

    /// The goal to achieve (required unless resuming)
    pub goal: Option<String>,
}

impl Cli {
    /// CLI/env layer of the config merge.
    pub fn to_partial(&self) -> PartialConfig {
        PartialConfig {
            workspace: self.workspace.clone(),
            queue_url: self.valkey_url.clone(),
            leader_model: self.leader_model.clone(),
            team_model: self.team_model.clone(),
            max_workers: self.workers,
            worker_budget: self.budget,
            max_iterations: self.max_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_positional_goal() {
        let cli = Cli::parse_from([
            "sealteam",
            "--workers",
            "4",
            "--budget",
            "50000",
            "--workspace",
            "/tmp/ws",
            "build a web scraper",
        ]);
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.budget, Some(50_000));
        assert_eq!(cli.goal.as_deref(), Some("build a web scraper"));
        assert!(cli.resume_from.is_none());
    }

    #[test]
    fn resume_needs_no_goal() {
        let cli = Cli::parse_from(["sealteam", "--resume-from", "/tmp/ws"]);
        assert!(cli.goal.is_none());
        assert_eq!(cli.resume_from, Some(PathBuf::from("/tmp/ws")));
    }
}
