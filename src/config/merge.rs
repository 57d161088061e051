use super::schema::{
    PartialConfig, SupervisorConfig, DEFAULT_BUDGET, DEFAULT_LEADER_MODEL, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MAX_WORKERS, DEFAULT_QUEUE_URL, DEFAULT_TEAM_MODEL, MAX_WORKERS_CEILING,
};
use std::path::PathBuf;

impl PartialConfig {
    /// Merge self with a lower-priority fallback.
    /// Self's non-None values take precedence.
    pub fn with_fallback(self, fallback: PartialConfig) -> PartialConfig {
        PartialConfig {
            workspace: self.workspace.or(fallback.workspace),
            queue_url: self.queue_url.or(fallback.queue_url),
            leader_model: self.leader_model.or(fallback.leader_model),
            team_model: self.team_model.or(fallback.team_model),
            max_workers: self.max_workers.or(fallback.max_workers),
            worker_budget: self.worker_budget.or(fallback.worker_budget),
            max_iterations: self.max_iterations.or(fallback.max_iterations),
        }
    }

    /// Convert to SupervisorConfig, filling any remaining gaps with defaults.
    /// The worker count is clamped to 1..=12 regardless of source.
    pub fn finalize(self, goal: String, resume_from: Option<PathBuf>) -> SupervisorConfig {
        SupervisorConfig {
            goal,
            workspace: self.workspace.unwrap_or_else(|| PathBuf::from("./workspace")),
            max_workers: self
                .max_workers
                .unwrap_or(DEFAULT_MAX_WORKERS)
                .clamp(1, MAX_WORKERS_CEILING),
            worker_budget: self.worker_budget.unwrap_or(DEFAULT_BUDGET),
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
            queue_url: self.queue_url.unwrap_or_else(|| DEFAULT_QUEUE_URL.to_string()),
            leader_model: self
                .leader_model
                .unwrap_or_else(|| DEFAULT_LEADER_MODEL.to_string()),
            team_model: self
                .team_model
                .unwrap_or_else(|| DEFAULT_TEAM_MODEL.to_string()),
            resume_from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_workspace_file() {
        let cli = PartialConfig {
            worker_budget: Some(250_000),
            ..Default::default()
        };
        let workspace = PartialConfig {
            worker_budget: Some(50_000),
            max_iterations: Some(20),
            ..Default::default()
        };

        let merged = cli.with_fallback(workspace);
        assert_eq!(merged.worker_budget, Some(250_000));
        assert_eq!(merged.max_iterations, Some(20));
    }

    #[test]
    fn defaults_apply_when_no_config() {
        let config = PartialConfig::default().finalize("build a website".to_string(), None);

        assert_eq!(config.workspace, PathBuf::from("./workspace"));
        assert_eq!(config.max_workers, DEFAULT_MAX_WORKERS);
        assert_eq!(config.worker_budget, DEFAULT_BUDGET);
        assert_eq!(config.max_iterations, DEFAULT_MAX_ITERATIONS);
        assert_eq!(config.queue_url, DEFAULT_QUEUE_URL);
        assert_eq!(config.goal, "build a website");
    }

    #[test]
    fn worker_count_is_clamped() {
        let too_many = PartialConfig {
            max_workers: Some(50),
            ..Default::default()
        };
        assert_eq!(too_many.finalize(String::new(), None).max_workers, 12);

        let zero = PartialConfig {
            max_workers: Some(0),
            ..Default::default()
        };
        assert_eq!(zero.finalize(String::new(), None).max_workers, 1);
    }

    #[test]
    fn three_layer_merge() {
        let cli = PartialConfig {
            leader_model: Some("cli-model".to_string()),
            ..Default::default()
        };
        let workspace = PartialConfig {
            max_iterations: Some(10),
            ..Default::default()
        };
        let global = PartialConfig {
            leader_model: Some("global-model".to_string()),
            workspace: Some(PathBuf::from("/global/ws")),
            max_iterations: Some(99),
            ..Default::default()
        };

        let config = cli
            .with_fallback(workspace)
            .with_fallback(global)
            .finalize(String::new(), None);

        assert_eq!(config.leader_model, "cli-model");
        assert_eq!(config.workspace, PathBuf::from("/global/ws"));
        assert_eq!(config.max_iterations, 10);
    }
}
