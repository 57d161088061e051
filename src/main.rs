use clap::Parser;

use sealteam::{agent, cli, config, supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // A process spawned with AGENT_CONFIG in its environment is an agent;
    // otherwise this is the supervisor.
    if let Some(agent_config) = config::agent_config_from_env()? {
        tracing::info!(agent = %agent_config.name, "agent process starting");
        return agent::run_agent(agent_config).await;
    }

    let cli = cli::Cli::parse();
    if std::env::var("ANTHROPIC_API_KEY").is_err() {
        anyhow::bail!("ANTHROPIC_API_KEY is not set");
    }
    if cli.goal.is_none() && cli.resume_from.is_none() {
        anyhow::bail!("a goal is required (or --resume-from to recover a session)");
    }

    let config = config::load_config(&cli)?;
    tracing::info!(
        workspace = %config.workspace.display(),
        workers = config.max_workers,
        "supervisor starting"
    );
    supervisor::run(config).await
}
