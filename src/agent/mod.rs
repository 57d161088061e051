//! The per-agent runtime: life loop, step prompts, tool sub-loop, and
//! context compaction.

pub mod compactor;
pub mod life_loop;
pub mod prompts;
pub mod subloop;

pub use life_loop::LifeLoop;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::bus::MessageBus;
use crate::config::AgentConfig;
use crate::error::ConfigError;
use crate::llm::AnthropicClient;

/// Entry point for a spawned agent process: wire the bus and LLM client to
/// the life loop and run it to completion.
pub async fn run_agent(config: AgentConfig) -> Result<()> {
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .map_err(|_| ConfigError::MissingEnv("ANTHROPIC_API_KEY".to_string()))?;

    let bus = MessageBus::connect(&config.queue_url)
        .await
        .with_context(|| format!("connect to queue at {}", config.queue_url))?;
    let llm = Arc::new(AnthropicClient::new(api_key, config.model.clone()));

    let mut life_loop = LifeLoop::new(config, bus.clone(), llm).await?;
    let result = life_loop.run().await;
    bus.close().await;
    result
}
