//! Shared fixtures for the life-loop scenario tests: a scripted mock LLM and
//! a workspace wired to the in-memory queue backend.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use sealteam::bus::{memory::MemoryBackend, MessageBus, MessageKind, QueueMessage};
use sealteam::config::AgentConfig;
use sealteam::error::LlmError;
use sealteam::llm::{ContentBlock, InferResponse, LlmClient, Message, Usage};

/// Scripted LLM: returns canned responses in order and counts calls.
/// Running past the script is a hard (non-retryable) error so a misbehaving
/// loop fails fast instead of hanging.
pub struct MockLlm {
    responses: Mutex<VecDeque<InferResponse>>,
    calls: AtomicU32,
}

impl MockLlm {
    pub fn new(responses: Vec<InferResponse>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn infer(
        &self,
        _system: &str,
        _messages: &[Message],
        _tools: &[Value],
    ) -> Result<InferResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| LlmError::Api {
                status: 400,
                message: "mock script exhausted".to_string(),
            })
    }
}

/// A plain text response ending the turn.
pub fn text_response(text: &str) -> InferResponse {
    InferResponse {
        content: vec![ContentBlock::Text {
            text: text.to_string(),
        }],
        stop_reason: Some("end_turn".to_string()),
        usage: Usage {
            input_tokens: 100,
            output_tokens: 20,
        },
    }
}

/// A response requesting one local tool invocation.
pub fn tool_use_response(id: &str, name: &str, input: Value) -> InferResponse {
    InferResponse {
        content: vec![
            ContentBlock::Text {
                text: "Using a tool.".to_string(),
            },
            ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            },
        ],
        stop_reason: Some("tool_use".to_string()),
        usage: Usage {
            input_tokens: 100,
            output_tokens: 20,
        },
    }
}

pub fn plan_response(plan: &str, complexity: &str) -> InferResponse {
    text_response(&json!({"plan": plan, "complexity": complexity}).to_string())
}

pub fn reflect_response(decision: &str, iteration: u32) -> InferResponse {
    text_response(
        &json!({
            "decision": decision,
            "summary": {
                "iteration": iteration,
                "plan": "the plan",
                "outcome": "the outcome",
                "files_changed": [],
                "decisions": []
            },
            "error_details": if decision == "error" { Some("it broke") } else { None }
        })
        .to_string(),
    )
}

pub fn worker_config(workspace: &Path, name: &str) -> AgentConfig {
    AgentConfig {
        name: name.to_string(),
        role: "worker".to_string(),
        purpose: "finish the test task".to_string(),
        allowed_tools: vec![
            "file-read".to_string(),
            "file-write".to_string(),
            "bash".to_string(),
            "send".to_string(),
        ],
        model: "claude-haiku-4-5-20251001".to_string(),
        token_budget: 1_000_000,
        max_iterations: 50,
        max_tool_turns: 25,
        workspace: workspace.to_path_buf(),
        queue_url: "valkey://localhost:6379".to_string(),
    }
}

pub fn memory_bus() -> MessageBus {
    MessageBus::new(Arc::new(MemoryBackend::new()))
}

pub async fn enqueue_task(bus: &MessageBus, to: &str, content: &str) {
    let msg = QueueMessage::new("bob", to, MessageKind::Task, content);
    bus.send(&msg, None).await.unwrap();
}

/// Drain a queue non-blockingly.
pub async fn drain(bus: &MessageBus, name: &str) -> Vec<QueueMessage> {
    let mut messages = Vec::new();
    while let Some(msg) = bus.receive_non_blocking(name).await.unwrap() {
        messages.push(msg);
    }
    messages
}
