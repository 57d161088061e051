//! The tool sub-loop: LLM call, tool invocations, LLM call, until the model
//! stops asking for tools or the turn cap is reached.
//!
//! Invariants: the message list both begins and ends with a user turn (some
//! providers reject trailing-assistant input), and the same system prompt is
//! reused across turns. Tool-handler failures never abort the loop; they are
//! stringified into the tool result so the model can recover in-context.

use serde_json::Value;

use crate::error::LlmError;
use crate::llm::{ContentBlock, LlmClient, Message, Role, Usage};
use crate::tools::ToolHost;

/// Tool-call/result pairs retained past the initial context when the
/// in-loop history is compacted.
pub const RETAIN_PAIRS: usize = 4;

/// Outcome of one sub-loop run.
#[derive(Debug)]
pub struct ToolLoopResult {
    pub text: String,
    pub usage: Usage,
    pub turns: u32,
}

/// Prepend/append user turns as needed so the list begins and ends with a
/// user-role message. An empty list gets a single opener.
pub fn ensure_user_bracketing(messages: &mut Vec<Message>) {
    if messages.is_empty() {
        messages.push(Message::user_text("Begin."));
        return;
    }
    if messages.first().map(|m| m.role) != Some(Role::User) {
        messages.insert(0, Message::user_text("Begin."));
    }
    if messages.last().map(|m| m.role) != Some(Role::User) {
        messages.push(Message::user_text("Continue."));
    }
}

/// Run the sub-loop to resolve one execute or plan-execute step.
pub async fn run_tool_loop(
    llm: &dyn LlmClient,
    host: &ToolHost,
    system: &str,
    mut messages: Vec<Message>,
    tools: &[Value],
    max_turns: u32,
) -> Result<ToolLoopResult, LlmError> {
    ensure_user_bracketing(&mut messages);
    let initial_context_size = messages.len();

    let mut turns: u32 = 0;
    let mut usage = Usage::default();

    loop {
        let response = llm.infer(system, &messages, tools).await?;
        turns += 1;
        usage.add(response.usage);

        let tool_uses: Vec<(String, String, Value)> = response
            .tool_uses()
            .into_iter()
            .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
            .collect();

        if tool_uses.is_empty() || response.stop_reason.as_deref() == Some("end_turn") {
            let text = response.text();
            return Ok(ToolLoopResult {
                text: if text.is_empty() {
                    render_raw_content(&response.content)
                } else {
                    text
                },
                usage,
                turns,
            });
        }

        let mut results = Vec::with_capacity(tool_uses.len());
        for (id, name, input) in &tool_uses {
            if host.is_server_tool(name) {
                // Provider-executed; its result already arrived inline.
                continue;
            }
            let content = match host.execute(name, input).await {
                Ok(text) => text,
                Err(e) => format!("Error: {e}"),
            };
            results.push(ContentBlock::ToolResult {
                tool_use_id: id.clone(),
                content,
                is_error: None,
            });
        }

        messages.push(Message {
            role: Role::Assistant,
            content: response.content.clone(),
        });
        if results.is_empty() {
            // Every requested tool was server-hosted; keep the user turn
            // non-empty so the conversation shape stays valid.
            messages.push(Message::user_text("Continue."));
        } else {
            messages.push(Message {
                role: Role::User,
                content: results,
            });
        }

        if turns >= max_turns {
            return Ok(ToolLoopResult {
                text: format!("Tool loop terminated after {turns} turns"),
                usage,
                turns,
            });
        }

        compact_in_loop(&mut messages, initial_context_size);
    }
}

/// Collapse the oldest tool-call/result pairs once more than [`RETAIN_PAIRS`]
/// of them have accumulated past the initial context. The initial context is
/// never touched. The replacement is an (assistant, user) pair so role
/// alternation survives: the assistant marker summarizes what was dropped
/// and the user turn acknowledges it.
fn compact_in_loop(messages: &mut Vec<Message>, initial_context_size: usize) {
    let pair_count = (messages.len() - initial_context_size) / 2;
    if pair_count <= RETAIN_PAIRS {
        return;
    }

    let drop_pairs = pair_count - RETAIN_PAIRS;
    let drop_messages = drop_pairs * 2;
    let marker = Message {
        role: Role::Assistant,
        content: vec![ContentBlock::Text {
            text: format!("[Compacted {drop_pairs} tool turns]"),
        }],
    };
    let ack = Message::user_text("Acknowledged.");

    messages.splice(
        initial_context_size..initial_context_size + drop_messages,
        [marker, ack],
    );
}

/// Fallback rendering when the response carried no text blocks at all.
fn render_raw_content(content: &[ContentBlock]) -> String {
    serde_json::to_string(content).unwrap_or_default()
}

// ===========================================================================
// Tests
// ===========================================================================
