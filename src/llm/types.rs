//! Wire types for the Anthropic Messages API, pared down to what the life
//! loop consumes: text blocks, tool use, tool results, and usage counts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation roles. Some providers reject message lists that do not both
/// begin and end with a user turn; the life loop enforces that invariant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One content block of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    /// A provider-executed tool invocation; no local handling required.
    ServerToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// The provider-side result of a server tool; appears inline.
    WebSearchToolResult {
        tool_use_id: String,
        content: Value,
    },
    WebFetchToolResult {
        tool_use_id: String,
        content: Value,
    },
}

/// One conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::Text { text: text.into() }],
        }
    }

    /// Concatenated text of all text blocks.
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }
}

/// Concatenate the text blocks of a content list.
pub fn collect_text(content: &[ContentBlock]) -> String {
    content
        .iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Token usage reported by one inference call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

/// The result of one inference call.
#[derive(Debug, Clone, Deserialize)]
pub struct InferResponse {
    pub content: Vec<ContentBlock>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl InferResponse {
    /// Concatenated text of all text blocks in the response.
    pub fn text(&self) -> String {
        collect_text(&self.content)
    }

    /// Locally-executable tool invocations in the response.
    /// Server-tool blocks are excluded; the provider already ran those.
    pub fn tool_uses(&self) -> Vec<(&str, &str, &Value)> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some((id.as_str(), name.as_str(), input))
                }
                _ => None,
            })
            .collect()
    }
}

/// Descriptor for a locally-executed tool, serialized into the API's `tools`
/// array alongside any server-tool specs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_block_round_trips_tagged_json() {
        let block = ContentBlock::ToolUse {
            id: "toolu_1".to_string(),
            name: "bash".to_string(),
            input: json!({"command": "ls"}),
        };
        let raw = serde_json::to_string(&block).unwrap();
        assert!(raw.contains("\"type\":\"tool_use\""));
        let parsed: ContentBlock = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, block);
    }

    #[test]
    fn response_text_joins_text_blocks_only() {
        let response = InferResponse {
            content: vec![
                ContentBlock::Text { text: "a".into() },
                ContentBlock::ToolUse {
                    id: "t".into(),
                    name: "bash".into(),
                    input: json!({}),
                },
                ContentBlock::Text { text: "b".into() },
            ],
            stop_reason: Some("tool_use".into()),
            usage: Usage::default(),
        };
        assert_eq!(response.text(), "a\nb");
        assert_eq!(response.tool_uses().len(), 1);
    }

    #[test]
    fn server_tool_use_is_not_locally_executable() {
        let response = InferResponse {
            content: vec![ContentBlock::ServerToolUse {
                id: "srvtoolu_1".into(),
                name: "web_search".into(),
                input: json!({"query": "rust"}),
            }],
            stop_reason: None,
            usage: Usage::default(),
        };
        assert!(response.tool_uses().is_empty());
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(Usage {
            input_tokens: 100,
            output_tokens: 20,
        });
        total.add(Usage {
            input_tokens: 50,
            output_tokens: 5,
        });
        assert_eq!(total.input_tokens, 150);
        assert_eq!(total.total(), 175);
    }
}
