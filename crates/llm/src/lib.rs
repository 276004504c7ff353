//! LLM inference for the docflow pipeline.
//!
//! Defines the provider-agnostic chat types (messages, content blocks, tool
//! specifications) and the [`LlmProvider`] trait. The only built-in backend is
//! an HTTP provider speaking the Anthropic messages wire shape, which is what
//! the segment analyzer and the document summarizer drive.

use serde::{Deserialize, Serialize};

mod http;
mod provider;

pub use http::{HttpProvider, HttpProviderConfig};
pub use provider::{LlmProvider, Result};

/// Role of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
  User,
  Assistant,
}

/// A single chat message, composed of one or more content blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
  pub role: Role,
  pub content: Vec<ContentBlock>,
}

impl Message {
  pub fn user(blocks: Vec<ContentBlock>) -> Self {
    Self {
      role: Role::User,
      content: blocks,
    }
  }

  pub fn user_text(text: impl Into<String>) -> Self {
    Self::user(vec![ContentBlock::text(text)])
  }

  pub fn assistant(blocks: Vec<ContentBlock>) -> Self {
    Self {
      role: Role::Assistant,
      content: blocks,
    }
  }
}

/// One block of message content.
///
/// Images are carried as raw bytes and base64-encoded at the wire boundary,
/// so callers never deal with encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
  Text {
    text: String,
  },
  Image {
    media_type: String,
    #[serde(with = "serde_bytes_base64")]
    data: Vec<u8>,
  },
  ToolUse {
    id: String,
    name: String,
    input: serde_json::Value,
  },
  ToolResult {
    tool_use_id: String,
    content: String,
  },
}

impl ContentBlock {
  pub fn text(text: impl Into<String>) -> Self {
    Self::Text { text: text.into() }
  }

  pub fn image(media_type: impl Into<String>, data: Vec<u8>) -> Self {
    Self::Image {
      media_type: media_type.into(),
      data,
    }
  }

  pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>) -> Self {
    Self::ToolResult {
      tool_use_id: tool_use_id.into(),
      content: content.into(),
    }
  }
}

/// Declaration of a tool the model may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
  pub name: String,
  pub description: String,
  pub input_schema: serde_json::Value,
}

/// Why the model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
  EndTurn,
  ToolUse,
  MaxTokens,
  Other,
}

/// Request for a chat completion
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
  /// Optional system prompt
  pub system: Option<String>,
  /// Conversation so far
  pub messages: Vec<Message>,
  /// Tools the model may call (empty = plain completion)
  pub tools: Vec<ToolSpec>,
  /// Model to use; empty selects the provider default
  pub model: String,
  /// Maximum output tokens (0 selects the provider default)
  pub max_tokens: u32,
  /// Request timeout in seconds (0 selects the provider default)
  pub timeout_secs: u64,
}

impl ChatRequest {
  /// Plain single-turn completion with no tools
  pub fn completion(system: Option<String>, user: Message) -> Self {
    Self {
      system,
      messages: vec![user],
      ..Default::default()
    }
  }
}

/// Response from a chat completion
#[derive(Debug, Clone)]
pub struct ChatResponse {
  pub content: Vec<ContentBlock>,
  pub stop_reason: StopReason,
  pub input_tokens: u32,
  pub output_tokens: u32,
}

impl ChatResponse {
  /// Concatenated text of all text blocks
  pub fn text(&self) -> String {
    let mut out = String::new();
    for block in &self.content {
      if let ContentBlock::Text { text } = block {
        if !out.is_empty() {
          out.push('\n');
        }
        out.push_str(text);
      }
    }
    out
  }

  /// All tool-use blocks in order
  pub fn tool_uses(&self) -> Vec<(&str, &str, &serde_json::Value)> {
    self
      .content
      .iter()
      .filter_map(|b| match b {
        ContentBlock::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
        _ => None,
      })
      .collect()
  }
}

/// Errors that can occur during LLM inference
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
  #[error("No api key configured for provider")]
  NoApiKey,
  #[error("Request failed: {0}")]
  Request(#[from] reqwest::Error),
  #[error("Provider error: {0}")]
  Provider(String),
  #[error("Request timed out")]
  Timeout,
  #[error("Invalid response: {0}")]
  InvalidResponse(String),
}

mod serde_bytes_base64 {
  use base64::{Engine as _, engine::general_purpose::STANDARD};
  use serde::{Deserialize, Deserializer, Serializer};

  pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
  }

  pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    let s = String::deserialize(deserializer)?;
    STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn response_text_joins_blocks() {
    let response = ChatResponse {
      content: vec![
        ContentBlock::text("first"),
        ContentBlock::ToolUse {
          id: "t1".into(),
          name: "noop".into(),
          input: serde_json::json!({}),
        },
        ContentBlock::text("second"),
      ],
      stop_reason: StopReason::EndTurn,
      input_tokens: 0,
      output_tokens: 0,
    };

    assert_eq!(response.text(), "first\nsecond");
    assert_eq!(response.tool_uses().len(), 1);
  }

  #[test]
  fn image_block_roundtrips_base64() {
    let block = ContentBlock::image("image/png", vec![1, 2, 3, 4]);
    let json = serde_json::to_string(&block).unwrap();
    assert!(json.contains("AQIDBA=="));

    let back: ContentBlock = serde_json::from_str(&json).unwrap();
    match back {
      ContentBlock::Image { media_type, data } => {
        assert_eq!(media_type, "image/png");
        assert_eq!(data, vec![1, 2, 3, 4]);
      }
      other => panic!("unexpected block: {other:?}"),
    }
  }
}
