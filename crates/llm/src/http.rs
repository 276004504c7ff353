//! HTTP chat provider speaking the Anthropic messages wire shape.
//!
//! Works against api.anthropic.com or any compatible gateway. Requests are
//! non-streaming; the pipeline drives short, bounded completions and the tool
//! loop lives in the caller.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::{ChatRequest, ChatResponse, ContentBlock, LlmError, LlmProvider, Message, Result, Role, StopReason};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Configuration for the HTTP chat provider
#[derive(Debug, Clone)]
pub struct HttpProviderConfig {
  /// Full URL of the messages endpoint
  pub endpoint: String,
  /// API key; falls back to `LLM_API_KEY` in the environment
  pub api_key: Option<String>,
  /// Default model id for requests that do not name one
  pub model: String,
}

/// Chat provider over the Anthropic messages HTTP API
#[derive(Debug, Clone)]
pub struct HttpProvider {
  client: reqwest::Client,
  endpoint: String,
  api_key: String,
  model: String,
}

impl HttpProvider {
  pub fn new(config: HttpProviderConfig) -> Result<Self> {
    let api_key = if let Some(key) = config.api_key {
      key
    } else if let Some(key) = Self::key_from_env() {
      key
    } else {
      return Err(LlmError::NoApiKey);
    };

    debug!(endpoint = %config.endpoint, model = %config.model, "HTTP LLM provider initialized");

    Ok(Self {
      client: reqwest::Client::new(),
      endpoint: config.endpoint,
      api_key,
      model: config.model,
    })
  }

  fn key_from_env() -> Option<String> {
    std::env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty())
  }
}

#[async_trait]
impl LlmProvider for HttpProvider {
  fn name(&self) -> &str {
    "anthropic-http"
  }

  fn is_available(&self) -> bool {
    !self.api_key.is_empty()
  }

  async fn chat(&self, request: ChatRequest) -> Result<ChatResponse> {
    let model = if request.model.is_empty() {
      self.model.clone()
    } else {
      request.model.clone()
    };
    let max_tokens = if request.max_tokens == 0 {
      DEFAULT_MAX_TOKENS
    } else {
      request.max_tokens
    };
    let timeout = Duration::from_secs(if request.timeout_secs == 0 {
      DEFAULT_TIMEOUT_SECS
    } else {
      request.timeout_secs
    });

    let wire = WireRequest {
      model,
      max_tokens,
      system: request.system.clone(),
      messages: request.messages.iter().map(to_wire_message).collect(),
      tools: if request.tools.is_empty() {
        None
      } else {
        Some(
          request
            .tools
            .iter()
            .map(|t| WireTool {
              name: t.name.clone(),
              description: t.description.clone(),
              input_schema: t.input_schema.clone(),
            })
            .collect(),
        )
      },
    };

    trace!(
      message_count = wire.messages.len(),
      tool_count = request.tools.len(),
      "Sending chat request"
    );

    let response = self
      .client
      .post(&self.endpoint)
      .header("x-api-key", &self.api_key)
      .header("anthropic-version", ANTHROPIC_VERSION)
      .timeout(timeout)
      .json(&wire)
      .send()
      .await
      .map_err(|e| if e.is_timeout() { LlmError::Timeout } else { e.into() })?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      warn!(status = %status, "Chat request failed");
      return Err(LlmError::Provider(format!("HTTP {status}: {body}")));
    }

    let wire_response: WireResponse = response.json().await?;
    from_wire_response(wire_response)
  }
}

// Wire shapes (Anthropic messages API)

#[derive(Debug, Serialize)]
struct WireRequest {
  model: String,
  max_tokens: u32,
  #[serde(skip_serializing_if = "Option::is_none")]
  system: Option<String>,
  messages: Vec<WireMessage>,
  #[serde(skip_serializing_if = "Option::is_none")]
  tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Serialize)]
struct WireTool {
  name: String,
  description: String,
  input_schema: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct WireMessage {
  role: &'static str,
  content: Vec<WireBlock>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireBlock {
  Text {
    text: String,
  },
  Image {
    source: WireImageSource,
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
  #[serde(other)]
  Other,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireImageSource {
  #[serde(rename = "type")]
  source_type: String,
  media_type: String,
  data: String,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
  #[serde(default)]
  content: Vec<WireBlock>,
  #[serde(default)]
  stop_reason: Option<String>,
  #[serde(default)]
  usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
  #[serde(default)]
  input_tokens: u32,
  #[serde(default)]
  output_tokens: u32,
}

fn to_wire_message(message: &Message) -> WireMessage {
  let role = match message.role {
    Role::User => "user",
    Role::Assistant => "assistant",
  };

  let content = message
    .content
    .iter()
    .map(|block| match block {
      ContentBlock::Text { text } => WireBlock::Text { text: text.clone() },
      ContentBlock::Image { media_type, data } => WireBlock::Image {
        source: WireImageSource {
          source_type: "base64".into(),
          media_type: media_type.clone(),
          data: STANDARD.encode(data),
        },
      },
      ContentBlock::ToolUse { id, name, input } => WireBlock::ToolUse {
        id: id.clone(),
        name: name.clone(),
        input: input.clone(),
      },
      ContentBlock::ToolResult { tool_use_id, content } => WireBlock::ToolResult {
        tool_use_id: tool_use_id.clone(),
        content: content.clone(),
      },
    })
    .collect();

  WireMessage { role, content }
}

fn from_wire_response(wire: WireResponse) -> Result<ChatResponse> {
  let mut content = Vec::with_capacity(wire.content.len());
  for block in wire.content {
    match block {
      WireBlock::Text { text } => content.push(ContentBlock::Text { text }),
      WireBlock::ToolUse { id, name, input } => content.push(ContentBlock::ToolUse { id, name, input }),
      WireBlock::Image { source } => {
        let data = STANDARD
          .decode(source.data.as_bytes())
          .map_err(|e| LlmError::InvalidResponse(format!("bad image payload: {e}")))?;
        content.push(ContentBlock::Image {
          media_type: source.media_type,
          data,
        });
      }
      WireBlock::ToolResult { tool_use_id, content: c } => {
        content.push(ContentBlock::ToolResult { tool_use_id, content: c })
      }
      WireBlock::Other => {}
    }
  }

  let stop_reason = match wire.stop_reason.as_deref() {
    Some("end_turn") => StopReason::EndTurn,
    Some("tool_use") => StopReason::ToolUse,
    Some("max_tokens") => StopReason::MaxTokens,
    _ => StopReason::Other,
  };

  let (input_tokens, output_tokens) = wire.usage.map(|u| (u.input_tokens, u.output_tokens)).unwrap_or((0, 0));

  Ok(ChatResponse {
    content,
    stop_reason,
    input_tokens,
    output_tokens,
  })
}
