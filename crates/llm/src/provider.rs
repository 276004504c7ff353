//! LLM provider trait for chat inference
//!
//! This module defines the `LlmProvider` trait that different LLM backends
//! can implement to provide chat completions with optional tool use and
//! image input.

use async_trait::async_trait;
use dyn_clone::DynClone;

use crate::{ChatRequest, ChatResponse, LlmError};

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LlmError>;

/// Trait for LLM chat providers
///
/// Implement this trait to add support for different LLM backends. The
/// pipeline only depends on this trait, so tests inject scripted fakes.
#[async_trait]
pub trait LlmProvider: Send + Sync + DynClone {
  /// The name of this provider (for logging/identification)
  fn name(&self) -> &str;

  /// Check if this provider is available/configured
  ///
  /// Returns `true` if the provider can be used for inference.
  fn is_available(&self) -> bool;

  /// Run one chat completion.
  ///
  /// When `request.tools` is non-empty the model may answer with tool-use
  /// blocks; callers are responsible for executing tools and continuing the
  /// conversation.
  async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;
}

dyn_clone::clone_trait_object!(LlmProvider);
