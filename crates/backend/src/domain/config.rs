//! Pipeline configuration.
//!
//! The global [`Config`] is loaded once (the CLI reads it from TOML) and
//! passed to every component as `Arc<Config>`. Per-document processing
//! settings are resolved separately: document override, then project default,
//! then the hard default baked in here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Hard defaults for per-document settings
pub const DEFAULT_LANGUAGE: &str = "en";
pub const DEFAULT_OCR_MODEL: &str = "paddleocr-vl";

/// Global configuration for the docflow backend
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
  /// Base directory for all local data (blob store, state store, index)
  pub data_dir: PathBuf,
  /// Bucket name used in `store://` URIs
  pub bucket: String,
  pub embedding: EmbeddingConfig,
  pub llm: LlmConfig,
  pub pipeline: PipelineConfig,
  pub convert: ConvertConfig,
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
  /// Full URL of the embeddings endpoint
  pub endpoint: String,
  /// API key; falls back to `EMBEDDING_API_KEY` in the environment
  pub api_key: Option<String>,
  pub model: String,
  /// Fixed vector dimension; every stored vector has exactly this length
  pub dimensions: usize,
  /// Maximum texts per batch request
  pub max_batch_size: usize,
  pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
  fn default() -> Self {
    Self {
      endpoint: "http://localhost:11434/v1/embeddings".into(),
      api_key: None,
      model: "nova-embed-v1".into(),
      dimensions: 1024,
      max_batch_size: 64,
      request_timeout_secs: 60,
    }
  }
}

/// LLM provider settings for the segment analyzer and summarizer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
  /// Full URL of the messages endpoint
  pub endpoint: String,
  /// API key; falls back to `LLM_API_KEY` in the environment
  pub api_key: Option<String>,
  pub model: String,
  /// Model for summary generation; empty reuses `model`
  pub summarizer_model: String,
}

impl Default for LlmConfig {
  fn default() -> Self {
    Self {
      endpoint: "https://api.anthropic.com/v1/messages".into(),
      api_key: None,
      model: "claude-3-7-sonnet-latest".into(),
      summarizer_model: "claude-3-5-haiku-latest".into(),
    }
  }
}

/// Orchestration and worker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Seconds between preprocess status polls
  pub poll_interval_secs: u64,
  /// Maximum wall-clock seconds spent polling before the workflow fails
  pub poll_budget_secs: u64,
  /// Concurrent segment analyses per workflow
  pub analysis_parallelism: usize,
  /// Maximum vision-agent iterations per segment
  pub max_agent_iterations: usize,
  /// Wall-clock timeout for a single step
  pub step_timeout_secs: u64,
  /// Seconds to wait for the index writer to drain before summarizing
  pub writer_drain_timeout_secs: u64,
  /// Retries per index-write message before it is dropped
  pub write_retries: u32,
  /// Orchestrator worker count (0 = number of CPUs, capped at 4)
  pub orchestrator_workers: usize,
  /// Bounded capacity of each track queue
  pub queue_capacity: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: 10,
      poll_budget_secs: 30 * 60,
      analysis_parallelism: 4,
      max_agent_iterations: 8,
      step_timeout_secs: 300,
      writer_drain_timeout_secs: 60,
      write_retries: 3,
      orchestrator_workers: 0,
      queue_capacity: 64,
    }
  }
}

impl PipelineConfig {
  pub fn poll_interval(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.poll_interval_secs)
  }

  pub fn poll_budget(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.poll_budget_secs)
  }

  pub fn step_timeout(&self) -> std::time::Duration {
    std::time::Duration::from_secs(self.step_timeout_secs)
  }

  pub fn effective_orchestrator_workers(&self) -> usize {
    if self.orchestrator_workers > 0 {
      self.orchestrator_workers
    } else {
      num_cpus::get().min(4)
    }
  }
}

/// Office-suite and renderer subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
  /// Office-suite binary used for document -> PDF conversion
  pub soffice_path: String,
  /// PDF page renderer binary
  pub pdftoppm_path: String,
  /// Wall-clock timeout per subprocess invocation
  pub timeout_secs: u64,
  /// Render resolution for page images
  pub render_dpi: u32,
}

impl Default for ConvertConfig {
  fn default() -> Self {
    Self {
      soffice_path: "soffice".into(),
      pdftoppm_path: "pdftoppm".into(),
      timeout_secs: 120,
      render_dpi: 150,
    }
  }
}

/// Project-level defaults, written by the project CRUD surface
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
  pub name: String,
  pub language_default: Option<String>,
  pub ocr_model_default: Option<String>,
  pub ocr_options_default: Option<serde_json::Value>,
  pub document_prompt_default: Option<String>,
}

/// Per-document overrides, immutable after upload
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DocumentConfig {
  pub language: Option<String>,
  pub use_bda: Option<bool>,
  pub use_ocr: Option<bool>,
  pub use_transcribe: Option<bool>,
  pub ocr_model: Option<String>,
  pub ocr_options: Option<serde_json::Value>,
  pub document_prompt: Option<String>,
}

/// Fully resolved per-document settings: document ?? project ?? hard default
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedSettings {
  pub language: String,
  pub use_bda: bool,
  pub use_ocr: bool,
  pub use_transcribe: bool,
  pub ocr_model: String,
  pub ocr_options: serde_json::Value,
  pub document_prompt: String,
}

impl ResolvedSettings {
  pub fn resolve(document: Option<&DocumentConfig>, project: Option<&ProjectConfig>) -> Self {
    let doc = document.cloned().unwrap_or_default();
    let proj = project.cloned().unwrap_or_default();

    Self {
      language: doc
        .language
        .or(proj.language_default)
        .unwrap_or_else(|| DEFAULT_LANGUAGE.into()),
      use_bda: doc.use_bda.unwrap_or(false),
      use_ocr: doc.use_ocr.unwrap_or(true),
      use_transcribe: doc.use_transcribe.unwrap_or(false),
      ocr_model: doc
        .ocr_model
        .or(proj.ocr_model_default)
        .unwrap_or_else(|| DEFAULT_OCR_MODEL.into()),
      ocr_options: doc
        .ocr_options
        .or(proj.ocr_options_default)
        .unwrap_or_else(|| serde_json::json!({})),
      document_prompt: doc
        .document_prompt
        .or(proj.document_prompt_default)
        .unwrap_or_default(),
    }
  }
}

impl Default for ResolvedSettings {
  fn default() -> Self {
    Self::resolve(None, None)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn hard_defaults_apply_without_overrides() {
    let settings = ResolvedSettings::resolve(None, None);
    assert_eq!(settings.language, "en");
    assert!(!settings.use_bda);
    assert!(settings.use_ocr);
    assert!(!settings.use_transcribe);
    assert_eq!(settings.ocr_model, "paddleocr-vl");
    assert_eq!(settings.ocr_options, serde_json::json!({}));
    assert_eq!(settings.document_prompt, "");
  }

  #[test]
  fn document_overrides_win_over_project_defaults() {
    let project = ProjectConfig {
      language_default: Some("ko".into()),
      ocr_model_default: Some("project-ocr".into()),
      document_prompt_default: Some("project prompt".into()),
      ..Default::default()
    };
    let document = DocumentConfig {
      language: Some("ja".into()),
      use_bda: Some(true),
      ..Default::default()
    };

    let settings = ResolvedSettings::resolve(Some(&document), Some(&project));
    assert_eq!(settings.language, "ja");
    assert!(settings.use_bda);
    assert_eq!(settings.ocr_model, "project-ocr");
    assert_eq!(settings.document_prompt, "project prompt");
  }
}
