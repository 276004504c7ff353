//! Per-segment vision agent.
//!
//! A small, hand-written tool loop: the model is prompted with a tool
//! catalog, each response either calls a tool (`analyze_image`,
//! `rotate_image`) or delivers the final report, and every tool call is
//! appended to the step trail. The loop is bounded by a configured
//! iteration budget.

mod tools;

use llm::{ChatRequest, LlmProvider, Message, ToolSpec};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use tools::ImageState;

/// One entry of the per-segment step trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStep {
  pub step: usize,
  pub tool: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub question: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub answer: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub degrees: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub result: Option<String>,
}

/// Materials for one segment analysis
#[derive(Debug, Clone)]
pub struct SegmentInput {
  pub document_id: String,
  pub segment_id: String,
  pub segment_index: usize,
  /// Downloaded page image, if the segment has one
  pub image: Option<ImageState>,
  /// Prior context: parsed text plus BDA output
  pub context: String,
  /// Resolved document language code
  pub language: String,
}

/// Result of one segment analysis
#[derive(Debug, Clone)]
pub struct AgentOutcome {
  pub analysis_result: String,
  pub analysis_steps: Vec<AnalysisStep>,
  pub iterations: usize,
  pub success: bool,
}

/// Vision agent bound to an LLM provider
pub struct VisionAgent<'a> {
  provider: &'a dyn LlmProvider,
  model: String,
  max_iterations: usize,
}

const SYSTEM_PROMPT: &str = "You are a Technical Document Analysis Expert. Analyze documents thoroughly using available tools.

When analyzing:
1. First verify image orientation. If text appears rotated or upside down, use the rotate_image tool.
2. Use the analyze_image tool with specific, targeted questions.
3. Explore multiple aspects: text, visuals, layout, data.
4. Provide comprehensive analysis.";

impl<'a> VisionAgent<'a> {
  pub fn new(provider: &'a dyn LlmProvider, model: impl Into<String>, max_iterations: usize) -> Self {
    Self {
      provider,
      model: model.into(),
      max_iterations: max_iterations.max(1),
    }
  }

  /// Run the analysis loop for one segment.
  ///
  /// Never fails outright: agent runtime errors come back as an outcome
  /// with `success = false`, the error text as the result, and whatever
  /// steps had accumulated.
  pub async fn analyze(&self, input: SegmentInput) -> AgentOutcome {
    let language_name = language_name(&input.language);
    let mut image = input.image;
    let mut steps: Vec<AnalysisStep> = Vec::new();

    let system = format!(
      "{SYSTEM_PROMPT}\n\nIMPORTANT: You MUST provide all analysis, questions, and answers in {language_name}."
    );

    let user_query = format!(
      "Please analyze the following document segment (page {page}).\n\n\
       Previous analysis context:\n{context}\n\n\
       Use the available tools to systematically analyze the document and provide results in the following format:\n\n\
       ## Document Overview\n## Key Findings\n## Technical Details\n## Visual Elements\n## Recommendations\n\n\
       IMPORTANT: Provide all analysis in {language_name}.",
      page = input.segment_index + 1,
      context = if input.context.is_empty() {
        "No prior analysis available."
      } else {
        &input.context
      },
    );

    let tools = if image.is_some() { tool_catalog() } else { Vec::new() };
    let mut messages = vec![Message::user_text(user_query)];

    info!(
      document_id = %input.document_id,
      segment_index = input.segment_index,
      has_image = image.is_some(),
      "Starting segment analysis"
    );

    for iteration in 0..self.max_iterations {
      let request = ChatRequest {
        system: Some(system.clone()),
        messages: messages.clone(),
        tools: tools.clone(),
        model: self.model.clone(),
        max_tokens: 0,
        timeout_secs: 0,
      };

      let response = match self.provider.chat(request).await {
        Ok(response) => response,
        Err(e) => {
          warn!(err = %e, iteration, "Agent execution error");
          return AgentOutcome {
            analysis_result: format!("Analysis failed: {e}"),
            iterations: steps.len(),
            analysis_steps: steps,
            success: false,
          };
        }
      };

      let tool_uses: Vec<(String, String, serde_json::Value)> = response
        .tool_uses()
        .into_iter()
        .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
        .collect();

      if tool_uses.is_empty() {
        let analysis_result = response.text();
        debug!(steps = steps.len(), iteration, "Analysis complete");
        return AgentOutcome {
          analysis_result,
          iterations: steps.len(),
          analysis_steps: steps,
          success: true,
        };
      }

      messages.push(Message::assistant(response.content.clone()));

      let mut results = Vec::with_capacity(tool_uses.len());
      for (id, name, tool_input) in tool_uses {
        let content = self
          .dispatch_tool(&name, &tool_input, &mut image, &input.context, &language_name, &mut steps)
          .await;
        results.push(llm::ContentBlock::tool_result(id, content));
      }
      messages.push(Message::user(results));
    }

    // Iteration budget exhausted: report what the tools produced
    warn!(max_iterations = self.max_iterations, "Agent iteration budget exhausted");
    let collected: Vec<String> = steps.iter().filter_map(|s| s.answer.clone()).collect();
    AgentOutcome {
      analysis_result: collected.join("\n\n"),
      iterations: steps.len(),
      analysis_steps: steps,
      success: true,
    }
  }

  async fn dispatch_tool(
    &self,
    name: &str,
    tool_input: &serde_json::Value,
    image: &mut Option<ImageState>,
    context: &str,
    language_name: &str,
    steps: &mut Vec<AnalysisStep>,
  ) -> String {
    match name {
      "analyze_image" => {
        let question = tool_input
          .get("question")
          .and_then(|q| q.as_str())
          .unwrap_or("Describe this document segment.")
          .to_string();

        let answer = tools::analyze_image(
          self.provider,
          &self.model,
          image.as_ref(),
          context,
          &question,
          language_name,
        )
        .await;

        steps.push(AnalysisStep {
          step: steps.len() + 1,
          tool: "analyze_image".into(),
          question: Some(question),
          answer: Some(answer.clone()),
          degrees: None,
          result: None,
        });
        answer
      }
      "rotate_image" => {
        let degrees = tool_input.get("degrees").and_then(|d| d.as_i64()).unwrap_or(90);
        let result = tools::rotate_image(image, degrees);

        steps.push(AnalysisStep {
          step: steps.len() + 1,
          tool: "rotate_image".into(),
          question: None,
          answer: None,
          degrees: Some(degrees),
          result: Some(result.clone()),
        });
        result
      }
      other => {
        warn!(tool = other, "Model called unknown tool");
        format!("Unknown tool: {other}")
      }
    }
  }
}

fn tool_catalog() -> Vec<ToolSpec> {
  vec![
    ToolSpec {
      name: "analyze_image".into(),
      description: "Analyze the current document image with a specific, targeted question. \
                    The prior parsed text and preprocessing output are provided as context."
        .into(),
      input_schema: serde_json::json!({
        "type": "object",
        "properties": {
          "question": { "type": "string", "description": "The targeted question to answer about the image" }
        },
        "required": ["question"]
      }),
    },
    ToolSpec {
      name: "rotate_image".into(),
      description: "Rotate the current document image by the given degrees. \
                    Use 90 for clockwise, 180 if text is upside down, 270 for counter-clockwise."
        .into(),
      input_schema: serde_json::json!({
        "type": "object",
        "properties": {
          "degrees": { "type": "integer", "description": "Rotation angle in degrees" }
        },
        "required": ["degrees"]
      }),
    },
  ]
}

fn language_name(code: &str) -> String {
  match code {
    "ko" => "Korean",
    "en" => "English",
    "ja" => "Japanese",
    "zh" => "Chinese",
    _ => "English",
  }
  .to_string()
}
