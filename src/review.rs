//! LLM reviewer agent.
//!
//! Renders the review prompt for one changed file and asks the configured
//! chat-completions endpoint for structured findings via a forced tool call,
//! with a plain-JSON fallback for models that ignore tool choice.

use serde::{Deserialize, Serialize};

use crate::{
   bitbucket::{build_client, retry_api_call},
   config::ReviewConfig,
   context::FileContext,
   diff::ChangeRecord,
   error::{ReviewError, Result},
   style, templates,
   tokens::create_token_counter,
   types::{ReviewComment, Severity},
};

/// System message sent with every review request. Training data preparation
/// reuses the exact same string, so fine-tuned models see identical framing.
pub const REVIEW_SYSTEM_PROMPT: &str =
   "You are an expert code reviewer providing detailed, actionable feedback.";

#[derive(Debug, Serialize)]
struct Message {
   role:    String,
   content: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionParameters {
   #[serde(rename = "type")]
   param_type: String,
   properties: serde_json::Value,
   required:   Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Function {
   name:        String,
   description: String,
   parameters:  FunctionParameters,
}

#[derive(Debug, Serialize, Deserialize)]
struct Tool {
   #[serde(rename = "type")]
   tool_type: String,
   function:  Function,
}

#[derive(Debug, Serialize)]
struct ApiRequest {
   model:       String,
   max_tokens:  u32,
   temperature: f32,
   tools:       Vec<Tool>,
   #[serde(skip_serializing_if = "Option::is_none")]
   tool_choice: Option<serde_json::Value>,
   messages:    Vec<Message>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
   function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
   name:      String,
   arguments: String,
}

#[derive(Debug, Deserialize)]
struct Choice {
   message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
   #[serde(default)]
   tool_calls: Vec<ToolCall>,
   #[serde(default)]
   content:    Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
   choices: Vec<Choice>,
}

/// Comment shape as the model emits it, before validation and defaulting.
#[derive(Debug, Deserialize)]
struct RawComment {
   line:     usize,
   content:  String,
   #[serde(default)]
   severity: Option<String>,
   #[serde(default)]
   category: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReviewOutput {
   comments: Vec<RawComment>,
}

/// Review the change records of one file and return structured findings.
pub fn review(
   file_path: &str,
   changes: &[ChangeRecord],
   context: &FileContext,
   config: &ReviewConfig,
) -> Result<Vec<ReviewComment>> {
   if changes.is_empty() {
      return Ok(Vec::new());
   }

   let prompt = prepare_review_prompt(file_path, changes, context, config)?;

   retry_api_call(config, move || {
      let client = build_client(config)?;

      let tool = Tool {
         tool_type: "function".to_string(),
         function:  Function {
            name:        "create_review_comments".to_string(),
            description: "Report code review findings for the changed lines as structured \
                          inline comments"
               .to_string(),
            parameters:  FunctionParameters {
               param_type: "object".to_string(),
               properties: serde_json::json!({
                  "comments": {
                     "type": "array",
                     "description": "Review findings. Empty array if the changes look fine.",
                     "items": {
                        "type": "object",
                        "properties": {
                           "line": {
                              "type": "integer",
                              "description": "Line number in the new file version the finding applies to"
                           },
                           "content": {
                              "type": "string",
                              "description": "Explanation of the problem and a suggested fix"
                           },
                           "severity": {
                              "type": "string",
                              "enum": ["info", "warning", "error"]
                           },
                           "category": {
                              "type": "string",
                              "description": "Issue category, e.g. security, performance, style"
                           }
                        },
                        "required": ["line", "content"]
                     }
                  }
               }),
               required:   vec!["comments".to_string()],
            },
         },
      };

      let request = ApiRequest {
         model:       config.reviewer_model.clone(),
         max_tokens:  config.max_tokens,
         temperature: config.temperature,
         tools:       vec![tool],
         tool_choice: Some(
            serde_json::json!({ "type": "function", "function": { "name": "create_review_comments" } }),
         ),
         messages:    vec![
            Message { role: "system".to_string(), content: REVIEW_SYSTEM_PROMPT.to_string() },
            Message { role: "user".to_string(), content: prompt.clone() },
         ],
      };

      let mut request_builder = client
         .post(format!("{}/chat/completions", config.api_base_url))
         .header("content-type", "application/json");

      if let Some(ref api_key) = config.api_key {
         request_builder = request_builder.header("Authorization", format!("Bearer {api_key}"));
      }

      let response = request_builder.json(&request).send()?;
      let status = response.status();

      // Retry on 5xx errors
      if status.is_server_error() {
         let error_text = response
            .text()
            .unwrap_or_else(|_| "Unknown error".to_string());
         eprintln!("Server error {status}: {error_text}");
         return Ok((true, None));
      }

      if !status.is_success() {
         let error_text = response
            .text()
            .unwrap_or_else(|_| "Unknown error".to_string());
         return Err(ReviewError::Api { status: status.as_u16(), body: error_text });
      }

      let api_response: ApiResponse = response.json()?;

      if api_response.choices.is_empty() {
         return Err(ReviewError::Other("API returned empty response for review".to_string()));
      }

      let message = &api_response.choices[0].message;

      // Find the tool call in the response
      if !message.tool_calls.is_empty() {
         let tool_call = &message.tool_calls[0];
         if tool_call.function.name == "create_review_comments" {
            let args = &tool_call.function.arguments;
            if args.is_empty() {
               eprintln!(
                  "Warning: Model returned empty function arguments. Model may not support \
                   function calling properly."
               );
               return Err(ReviewError::Other(
                  "Model returned empty function arguments - try a model with tool support"
                     .to_string(),
               ));
            }
            let output: ReviewOutput = serde_json::from_str(args).map_err(|e| {
               ReviewError::Other(format!(
                  "Failed to parse model response: {}. Response was: {}",
                  e,
                  args.chars().take(200).collect::<String>()
               ))
            })?;
            return Ok((false, Some(validate_comments(output.comments, args))));
         }
      }

      // Fallback: extract a JSON array from plain content
      if let Some(content) = &message.content {
         let raw: Vec<RawComment> = match extract_json_array(content) {
            Some(json_str) => serde_json::from_str(json_str)?,
            None => {
               style::warn("No valid JSON array found in model response");
               Vec::new()
            },
         };
         return Ok((false, Some(validate_comments(raw, content))));
      }

      Err(ReviewError::Other("No review comments found in API response".to_string()))
   })
}

/// Apply defaults and normalization to raw model findings.
fn validate_comments(raw: Vec<RawComment>, original_response: &str) -> Vec<ReviewComment> {
   raw
      .into_iter()
      .map(|comment| {
         let severity = match comment.severity.as_deref() {
            None => Severity::Info,
            Some(name) => Severity::from_name(name).unwrap_or_else(|e| {
               style::warn(&format!("{e}, defaulting to info"));
               Severity::Info
            }),
         };

         ReviewComment {
            line: comment.line,
            content: comment.content,
            severity,
            category: comment
               .category
               .map_or_else(|| "general".to_string(), |c| c.to_lowercase()),
            original_response: Some(original_response.to_string()),
         }
      })
      .collect()
}

/// Locate the outermost JSON array in free-form model output.
fn extract_json_array(text: &str) -> Option<&str> {
   let start = text.find('[')?;
   let end = text.rfind(']')?;
   (end >= start).then(|| &text[start..=end])
}

/// Build the review prompt for one file from its changes and context.
fn prepare_review_prompt(
   file_path: &str,
   changes: &[ChangeRecord],
   context: &FileContext,
   config: &ReviewConfig,
) -> Result<String> {
   let language = language_for_path(file_path);
   let changes_text = format_changes(changes, language);
   let context_text = format_context(context, config);

   templates::render_review_prompt(
      &config.review_prompt_variant,
      file_path,
      language,
      &changes_text,
      &context_text,
   )
}

/// Render change records as line-ranged fenced code blocks.
fn format_changes(changes: &[ChangeRecord], language: &str) -> String {
   let mut text = String::new();
   for change in changes {
      let label = if change.is_addition() { "Added" } else { "Removed" };
      text.push_str(&format!(
         "\nLines {}-{} ({}):\n```{}\n{}\n```\n",
         change.start_line, change.end_line, label, language, change.content
      ));
   }
   text
}

fn format_context(context: &FileContext, config: &ReviewConfig) -> String {
   let mut text = String::new();

   if !context.file_content.is_empty() {
      let counter = create_token_counter(config);
      let budgeted = counter.truncate_to_budget(&context.file_content, config.max_context_tokens);
      text.push_str(&format!("\nFull file content:\n```\n{budgeted}\n```\n"));
   }

   if !context.imports.is_empty() {
      text.push_str("\nImports:\n");
      for import in &context.imports {
         text.push_str(&format!("- {import}\n"));
      }
   }

   if !context.file_history.is_empty() {
      text.push_str("\nRecent commits touching this file:\n");
      for commit in &context.file_history {
         let summary = commit.message.lines().next().unwrap_or_default();
         // get() rather than slicing: the hash comes off the wire and may be
         // shorter than 12 bytes or hold a non-char-boundary there.
         let short_hash = commit.hash.get(..12).unwrap_or(&commit.hash);
         text.push_str(&format!("- {short_hash}: {summary}\n"));
      }
   }

   if !context.pr_description.is_empty() {
      text.push_str(&format!("\nPull Request Description:\n{}\n", context.pr_description));
   }

   text
}

/// Map file extension to a fenced-code-block language tag.
pub fn language_for_path(file_path: &str) -> &'static str {
   let extension = file_path.rsplit('.').next().unwrap_or_default();
   match extension.to_lowercase().as_str() {
      "py" => "python",
      "js" => "javascript",
      "ts" => "typescript",
      "rs" => "rust",
      "java" => "java",
      "go" => "go",
      "rb" => "ruby",
      "php" => "php",
      "cs" => "csharp",
      "cpp" | "hpp" => "cpp",
      "c" | "h" => "c",
      "html" => "html",
      "css" => "css",
      "md" => "markdown",
      "json" => "json",
      "yaml" | "yml" => "yaml",
      "sh" => "bash",
      "sql" => "sql",
      _ => "text",
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::diff::{ChangeKind, ChangeRecord};

   fn addition(start: usize, end: usize, content: &str) -> ChangeRecord {
      ChangeRecord {
         kind: ChangeKind::Addition,
         content: content.to_string(),
         start_line: start,
         end_line: end,
      }
   }

   #[test]
   fn test_review_empty_changes_is_empty_without_api() {
      let config = ReviewConfig::default();
      let comments = review("app.py", &[], &FileContext::default(), &config).unwrap();
      assert!(comments.is_empty());
   }

   #[test]
   fn test_language_for_path() {
      assert_eq!(language_for_path("src/app.py"), "python");
      assert_eq!(language_for_path("src/main.rs"), "rust");
      assert_eq!(language_for_path("component.ts"), "typescript");
      // tsx/jsx are unmapped and fall through to the plain-text fence.
      assert_eq!(language_for_path("Component.tsx"), "text");
      assert_eq!(language_for_path("Makefile"), "text");
      assert_eq!(language_for_path("include/header.h"), "c");
   }

   #[test]
   fn test_format_changes_labels_and_ranges() {
      let changes = vec![
         addition(13, 13, "def f():"),
         ChangeRecord {
            kind:       ChangeKind::Deletion,
            content:    "old line".to_string(),
            start_line: 20,
            end_line:   21,
         },
      ];
      let text = format_changes(&changes, "python");
      assert!(text.contains("Lines 13-13 (Added):"));
      assert!(text.contains("```python\ndef f():\n```"));
      assert!(text.contains("Lines 20-21 (Removed):"));
   }

   #[test]
   fn test_extract_json_array() {
      assert_eq!(extract_json_array("here: [1, 2] done"), Some("[1, 2]"));
      assert_eq!(extract_json_array("no array here"), None);
      assert_eq!(
         extract_json_array("Sure! [{\"line\": 3}] hope that helps"),
         Some("[{\"line\": 3}]")
      );
   }

   #[test]
   fn test_validate_comments_applies_defaults() {
      let raw = vec![RawComment {
         line:     5,
         content:  "possible off-by-one".to_string(),
         severity: None,
         category: None,
      }];
      let comments = validate_comments(raw, "[raw]");
      assert_eq!(comments[0].severity, Severity::Info);
      assert_eq!(comments[0].category, "general");
      assert_eq!(comments[0].original_response.as_deref(), Some("[raw]"));
   }

   #[test]
   fn test_validate_comments_normalizes_category_case() {
      let raw = vec![RawComment {
         line:     8,
         content:  "unchecked input".to_string(),
         severity: Some("error".to_string()),
         category: Some("Security".to_string()),
      }];
      let comments = validate_comments(raw, "");
      assert_eq!(comments[0].severity, Severity::Error);
      assert_eq!(comments[0].category, "security");
   }

   #[test]
   fn test_validate_comments_unknown_severity_falls_back_to_info() {
      let raw = vec![RawComment {
         line:     1,
         content:  "x".to_string(),
         severity: Some("catastrophic".to_string()),
         category: None,
      }];
      let comments = validate_comments(raw, "");
      assert_eq!(comments[0].severity, Severity::Info);
   }

   #[test]
   fn test_format_context_abbreviates_commit_hashes() {
      let config = ReviewConfig::default();
      let context = FileContext {
         file_history: vec![
            crate::types::Commit {
               hash:    "0123456789abcdef".to_string(),
               message: "fix: handle empty input\n\ndetails".to_string(),
               date:    None,
            },
            crate::types::Commit {
               hash:    "abc".to_string(),
               message: "short hash".to_string(),
               date:    None,
            },
            // Multibyte content straddling the 12-byte cut must not panic;
            // the full hash is kept instead.
            crate::types::Commit {
               hash:    "a\u{2713}\u{2713}\u{2713}\u{2713}".to_string(),
               message: "odd hash".to_string(),
               date:    None,
            },
         ],
         ..FileContext::default()
      };

      let text = format_context(&context, &config);
      assert!(text.contains("- 0123456789ab: fix: handle empty input\n"));
      assert!(text.contains("- abc: short hash\n"));
      assert!(text.contains("- a\u{2713}\u{2713}\u{2713}\u{2713}: odd hash\n"));
   }

   #[test]
   fn test_tool_output_shape_parses() {
      let args = r#"{"comments": [
         {"line": 13, "content": "shadowed variable", "severity": "warning", "category": "logic"}
      ]}"#;
      let output: ReviewOutput = serde_json::from_str(args).unwrap();
      assert_eq!(output.comments.len(), 1);
      assert_eq!(output.comments[0].line, 13);
   }
}
