use std::{fmt, path::PathBuf};

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{ReviewError, Result};

// === Review comment types ===

/// Severity of a review finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
   Info,
   Warning,
   Error,
}

impl Severity {
   /// Parse severity from name string (case-insensitive).
   pub fn from_name(name: &str) -> Result<Self> {
      match name.to_lowercase().as_str() {
         "info" => Ok(Self::Info),
         "warning" => Ok(Self::Warning),
         "error" => Ok(Self::Error),
         _ => Err(ReviewError::InvalidSeverity(format!(
            "'{name}' is not one of: info, warning, error"
         ))),
      }
   }

   pub const fn as_str(&self) -> &'static str {
      match self {
         Self::Info => "info",
         Self::Warning => "warning",
         Self::Error => "error",
      }
   }
}

impl fmt::Display for Severity {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}", self.as_str())
   }
}

impl Serialize for Severity {
   fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
   where
      S: serde::Serializer,
   {
      serializer.serialize_str(self.as_str())
   }
}

impl<'de> Deserialize<'de> for Severity {
   fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
   where
      D: serde::Deserializer<'de>,
   {
      let s = String::deserialize(deserializer)?;
      Self::from_name(&s).map_err(serde::de::Error::custom)
   }
}

/// One inline review finding produced by the reviewer agent.
#[derive(Debug, Clone, Serialize)]
pub struct ReviewComment {
   /// 1-based line in the new file version to anchor the comment to.
   pub line:     usize,
   pub content:  String,
   pub severity: Severity,
   /// Free-form category, normalized lowercase ("security", "performance", ...).
   pub category: String,
   /// Raw model output this comment came from, kept for training data.
   #[serde(skip_serializing_if = "Option::is_none")]
   pub original_response: Option<String>,
}

// === Bitbucket API response types ===

#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
   pub id: u64,
   #[serde(default)]
   pub title:       String,
   #[serde(default)]
   pub description: String,
   #[serde(default)]
   pub source:      Option<PrEndpoint>,
}

impl PullRequest {
   /// Name of the PR source branch, when the API reported one.
   pub fn source_branch(&self) -> Option<&str> {
      self
         .source
         .as_ref()
         .and_then(|e| e.branch.as_ref())
         .map(|b| b.name.as_str())
   }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrEndpoint {
   #[serde(default)]
   pub branch: Option<Branch>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Branch {
   pub name: String,
}

/// One commit from the repository commits endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct Commit {
   pub hash: String,
   #[serde(default)]
   pub message: String,
   #[serde(default)]
   pub date:    Option<String>,
}

/// One existing comment on a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct PrComment {
   pub id: u64,
   #[serde(default)]
   pub content: Option<CommentContent>,
   #[serde(default)]
   pub inline:  Option<InlineAnchor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommentContent {
   #[serde(default)]
   pub raw: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InlineAnchor {
   pub path: String,
   #[serde(default)]
   pub to:   Option<usize>,
}

/// An emoji reaction left on a comment.
#[derive(Debug, Clone, Deserialize)]
pub struct Reaction {
   pub emoji: String,
   #[serde(default)]
   pub user:  Option<ReactionUser>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReactionUser {
   #[serde(default)]
   pub display_name: String,
}

// === Bitbucket comment payload ===

/// Comment payload in the shape the Bitbucket comments endpoint accepts.
#[derive(Debug, Clone, Serialize)]
pub struct CommentPayload {
   /// Local correlation id (UUID v4), not part of the wire payload.
   #[serde(skip_serializing)]
   pub local_id: String,
   pub content:  PayloadContent,
   pub inline:   InlineAnchor,
}

#[derive(Debug, Clone, Serialize)]
pub struct PayloadContent {
   pub raw: String,
}

// === CLI Args ===

#[derive(Parser, Debug)]
#[command(author, version, about = "AI code review assistant for Bitbucket pull requests", long_about = None)]
pub struct Args {
   /// Repository in workspace/repo-slug format
   #[arg(long)]
   pub repo: String,

   /// Pull request ID to review
   #[arg(long)]
   pub pr: u64,

   /// Path to config file (default: ~/.config/galaxy-review/config.toml)
   #[arg(long)]
   pub config: Option<PathBuf>,

   /// Reviewer model override
   #[arg(long, short = 'm')]
   pub model: Option<String>,

   /// Temperature for API calls (0.0-1.0)
   #[arg(long, short = 't')]
   pub temperature: Option<f32>,

   /// Print comment payloads instead of posting them
   #[arg(long)]
   pub dry_run: bool,

   /// Harvest emoji reactions on past bot comments and print feedback stats
   #[arg(long, conflicts_with = "finetune")]
   pub collect_feedback: bool,

   /// Prepare training data from stored feedback and start a fine-tuning job
   #[arg(long)]
   pub finetune: bool,

   /// Review at most this many changed files
   #[arg(long)]
   pub max_files: Option<usize>,

   /// Verbose diagnostics
   #[arg(long)]
   pub debug: bool,
}

impl Default for Args {
   fn default() -> Self {
      Self {
         repo:             "workspace/repo".to_string(),
         pr:               1,
         config:           None,
         model:            None,
         temperature:      None,
         dry_run:          false,
         collect_feedback: false,
         finetune:         false,
         max_files:        None,
         debug:            false,
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   // ========== Severity Tests ==========

   #[test]
   fn test_severity_from_name_valid() {
      assert_eq!(Severity::from_name("info").unwrap(), Severity::Info);
      assert_eq!(Severity::from_name("warning").unwrap(), Severity::Warning);
      assert_eq!(Severity::from_name("error").unwrap(), Severity::Error);
   }

   #[test]
   fn test_severity_from_name_case_insensitive() {
      assert_eq!(Severity::from_name("INFO").unwrap(), Severity::Info);
      assert_eq!(Severity::from_name("Warning").unwrap(), Severity::Warning);
   }

   #[test]
   fn test_severity_from_name_invalid() {
      for name in ["critical", "blocker", "", "5"] {
         let err = Severity::from_name(name).unwrap_err();
         assert!(matches!(err, ReviewError::InvalidSeverity(_)), "expected '{name}' to be invalid");
      }
   }

   #[test]
   fn test_severity_serde_roundtrip() {
      let json = serde_json::to_string(&Severity::Warning).unwrap();
      assert_eq!(json, "\"warning\"");

      let parsed: Severity = serde_json::from_str("\"error\"").unwrap();
      assert_eq!(parsed, Severity::Error);

      let result: serde_json::Result<Severity> = serde_json::from_str("\"fatal\"");
      assert!(result.is_err());
   }

   // ========== Bitbucket DTO Tests ==========

   #[test]
   fn test_pull_request_source_branch() {
      let json = r#"{
         "id": 42,
         "title": "Add retry logic",
         "description": "Retries transient failures.",
         "source": {"branch": {"name": "feature/retries"}}
      }"#;
      let pr: PullRequest = serde_json::from_str(json).unwrap();
      assert_eq!(pr.id, 42);
      assert_eq!(pr.source_branch(), Some("feature/retries"));
   }

   #[test]
   fn test_pull_request_missing_source_branch() {
      let pr: PullRequest = serde_json::from_str(r#"{"id": 7}"#).unwrap();
      assert_eq!(pr.source_branch(), None);
      assert!(pr.description.is_empty());
   }

   #[test]
   fn test_reaction_deserialize() {
      let json = r#"{"emoji": "👍", "user": {"display_name": "Reviewer"}}"#;
      let reaction: Reaction = serde_json::from_str(json).unwrap();
      assert_eq!(reaction.emoji, "👍");
      assert_eq!(reaction.user.unwrap().display_name, "Reviewer");
   }

   #[test]
   fn test_comment_payload_wire_shape() {
      let payload = CommentPayload {
         local_id: "abc-123".to_string(),
         content:  PayloadContent { raw: "💡 Info\n\nlooks fine".to_string() },
         inline:   InlineAnchor { path: "src/app.py".to_string(), to: Some(13) },
      };

      let json = serde_json::to_value(&payload).unwrap();
      assert_eq!(json["content"]["raw"], "💡 Info\n\nlooks fine");
      assert_eq!(json["inline"]["path"], "src/app.py");
      assert_eq!(json["inline"]["to"], 13);
      // Local id stays local.
      assert!(json.get("local_id").is_none());
   }

   #[test]
   fn test_pr_comment_deserialize_with_inline() {
      let json = r#"{
         "id": 9001,
         "content": {"raw": "⚠️ Warning\n\ncheck bounds"},
         "inline": {"path": "src/lib.rs", "to": 8}
      }"#;
      let comment: PrComment = serde_json::from_str(json).unwrap();
      assert_eq!(comment.id, 9001);
      assert_eq!(comment.inline.unwrap().path, "src/lib.rs");
   }
}
