//! Feedback collection and aggregation.
//!
//! Stores one JSON file per piece of feedback and derives ratings from
//! emoji reactions left on review comments.

use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
   bitbucket::BitbucketClient,
   config::ReviewConfig,
   error::{ReviewError, Result},
   style,
};

/// One piece of feedback on a review comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
   pub pr_id:             u64,
   pub file_path:         String,
   pub comment_id:        String,
   pub timestamp:         String,
   pub rating:            u8,
   #[serde(default)]
   pub is_helpful:        Option<bool>,
   #[serde(default)]
   pub user_comment:      Option<String>,
   #[serde(default)]
   pub accepted:          Option<bool>,
   /// Prompt and response the comment came from, kept when available so
   /// highly-rated findings can become training examples.
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub original_prompt:   Option<String>,
   #[serde(default, skip_serializing_if = "Option::is_none")]
   pub original_response: Option<String>,
}

/// Aggregate statistics over stored feedback.
#[derive(Debug, Serialize)]
pub struct FeedbackStats {
   pub total_comments:     usize,
   pub average_rating:     f64,
   pub helpful_percentage: f64,
   pub acceptance_rate:    f64,
   pub reaction_counts:    IndexMap<String, usize>,
}

/// Stores and retrieves feedback records on the local filesystem.
pub struct FeedbackCollector {
   storage_dir: PathBuf,
}

impl FeedbackCollector {
   pub fn new(config: &ReviewConfig) -> Result<Self> {
      let storage_dir = config.feedback_storage_dir.clone();
      std::fs::create_dir_all(&storage_dir).map_err(|e| {
         ReviewError::Other(format!(
            "Failed to create feedback directory {}: {}",
            storage_dir.display(),
            e
         ))
      })?;
      Ok(Self { storage_dir })
   }

   /// Persist one feedback record as `{pr}_{comment}_{timestamp}.json`.
   pub fn store_feedback(&self, record: &FeedbackRecord) -> Result<PathBuf> {
      let stamp = Utc::now().format("%Y%m%d%H%M%S");
      let filename = format!("{}_{}_{}.json", record.pr_id, record.comment_id, stamp);
      let path = self.storage_dir.join(filename);

      let json = serde_json::to_string_pretty(record)?;
      std::fs::write(&path, json)?;
      Ok(path)
   }

   /// Load every stored feedback record, skipping files that fail to parse.
   pub fn get_all_feedback(&self) -> Result<Vec<FeedbackRecord>> {
      let mut records = Vec::new();

      for entry in std::fs::read_dir(&self.storage_dir)? {
         let entry = entry?;
         let path = entry.path();
         if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
         }

         match read_record(&path) {
            Ok(record) => records.push(record),
            Err(e) => {
               style::warn(&format!("Skipping unreadable feedback file {}: {}", path.display(), e));
            },
         }
      }

      records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
      Ok(records)
   }

   /// Pull reactions from a PR's inline comments and store them as feedback.
   /// Returns the number of new records stored.
   pub fn collect_reactions_feedback(
      &self,
      api: &BitbucketClient,
      repo_slug: &str,
      pr_id: u64,
   ) -> Result<usize> {
      let comments = api.get_pr_comments(repo_slug, pr_id)?;
      let mut stored = 0;

      for comment in &comments {
         let Some(inline) = &comment.inline else {
            continue;
         };

         let reactions = match api.get_comment_reactions(repo_slug, pr_id, comment.id) {
            Ok(reactions) => reactions,
            Err(e) => {
               style::warn(&format!("Failed to get reactions for comment {}: {}", comment.id, e));
               continue;
            },
         };

         for reaction in &reactions {
            let Some((rating, is_helpful)) = rating_for_emoji(&reaction.emoji) else {
               continue;
            };

            let user = reaction
               .user
               .as_ref()
               .map_or("unknown", |u| u.display_name.as_str());

            let record = FeedbackRecord {
               pr_id,
               file_path: inline.path.clone(),
               comment_id: comment.id.to_string(),
               timestamp: Utc::now().to_rfc3339(),
               rating,
               is_helpful,
               user_comment: Some(format!("Reaction: {} from {}", reaction.emoji, user)),
               // A reaction signals helpfulness, not that the suggestion was
               // applied; acceptance stays unknown until marked explicitly.
               accepted: None,
               original_prompt: None,
               original_response: None,
            };

            self.store_feedback(&record)?;
            stored += 1;
         }
      }

      Ok(stored)
   }

   /// Aggregate statistics across all stored feedback, rounded to two
   /// decimal places. All-zero stats when no feedback exists.
   pub fn get_feedback_stats(&self) -> Result<FeedbackStats> {
      let records = self.get_all_feedback()?;

      if records.is_empty() {
         return Ok(FeedbackStats {
            total_comments:     0,
            average_rating:     0.0,
            helpful_percentage: 0.0,
            acceptance_rate:    0.0,
            reaction_counts:    IndexMap::new(),
         });
      }

      let total = records.len();
      let rating_sum: u64 = records.iter().map(|r| u64::from(r.rating)).sum();
      let helpful = records
         .iter()
         .filter(|r| r.is_helpful == Some(true))
         .count();
      let accepted = records.iter().filter(|r| r.accepted == Some(true)).count();

      let mut reaction_counts: IndexMap<String, usize> = IndexMap::new();
      for record in &records {
         if let Some(comment) = &record.user_comment
            && let Some(rest) = comment.strip_prefix("Reaction: ")
            && let Some(emoji) = rest.split_whitespace().next()
         {
            *reaction_counts.entry(emoji.to_string()).or_insert(0) += 1;
         }
      }

      Ok(FeedbackStats {
         total_comments: total,
         average_rating: round2(rating_sum as f64 / total as f64),
         helpful_percentage: round2(helpful as f64 / total as f64 * 100.0),
         acceptance_rate: round2(accepted as f64 / total as f64 * 100.0),
         reaction_counts,
      })
   }
}

fn read_record(path: &Path) -> Result<FeedbackRecord> {
   let content = std::fs::read_to_string(path)?;
   Ok(serde_json::from_str(&content)?)
}

/// Map a reaction emoji to a rating and helpfulness signal. Unknown
/// reactions carry no signal and are skipped.
pub fn rating_for_emoji(emoji: &str) -> Option<(u8, Option<bool>)> {
   match emoji {
      "👍" | "❤️" | "🎉" => Some((5, Some(true))),
      "🚀" => Some((4, Some(true))),
      "😕" | "👀" => Some((3, None)),
      "👎" => Some((2, Some(false))),
      _ => None,
   }
}

fn round2(value: f64) -> f64 {
   (value * 100.0).round() / 100.0
}
