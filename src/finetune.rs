//! Fine-tuning pipeline (simulated).
//!
//! Turns highly-rated feedback into chat-format training data and walks
//! through the job lifecycle without calling a training backend, so the
//! surrounding workflow can be exercised end to end.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::{
   config::ReviewConfig,
   error::{ReviewError, Result},
   feedback::FeedbackRecord,
   review::REVIEW_SYSTEM_PROMPT,
   style,
};

/// Minimum rating for a feedback record to become a training example.
const TRAINING_RATING_THRESHOLD: u8 = 4;

/// Status of a (simulated) fine-tuning job.
#[derive(Debug, Clone, Serialize)]
pub struct FineTuneJob {
   pub job_id:           String,
   pub status:           String,
   pub base_model:       String,
   pub fine_tuned_model: Option<String>,
}

pub struct ModelFineTuner {
   config: ReviewConfig,
}

impl ModelFineTuner {
   pub fn new(config: &ReviewConfig) -> Self {
      Self { config: config.clone() }
   }

   /// Write a JSONL training file from feedback records. Only records rated
   /// at least 4, marked helpful, and carrying the original prompt and
   /// response qualify. Returns None when nothing qualifies.
   pub fn prepare_training_data(&self, records: &[FeedbackRecord]) -> Result<Option<PathBuf>> {
      let mut lines = Vec::new();

      for record in records {
         if record.rating < TRAINING_RATING_THRESHOLD || record.is_helpful != Some(true) {
            continue;
         }
         let (Some(prompt), Some(response)) = (&record.original_prompt, &record.original_response)
         else {
            continue;
         };

         let example = json!({
            "messages": [
               { "role": "system", "content": REVIEW_SYSTEM_PROMPT },
               { "role": "user", "content": prompt },
               { "role": "assistant", "content": response }
            ]
         });
         lines.push(serde_json::to_string(&example)?);
      }

      if lines.is_empty() {
         style::warn("No valid training examples found in feedback data");
         return Ok(None);
      }

      let dir = &self.config.training_file_dir;
      std::fs::create_dir_all(dir).map_err(|e| {
         ReviewError::Other(format!("Failed to create training directory {}: {}", dir.display(), e))
      })?;

      let stamp = Utc::now().format("%Y%m%d%H%M%S");
      let path = dir.join(format!("training_data_{stamp}.jsonl"));
      std::fs::write(&path, lines.join("\n") + "\n")?;

      style::print_info(&format!("Wrote {} training examples to {}", lines.len(), path.display()));
      Ok(Some(path))
   }

   /// Start a simulated fine-tuning job for a prepared training file.
   pub fn start_fine_tuning(&self, training_file: &Path) -> Result<FineTuneJob> {
      if !training_file.exists() {
         return Err(ReviewError::Other(format!(
            "Training file {} does not exist",
            training_file.display()
         )));
      }

      let job_id = format!("ft-{}", Uuid::new_v4());
      style::print_info(&format!(
         "Started fine-tuning job {} on base model {}",
         job_id, self.config.finetune_base_model
      ));

      Ok(FineTuneJob {
         job_id,
         status: "running".to_string(),
         base_model: self.config.finetune_base_model.clone(),
         fine_tuned_model: None,
      })
   }

   /// Poll a simulated job. The simulation always reports success with a
   /// derived model name.
   pub fn check_fine_tuning_status(&self, job_id: &str) -> FineTuneJob {
      FineTuneJob {
         job_id:           job_id.to_string(),
         status:           "succeeded".to_string(),
         base_model:       self.config.finetune_base_model.clone(),
         fine_tuned_model: Some(format!("ft:{}:galaxy-review", self.config.finetune_base_model)),
      }
   }

   /// Point the reviewer model at a fine-tuned model in a config file,
   /// preserving the rest of the file's settings.
   pub fn update_model_in_config(&self, config_path: &Path, model: &str) -> Result<()> {
      let content = if config_path.exists() {
         std::fs::read_to_string(config_path)?
      } else {
         String::new()
      };

      let mut table: toml::Table = content
         .parse()
         .map_err(|e| ReviewError::Config(format!("Failed to parse {}: {}", config_path.display(), e)))?;
      table.insert("reviewer_model".to_string(), toml::Value::String(model.to_string()));

      if let Some(parent) = config_path.parent() {
         std::fs::create_dir_all(parent)?;
      }
      std::fs::write(config_path, toml::to_string_pretty(&table).map_err(|e| {
         ReviewError::Config(format!("Failed to serialize config: {e}"))
      })?)?;

      style::print_info(&format!("Updated reviewer model to {model} in {}", config_path.display()));
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   fn tuner_in(dir: &TempDir) -> ModelFineTuner {
      let config = ReviewConfig {
         training_file_dir: dir.path().to_path_buf(),
         finetune_base_model: "gpt-3.5-turbo".to_string(),
         ..ReviewConfig::default()
      };
      ModelFineTuner::new(&config)
   }

   fn record(rating: u8, is_helpful: Option<bool>, with_pair: bool) -> FeedbackRecord {
      FeedbackRecord {
         pr_id:             1,
         file_path:         "src/app.py".to_string(),
         comment_id:        "1".to_string(),
         timestamp:         Utc::now().to_rfc3339(),
         rating,
         is_helpful,
         user_comment:      None,
         accepted:          is_helpful,
         original_prompt:   with_pair.then(|| "Review this code".to_string()),
         original_response: with_pair.then(|| "[{\"line\": 1}]".to_string()),
      }
   }

   #[test]
   fn test_prepare_filters_low_ratings_and_missing_pairs() {
      let dir = TempDir::new().unwrap();
      let tuner = tuner_in(&dir);

      let records = vec![
         record(5, Some(true), true),  // qualifies
         record(3, Some(true), true),  // rating too low
         record(5, Some(false), true), // not helpful
         record(5, Some(true), false), // no prompt/response
      ];

      let path = tuner.prepare_training_data(&records).unwrap().unwrap();
      let content = std::fs::read_to_string(&path).unwrap();
      assert_eq!(content.lines().count(), 1);

      let example: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
      let messages = example["messages"].as_array().unwrap();
      assert_eq!(messages.len(), 3);
      assert_eq!(messages[0]["role"], "system");
      assert_eq!(messages[0]["content"], REVIEW_SYSTEM_PROMPT);
      assert_eq!(messages[1]["content"], "Review this code");
      assert_eq!(messages[2]["role"], "assistant");
   }

   #[test]
   fn test_prepare_with_no_qualifying_records_returns_none() {
      let dir = TempDir::new().unwrap();
      let tuner = tuner_in(&dir);
      let result = tuner
         .prepare_training_data(&[record(2, Some(false), true)])
         .unwrap();
      assert!(result.is_none());
   }

   #[test]
   fn test_start_fine_tuning_assigns_ft_job_id() {
      let dir = TempDir::new().unwrap();
      let tuner = tuner_in(&dir);

      let file = dir.path().join("training.jsonl");
      std::fs::write(&file, "{}\n").unwrap();

      let job = tuner.start_fine_tuning(&file).unwrap();
      assert!(job.job_id.starts_with("ft-"));
      assert_eq!(job.status, "running");
      assert_eq!(job.base_model, "gpt-3.5-turbo");
   }

   #[test]
   fn test_start_fine_tuning_missing_file_errors() {
      let dir = TempDir::new().unwrap();
      let tuner = tuner_in(&dir);
      assert!(tuner
         .start_fine_tuning(Path::new("/nonexistent/file.jsonl"))
         .is_err());
   }

   #[test]
   fn test_check_status_reports_succeeded_with_model_name() {
      let dir = TempDir::new().unwrap();
      let tuner = tuner_in(&dir);
      let job = tuner.check_fine_tuning_status("ft-abc");
      assert_eq!(job.status, "succeeded");
      assert_eq!(job.fine_tuned_model.as_deref(), Some("ft:gpt-3.5-turbo:galaxy-review"));
   }

   #[test]
   fn test_update_model_in_config_preserves_other_keys() {
      let dir = TempDir::new().unwrap();
      let tuner = tuner_in(&dir);

      let config_path = dir.path().join("config.toml");
      std::fs::write(&config_path, "temperature = 0.5\nreviewer_model = \"old\"\n").unwrap();

      tuner
         .update_model_in_config(&config_path, "ft:gpt-3.5-turbo:galaxy-review")
         .unwrap();

      let content = std::fs::read_to_string(&config_path).unwrap();
      let table: toml::Table = content.parse().unwrap();
      assert_eq!(
         table["reviewer_model"].as_str(),
         Some("ft:gpt-3.5-turbo:galaxy-review")
      );
      assert_eq!(table["temperature"].as_float(), Some(0.5));
   }
}
