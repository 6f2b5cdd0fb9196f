use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ReviewError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReviewConfig {
   /// Bitbucket Cloud REST API base, with or without trailing slash
   pub bitbucket_api_url: String,

   /// Bitbucket username (overridden by `BITBUCKET_USERNAME` env var)
   pub bitbucket_username: String,

   /// Bitbucket app password (overridden by `BITBUCKET_APP_PASSWORD` env var)
   pub bitbucket_app_password: String,

   /// OpenAI-compatible chat-completions base URL
   pub api_base_url: String,

   /// Optional API key for the LLM endpoint (overridden by
   /// `GALAXY_REVIEW_API_KEY` env var)
   pub api_key: Option<String>,

   /// HTTP request timeout in seconds
   pub request_timeout_secs: u64,

   /// HTTP connection timeout in seconds
   pub connect_timeout_secs: u64,

   pub max_retries:        u32,
   pub initial_backoff_ms: u64,

   pub reviewer_model: String,
   pub temperature:    f32,
   pub max_tokens:     u32,

   /// Token budget for the file-content section of the review prompt
   /// (approx 4 chars/token when no tokenizer is available)
   pub max_context_tokens: usize,

   /// How many sibling-directory files to pull into review context
   pub max_related_files: usize,

   /// How many commits of file history to pull into review context
   pub file_history_limit: usize,

   /// Append a feedback footer to posted comments
   pub feedback_enable_links: bool,

   /// Use emoji-reaction instructions instead of web links in the footer
   pub feedback_use_reactions: bool,

   /// Feedback web server base, used only when reactions are disabled
   pub feedback_server_url: String,

   /// Directory for stored feedback records
   pub feedback_storage_dir: PathBuf,

   /// Base model for fine-tuning jobs
   pub finetune_base_model: String,

   /// Directory for prepared JSONL training files
   pub training_file_dir: PathBuf,

   /// Prompt variant for the review phase (e.g., "default")
   #[serde(default = "default_review_prompt_variant")]
   pub review_prompt_variant: String,
}

fn default_review_prompt_variant() -> String {
   "default".to_string()
}

impl Default for ReviewConfig {
   fn default() -> Self {
      Self {
         bitbucket_api_url:      "https://api.bitbucket.org/2.0".to_string(),
         bitbucket_username:     String::new(),
         bitbucket_app_password: String::new(),
         api_base_url:           "http://localhost:4000".to_string(),
         api_key:                None,
         request_timeout_secs:   120,
         connect_timeout_secs:   30,
         max_retries:            3,
         initial_backoff_ms:     1000,
         reviewer_model:         "claude-sonnet-4.5".to_string(),
         temperature:            0.2, // Low temperature for consistent structured output
         max_tokens:             2000,
         max_context_tokens:     12000,
         max_related_files:      5,
         file_history_limit:     5,
         feedback_enable_links:  false,
         feedback_use_reactions: true,
         feedback_server_url:    "http://localhost:8000".to_string(),
         feedback_storage_dir:   PathBuf::from("feedback_data"),
         finetune_base_model:    "gpt-3.5-turbo".to_string(),
         training_file_dir:      PathBuf::from("training_data"),
         review_prompt_variant:  default_review_prompt_variant(),
      }
   }
}

impl ReviewConfig {
   /// Load config from default location (~/.config/galaxy-review/config.toml)
   /// Falls back to Default if file doesn't exist or can't determine home
   /// directory. Environment variables override config file values:
   /// - `GALAXY_REVIEW_API_URL` overrides `api_base_url`
   /// - `GALAXY_REVIEW_API_KEY` overrides `api_key`
   /// - `BITBUCKET_USERNAME` overrides `bitbucket_username`
   /// - `BITBUCKET_APP_PASSWORD` overrides `bitbucket_app_password`
   pub fn load() -> Result<Self> {
      let config_path = if let Ok(custom_path) = std::env::var("GALAXY_REVIEW_CONFIG") {
         PathBuf::from(custom_path)
      } else {
         Self::default_config_path().unwrap_or_else(|_| PathBuf::new())
      };

      let mut config = if config_path.exists() {
         Self::from_file(&config_path)?
      } else {
         Self::default()
      };

      Self::apply_env_overrides(&mut config);
      Ok(config)
   }

   /// Load config from specific file
   pub fn from_file(path: &Path) -> Result<Self> {
      let contents = std::fs::read_to_string(path)
         .map_err(|e| ReviewError::Config(format!("Failed to read config: {e}")))?;
      let mut config: Self = toml::from_str(&contents)
         .map_err(|e| ReviewError::Config(format!("Failed to parse config: {e}")))?;

      Self::apply_env_overrides(&mut config);
      Ok(config)
   }

   /// Apply environment variable overrides to config
   fn apply_env_overrides(config: &mut Self) {
      if let Ok(api_url) = std::env::var("GALAXY_REVIEW_API_URL") {
         config.api_base_url = api_url;
      }
      if let Ok(api_key) = std::env::var("GALAXY_REVIEW_API_KEY") {
         config.api_key = Some(api_key);
      }
      if let Ok(username) = std::env::var("BITBUCKET_USERNAME") {
         config.bitbucket_username = username;
      }
      if let Ok(password) = std::env::var("BITBUCKET_APP_PASSWORD") {
         config.bitbucket_app_password = password;
      }
   }

   /// Fail early when Bitbucket credentials are missing, rather than at the
   /// first 401 mid-run.
   pub fn validate_credentials(&self) -> Result<()> {
      if self.bitbucket_username.is_empty() {
         return Err(ReviewError::Config(
            "Bitbucket username not set (config key `bitbucket_username` or BITBUCKET_USERNAME)"
               .to_string(),
         ));
      }
      if self.bitbucket_app_password.is_empty() {
         return Err(ReviewError::Config(
            "Bitbucket app password not set (config key `bitbucket_app_password` or \
             BITBUCKET_APP_PASSWORD)"
               .to_string(),
         ));
      }
      Ok(())
   }

   /// Bitbucket API base with a guaranteed trailing slash.
   pub fn bitbucket_base(&self) -> String {
      if self.bitbucket_api_url.ends_with('/') {
         self.bitbucket_api_url.clone()
      } else {
         format!("{}/", self.bitbucket_api_url)
      }
   }

   /// Get default config path (platform-safe)
   /// Tries HOME (Unix/Linux/macOS) then USERPROFILE (Windows)
   pub fn default_config_path() -> Result<PathBuf> {
      if let Ok(home) = std::env::var("HOME") {
         return Ok(PathBuf::from(home).join(".config/galaxy-review/config.toml"));
      }

      if let Ok(home) = std::env::var("USERPROFILE") {
         return Ok(PathBuf::from(home).join(".config/galaxy-review/config.toml"));
      }

      Err(ReviewError::Config("No home directory found (tried HOME and USERPROFILE)".to_string()))
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_default_config_values() {
      let config = ReviewConfig::default();
      assert_eq!(config.bitbucket_api_url, "https://api.bitbucket.org/2.0");
      assert_eq!(config.max_retries, 3);
      assert_eq!(config.max_related_files, 5);
      assert_eq!(config.file_history_limit, 5);
      assert!(config.feedback_use_reactions);
      assert!(!config.feedback_enable_links);
   }

   #[test]
   fn test_parse_partial_toml() {
      let toml_str = r#"
         reviewer_model = "gpt-4"
         temperature = 0.7
         feedback_enable_links = true
      "#;
      let config: ReviewConfig = toml::from_str(toml_str).unwrap();
      assert_eq!(config.reviewer_model, "gpt-4");
      assert_eq!(config.temperature, 0.7);
      assert!(config.feedback_enable_links);
      // Unspecified keys keep defaults
      assert_eq!(config.max_retries, 3);
   }

   #[test]
   fn test_bitbucket_base_trailing_slash() {
      let mut config = ReviewConfig::default();
      config.bitbucket_api_url = "https://api.bitbucket.org/2.0".to_string();
      assert_eq!(config.bitbucket_base(), "https://api.bitbucket.org/2.0/");

      config.bitbucket_api_url = "https://api.bitbucket.org/2.0/".to_string();
      assert_eq!(config.bitbucket_base(), "https://api.bitbucket.org/2.0/");
   }

   #[test]
   fn test_validate_credentials_missing() {
      let config = ReviewConfig::default();
      assert!(config.validate_credentials().is_err());

      let mut config = ReviewConfig::default();
      config.bitbucket_username = "bot".to_string();
      config.bitbucket_app_password = "secret".to_string();
      assert!(config.validate_credentials().is_ok());
   }
}
