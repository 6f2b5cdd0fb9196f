//! Bitbucket Cloud REST client (blocking, basic auth).

use std::{thread, time::Duration};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
   config::ReviewConfig,
   error::{ReviewError, Result},
   types::{Commit, CommentPayload, PrComment, PullRequest, Reaction},
};

/// Retry an API call with exponential backoff.
///
/// The closure returns `(retry, result)`: `(true, _)` asks for another attempt
/// (transient server error), `(false, Some(v))` is success. Hard failures are
/// returned as `Err` and retried until attempts run out.
pub fn retry_api_call<F, T>(config: &ReviewConfig, mut f: F) -> Result<T>
where
   F: FnMut() -> Result<(bool, Option<T>)>,
{
   let mut attempt = 0;

   loop {
      attempt += 1;

      match f() {
         Ok((false, Some(result))) => return Ok(result),
         Ok((false, None)) => {
            return Err(ReviewError::Other("API call failed without result".to_string()));
         },
         Ok((true, _)) if attempt < config.max_retries => {
            let backoff_ms = config.initial_backoff_ms * (1 << (attempt - 1));
            eprintln!("Retry {}/{} after {}ms...", attempt, config.max_retries, backoff_ms);
            thread::sleep(Duration::from_millis(backoff_ms));
         },
         Ok((true, _)) => {
            return Err(ReviewError::RetryExhausted {
               retries: config.max_retries,
               source:  Box::new(ReviewError::Other("Max retries exceeded".to_string())),
            });
         },
         Err(e) => {
            if attempt < config.max_retries {
               let backoff_ms = config.initial_backoff_ms * (1 << (attempt - 1));
               eprintln!(
                  "Error: {} - Retry {}/{} after {}ms...",
                  e, attempt, config.max_retries, backoff_ms
               );
               thread::sleep(Duration::from_millis(backoff_ms));
               continue;
            }
            return Err(e);
         },
      }
   }
}

/// Build HTTP client with timeouts from config.
pub fn build_client(config: &ReviewConfig) -> Result<reqwest::blocking::Client> {
   Ok(reqwest::blocking::Client::builder()
      .timeout(Duration::from_secs(config.request_timeout_secs))
      .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
      .build()?)
}

/// Client for the Bitbucket Cloud API.
pub struct BitbucketClient {
   client: reqwest::blocking::Client,
   config: ReviewConfig,
   base:   String,
}

enum Payload<'a> {
   None,
   Query(&'a [(&'a str, String)]),
   Json(&'a Value),
}

impl BitbucketClient {
   pub fn new(config: &ReviewConfig) -> Result<Self> {
      config.validate_credentials()?;
      Ok(Self {
         client: build_client(config)?,
         config: config.clone(),
         base:   config.bitbucket_base(),
      })
   }

   /// Get pull request information.
   pub fn get_pull_request(&self, repo_slug: &str, pr_id: u64) -> Result<PullRequest> {
      let url = format!("{}repositories/{repo_slug}/pullrequests/{pr_id}", self.base);
      let value = self.request_json("GET", &url, &Payload::None)?;
      Ok(serde_json::from_value(value)?)
   }

   /// Get the raw diff text for a pull request.
   pub fn get_pull_request_diff(&self, repo_slug: &str, pr_id: u64) -> Result<String> {
      let url = format!("{}repositories/{repo_slug}/pullrequests/{pr_id}/diff", self.base);
      self.request_text("GET", &url)
   }

   /// Get the content of a file at a ref (source branch); falls back to the
   /// repository default branch when `git_ref` is None.
   pub fn get_file_content(
      &self,
      repo_slug: &str,
      file_path: &str,
      git_ref: Option<&str>,
   ) -> Result<String> {
      let url = src_url(&self.base, repo_slug, file_path, git_ref);
      self.request_text("GET", &url)
   }

   /// List files in a directory. Only `commit_file` entries are returned.
   pub fn list_directory(
      &self,
      repo_slug: &str,
      directory_path: &str,
      git_ref: Option<&str>,
   ) -> Result<Vec<String>> {
      let url = src_url(&self.base, repo_slug, directory_path, git_ref);
      let response = self.request_json("GET", &url, &Payload::None)?;
      Ok(extract_file_paths(&response))
   }

   /// Get recent commit history for a file.
   pub fn get_file_commits(
      &self,
      repo_slug: &str,
      file_path: &str,
      limit: usize,
   ) -> Result<Vec<Commit>> {
      let url = format!("{}repositories/{repo_slug}/commits", self.base);
      let query = [("path", file_path.to_string()), ("limit", limit.to_string())];
      let response = self.request_json("GET", &url, &Payload::Query(&query))?;
      paged_values(response)
   }

   /// List all comments on a pull request.
   pub fn get_pr_comments(&self, repo_slug: &str, pr_id: u64) -> Result<Vec<PrComment>> {
      let url = format!("{}repositories/{repo_slug}/pullrequests/{pr_id}/comments", self.base);
      let response = self.request_json("GET", &url, &Payload::None)?;
      paged_values(response)
   }

   /// List emoji reactions on a single PR comment.
   pub fn get_comment_reactions(
      &self,
      repo_slug: &str,
      pr_id: u64,
      comment_id: u64,
   ) -> Result<Vec<Reaction>> {
      let url = format!(
         "{}repositories/{repo_slug}/pullrequests/{pr_id}/comments/{comment_id}/reactions",
         self.base
      );
      let response = self.request_json("GET", &url, &Payload::None)?;
      paged_values(response)
   }

   /// Post an inline comment on a pull request.
   pub fn post_comment(
      &self,
      repo_slug: &str,
      pr_id: u64,
      comment: &CommentPayload,
   ) -> Result<Value> {
      let url = format!("{}repositories/{repo_slug}/pullrequests/{pr_id}/comments", self.base);
      let body = serde_json::to_value(comment)?;
      self.request_json("POST", &url, &Payload::Json(&body))
   }

   fn request_json(&self, method: &str, url: &str, payload: &Payload<'_>) -> Result<Value> {
      retry_api_call(&self.config, || {
         let response = self.send(method, url, payload)?;
         match check_status(response)? {
            None => Ok((true, None)),
            Some(response) => Ok((false, Some(response.json::<Value>()?))),
         }
      })
   }

   fn request_text(&self, method: &str, url: &str) -> Result<String> {
      retry_api_call(&self.config, || {
         let response = self.send(method, url, &Payload::None)?;
         match check_status(response)? {
            None => Ok((true, None)),
            Some(response) => Ok((false, Some(response.text()?))),
         }
      })
   }

   fn send(
      &self,
      method: &str,
      url: &str,
      payload: &Payload<'_>,
   ) -> Result<reqwest::blocking::Response> {
      let mut builder = match method {
         "POST" => self.client.post(url),
         _ => self.client.get(url),
      };

      builder = builder
         .basic_auth(&self.config.bitbucket_username, Some(&self.config.bitbucket_app_password))
         .header("Accept", "application/json");

      builder = match payload {
         Payload::None => builder,
         Payload::Query(query) => builder.query(query),
         Payload::Json(body) => builder.json(body),
      };

      Ok(builder.send()?)
   }
}

/// Map HTTP status to retry/error/pass-through.
/// Returns Ok(None) for a retryable 5xx, the response for success.
fn check_status(response: reqwest::blocking::Response) -> Result<Option<reqwest::blocking::Response>> {
   let status = response.status();

   if status.is_server_error() {
      let error_text = response
         .text()
         .unwrap_or_else(|_| "Unknown error".to_string());
      eprintln!("Server error {status}: {error_text}");
      return Ok(None); // Retry
   }

   if !status.is_success() {
      let error_text = response
         .text()
         .unwrap_or_else(|_| "Unknown error".to_string());
      return Err(ReviewError::Api { status: status.as_u16(), body: error_text });
   }

   Ok(Some(response))
}

/// Source-browse URL: `src/{ref}/{path}` with the ref segment optional.
fn src_url(base: &str, repo_slug: &str, path: &str, git_ref: Option<&str>) -> String {
   match git_ref {
      Some(r) => format!("{base}repositories/{repo_slug}/src/{r}/{path}"),
      None => format!("{base}repositories/{repo_slug}/src/{path}"),
   }
}

/// Pull the `values` array out of a paged Bitbucket response.
fn paged_values<T: DeserializeOwned>(mut response: Value) -> Result<Vec<T>> {
   let values = response
      .get_mut("values")
      .map(Value::take)
      .unwrap_or_else(|| Value::Array(Vec::new()));
   Ok(serde_json::from_value(values)?)
}

fn extract_file_paths(response: &Value) -> Vec<String> {
   response["values"]
      .as_array()
      .map(|items| {
         items
            .iter()
            .filter(|item| item["type"] == "commit_file")
            .filter_map(|item| item["path"].as_str().map(String::from))
            .collect()
      })
      .unwrap_or_default()
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_src_url_with_ref() {
      let url = src_url("https://api.bitbucket.org/2.0/", "ws/repo", "src/app.py", Some("feature"));
      assert_eq!(url, "https://api.bitbucket.org/2.0/repositories/ws/repo/src/feature/src/app.py");
   }

   #[test]
   fn test_src_url_without_ref() {
      let url = src_url("https://api.bitbucket.org/2.0/", "ws/repo", "src/app.py", None);
      assert_eq!(url, "https://api.bitbucket.org/2.0/repositories/ws/repo/src/src/app.py");
   }

   #[test]
   fn test_extract_file_paths_filters_directories() {
      let response = serde_json::json!({
         "values": [
            {"type": "commit_file", "path": "src/app.py"},
            {"type": "commit_directory", "path": "src/nested"},
            {"type": "commit_file", "path": "src/util.py"}
         ]
      });
      let paths = extract_file_paths(&response);
      assert_eq!(paths, vec!["src/app.py", "src/util.py"]);
   }

   #[test]
   fn test_extract_file_paths_empty_response() {
      assert!(extract_file_paths(&serde_json::json!({})).is_empty());
   }

   #[test]
   fn test_paged_values_missing_key() {
      let commits: Vec<Commit> = paged_values(serde_json::json!({})).unwrap();
      assert!(commits.is_empty());
   }

   #[test]
   fn test_paged_values_deserializes_commits() {
      let response = serde_json::json!({
         "values": [
            {"hash": "abc123", "message": "fixed bounds check", "date": "2024-05-01T10:00:00+00:00"},
            {"hash": "def456"}
         ]
      });
      let commits: Vec<Commit> = paged_values(response).unwrap();
      assert_eq!(commits.len(), 2);
      assert_eq!(commits[0].hash, "abc123");
      assert!(commits[1].message.is_empty());
   }

   #[test]
   fn test_retry_api_call_succeeds_first_try() {
      let config = ReviewConfig::default();
      let result = retry_api_call(&config, || Ok((false, Some(42))));
      assert_eq!(result.unwrap(), 42);
   }

   #[test]
   fn test_retry_api_call_exhausts_retries() {
      let mut config = ReviewConfig::default();
      config.max_retries = 2;
      config.initial_backoff_ms = 1;

      let mut calls = 0;
      let result: Result<u32> = retry_api_call(&config, || {
         calls += 1;
         Ok((true, None))
      });
      assert!(matches!(result, Err(ReviewError::RetryExhausted { retries: 2, .. })));
      assert_eq!(calls, 2);
   }

   #[test]
   fn test_retry_api_call_recovers_after_error() {
      let mut config = ReviewConfig::default();
      config.initial_backoff_ms = 1;

      let mut calls = 0;
      let result = retry_api_call(&config, || {
         calls += 1;
         if calls < 3 {
            Err(ReviewError::Other("transient".to_string()))
         } else {
            Ok((false, Some("ok")))
         }
      });
      assert_eq!(result.unwrap(), "ok");
      assert_eq!(calls, 3);
   }
}
