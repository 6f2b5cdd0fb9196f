//! Token counting for prompt budgeting.
//!
//! Uses tiktoken when the configured model has a known encoding, otherwise
//! falls back to a character estimate (4 chars ≈ 1 token).

use std::fmt;

use tiktoken_rs::{CoreBPE, get_bpe_from_model};

use crate::config::ReviewConfig;

/// Create a `TokenCounter` for the configured reviewer model.
pub fn create_token_counter(config: &ReviewConfig) -> TokenCounter {
   TokenCounter::new(&config.reviewer_model)
}

pub struct TokenCounter {
   model:    String,
   tiktoken: Option<CoreBPE>,
}

impl fmt::Debug for TokenCounter {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("TokenCounter")
         .field("model", &self.model)
         .field("has_tiktoken", &self.tiktoken.is_some())
         .finish_non_exhaustive()
   }
}

impl TokenCounter {
   pub fn new(model: &str) -> Self {
      Self { model: model.to_string(), tiktoken: get_bpe_from_model(model).ok() }
   }

   /// Count tokens for a text string (tiktoken or char estimate).
   pub fn count(&self, text: &str) -> usize {
      if let Some(ref encoder) = self.tiktoken {
         encoder.encode_with_special_tokens(text).len()
      } else {
         text.len() / 4
      }
   }

   /// Truncate text to roughly fit a token budget, cutting on a line
   /// boundary so code snippets stay readable.
   pub fn truncate_to_budget(&self, text: &str, max_tokens: usize) -> String {
      if self.count(text) <= max_tokens {
         return text.to_string();
      }

      let mut kept = String::new();
      for line in text.lines() {
         if self.count(&kept) + self.count(line) + 1 > max_tokens {
            break;
         }
         kept.push_str(line);
         kept.push('\n');
      }
      kept.push_str("... (truncated)");
      kept
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_char_estimate_for_unknown_model() {
      let counter = TokenCounter::new("not-a-real-model-name");
      assert_eq!(counter.count("abcdefgh"), 2);
   }

   #[test]
   fn test_tiktoken_for_known_model() {
      let counter = TokenCounter::new("gpt-4");
      // Exact count depends on the encoding; it must at least be non-zero
      // and differ from raw length for a normal sentence.
      let count = counter.count("fn main() { println!(\"hello\"); }");
      assert!(count > 0);
   }

   #[test]
   fn test_truncate_within_budget_is_identity() {
      let counter = TokenCounter::new("unknown");
      let text = "short text";
      assert_eq!(counter.truncate_to_budget(text, 100), text);
   }

   #[test]
   fn test_truncate_cuts_on_line_boundary() {
      let counter = TokenCounter::new("unknown");
      let text = "line one is here\n".repeat(50);
      let truncated = counter.truncate_to_budget(&text, 20);
      assert!(truncated.ends_with("... (truncated)"));
      assert!(truncated.len() < text.len());
      // No partial line before the marker.
      let body = truncated.trim_end_matches("... (truncated)");
      assert!(body.lines().all(|l| l.is_empty() || l == "line one is here"));
   }
}
