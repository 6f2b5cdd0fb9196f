//! Pull request review assistant library
//!
//! This library fetches pull request diffs from Bitbucket, reviews the
//! changed lines with an LLM via an OpenAI-compatible API, and posts the
//! findings back as inline comments. Reviewer quality feeds back through
//! emoji reactions collected into training data.
pub mod bitbucket;
pub mod config;
pub mod context;
pub mod diff;
pub mod error;
pub mod feedback;
pub mod finetune;
pub mod format;
pub mod review;
pub mod style;
pub mod templates;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use config::ReviewConfig;
pub use error::{ReviewError, Result};
pub use types::{ReviewComment, Severity};
