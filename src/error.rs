use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
   #[error("Malformed diff: {0}")]
   DiffFormat(String),

   #[error("API request failed (HTTP {status}): {body}")]
   Api { status: u16, body: String },

   #[error("API call failed after {retries} retries: {source}")]
   RetryExhausted {
      retries: u32,
      #[source]
      source:  Box<Self>,
   },

   #[error("Invalid severity: {0}")]
   InvalidSeverity(String),

   #[error("Configuration error: {0}")]
   Config(String),

   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   #[error("JSON error: {0}")]
   Json(#[from] serde_json::Error),

   #[error("HTTP error: {0}")]
   Http(#[from] reqwest::Error),

   #[error("{0}")]
   Other(String),
}

pub type Result<T> = std::result::Result<T, ReviewError>;
