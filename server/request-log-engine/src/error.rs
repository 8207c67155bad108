//! Structured error types for the request log engine.
//!
//! Unmatched lines, orphaned lines and uncategorized messages are not errors;
//! they never surface here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
  #[error("config: {field}: {reason}")]
  Config { field: String, reason: String },

  #[error("io: {0}")]
  Io(#[from] std::io::Error),

  #[error("json: {0}")]
  Json(#[from] serde_json::Error),

  #[error("sink: {0}")]
  Sink(String),
}

impl EngineError {
  pub fn config(field: &str, reason: &str) -> Self {
    Self::Config {
      field: field.to_string(),
      reason: reason.to_string(),
    }
  }

  pub fn sink(msg: impl Into<String>) -> Self {
    Self::Sink(msg.into())
  }
}
