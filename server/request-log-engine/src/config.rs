//! Engine configuration with sane defaults and environment overrides.

use chrono::{FixedOffset, Offset, Utc};

use crate::error::EngineError;

/// Default cap on a single input line (1 MiB).
pub const DEFAULT_MAX_LINE_BYTES: usize = 1_048_576;

const MAX_OFFSET_SECS: i32 = 86_399;

/// Tunables for decoding and tagging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
  /// Namespace of every emitted tag: `<tag_prefix>.<kind>`.
  pub tag_prefix: String,
  /// Offset applied to timestamps written without a zone.
  pub default_utc_offset_secs: i32,
  /// Lines longer than this are skipped undecoded.
  pub max_line_bytes: usize,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      tag_prefix: "finish".to_string(),
      default_utc_offset_secs: 0,
      max_line_bytes: DEFAULT_MAX_LINE_BYTES,
    }
  }
}

impl Config {
  /// Defaults overridden by `REQUEST_LOG_*` environment variables.
  ///
  /// Unparseable numeric values fall back to the default.
  pub fn from_env() -> Self {
    let defaults = Self::default();
    Self {
      tag_prefix: std::env::var("REQUEST_LOG_TAG_PREFIX").unwrap_or(defaults.tag_prefix),
      default_utc_offset_secs: std::env::var("REQUEST_LOG_UTC_OFFSET_SECS")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(defaults.default_utc_offset_secs),
      max_line_bytes: std::env::var("REQUEST_LOG_MAX_LINE_BYTES")
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(defaults.max_line_bytes),
    }
  }

  pub fn validate(&self) -> Result<(), EngineError> {
    if self.tag_prefix.is_empty() {
      return Err(EngineError::config("tag_prefix", "must not be empty"));
    }
    if self.tag_prefix.starts_with('.') || self.tag_prefix.ends_with('.') {
      return Err(EngineError::config(
        "tag_prefix",
        "must not start or end with '.'",
      ));
    }
    if self.default_utc_offset_secs.abs() > MAX_OFFSET_SECS {
      return Err(EngineError::config(
        "default_utc_offset_secs",
        "must be within +/-86399 seconds",
      ));
    }
    if self.max_line_bytes == 0 {
      return Err(EngineError::config("max_line_bytes", "must be greater than zero"));
    }
    Ok(())
  }

  /// Zone used for timestamps that do not carry one. Out-of-range values fall back to UTC.
  pub fn default_offset(&self) -> FixedOffset {
    FixedOffset::east_opt(self.default_utc_offset_secs).unwrap_or_else(|| Utc.fix())
  }

  pub fn tag(&self, kind: &str) -> String {
    format!("{}.{}", self.tag_prefix, kind)
  }
}
