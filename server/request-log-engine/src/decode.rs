//! Line decoder: raw text line -> `DecodedLine`.
//!
//! Grammar (one line):
//!
//! ```text
//! I, [2020-12-20T19:47:36.123456 #12345]  INFO -- : [0f3a...-...] Started GET "/" for ...
//! ^  ^timestamp                  ^pid    ^severity  ^optional request id  ^message
//! ```
//!
//! Lines that do not match are skipped by the caller; there is no error path.

use std::borrow::Cow;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::types::DecodedLine;

static LINE: Lazy<Regex> = Lazy::new(|| {
  Regex::new(
    r"^., \[(?P<time>\S+) #(?P<pid>\d+)\] +(?P<severity>\S+) -- :(?: \[(?P<request_id>[[:xdigit:]]{8}-[[:xdigit:]]{4}-[[:xdigit:]]{4}-[[:xdigit:]]{4}-[[:xdigit:]]{12})\])? (?P<message>[^\n]*)",
  )
  .expect("line grammar regex")
});

/// CSI color/erase sequences: ESC `[` params `m` | `K`.
static ANSI_ESCAPE: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"\x1b\[[0-9;]*[mK]").expect("ansi escape regex"));

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"];

/// Decoder bound to the zone used for timestamps written without an offset.
#[derive(Debug, Clone, Copy)]
pub struct LineDecoder {
  default_offset: FixedOffset,
}

impl Default for LineDecoder {
  fn default() -> Self {
    Self::new(Utc.fix())
  }
}

impl LineDecoder {
  pub fn new(default_offset: FixedOffset) -> Self {
    Self { default_offset }
  }

  /// Decode one raw line. `None` means the line is not part of the grammar.
  pub fn decode(&self, raw: &str) -> Option<DecodedLine> {
    let caps = LINE.captures(raw)?;
    let time = &caps["time"];
    let timestamp = match parse_timestamp(time, self.default_offset) {
      Some(ts) => ts,
      None => {
        tracing::trace!(time, "unparseable timestamp, skipping line");
        return None;
      }
    };

    Some(DecodedLine {
      severity: caps["severity"].to_string(),
      process_id: caps["pid"].to_string(),
      timestamp,
      explicit_request_id: caps.name("request_id").map(|m| m.as_str().to_string()),
      message: strip_ansi(&caps["message"]).into_owned(),
    })
  }
}

/// Remove terminal color sequences. Borrows when there is nothing to strip.
pub fn strip_ansi(input: &str) -> Cow<'_, str> {
  if !input.contains('\x1b') {
    return Cow::Borrowed(input);
  }
  ANSI_ESCAPE.replace_all(input, "")
}

/// RFC 3339 with offset, or a zone-less local time interpreted in `default_offset`.
pub fn parse_timestamp(raw: &str, default_offset: FixedOffset) -> Option<DateTime<Utc>> {
  if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
    return Some(ts.with_timezone(&Utc));
  }
  NAIVE_FORMATS.iter().find_map(|fmt| {
    let naive = NaiveDateTime::parse_from_str(raw, fmt).ok()?;
    default_offset
      .from_local_datetime(&naive)
      .single()
      .map(|ts| ts.with_timezone(&Utc))
  })
}
