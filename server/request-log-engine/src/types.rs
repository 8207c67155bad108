//! Core types for the request log engine (decoded lines, events, output contract).

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::Config;

// ---------------------------------------------------------------------------
// Decoded input
// ---------------------------------------------------------------------------

/// One input line that matched the log line grammar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedLine {
  pub severity: String,
  pub process_id: String,
  pub timestamp: DateTime<Utc>,
  pub explicit_request_id: Option<String>,
  /// Free text with terminal color sequences removed.
  pub message: String,
}

// ---------------------------------------------------------------------------
// Timed sub-operations
// ---------------------------------------------------------------------------

/// A categorized duration measurement found in a message.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
  pub category: String,
  pub target: Option<String>,
  pub duration_ms: f64,
}

impl Timing {
  pub fn new(category: impl Into<String>, target: Option<String>, duration_ms: f64) -> Self {
    Self {
      category: category.into(),
      target,
      duration_ms,
    }
  }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
  RequestStarted {
    http_method: String,
    http_path_query: String,
  },
  ControllerAction {
    controller: String,
    action: String,
  },
  Parameters {
    raw_params_text: String,
  },
  Status {
    http_status: String,
    duration_ms: f64,
  },
  /// One entry of a completion summary breakdown.
  Duration(Timing),
  GenericLog {
    message: String,
    line_key: String,
  },
  /// Timing embedded in a generic log line.
  LogDuration {
    message: String,
    line_key: String,
    timing: Timing,
  },
}

impl EventKind {
  /// Tag suffix identifying the kind to downstream consumers.
  pub fn tag_suffix(&self) -> &'static str {
    match self {
      Self::RequestStarted { .. } => "requests",
      Self::ControllerAction { .. } => "controller_actions",
      Self::Parameters { .. } => "parameters",
      Self::Status { .. } => "statuses",
      Self::Duration(_) => "durations",
      Self::GenericLog { .. } => "logs",
      Self::LogDuration { .. } => "log_durations",
    }
  }
}

/// A correlated, self-contained record produced from one input line.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
  pub request_id: String,
  /// Timestamp of the originating line, never processing time.
  pub timestamp: DateTime<Utc>,
  pub severity: String,
  pub kind: EventKind,
}

impl Event {
  /// Flat key/value record for the sink.
  pub fn record(&self) -> Map<String, Value> {
    let mut record = Map::new();
    record.insert("request_id".into(), Value::from(self.request_id.as_str()));
    record.insert("severity".into(), Value::from(self.severity.as_str()));

    match &self.kind {
      EventKind::RequestStarted {
        http_method,
        http_path_query,
      } => {
        record.insert("http_method".into(), Value::from(http_method.as_str()));
        record.insert("http_path_query".into(), Value::from(http_path_query.as_str()));
      }
      EventKind::ControllerAction { controller, action } => {
        record.insert("controller".into(), Value::from(controller.as_str()));
        record.insert("action".into(), Value::from(action.as_str()));
      }
      EventKind::Parameters { raw_params_text } => {
        record.insert("parameters".into(), Value::from(raw_params_text.as_str()));
      }
      EventKind::Status {
        http_status,
        duration_ms,
      } => {
        record.insert("http_status".into(), Value::from(http_status.as_str()));
        record.insert("duration_ms".into(), millis_value(*duration_ms));
      }
      EventKind::Duration(timing) => insert_timing(&mut record, timing),
      EventKind::GenericLog { message, line_key } => {
        record.insert("message".into(), Value::from(message.as_str()));
        record.insert("line_key".into(), Value::from(line_key.as_str()));
      }
      EventKind::LogDuration {
        message,
        line_key,
        timing,
      } => {
        record.insert("message".into(), Value::from(message.as_str()));
        record.insert("line_key".into(), Value::from(line_key.as_str()));
        insert_timing(&mut record, timing);
      }
    }

    record
  }

  pub fn tagged(&self, config: &Config) -> TaggedEvent {
    TaggedEvent {
      time: self.timestamp,
      tag: config.tag(self.kind.tag_suffix()),
      record: self.record(),
    }
  }
}

fn insert_timing(record: &mut Map<String, Value>, timing: &Timing) {
  record.insert("category".into(), Value::from(timing.category.as_str()));
  if let Some(target) = &timing.target {
    record.insert("target".into(), Value::from(target.as_str()));
  }
  record.insert("duration_ms".into(), millis_value(timing.duration_ms));
}

/// Whole milliseconds serialize as integers (`17`), the rest as floats (`11.9`).
pub fn millis_value(ms: f64) -> Value {
  if ms.is_finite() && ms.fract() == 0.0 && ms.abs() < 9_007_199_254_740_992.0 {
    Value::from(ms as i64)
  } else {
    Value::from(ms)
  }
}

// ---------------------------------------------------------------------------
// Output contract (what the sink receives)
// ---------------------------------------------------------------------------

/// `(timestamp, tag, record)` tuple handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaggedEvent {
  #[serde(serialize_with = "serialize_nanos")]
  pub time: DateTime<Utc>,
  pub tag: String,
  pub record: Map<String, Value>,
}

impl TaggedEvent {
  pub fn get_str(&self, key: &str) -> Option<&str> {
    self.record.get(key).and_then(Value::as_str)
  }
}

fn serialize_nanos<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
  s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
  pub lines_read: u64,
  pub lines_decoded: u64,
  pub lines_dropped: u64,
  pub lines_oversize: u64,
  pub events_emitted: u64,
  pub sink_failures: u64,
}
