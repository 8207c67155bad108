//! Event assembly and sinks.
//!
//! A correlated line becomes either structured events (request start,
//! controller dispatch, parameters, completion) or a generic log event plus an
//! optional embedded timing. All events of one line share its request id,
//! severity and timestamp.

use std::io::Write;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::categorize;
use crate::error::EngineError;
use crate::types::{DecodedLine, Event, EventKind, TaggedEvent};

struct MessageRule {
  name: &'static str,
  pattern: Regex,
  extract: fn(&Captures<'_>) -> Option<Vec<EventKind>>,
}

impl MessageRule {
  fn new(
    name: &'static str,
    pattern: &str,
    extract: fn(&Captures<'_>) -> Option<Vec<EventKind>>,
  ) -> Self {
    Self {
      name,
      pattern: Regex::new(pattern).expect("message rule regex"),
      extract,
    }
  }
}

static MESSAGE_RULES: Lazy<Vec<MessageRule>> = Lazy::new(|| {
  vec![
    MessageRule::new(
      "request_started",
      r#"^Started (?P<method>[A-Z]+) "(?P<path>[^"]*)" for "#,
      |c| {
        Some(vec![EventKind::RequestStarted {
          http_method: c["method"].to_string(),
          http_path_query: c["path"].to_string(),
        }])
      },
    ),
    MessageRule::new(
      "controller_action",
      r"^\s*Processing by (?P<controller>[^#\s]+)#(?P<action>[^\s]+)(?:\s|$)",
      |c| {
        Some(vec![EventKind::ControllerAction {
          controller: c["controller"].to_string(),
          action: c["action"].to_string(),
        }])
      },
    ),
    MessageRule::new("parameters", r"^\s*Parameters: (?P<params>.*)$", |c| {
      Some(vec![EventKind::Parameters {
        raw_params_text: c["params"].to_string(),
      }])
    }),
    MessageRule::new(
      "request_completed",
      r"^Completed (?P<status>\d{3}) .*?\bin (?P<ms>\d+(?:\.\d+)?)ms(?: \((?P<breakdown>.*)\))?",
      |c| {
        let duration_ms = c["ms"].parse::<f64>().ok()?;
        let mut kinds = vec![EventKind::Status {
          http_status: c["status"].to_string(),
          duration_ms,
        }];
        if let Some(summary) = c.name("breakdown") {
          kinds.extend(
            categorize::breakdown(summary.as_str())
              .into_iter()
              .map(EventKind::Duration),
          );
        }
        Some(kinds)
      },
    ),
  ]
});

fn structured_kinds(message: &str) -> Option<Vec<EventKind>> {
  MESSAGE_RULES.iter().find_map(|rule| {
    let caps = rule.pattern.captures(message)?;
    let kinds = (rule.extract)(&caps)?;
    tracing::trace!(rule = rule.name, events = kinds.len(), "structured line");
    Some(kinds)
  })
}

fn generic_kinds(message: &str, line_key: String) -> Vec<EventKind> {
  let timing = categorize::categorize(message);
  let mut kinds = vec![EventKind::GenericLog {
    message: message.to_string(),
    line_key: line_key.clone(),
  }];
  if let Some(timing) = timing {
    kinds.push(EventKind::LogDuration {
      message: message.to_string(),
      line_key,
      timing,
    });
  }
  kinds
}

/// Key pairing the generic events of one line; distinct for repeated identical lines.
pub fn line_key(sequence: u64, line: &DecodedLine) -> String {
  let mut hasher = blake3::Hasher::new();
  hasher.update(&sequence.to_be_bytes());
  hasher.update(b"|");
  hasher.update(line.process_id.as_bytes());
  hasher.update(b"|");
  hasher.update(line.message.as_bytes());
  let hex = hasher.finalize().to_hex();
  hex[..16].to_string()
}

/// Build every event a correlated line produces.
///
/// `sequence` is the line's position in the run and only feeds `line_key`.
pub fn assemble(line: &DecodedLine, request_id: &str, sequence: u64) -> Vec<Event> {
  let kinds = match structured_kinds(&line.message) {
    Some(kinds) => kinds,
    None => generic_kinds(&line.message, line_key(sequence, line)),
  };

  kinds
    .into_iter()
    .map(|kind| Event {
      request_id: request_id.to_string(),
      timestamp: line.timestamp,
      severity: line.severity.clone(),
      kind,
    })
    .collect()
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Receiver of finished events. Delivery failures are reported, never retried here.
pub trait EventSink {
  fn accept(&mut self, event: TaggedEvent) -> Result<(), EngineError>;

  fn flush(&mut self) -> Result<(), EngineError> {
    Ok(())
  }
}

impl EventSink for Vec<TaggedEvent> {
  fn accept(&mut self, event: TaggedEvent) -> Result<(), EngineError> {
    self.push(event);
    Ok(())
  }
}

/// One JSON object per line: `{"time": .., "tag": .., "record": {..}}`.
pub struct JsonLinesSink<W: Write> {
  out: W,
}

impl<W: Write> JsonLinesSink<W> {
  pub fn new(out: W) -> Self {
    Self { out }
  }

  pub fn into_inner(self) -> W {
    self.out
  }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
  fn accept(&mut self, event: TaggedEvent) -> Result<(), EngineError> {
    serde_json::to_writer(&mut self.out, &event)
      .map_err(|e| EngineError::sink(format!("{} event: {}", event.tag, e)))?;
    writeln!(self.out).map_err(|e| EngineError::sink(format!("{} event: {}", event.tag, e)))?;
    Ok(())
  }

  fn flush(&mut self) -> Result<(), EngineError> {
    self.out.flush().map_err(|e| EngineError::sink(format!("flush: {}", e)))
  }
}
