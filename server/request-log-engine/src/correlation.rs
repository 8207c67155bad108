//! Attribute decoded lines to open requests.
//!
//! Worker processes interleave their output in one stream and pids get reused
//! across unrelated requests, so a line is only kept when the request it points
//! at is demonstrably open: started and not yet completed.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::request_id;
use crate::types::DecodedLine;

static REQUEST_START: Lazy<Regex> =
  Lazy::new(|| Regex::new(r#"^Started [A-Z]+ "[^"]*" for "#).expect("request start regex"));

static REQUEST_COMPLETION: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^Completed \d{3} ").expect("request completion regex"));

pub fn is_request_start(message: &str) -> bool {
  REQUEST_START.is_match(message)
}

pub fn is_request_completion(message: &str) -> bool {
  REQUEST_COMPLETION.is_match(message)
}

/// Per-run correlation state. Owned by the driver, mutated only by [`correlate`].
#[derive(Debug, Clone, Default)]
pub struct CorrelationState {
  /// Most recently started request id per pid.
  pid_to_request_id: HashMap<String, String>,
  /// Ids started and not yet completed.
  open_request_ids: HashSet<String>,
  /// Number of ids synthesized so far; feeds id entropy.
  synthesized: u64,
}

impl CorrelationState {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn request_for_pid(&self, process_id: &str) -> Option<&str> {
    self.pid_to_request_id.get(process_id).map(String::as_str)
  }

  pub fn is_open(&self, request_id: &str) -> bool {
    self.open_request_ids.contains(request_id)
  }

  pub fn open_count(&self) -> usize {
    self.open_request_ids.len()
  }

  pub fn tracked_pids(&self) -> usize {
    self.pid_to_request_id.len()
  }
}

/// Outcome of correlating one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
  /// Request-start line; the id is now open.
  Started(String),
  /// Mid-request line of an open request.
  Continued(String),
  /// Completion line; the id has been closed.
  Completed(String),
  /// Cannot be attributed to any open request.
  Dropped,
}

impl Resolution {
  pub fn request_id(&self) -> Option<&str> {
    match self {
      Self::Started(id) | Self::Continued(id) | Self::Completed(id) => Some(id),
      Self::Dropped => None,
    }
  }
}

/// Resolve the request a decoded line belongs to, updating `state`.
pub fn correlate(state: &mut CorrelationState, line: &DecodedLine) -> Resolution {
  let candidate = line
    .explicit_request_id
    .clone()
    .or_else(|| state.pid_to_request_id.get(&line.process_id).cloned());

  if is_request_start(&line.message) {
    let request_id = match candidate {
      Some(id) => id,
      None => {
        let id = request_id::synthesize(&line.timestamp, &line.process_id, state.synthesized);
        state.synthesized += 1;
        id
      }
    };
    if !state.open_request_ids.insert(request_id.clone()) {
      tracing::debug!(request_id = %request_id, pid = %line.process_id, "start line for already open request");
    }
    state
      .pid_to_request_id
      .insert(line.process_id.clone(), request_id.clone());
    return Resolution::Started(request_id);
  }

  let request_id = match candidate {
    Some(id) if state.open_request_ids.contains(&id) => id,
    stale => {
      state.pid_to_request_id.remove(&line.process_id);
      tracing::trace!(pid = %line.process_id, request_id = ?stale, "dropping orphaned line");
      return Resolution::Dropped;
    }
  };

  if is_request_completion(&line.message) {
    state.open_request_ids.remove(&request_id);
    state.pid_to_request_id.remove(&line.process_id);
    return Resolution::Completed(request_id);
  }

  Resolution::Continued(request_id)
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::{TimeZone, Utc};

  const RID: &str = "0f3a9c1e-5b2d-4e8f-9a7b-1c2d3e4f5a6b";

  fn line(pid: &str, request_id: Option<&str>, message: &str) -> DecodedLine {
    DecodedLine {
      severity: "INFO".into(),
      process_id: pid.into(),
      timestamp: Utc.with_ymd_and_hms(2020, 12, 20, 10, 47, 36).unwrap(),
      explicit_request_id: request_id.map(String::from),
      message: message.into(),
    }
  }

  const START: &str = "Started GET \"/foos\" for 127.0.0.1 at 2020-12-20 19:47:36 +0900";
  const DONE: &str = "Completed 200 OK in 17ms (Views: 11.9ms)";

  #[test]
  fn start_without_id_synthesizes_and_opens() {
    let mut state = CorrelationState::new();
    let res = correlate(&mut state, &line("1", None, START));
    let id = res.request_id().unwrap().to_string();
    assert!(matches!(res, Resolution::Started(_)));
    assert!(state.is_open(&id));
    assert_eq!(state.request_for_pid("1"), Some(id.as_str()));
    assert_eq!(
      request_id::embedded_millis(&id),
      Some(Utc.with_ymd_and_hms(2020, 12, 20, 10, 47, 36).unwrap().timestamp_millis() as u64)
    );
  }

  #[test]
  fn mid_request_lines_follow_pid_mapping() {
    let mut state = CorrelationState::new();
    let id = correlate(&mut state, &line("1", None, START)).request_id().unwrap().to_string();
    let res = correlate(&mut state, &line("1", None, "Processing by FoosController#index as HTML"));
    assert_eq!(res, Resolution::Continued(id));
  }

  #[test]
  fn start_on_busy_pid_continues_open_request() {
    let mut state = CorrelationState::new();
    let id = correlate(&mut state, &line("1", None, START)).request_id().unwrap().to_string();
    assert_eq!(correlate(&mut state, &line("1", None, START)), Resolution::Started(id.clone()));
    assert_eq!(state.open_count(), 1);
    assert_eq!(state.request_for_pid("1"), Some(id.as_str()));
    assert_eq!(correlate(&mut state, &line("1", None, DONE)), Resolution::Completed(id));
    assert_eq!(state.open_count(), 0);
  }

  #[test]
  fn completion_closes_request_and_forgets_pid() {
    let mut state = CorrelationState::new();
    let id = correlate(&mut state, &line("1", None, START)).request_id().unwrap().to_string();
    assert_eq!(correlate(&mut state, &line("1", None, DONE)), Resolution::Completed(id.clone()));
    assert!(!state.is_open(&id));
    assert_eq!(state.request_for_pid("1"), None);
    assert_eq!(correlate(&mut state, &line("1", None, "  Rendered x (0.1ms)")), Resolution::Dropped);
  }

  #[test]
  fn explicit_id_never_opened_is_dropped() {
    let mut state = CorrelationState::new();
    assert_eq!(correlate(&mut state, &line("1", Some(RID), "hello")), Resolution::Dropped);
    assert_eq!(state.tracked_pids(), 0);
  }

  #[test]
  fn explicit_id_wins_over_pid_mapping() {
    let mut state = CorrelationState::new();
    correlate(&mut state, &line("1", Some(RID), START));
    let other = "11111111-2222-3333-4444-555555555555";
    correlate(&mut state, &line("2", Some(other), START));
    assert_eq!(
      correlate(&mut state, &line("1", Some(other), "hello")),
      Resolution::Continued(other.to_string())
    );
  }

  #[test]
  fn stale_mapping_is_forgotten_on_drop() {
    let mut state = CorrelationState::new();
    correlate(&mut state, &line("1", Some(RID), START));
    correlate(&mut state, &line("2", Some(RID), DONE));
    // pid 1 still maps to the closed id until a line on it is dropped
    assert_eq!(state.request_for_pid("1"), Some(RID));
    assert_eq!(correlate(&mut state, &line("1", None, "late")), Resolution::Dropped);
    assert_eq!(state.request_for_pid("1"), None);
  }

  #[test]
  fn interleaved_pids_stay_separate() {
    let mut state = CorrelationState::new();
    let a = correlate(&mut state, &line("1", None, START)).request_id().unwrap().to_string();
    let b = correlate(&mut state, &line("2", None, START)).request_id().unwrap().to_string();
    assert_ne!(a, b);
    assert_eq!(correlate(&mut state, &line("2", None, "x")), Resolution::Continued(b.clone()));
    assert_eq!(correlate(&mut state, &line("1", None, "y")), Resolution::Continued(a.clone()));
    assert_eq!(correlate(&mut state, &line("1", None, DONE)), Resolution::Completed(a));
    assert_eq!(correlate(&mut state, &line("2", None, "z")), Resolution::Continued(b));
    assert_eq!(state.open_count(), 1);
  }

  #[test]
  fn explicit_id_reopens_after_completion() {
    let mut state = CorrelationState::new();
    correlate(&mut state, &line("1", Some(RID), START));
    correlate(&mut state, &line("1", Some(RID), DONE));
    assert_eq!(
      correlate(&mut state, &line("3", Some(RID), START)),
      Resolution::Started(RID.to_string())
    );
    assert!(state.is_open(RID));
    assert_eq!(state.request_for_pid("3"), Some(RID));
  }

  #[test]
  fn start_and_completion_patterns() {
    assert!(is_request_start(START));
    assert!(!is_request_start("  Started GET \"/\" for x"));
    assert!(is_request_completion(DONE));
    assert!(!is_request_completion("Completed OK"));
  }
}
