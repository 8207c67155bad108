//! Core engine: decode -> correlate -> categorize -> emit, one line at a time.

use std::io::{self, BufRead, Read};

use crate::config::Config;
use crate::correlation::{self, CorrelationState, Resolution};
use crate::decode::LineDecoder;
use crate::emit::{self, EventSink};
use crate::error::EngineError;
use crate::types::{RunStats, TaggedEvent};

/// The request log engine. Holds the correlation state for one run.
pub struct Engine {
  config: Config,
  decoder: LineDecoder,
  state: CorrelationState,
  stats: RunStats,
}

impl Engine {
  pub fn new(config: Config) -> Self {
    let decoder = LineDecoder::new(config.default_offset());
    Self {
      config,
      decoder,
      state: CorrelationState::new(),
      stats: RunStats::default(),
    }
  }

  pub fn with_defaults() -> Self {
    Self::new(Config::default())
  }

  pub fn state(&self) -> &CorrelationState {
    &self.state
  }

  pub fn stats(&self) -> RunStats {
    self.stats
  }

  /// Process a single raw line (without its line terminator).
  ///
  /// Returns every tagged event the line produces; empty when the line is
  /// outside the grammar or cannot be attributed to an open request.
  pub fn process(&mut self, raw: &str) -> Vec<TaggedEvent> {
    let sequence = self.stats.lines_read;
    self.stats.lines_read += 1;

    let raw = raw.trim_end_matches(['\r', '\n']);
    if raw.len() > self.config.max_line_bytes {
      self.note_oversize(raw.len());
      return Vec::new();
    }

    let line = match self.decoder.decode(raw) {
      Some(line) => line,
      None => return Vec::new(),
    };
    self.stats.lines_decoded += 1;

    let request_id = match correlation::correlate(&mut self.state, &line) {
      Resolution::Dropped => {
        self.stats.lines_dropped += 1;
        return Vec::new();
      }
      Resolution::Started(id) => {
        tracing::debug!(request_id = %id, pid = %line.process_id, "request started");
        id
      }
      Resolution::Completed(id) => {
        tracing::debug!(request_id = %id, pid = %line.process_id, "request completed");
        id
      }
      Resolution::Continued(id) => id,
    };

    emit::assemble(&line, &request_id, sequence)
      .iter()
      .map(|event| event.tagged(&self.config))
      .collect()
  }

  /// Count a line that was skipped for exceeding `max_line_bytes`.
  fn skip_oversize(&mut self, bytes: usize) {
    self.stats.lines_read += 1;
    self.note_oversize(bytes);
  }

  fn note_oversize(&mut self, bytes: usize) {
    self.stats.lines_oversize += 1;
    tracing::debug!(bytes, limit = self.config.max_line_bytes, "skipping oversize line");
  }
}

/// Consume input up to and including the next `\n` without buffering it.
fn discard_line<R: BufRead>(reader: &mut R) -> io::Result<usize> {
  let mut discarded = 0;
  loop {
    let (used, done) = {
      let available = reader.fill_buf()?;
      if available.is_empty() {
        return Ok(discarded);
      }
      match available.iter().position(|b| *b == b'\n') {
        Some(i) => (i + 1, true),
        None => (available.len(), false),
      }
    };
    reader.consume(used);
    discarded += used;
    if done {
      return Ok(discarded);
    }
  }
}

/// Drive `reader` to exhaustion through `engine`, handing every event to `sink`.
///
/// Invalid UTF-8 is replaced rather than rejected. At most `max_line_bytes`
/// plus a `\r\n` terminator is buffered per line; the rest of a longer line is
/// discarded unread. Sink failures are logged and counted; only a failing read
/// ends the run early.
pub fn run<R: BufRead, S: EventSink>(
  engine: &mut Engine,
  mut reader: R,
  sink: &mut S,
) -> Result<RunStats, EngineError> {
  let limit = engine.config.max_line_bytes as u64 + 2;
  let mut buf = Vec::new();
  loop {
    buf.clear();
    let read = reader.by_ref().take(limit).read_until(b'\n', &mut buf)?;
    if read == 0 {
      break;
    }
    if read as u64 == limit && buf.last() != Some(&b'\n') {
      let rest = discard_line(&mut reader)?;
      engine.skip_oversize(read + rest);
      continue;
    }
    let raw = String::from_utf8_lossy(&buf);
    for event in engine.process(&raw) {
      engine.stats.events_emitted += 1;
      if let Err(e) = sink.accept(event) {
        engine.stats.sink_failures += 1;
        tracing::warn!(error = %e, "sink rejected event");
      }
    }
  }

  if let Err(e) = sink.flush() {
    tracing::warn!(error = %e, "sink flush failed");
  }
  Ok(engine.stats())
}
