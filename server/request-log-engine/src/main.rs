//! Binary entrypoint: read application-server log lines, write tagged JSON lines to stdout.
//!
//! Input is every file named on the command line, in order, or stdin when none
//! are given. All inputs share one correlation state. Diagnostics go to stderr.

use std::fs::File;
use std::io::{self, BufReader, BufWriter};

use request_log_engine::{run, Config, Engine, EngineError, JsonLinesSink};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_logging() {
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "request_log_engine=info".into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
    .init();
}

fn main() {
  init_logging();
  if let Err(e) = run_binary() {
    error!("request-log-engine: {}", e);
    std::process::exit(1);
  }
}

fn run_binary() -> Result<(), EngineError> {
  let config = Config::from_env();
  config.validate()?;
  info!(
    tag_prefix = %config.tag_prefix,
    utc_offset_secs = config.default_utc_offset_secs,
    max_line_bytes = config.max_line_bytes,
    "starting"
  );

  let mut engine = Engine::new(config);
  let stdout = io::stdout();
  let mut sink = JsonLinesSink::new(BufWriter::new(stdout.lock()));

  let paths: Vec<String> = std::env::args().skip(1).collect();
  if paths.is_empty() {
    run(&mut engine, io::stdin().lock(), &mut sink)?;
  } else {
    for path in &paths {
      info!(path = %path, "reading");
      let file = File::open(path)?;
      run(&mut engine, BufReader::new(file), &mut sink)?;
    }
  }

  let stats = engine.stats();
  info!(
    lines_read = stats.lines_read,
    lines_decoded = stats.lines_decoded,
    lines_dropped = stats.lines_dropped,
    lines_oversize = stats.lines_oversize,
    events_emitted = stats.events_emitted,
    sink_failures = stats.sink_failures,
    open_requests = engine.state().open_count(),
    "finished"
  );
  Ok(())
}
