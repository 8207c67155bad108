//! Request log correlation engine.
//!
//! Turns interleaved, line-oriented application-server log text into
//! per-request structured events: request start, controller dispatch,
//! parameters, categorized timings and completion status, each tagged for a
//! downstream log pipeline.
//!
//! Single forward pass; the only state is the per-pid correlation map.

pub mod categorize;
pub mod config;
pub mod correlation;
pub mod decode;
pub mod emit;
pub mod engine;
pub mod error;
pub mod request_id;
pub mod types;

pub use config::Config;
pub use correlation::{CorrelationState, Resolution};
pub use emit::{EventSink, JsonLinesSink};
pub use engine::{run, Engine};
pub use error::EngineError;
pub use types::{DecodedLine, Event, EventKind, RunStats, TaggedEvent, Timing};
