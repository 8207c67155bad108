//! Request id synthesis for start lines that carry no explicit id.
//!
//! Ids are UUIDv7: the leading 48 bits are the line's unix milliseconds, so ids
//! sort by start time. The remaining bits come from a blake3 digest of the full
//! nanosecond timestamp, the pid and a per-run sequence number, which keeps
//! same-millisecond starts distinct while replaying the same input yields the
//! same ids.

use chrono::{DateTime, Utc};
use uuid::{Builder, Uuid};

pub fn synthesize(ts: &DateTime<Utc>, process_id: &str, sequence: u64) -> String {
  let millis = u64::try_from(ts.timestamp_millis()).unwrap_or(0);

  let mut hasher = blake3::Hasher::new();
  hasher.update(&ts.timestamp().to_be_bytes());
  hasher.update(&ts.timestamp_subsec_nanos().to_be_bytes());
  hasher.update(b"|");
  hasher.update(process_id.as_bytes());
  hasher.update(b"|");
  hasher.update(&sequence.to_be_bytes());
  let digest = hasher.finalize();

  let mut entropy = [0u8; 10];
  entropy.copy_from_slice(&digest.as_bytes()[..10]);

  Builder::from_unix_timestamp_millis(millis, &entropy)
    .into_uuid()
    .to_string()
}

/// Unix milliseconds embedded in a synthesized id.
pub fn embedded_millis(id: &str) -> Option<u64> {
  let uuid = Uuid::parse_str(id).ok()?;
  if uuid.get_version_num() != 7 {
    return None;
  }
  let bytes = uuid.as_bytes();
  Some(bytes[..6].iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}
