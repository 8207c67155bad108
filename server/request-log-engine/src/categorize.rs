//! Duration categorizer: find the timed sub-operation embedded in a message.
//!
//! Rules are evaluated in order and the first match wins. A `CACHE` line is
//! matched first and suppresses categorization entirely.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::types::Timing;

pub const VIEWS: &str = "Views";
pub const ACTIVE_RECORD: &str = "ActiveRecord";

/// Decimal milliseconds.
const MS: &str = r"(?P<ms>\d+(?:\.\d+)?)";

enum Outcome {
  Timed(Timing),
  Suppressed,
}

struct Rule {
  name: &'static str,
  pattern: Regex,
  extract: fn(&Captures<'_>) -> Option<Outcome>,
}

impl Rule {
  fn new(name: &'static str, pattern: &str, extract: fn(&Captures<'_>) -> Option<Outcome>) -> Self {
    let pattern = Regex::new(&pattern.replace("{ms}", MS)).expect("categorizer rule regex");
    Self {
      name,
      pattern,
      extract,
    }
  }
}

static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
  vec![
    Rule::new("cache", r"^\s*CACHE\b", |_| Some(Outcome::Suppressed)),
    Rule::new(
      "render",
      r"^\s*Rendered (?:layout |collection of )?(?P<target>\S+)(?: \[[^\]]*\])?(?: within \S+)? \((?:Duration: )?{ms}ms",
      |c| timed(VIEWS, Some(&c["target"]), &c["ms"]),
    ),
    Rule::new(
      "model",
      r"^\s*(?P<target>[A-Z][\w:]*) (?:Load|Exists\??|Create|Update|Destroy|Count|Pluck) \({ms}ms\)\s+\S",
      |c| timed(ACTIVE_RECORD, Some(&c["target"]), &c["ms"]),
    ),
    Rule::new("sql", r"^\s*SQL \({ms}ms\)\s+\S", |c| {
      timed(ACTIVE_RECORD, Some("SQL"), &c["ms"])
    }),
    Rule::new("join", r"(?i)^\s*\({ms}ms\)\s+\S.*\bJOIN\b", |c| {
      timed(ACTIVE_RECORD, Some("SQL"), &c["ms"])
    }),
    Rule::new(
      "aggregate",
      r"(?i)^\s*\({ms}ms\)\s+SELECT\s+(?:COUNT|SUM|AVG|MIN|MAX)\s*\(",
      |c| timed(ACTIVE_RECORD, Some(""), &c["ms"]),
    ),
  ]
});

/// `<Category>: <N>ms` pairs inside a completion summary.
static BREAKDOWN_ENTRY: Lazy<Regex> = Lazy::new(|| {
  Regex::new(&format!(r"(?P<category>[A-Za-z]\w*): {}ms", MS)).expect("breakdown regex")
});

fn timed(category: &str, target: Option<&str>, ms: &str) -> Option<Outcome> {
  let duration_ms = ms.parse::<f64>().ok()?;
  Some(Outcome::Timed(Timing::new(
    category,
    target.map(str::to_string),
    duration_ms,
  )))
}

/// Single-operation timing embedded in a log message, if any.
pub fn categorize(message: &str) -> Option<Timing> {
  for rule in RULES.iter() {
    let Some(caps) = rule.pattern.captures(message) else {
      continue;
    };
    return match (rule.extract)(&caps)? {
      Outcome::Timed(timing) => {
        tracing::trace!(rule = rule.name, category = %timing.category, "categorized");
        Some(timing)
      }
      Outcome::Suppressed => None,
    };
  }
  None
}

/// Per-category timings from the parenthesized part of a completion line,
/// e.g. `Views: 12.3ms | ActiveRecord: 45.6ms | Allocations: 1234`.
///
/// Entries without an `ms` unit are skipped. Callers must not rely on order.
pub fn breakdown(summary: &str) -> Vec<Timing> {
  BREAKDOWN_ENTRY
    .captures_iter(summary)
    .filter_map(|c| {
      let duration_ms = c["ms"].parse::<f64>().ok()?;
      Some(Timing::new(&c["category"], None, duration_ms))
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn timing(category: &str, target: &str, ms: f64) -> Timing {
    Timing::new(category, Some(target.to_string()), ms)
  }

  #[test]
  fn rendered_view() {
    assert_eq!(
      categorize("  Rendered foos/index.html.erb within layouts/application (0.9ms)"),
      Some(timing(VIEWS, "foos/index.html.erb", 0.9))
    );
  }

  #[test]
  fn rendered_view_newer_formats() {
    assert_eq!(
      categorize("  Rendered foos/_row.html.erb (Duration: 1.2ms | Allocations: 310)"),
      Some(timing(VIEWS, "foos/_row.html.erb", 1.2))
    );
    assert_eq!(
      categorize("  Rendered layout layouts/application.html.erb (Duration: 5.0ms | Allocations: 9)"),
      Some(timing(VIEWS, "layouts/application.html.erb", 5.0))
    );
  }

  #[test]
  fn rendered_collection() {
    assert_eq!(
      categorize("  Rendered collection of foos/_foo.html.erb [3 times] (Duration: 0.9ms | Allocations: 10)"),
      Some(timing(VIEWS, "foos/_foo.html.erb", 0.9))
    );
    assert_eq!(
      categorize("  Rendered collection of foos/_foo.html.erb [0 / 2 cache hits] within layouts/application (1.4ms)"),
      Some(timing(VIEWS, "foos/_foo.html.erb", 1.4))
    );
  }

  #[test]
  fn model_load() {
    assert_eq!(
      categorize("  User Load (0.4ms)  SELECT \"users\".* FROM \"users\" WHERE \"users\".\"id\" = $1 LIMIT $2"),
      Some(timing(ACTIVE_RECORD, "User", 0.4))
    );
    assert_eq!(
      categorize("  Admin::Role Exists? (0.2ms)  SELECT 1 AS one FROM roles LIMIT 1"),
      Some(timing(ACTIVE_RECORD, "Admin::Role", 0.2))
    );
    assert_eq!(
      categorize("  Admin::Role Exists (0.2ms)  SELECT 1 AS one FROM roles LIMIT 1"),
      Some(timing(ACTIVE_RECORD, "Admin::Role", 0.2))
    );
  }

  #[test]
  fn labelled_sql() {
    assert_eq!(
      categorize("  SQL (1.5ms)  INSERT INTO \"foos\" (\"name\") VALUES ($1)"),
      Some(timing(ACTIVE_RECORD, "SQL", 1.5))
    );
  }

  #[test]
  fn unlabelled_join_is_sql() {
    assert_eq!(
      categorize("   (0.3ms)  SELECT \"tags\".* FROM \"tags\" INNER JOIN \"taggings\" ON \"tags\".\"id\" = \"taggings\".\"tag_id\""),
      Some(timing(ACTIVE_RECORD, "SQL", 0.3))
    );
  }

  #[test]
  fn unlabelled_aggregate_has_empty_target() {
    assert_eq!(
      categorize("   (0.2ms)  SELECT COUNT(*) FROM \"foos\""),
      Some(timing(ACTIVE_RECORD, "", 0.2))
    );
  }

  #[test]
  fn join_shape_wins_over_aggregate() {
    assert_eq!(
      categorize("   (0.6ms)  SELECT COUNT(*) FROM a INNER JOIN b ON a.id = b.a_id"),
      Some(timing(ACTIVE_RECORD, "SQL", 0.6))
    );
  }

  #[test]
  fn cache_lines_are_never_categorized() {
    assert_eq!(categorize("  CACHE User Load (0.0ms)  SELECT \"users\".* FROM \"users\""), None);
    assert_eq!(categorize("  CACHE (0.0ms)  SELECT COUNT(*) FROM \"foos\""), None);
    assert_eq!(categorize("  CACHE SQL (0.1ms)  SELECT 1"), None);
  }

  #[test]
  fn unknown_lines() {
    assert_eq!(categorize("  unknown duration (0.9ms)"), None);
    assert_eq!(categorize("   (0.1ms)  BEGIN"), None);
    assert_eq!(categorize("Processing by FoosController#index as HTML"), None);
  }

  #[test]
  fn formatted_timings_round_trip() {
    let cases = [
      (format!("  {} Load ({}ms)  SELECT \"posts\".* FROM \"posts\"", "Post", 2.5), timing(ACTIVE_RECORD, "Post", 2.5)),
      (format!("  SQL ({}ms)  UPDATE \"posts\" SET x = 1", 0.7), timing(ACTIVE_RECORD, "SQL", 0.7)),
      (format!("   ({}ms)  SELECT * FROM a LEFT OUTER JOIN b ON a.id = b.a_id", 3.25), timing(ACTIVE_RECORD, "SQL", 3.25)),
      (format!("   ({}ms)  SELECT SUM(\"x\") FROM \"y\"", 12), timing(ACTIVE_RECORD, "", 12.0)),
    ];
    for (message, expected) in cases {
      assert_eq!(categorize(&message), Some(expected), "{}", message);
    }
  }

  #[test]
  fn breakdown_entries() {
    let mut timings = breakdown("Views: 12.3ms | ActiveRecord: 45.6ms | Allocations: 1234");
    timings.sort_by(|a, b| a.category.cmp(&b.category));
    assert_eq!(
      timings,
      vec![
        Timing::new(ACTIVE_RECORD, None, 45.6),
        Timing::new(VIEWS, None, 12.3),
      ]
    );
    assert!(breakdown("Allocations: 1234").is_empty());
  }
}
