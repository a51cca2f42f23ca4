//! Shard statistics and a minimal Prometheus text-exposition renderer.
//!
//! Trimmed from the teacher's OTLP/gRPC export stack down to the counters
//! this crate actually owns (§3 "Shard statistics"): registering those
//! counters with a metrics backend, and exporting over the network, are
//! both the host application's concern ("metrics registration" is called
//! out of scope), but rendering the numbers this crate tracks needs no
//! collaborator.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotone counters plus the one live gauge named in §3.
#[derive(Default)]
pub struct ShardStats {
  pub written: AtomicU64,
  pub errors: AtomicU64,
  pub dropped: AtomicU64,
  pub sent: AtomicU64,
  /// Live gauge: sum of `hints_in_progress` across all endpoints on this
  /// shard. Signed so a buggy decrement below zero is visible rather than
  /// silently wrapping.
  pub size_of_hints_in_progress: AtomicI64,
}

impl ShardStats {
  pub fn new() -> Self {
    ShardStats::default()
  }

  pub fn record_written(&self) {
    self.written.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_error(&self) {
    self.errors.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_dropped(&self) {
    self.dropped.fetch_add(1, Ordering::Relaxed);
  }

  pub fn record_sent(&self) {
    self.sent.fetch_add(1, Ordering::Relaxed);
  }

  pub fn hint_admitted(&self, bytes: i64) {
    self.size_of_hints_in_progress.fetch_add(bytes, Ordering::Relaxed);
  }

  pub fn hint_resolved(&self, bytes: i64) {
    self.size_of_hints_in_progress.fetch_sub(bytes, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> ShardStatsSnapshot {
    ShardStatsSnapshot {
      written: self.written.load(Ordering::Relaxed),
      errors: self.errors.load(Ordering::Relaxed),
      dropped: self.dropped.load(Ordering::Relaxed),
      sent: self.sent.load(Ordering::Relaxed),
      size_of_hints_in_progress: self.size_of_hints_in_progress.load(Ordering::Relaxed),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardStatsSnapshot {
  pub written: u64,
  pub errors: u64,
  pub dropped: u64,
  pub sent: u64,
  pub size_of_hints_in_progress: i64,
}

fn push_prometheus_help(out: &mut String, name: &str, help: &str, kind: &str) {
  let _ = writeln!(out, "# HELP {name} {help}");
  let _ = writeln!(out, "# TYPE {name} {kind}");
}

fn push_prometheus_sample(out: &mut String, name: &str, shard_id: &str, value: impl std::fmt::Display) {
  let _ = writeln!(out, "{name}{{shard=\"{}\"}} {value}", escape_prometheus_label_value(shard_id));
}

fn escape_prometheus_label_value(value: &str) -> String {
  value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Renders this shard's statistics in Prometheus text exposition format.
pub fn render_shard_stats_prometheus(shard_id: &str, stats: &ShardStats) -> String {
  let snap = stats.snapshot();
  let mut out = String::new();

  push_prometheus_help(&mut out, "hinted_handoff_written_total", "Hints durably written.", "counter");
  push_prometheus_sample(&mut out, "hinted_handoff_written_total", shard_id, snap.written);

  push_prometheus_help(&mut out, "hinted_handoff_errors_total", "Hints that failed to durably write.", "counter");
  push_prometheus_sample(&mut out, "hinted_handoff_errors_total", shard_id, snap.errors);

  push_prometheus_help(&mut out, "hinted_handoff_dropped_total", "Hints dropped (decommission, grace expiry, admission refusal).", "counter");
  push_prometheus_sample(&mut out, "hinted_handoff_dropped_total", shard_id, snap.dropped);

  push_prometheus_help(&mut out, "hinted_handoff_sent_total", "Hints successfully replayed to a replica.", "counter");
  push_prometheus_sample(&mut out, "hinted_handoff_sent_total", shard_id, snap.sent);

  push_prometheus_help(&mut out, "hinted_handoff_size_of_hints_in_progress_bytes", "Unflushed hint bytes currently admitted.", "gauge");
  push_prometheus_sample(&mut out, "hinted_handoff_size_of_hints_in_progress_bytes", shard_id, snap.size_of_hints_in_progress);

  out
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn snapshot_reflects_recorded_events() {
    let stats = ShardStats::new();
    stats.hint_admitted(100);
    stats.record_written();
    stats.hint_resolved(100);
    let snap = stats.snapshot();
    assert_eq!(snap.written, 1);
    assert_eq!(snap.size_of_hints_in_progress, 0);
  }

  #[test]
  fn prometheus_output_contains_all_series() {
    let stats = ShardStats::new();
    stats.record_sent();
    let text = render_shard_stats_prometheus("shard-0", &stats);
    assert!(text.contains("hinted_handoff_sent_total{shard=\"shard-0\"} 1"));
    assert!(text.contains("# TYPE hinted_handoff_size_of_hints_in_progress_bytes gauge"));
  }
}
