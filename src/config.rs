//! Shard configuration surface.
//!
//! `HintsConfig` is constructed directly by the embedding application (or by
//! its own toml/env loader — loading configuration files is explicitly out
//! of scope for this crate). Defaults mirror §6 of the design and are
//! exposed individually in [`crate::constants`] so callers can override a
//! single field without losing the rest.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

#[derive(Debug, Clone)]
pub struct HintsConfig {
  pub hints_dir: PathBuf,
  pub hinted_dcs: Vec<String>,
  pub max_hint_window: Duration,
  pub max_shard_disk_space_size: u64,
  pub max_size_of_hints_in_progress: u64,
  pub hint_segment_size_mb: u64,
  pub max_hints_per_ep_size_mb: u64,
  pub max_hints_send_queue_length: usize,
  pub hints_flush_period: Duration,
  pub hint_file_write_timeout: Duration,
  pub watchdog_period: Duration,
  pub max_send_in_flight_memory: u64,
  pub min_send_hint_budget: u64,
  pub default_grace_seconds: u64,
  pub per_table_grace_seconds: HashMap<String, u64>,
}

impl HintsConfig {
  /// Starts a builder rooted at `hints_dir` with every other field at its
  /// documented default.
  pub fn builder(hints_dir: impl Into<PathBuf>) -> HintsConfigBuilder {
    HintsConfigBuilder::new(hints_dir)
  }

  pub fn hint_segment_size_bytes(&self) -> u64 {
    self.hint_segment_size_mb * 1024 * 1024
  }

  pub fn max_hints_per_ep_size_bytes(&self) -> u64 {
    self.max_hints_per_ep_size_mb * 1024 * 1024
  }

  /// `true` when no datacenter allow-list is configured (all datacenters
  /// hintable).
  pub fn hints_all_datacenters(&self) -> bool {
    self.hinted_dcs.is_empty()
  }

  /// Grace period for `table`: its per-table override if one is
  /// configured, else [`Self::default_grace_seconds`].
  pub fn grace_seconds_for(&self, table: &str) -> u64 {
    self.per_table_grace_seconds.get(table).copied().unwrap_or(self.default_grace_seconds)
  }
}

pub struct HintsConfigBuilder {
  cfg: HintsConfig,
}

impl HintsConfigBuilder {
  fn new(hints_dir: impl Into<PathBuf>) -> Self {
    HintsConfigBuilder {
      cfg: HintsConfig {
        hints_dir: hints_dir.into(),
        hinted_dcs: Vec::new(),
        max_hint_window: Duration::from_millis(DEFAULT_MAX_HINT_WINDOW_MS),
        max_shard_disk_space_size: u64::MAX,
        max_size_of_hints_in_progress: DEFAULT_MAX_SIZE_OF_HINTS_IN_PROGRESS,
        hint_segment_size_mb: DEFAULT_HINT_SEGMENT_SIZE_MB,
        max_hints_per_ep_size_mb: DEFAULT_MAX_HINTS_PER_EP_SIZE_MB,
        max_hints_send_queue_length: DEFAULT_MAX_HINTS_SEND_QUEUE_LENGTH,
        hints_flush_period: Duration::from_millis(DEFAULT_HINTS_FLUSH_PERIOD_MS),
        hint_file_write_timeout: Duration::from_millis(DEFAULT_HINT_FILE_WRITE_TIMEOUT_MS),
        watchdog_period: Duration::from_millis(DEFAULT_WATCHDOG_PERIOD_MS),
        max_send_in_flight_memory: DEFAULT_MAX_SEND_IN_FLIGHT_MEMORY,
        min_send_hint_budget: DEFAULT_MIN_SEND_HINT_BUDGET,
        default_grace_seconds: DEFAULT_GRACE_SECONDS,
        per_table_grace_seconds: HashMap::new(),
      },
    }
  }

  pub fn hinted_dcs(mut self, dcs: impl IntoIterator<Item = impl Into<String>>) -> Self {
    self.cfg.hinted_dcs = dcs.into_iter().map(Into::into).collect();
    self
  }

  pub fn max_hint_window(mut self, d: Duration) -> Self {
    self.cfg.max_hint_window = d;
    self
  }

  pub fn max_shard_disk_space_size(mut self, bytes: u64) -> Self {
    self.cfg.max_shard_disk_space_size = bytes;
    self
  }

  pub fn max_size_of_hints_in_progress(mut self, bytes: u64) -> Self {
    self.cfg.max_size_of_hints_in_progress = bytes;
    self
  }

  pub fn hint_segment_size_mb(mut self, mb: u64) -> Self {
    self.cfg.hint_segment_size_mb = mb;
    self
  }

  pub fn max_hints_per_ep_size_mb(mut self, mb: u64) -> Self {
    self.cfg.max_hints_per_ep_size_mb = mb;
    self
  }

  pub fn max_hints_send_queue_length(mut self, n: usize) -> Self {
    self.cfg.max_hints_send_queue_length = n;
    self
  }

  pub fn hints_flush_period(mut self, d: Duration) -> Self {
    self.cfg.hints_flush_period = d;
    self
  }

  pub fn hint_file_write_timeout(mut self, d: Duration) -> Self {
    self.cfg.hint_file_write_timeout = d;
    self
  }

  pub fn watchdog_period(mut self, d: Duration) -> Self {
    self.cfg.watchdog_period = d;
    self
  }

  pub fn max_send_in_flight_memory(mut self, bytes: u64) -> Self {
    self.cfg.max_send_in_flight_memory = bytes;
    self
  }

  pub fn min_send_hint_budget(mut self, bytes: u64) -> Self {
    self.cfg.min_send_hint_budget = bytes;
    self
  }

  pub fn default_grace_seconds(mut self, secs: u64) -> Self {
    self.cfg.default_grace_seconds = secs;
    self
  }

  /// Overrides the grace period for one table, leaving
  /// `default_grace_seconds` as the fallback for every other table.
  pub fn grace_seconds_for_table(mut self, table: impl Into<String>, secs: u64) -> Self {
    self.cfg.per_table_grace_seconds.insert(table.into(), secs);
    self
  }

  pub fn build(self) -> HintsConfig {
    self.cfg
  }
}
