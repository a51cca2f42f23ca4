//! Endpoint hint writer (C2): admission, write accounting, flush
//! scheduling and segment-rotation signalling for a single destination
//! endpoint.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::HintsConfig;
use crate::error::Result;
use crate::gate::Gate;
use crate::metrics::ShardStats;
use crate::segment::EndpointSegmentStore;
use crate::types::{EndpointId, FrozenMutation, SchemaVersion, Trace};

pub struct EndpointHintWriter {
  endpoint: EndpointId,
  store: Arc<EndpointSegmentStore>,
  config: Arc<HintsConfig>,
  stats: Arc<ShardStats>,
  gate: Gate,
  hints_in_progress_bytes: AtomicU64,
  can_hint: AtomicBool,
  stopping: AtomicBool,
}

impl EndpointHintWriter {
  pub fn new(endpoint: EndpointId, store: Arc<EndpointSegmentStore>, config: Arc<HintsConfig>, stats: Arc<ShardStats>) -> Self {
    EndpointHintWriter {
      endpoint,
      store,
      config,
      stats,
      gate: Gate::new(),
      hints_in_progress_bytes: AtomicU64::new(0),
      can_hint: AtomicBool::new(true),
      stopping: AtomicBool::new(false),
    }
  }

  pub fn can_hint(&self) -> bool {
    self.can_hint.load(Ordering::Acquire)
  }

  pub fn allow_hints(&self) {
    self.can_hint.store(true, Ordering::Release);
  }

  pub fn forbid_hints(&self) {
    self.can_hint.store(false, Ordering::Release);
  }

  pub fn hints_in_progress(&self) -> u64 {
    self.hints_in_progress_bytes.load(Ordering::Acquire)
  }

  /// Admits one hint and returns immediately once it is enqueued for a
  /// durable append; the append itself runs in a detached background task
  /// so `store_hint` never blocks its caller on file I/O beyond admission.
  /// Returns `false` (and records a drop) without touching any other
  /// counter if the writer is stopping, forbidden from hinting, or the
  /// in-flight admission budget is exhausted — admission monotonicity
  /// (§8 laws). The background append still updates `hints_in_progress`
  /// and the written/error counters once it resolves; `stop()`'s gate
  /// close waits for it.
  pub async fn store_hint(self: &Arc<Self>, schema_version: SchemaVersion, mutation: FrozenMutation, trace: Trace) -> bool {
    if self.stopping.load(Ordering::Acquire) {
      self.stats.record_dropped();
      return false;
    }
    if !self.can_hint() {
      self.stats.record_dropped();
      return false;
    }
    let size = mutation.size() as u64;
    if self.hints_in_progress_bytes.load(Ordering::Acquire) + size > self.config.max_size_of_hints_in_progress {
      self.stats.record_dropped();
      return false;
    }

    let Some(permit) = self.gate.enter() else {
      self.stats.record_dropped();
      return false;
    };

    self.hints_in_progress_bytes.fetch_add(size, Ordering::AcqRel);
    self.stats.hint_admitted(size as i64);

    let writer = self.clone();
    let table = mutation.table.clone();
    let payload = mutation.payload.clone();
    let trace_id = trace.as_str().to_string();

    tokio::spawn(async move {
      let segment_max_bytes = writer.config.hint_segment_size_bytes();
      let write_timeout = writer.config.hint_file_write_timeout;
      let store = writer.store.clone();

      let append_task = tokio::task::spawn_blocking(move || {
        append_blocking(store, schema_version, table, payload, segment_max_bytes)
      });

      let outcome = match tokio::time::timeout(write_timeout, append_task).await {
        Ok(joined) => joined,
        Err(_) => {
          writer.hints_in_progress_bytes.fetch_sub(size, Ordering::AcqRel);
          writer.stats.hint_resolved(size as i64);
          writer.stats.record_error();
          warn!(endpoint = %writer.endpoint, trace = %trace_id, timeout = ?write_timeout, "hint append timed out");
          drop(permit);
          return;
        }
      };

      writer.hints_in_progress_bytes.fetch_sub(size, Ordering::AcqRel);
      writer.stats.hint_resolved(size as i64);
      drop(permit);

      match outcome {
        Ok(Ok(_)) => {
          writer.stats.record_written();
          debug!(endpoint = %writer.endpoint, trace = %trace_id, "hint durably written");
        }
        Ok(Err(err)) => {
          writer.stats.record_error();
          warn!(endpoint = %writer.endpoint, error = %err, "hint append failed");
        }
        Err(join_err) => {
          writer.stats.record_error();
          warn!(endpoint = %writer.endpoint, error = %join_err, "hint append task panicked");
        }
      }
    });

    true
  }

  /// Forces a durability barrier on the active segment, then returns every
  /// sealed (non-active) segment filename currently on disk, so the
  /// caller (C4) can extend the replay sender's queue with whatever is
  /// new. The sender is responsible for ignoring segments it has already
  /// queued or finished replaying.
  pub async fn flush_current_hints(&self) -> Result<Vec<PathBuf>> {
    self.store.sync_active().await?;
    self.populate_segments_to_replay().await
  }

  /// Startup/recovery: enumerates the endpoint directory in ascending
  /// filename order, excluding the currently-active segment (the sender
  /// only ever replays sealed segments plus whatever the active one
  /// becomes once it rotates).
  pub async fn populate_segments_to_replay(&self) -> Result<Vec<PathBuf>> {
    let active_seq = self.store.active_seq().await;
    let all = self.store.list_segments()?;
    Ok(all
      .into_iter()
      .filter(|p| {
        p.file_name()
          .and_then(|n| n.to_str())
          .and_then(crate::segment::naming::parse_segment_seq)
          .map(|seq| seq != active_seq)
          .unwrap_or(false)
      })
      .collect())
  }

  /// Closes the append gate (waiting for in-flight appends to resolve) and
  /// marks the writer stopped. Idempotent.
  pub async fn stop(&self) {
    self.stopping.store(true, Ordering::Release);
    self.gate.close().await;
  }
}

fn append_blocking(
  store: Arc<EndpointSegmentStore>,
  schema_version: SchemaVersion,
  table: String,
  payload: Vec<u8>,
  segment_max_bytes: u64,
) -> Result<crate::types::ReplayPosition> {
  // `EndpointSegmentStore::append` is async only because it takes the
  // per-endpoint RwLock; the lock itself never awaits across real I/O
  // (the underlying SegmentLog::append is synchronous), so driving it to
  // completion on this blocking-pool thread is safe and avoids flowing a
  // tokio handle into a std thread.
  tokio::runtime::Handle::current()
    .block_on(async move { store.append(schema_version, &table, &payload, segment_max_bytes).await })
    .map(|(rp, _sealed)| rp)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::segment::SegmentStoreFactory;

  async fn fixture() -> (tempfile::TempDir, Arc<EndpointHintWriter>) {
    let dir = tempfile::tempdir().unwrap();
    let factory = SegmentStoreFactory::new(dir.path());
    let endpoint = EndpointId::new("10.0.0.1");
    let store = factory.get_or_create(&endpoint).await.unwrap();
    let config = Arc::new(HintsConfig::builder(dir.path()).build());
    let stats = Arc::new(ShardStats::new());
    (dir, Arc::new(EndpointHintWriter::new(endpoint, store, config, stats)))
  }

  async fn wait_until_settled(writer: &Arc<EndpointHintWriter>) {
    let start = std::time::Instant::now();
    while writer.hints_in_progress() != 0 {
      if start.elapsed() > std::time::Duration::from_secs(2) {
        panic!("hint append did not settle in time");
      }
      tokio::task::yield_now().await;
    }
  }

  #[tokio::test]
  async fn store_hint_accepts_when_admissible() {
    let (_dir, writer) = fixture().await;
    let mutation = FrozenMutation { table: "users".into(), partition_key: vec![1], payload: vec![9; 16] };
    let accepted = writer.store_hint(SchemaVersion(1), mutation, Trace::none()).await;
    assert!(accepted);
    wait_until_settled(&writer).await;
    assert_eq!(writer.hints_in_progress(), 0);
  }

  #[tokio::test]
  async fn store_hint_refused_when_forbidden() {
    let (_dir, writer) = fixture().await;
    writer.forbid_hints();
    let mutation = FrozenMutation { table: "users".into(), partition_key: vec![1], payload: vec![9; 16] };
    let accepted = writer.store_hint(SchemaVersion(1), mutation, Trace::none()).await;
    assert!(!accepted);
  }

  #[tokio::test]
  async fn store_hint_refused_once_stopping() {
    let (_dir, writer) = fixture().await;
    writer.stop().await;
    let mutation = FrozenMutation { table: "users".into(), partition_key: vec![1], payload: vec![9; 16] };
    let accepted = writer.store_hint(SchemaVersion(1), mutation, Trace::none()).await;
    assert!(!accepted);
  }
}
