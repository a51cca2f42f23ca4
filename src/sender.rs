//! Endpoint replay sender (C3): the state machine that replays segment
//! files, throttles in-flight mutations, retargets mutations when
//! topology changes, and deletes delivered segments. §4.3 of the design.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{debug, info, warn};

use crate::collaborators::{FailureDetector, SchemaCatalog, TopologyService, WriteConsistency, WritePath};
use crate::config::HintsConfig;
use crate::error::Result;
use crate::gate::Gate;
use crate::metrics::ShardStats;
use crate::segment::SegmentReader;
use crate::types::{ColumnMapping, EndpointId, FrozenMutation, PeerState, ReplayPosition, SchemaVersion};

/// Per-file context shared between the file enumerator and the detached
/// per-hint send tasks it spawns — §9 "longest holder" lifetime. The
/// column-mapping cache is scoped here (one file, one cache) rather than
/// on the sender itself, since §4.3 caches the mapping per replay pass.
struct SendOneFileCtx {
  in_flight: AsyncMutex<HashSet<ReplayPosition>>,
  column_mapping_cache: AsyncMutex<HashMap<SchemaVersion, ColumnMapping>>,
  gate: Gate,
  /// Bounds concurrent in-flight sends for this file to
  /// `_max_hints_send_queue_length` (§3 invariant 4). Acquired before an
  /// entry is inserted into `in_flight` and spawned; held by the detached
  /// task until that entry resolves, so a full queue makes the enumerator
  /// wait for a slot instead of busy-polling `in_flight`'s length.
  slots: Arc<Semaphore>,
  segment_replay_failed: AtomicBool,
  restart_segment: AtomicBool,
}

impl SendOneFileCtx {
  fn new(max_hints_send_queue_length: usize) -> Self {
    SendOneFileCtx {
      in_flight: AsyncMutex::new(HashSet::new()),
      column_mapping_cache: AsyncMutex::new(HashMap::new()),
      gate: Gate::new(),
      slots: Arc::new(Semaphore::new(max_hints_send_queue_length.max(1))),
      segment_replay_failed: AtomicBool::new(false),
      restart_segment: AtomicBool::new(false),
    }
  }

  /// Resolves `table`'s column mapping at `schema_version`, consulting
  /// (and populating) the per-file cache shared by every entry in this
  /// replay pass.
  async fn column_mapping(&self, catalog: &dyn SchemaCatalog, table: &str, schema_version: SchemaVersion) -> Result<ColumnMapping> {
    if let Some(mapping) = self.column_mapping_cache.lock().await.get(&schema_version) {
      return Ok(mapping.clone());
    }
    let mapping = catalog.column_mapping(table, schema_version).await?;
    self.column_mapping_cache.lock().await.insert(schema_version, mapping.clone());
    Ok(mapping)
  }
}

pub struct EndpointReplaySender {
  endpoint: EndpointId,
  config: Arc<HintsConfig>,
  stats: Arc<ShardStats>,
  send_semaphore: Arc<Semaphore>,
  failure_detector: Arc<dyn FailureDetector>,
  topology: Arc<dyn TopologyService>,
  write_path: Arc<dyn WritePath>,
  schema_catalog: Arc<dyn SchemaCatalog>,

  queue: AsyncMutex<VecDeque<PathBuf>>,
  last_not_complete_rp: AsyncMutex<Option<ReplayPosition>>,

  stopping: AtomicBool,
  /// Entered for the duration of each `tick()` call (which includes any
  /// `send_one_file` it runs and that file's `ctx.gate.close().await`
  /// drain). `stop()` closes and awaits this before `EndpointManager::stop`
  /// aborts the tick-loop task, so a stop can never land mid-tick and
  /// orphan detached per-hint send tasks (§4.4, §5 Cancellation).
  tick_gate: Gate,
}

impl EndpointReplaySender {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    endpoint: EndpointId,
    config: Arc<HintsConfig>,
    stats: Arc<ShardStats>,
    send_semaphore: Arc<Semaphore>,
    failure_detector: Arc<dyn FailureDetector>,
    topology: Arc<dyn TopologyService>,
    write_path: Arc<dyn WritePath>,
    schema_catalog: Arc<dyn SchemaCatalog>,
  ) -> Self {
    EndpointReplaySender {
      endpoint,
      config,
      stats,
      send_semaphore,
      failure_detector,
      topology,
      write_path,
      schema_catalog,
      queue: AsyncMutex::new(VecDeque::new()),
      last_not_complete_rp: AsyncMutex::new(None),
      stopping: AtomicBool::new(false),
      tick_gate: Gate::new(),
    }
  }

  pub async fn enqueue_segments(&self, paths: Vec<PathBuf>) {
    let mut queue = self.queue.lock().await;
    let known: HashSet<&PathBuf> = queue.iter().collect();
    for path in paths {
      if !known.contains(&path) {
        queue.push_back(path);
      }
    }
  }

  pub async fn queue_len(&self) -> usize {
    self.queue.lock().await.len()
  }

  /// `can_send()` per §4.3 step 2: true if the destination is ALIVE, or if
  /// it has left NORMAL (in which case sending means draining by discard).
  /// `endpoint-not-normal` (§3) is derived directly from the failure
  /// detector's `state()` on every call rather than tracked as
  /// separately-pushed state — the failure detector is the sole authority
  /// on ring membership (§6 collaborator contract).
  async fn can_send(&self) -> bool {
    if is_drain_only(self.failure_detector.state(&self.endpoint).await) {
      return true;
    }
    self.failure_detector.is_alive(&self.endpoint).await
  }

  fn next_sleep_duration(&self) -> Duration {
    self.config.hints_flush_period.min(self.config.watchdog_period)
  }

  /// Upper bound on how long one `tick()` call may spend replaying
  /// segments before yielding back to the caller's sleep/flush loop (§4.3
  /// step 4; §5 "Replay iteration is time-boxed to the timer period so a
  /// single file cannot starve flush/metric work").
  fn tick_time_budget(&self) -> Duration {
    self.config.hints_flush_period.min(self.config.watchdog_period)
  }

  /// Drives one tick of the main loop (§4.3). Returns the duration the
  /// caller should sleep before the next tick.
  pub async fn tick(&self) -> Duration {
    if self.stopping.load(Ordering::Acquire) {
      return Duration::from_secs(0);
    }
    let Some(_tick_permit) = self.tick_gate.enter() else {
      return Duration::from_secs(0);
    };
    if !self.can_send().await {
      return self.next_sleep_duration();
    }

    let deadline = Instant::now() + self.tick_time_budget();
    loop {
      if Instant::now() >= deadline {
        debug!(endpoint = %self.endpoint, "tick time budget exhausted, yielding to flush/metric work");
        break;
      }
      let next = { self.queue.lock().await.front().cloned() };
      let Some(path) = next else { break };
      if !path.exists() {
        self.queue.lock().await.pop_front();
        continue;
      }
      let completed = self.send_one_file(&path).await;
      if completed {
        self.queue.lock().await.pop_front();
      } else {
        // Leave it at the front; retry next tick after the sleep below.
        break;
      }
    }

    self.next_sleep_duration()
  }

  /// Replays one segment file start to finish (minus skipped already-acked
  /// entries), per §4.3's `send_one_file` algorithm.
  async fn send_one_file(&self, path: &Path) -> bool {
    let grace_deadline = match std::fs::metadata(path).and_then(|m| m.modified()) {
      Ok(mtime) => mtime,
      Err(err) => {
        warn!(endpoint = %self.endpoint, path = %path.display(), error = %err, "cannot stat segment, skipping this pass");
        return false;
      }
    };

    let mut reader = match SegmentReader::open(path) {
      Ok(r) => r,
      Err(err) => {
        warn!(endpoint = %self.endpoint, path = %path.display(), error = %err, "cannot open segment for replay");
        return false;
      }
    };

    let skip_upto = *self.last_not_complete_rp.lock().await;
    let ctx = Arc::new(SendOneFileCtx::new(self.config.max_hints_send_queue_length));
    let discard_only = is_drain_only(self.failure_detector.state(&self.endpoint).await);

    loop {
      let frame = match reader.read_next() {
        Ok(Some(frame)) => frame,
        Ok(None) => break,
        Err(err) => {
          warn!(endpoint = %self.endpoint, path = %path.display(), error = %err, "segment read error mid-file");
          ctx.segment_replay_failed.store(true, Ordering::Release);
          ctx.restart_segment.store(true, Ordering::Release);
          break;
        }
      };

      if let Some(floor) = skip_upto {
        if frame.replay_position <= floor {
          continue;
        }
      }

      let entry_bytes = frame.payload.len().max(1) as u32;
      let permit_size = entry_bytes.max(self.config.min_send_hint_budget as u32) as u32;
      let Ok(permit) = self.send_semaphore.clone().acquire_many_owned(permit_size).await else {
        // Semaphore closed: shutting down.
        ctx.segment_replay_failed.store(true, Ordering::Release);
        break;
      };

      let grace = self.config.grace_seconds_for(&frame.table);
      let age = SystemTime::now().duration_since(grace_deadline).unwrap_or(Duration::ZERO);
      if discard_only || age > Duration::from_secs(grace) {
        self.stats.record_dropped();
        drop(permit);
        continue;
      }

      // Bounds concurrent in-flight sends to `_max_hints_send_queue_length`
      // (§3 invariant 4, §4.3 "yield and wait for drains before
      // continuing"). Acquiring the slot blocks the enumerator until a
      // prior send resolves instead of busy-polling `in_flight`'s length.
      let Ok(slot_permit) = ctx.slots.clone().acquire_owned().await else {
        ctx.segment_replay_failed.store(true, Ordering::Release);
        break;
      };

      {
        let mut in_flight = ctx.in_flight.lock().await;
        in_flight.insert(frame.replay_position);
      }

      let Some(gate_permit) = ctx.gate.enter() else { break };
      let endpoint = self.endpoint.clone();
      let topology = self.topology.clone();
      let write_path = self.write_path.clone();
      let schema_catalog = self.schema_catalog.clone();
      let stats = self.stats.clone();
      let ctx2 = ctx.clone();
      let rp = frame.replay_position;
      let schema_version = frame.schema_version;
      let mutation = FrozenMutation { table: frame.table.clone(), partition_key: Vec::new(), payload: frame.payload.clone() };

      tokio::spawn(async move {
        let _permit = permit;
        let _gate_permit = gate_permit;
        let _slot_permit = slot_permit;
        send_one_hint(endpoint, mutation, schema_version, rp, topology, write_path, schema_catalog, stats, ctx2).await;
      });
    }

    ctx.gate.close().await;

    let failed = ctx.segment_replay_failed.load(Ordering::Acquire);
    let restart = ctx.restart_segment.load(Ordering::Acquire);

    if !failed && !restart {
      if let Err(err) = std::fs::remove_file(path) {
        warn!(endpoint = %self.endpoint, path = %path.display(), error = %err, "failed to delete fully-replayed segment");
      } else {
        info!(endpoint = %self.endpoint, path = %path.display(), "segment fully replayed and deleted");
      }
      *self.last_not_complete_rp.lock().await = None;
      true
    } else if restart {
      *self.last_not_complete_rp.lock().await = None;
      false
    } else {
      let remaining = ctx.in_flight.lock().await;
      let floor = remaining.iter().min().copied();
      *self.last_not_complete_rp.lock().await = floor;
      false
    }
  }

  /// Idempotent: closes the send path to new ticks and awaits any `tick()`
  /// already in flight — including the `send_one_file` it may be running
  /// and that file's own gate drain — before returning (§4.4 "awaits the
  /// sender's stop"; §5 Cancellation). Any file the loop was mid-way
  /// through is simply left in the queue for the next process. Callers
  /// (`EndpointManager::stop`) must await this before aborting the
  /// tick-loop task, or an in-progress tick could be torn down mid-send.
  pub async fn stop(&self) {
    self.stopping.store(true, Ordering::Release);
    self.tick_gate.close().await;
  }
}

/// `send_one_hint` per §4.3: resolve the entry's column mapping, retarget
/// if ownership moved, dispatch, and update the shared file context on
/// completion.
///
/// The dispatch call runs in its own nested task so a panic there (state
/// lost before the send could register with any certainty) is
/// distinguishable from an ordinary `Err` returned cleanly by the write
/// path (state intact; `rp` is simply left in `in_flight` for the
/// `_last_not_complete_rp` watermark to pick up on the next pass). Only
/// the former sets `restart_segment`; both set `segment_replay_failed`.
#[allow(clippy::too_many_arguments)]
async fn send_one_hint(
  endpoint: EndpointId,
  mutation: FrozenMutation,
  schema_version: SchemaVersion,
  rp: ReplayPosition,
  topology: Arc<dyn TopologyService>,
  write_path: Arc<dyn WritePath>,
  schema_catalog: Arc<dyn SchemaCatalog>,
  stats: Arc<ShardStats>,
  ctx: Arc<SendOneFileCtx>,
) {
  let mapping = match ctx.column_mapping(schema_catalog.as_ref(), &mutation.table, schema_version).await {
    Ok(mapping) => mapping,
    Err(err) => {
      warn!(endpoint = %endpoint, rp = %rp, error = %err, "could not resolve column mapping for hint");
      ctx.segment_replay_failed.store(true, Ordering::Release);
      return;
    }
  };
  debug!(endpoint = %endpoint, rp = %rp, columns = mapping.0.len(), "resolved column mapping for replay");

  let natural = topology.natural_endpoints(&mutation.table, &mutation.partition_key).await;
  let consistency = if natural.contains(&endpoint) { WriteConsistency::One } else { WriteConsistency::Any };

  let dispatch_endpoint = endpoint.clone();
  let dispatch = tokio::spawn(async move {
    match consistency {
      WriteConsistency::One => write_path.mutate_directly(&dispatch_endpoint, &mutation).await,
      WriteConsistency::Any => write_path.mutate_any(&mutation).await,
    }
  });

  match dispatch.await {
    Ok(Ok(())) => {
      stats.record_sent();
      ctx.in_flight.lock().await.remove(&rp);
    }
    Ok(Err(err)) => {
      warn!(endpoint = %endpoint, rp = %rp, error = %err, "hint send failed, retrying from the recorded watermark");
      ctx.segment_replay_failed.store(true, Ordering::Release);
    }
    Err(join_err) => {
      warn!(endpoint = %endpoint, rp = %rp, error = %join_err, "hint send task panicked, in-flight tracking for this file is no longer trustworthy");
      ctx.segment_replay_failed.store(true, Ordering::Release);
      ctx.restart_segment.store(true, Ordering::Release);
    }
  }
}

/// Reports whether the given peer should be treated as draining-by-discard
/// rather than a live replay target (§2 GLOSSARY "NORMAL state").
pub fn is_drain_only(state: PeerState) -> bool {
  !state.is_normal()
}
