//! Endpoint manager (C4): a small facade owning one writer (C2) and one
//! sender (C3) for a single destination endpoint, plus their shared
//! lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::collaborators::{FailureDetector, SchemaCatalog, TopologyService, WritePath};
use crate::config::HintsConfig;
use crate::error::Result;
use crate::metrics::ShardStats;
use crate::segment::EndpointSegmentStore;
use crate::sender::EndpointReplaySender;
use crate::types::{EndpointId, FrozenMutation, SchemaVersion, Trace};
use crate::writer::EndpointHintWriter;

pub struct EndpointManager {
  endpoint: EndpointId,
  writer: Arc<EndpointHintWriter>,
  sender: Arc<EndpointReplaySender>,
  config: Arc<HintsConfig>,
  started: AtomicBool,
  tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl EndpointManager {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    endpoint: EndpointId,
    store: Arc<EndpointSegmentStore>,
    config: Arc<HintsConfig>,
    stats: Arc<ShardStats>,
    send_semaphore: Arc<tokio::sync::Semaphore>,
    failure_detector: Arc<dyn FailureDetector>,
    topology: Arc<dyn TopologyService>,
    write_path: Arc<dyn WritePath>,
    schema_catalog: Arc<dyn SchemaCatalog>,
  ) -> Self {
    let writer = Arc::new(EndpointHintWriter::new(endpoint.clone(), store, config.clone(), stats.clone()));
    let sender = Arc::new(EndpointReplaySender::new(
      endpoint.clone(),
      config.clone(),
      stats,
      send_semaphore,
      failure_detector,
      topology,
      write_path,
      schema_catalog,
    ));
    EndpointManager { endpoint, writer, sender, config, started: AtomicBool::new(false), tasks: AsyncMutex::new(Vec::new()) }
  }

  pub fn endpoint(&self) -> &EndpointId {
    &self.endpoint
  }

  pub fn can_hint(&self) -> bool {
    self.writer.can_hint()
  }

  pub fn allow_hints(&self) {
    self.writer.allow_hints();
  }

  pub fn forbid_hints(&self) {
    self.writer.forbid_hints();
  }

  pub fn hints_in_progress(&self) -> u64 {
    self.writer.hints_in_progress()
  }

  pub async fn store_hint(&self, schema_version: SchemaVersion, mutation: FrozenMutation, trace: Trace) -> bool {
    self.writer.store_hint(schema_version, mutation, trace).await
  }

  /// Recovers any segments already on disk, then spawns the flush-driver
  /// and sender tick-loop tasks. Safe to call once per manager.
  pub async fn start(self: &Arc<Self>) -> Result<()> {
    if self.started.swap(true, Ordering::AcqRel) {
      return Ok(());
    }
    let backlog = self.writer.populate_segments_to_replay().await?;
    self.sender.enqueue_segments(backlog).await;

    let flush_period = self.config.hints_flush_period;
    let writer = self.writer.clone();
    let sender_for_flush = self.sender.clone();
    let flush_task = tokio::spawn(async move {
      let mut interval = tokio::time::interval(flush_period);
      loop {
        interval.tick().await;
        match writer.flush_current_hints().await {
          Ok(paths) => sender_for_flush.enqueue_segments(paths).await,
          Err(err) => tracing::warn!(error = %err, "flush_current_hints failed"),
        }
      }
    });

    let sender = self.sender.clone();
    let endpoint = self.endpoint.clone();
    let send_task = tokio::spawn(async move {
      loop {
        let sleep_for = sender.tick().await;
        if sleep_for.is_zero() {
          info!(endpoint = %endpoint, "sender tick loop exiting");
          break;
        }
        tokio::time::sleep(sleep_for).await;
      }
    });

    let mut tasks = self.tasks.lock().await;
    tasks.push(flush_task);
    tasks.push(send_task);
    Ok(())
  }

  /// Drains the writer (gate closes once all pending appends resolve), then
  /// awaits the sender's own stop — which closes its tick gate and waits
  /// out any in-progress tick, including that tick's `send_one_file` drain
  /// — before aborting the background tasks. Awaiting the sender here
  /// first is required: aborting its tick-loop task while a tick is still
  /// running would orphan detached per-hint send tasks it had already
  /// spawned. Idempotent.
  pub async fn stop(&self) {
    self.writer.stop().await;
    self.sender.stop().await;
    let mut tasks = self.tasks.lock().await;
    for task in tasks.drain(..) {
      task.abort();
    }
  }
}
