//! Shard manager (C6): the public entry point for this crate. Owns the
//! endpoint manager registry, the shard-wide send semaphore, the space
//! watchdog, and the collaborator handles (failure detector, topology,
//! write path, snitch). §4.6 and §6 of the design.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::info;

use crate::collaborators::{FailureDetector, SchemaCatalog, Snitch, TopologyService, WritePath};
use crate::config::HintsConfig;
use crate::manager::EndpointManager;
use crate::metrics::{ShardStats, ShardStatsSnapshot};
use crate::segment::SegmentStoreFactory;
use crate::types::{EndpointId, FrozenMutation, SchemaVersion, Trace};
use crate::watchdog::SpaceWatchdog;

/// Registry of endpoint managers plus the shard-wide resources they share.
/// Instantiates endpoint managers lazily, on first hint for a
/// previously-unseen endpoint (§3 Lifecycle).
pub struct ShardManager {
  config: Arc<HintsConfig>,
  stats: Arc<ShardStats>,
  store_factory: Arc<SegmentStoreFactory>,
  send_semaphore: Arc<Semaphore>,
  watchdog: Arc<SpaceWatchdog>,

  failure_detector: Arc<dyn FailureDetector>,
  topology: Arc<dyn TopologyService>,
  write_path: Arc<dyn WritePath>,
  snitch: Arc<dyn Snitch>,
  schema_catalog: Arc<dyn SchemaCatalog>,

  endpoints: AsyncMutex<indexmap::IndexMap<EndpointId, Arc<EndpointManager>>>,
  started: AtomicBool,
  tasks: AsyncMutex<Vec<JoinHandle<()>>>,
}

impl ShardManager {
  /// `construct(hints_directory, hinted_datacenters, max_hint_window_ms,
  /// database_handle)` per §6 — the `database_handle` in the distilled
  /// spec corresponds here to the collaborator handles, since this crate
  /// models them as traits rather than a concrete embedded database.
  #[allow(clippy::too_many_arguments)]
  pub fn construct(
    config: HintsConfig,
    failure_detector: Arc<dyn FailureDetector>,
    topology: Arc<dyn TopologyService>,
    write_path: Arc<dyn WritePath>,
    snitch: Arc<dyn Snitch>,
    schema_catalog: Arc<dyn SchemaCatalog>,
  ) -> Self {
    let config = Arc::new(config);
    let send_permits = config.max_send_in_flight_memory.max(1) as usize;
    ShardManager {
      store_factory: Arc::new(SegmentStoreFactory::new(config.hints_dir.clone())),
      send_semaphore: Arc::new(Semaphore::new(send_permits)),
      watchdog: Arc::new(SpaceWatchdog::new(config.clone())),
      stats: Arc::new(ShardStats::new()),
      config,
      failure_detector,
      topology,
      write_path,
      snitch,
      schema_catalog,
      endpoints: AsyncMutex::new(indexmap::IndexMap::new()),
      started: AtomicBool::new(false),
      tasks: AsyncMutex::new(Vec::new()),
    }
  }

  /// `start(storage_proxy, gossiper)` per §6. The distilled spec's
  /// `storage_proxy`/`gossiper` parameters are supplied at `construct`
  /// time in this crate (as the `write_path`/`failure_detector` trait
  /// objects); `start` begins the watchdog timer and returns once it is
  /// scheduled. Idempotent.
  pub async fn start(self: &Arc<Self>) {
    if self.started.swap(true, Ordering::AcqRel) {
      return;
    }
    let watchdog_period = self.config.watchdog_period;
    let shard = self.clone();
    let task = tokio::spawn(async move {
      let mut interval = tokio::time::interval(watchdog_period);
      loop {
        interval.tick().await;
        let snapshot: Vec<Arc<EndpointManager>> = shard.endpoints.lock().await.values().cloned().collect();
        shard.watchdog.tick(&snapshot).await;
      }
    });
    self.tasks.lock().await.push(task);
    info!("shard manager started");
  }

  /// Fully drains: stops the watchdog task, then stops every endpoint
  /// manager (writer gate close, sender drain, segment log release) in
  /// registration order, then releases this shard's store-factory
  /// handles. Idempotent per §8's "idempotent stop" law.
  pub async fn stop(&self) {
    for task in self.tasks.lock().await.drain(..) {
      task.abort();
    }
    self.watchdog.stop().await;

    let endpoints = self.endpoints.lock().await;
    for (endpoint, manager) in endpoints.iter() {
      manager.stop().await;
      self.store_factory.release(endpoint).await;
    }
    info!("shard manager stopped");
  }

  /// `store_hint(endpoint, schema, frozen_mutation, trace)` per §6. Checks
  /// the admission policy predicates first (so a policy refusal never
  /// creates an endpoint manager for an endpoint this shard will never
  /// hint to), then lazily resolves/creates the manager and delegates.
  pub async fn store_hint(
    self: &Arc<Self>,
    endpoint: EndpointId,
    schema_version: SchemaVersion,
    mutation: FrozenMutation,
    trace: Trace,
  ) -> bool {
    if !self.can_hint_for(&endpoint).await {
      self.stats.record_dropped();
      return false;
    }
    if self.too_many_in_flight_hints_for(&endpoint).await {
      self.stats.record_dropped();
      return false;
    }

    let manager = match self.endpoint_manager(&endpoint).await {
      Ok(manager) => manager,
      Err(err) => {
        tracing::warn!(endpoint = %endpoint, error = %err, "failed to open endpoint segment store");
        self.stats.record_error();
        return false;
      }
    };
    manager.store_hint(schema_version, mutation, trace).await
  }

  /// `can_hint_for(ep)` per §4.6: permitted by the datacenter allow-list
  /// and plausibly recoverable (seen within the hint window). A peer
  /// never seen by the failure detector is treated as recoverable (there
  /// is nothing yet to suppress).
  pub async fn can_hint_for(&self, endpoint: &EndpointId) -> bool {
    if !self.check_dc_for(endpoint).await {
      return false;
    }
    match self.failure_detector.last_seen(endpoint).await {
      Some(elapsed) => elapsed <= self.config.max_hint_window,
      None => true,
    }
  }

  /// `too_many_in_flight_hints_for(ep)` per §4.6: aggregate
  /// `size_of_hints_in_progress` exceeds the admission cap. The predicate
  /// is shard-wide by construction in the distilled spec's model (one
  /// in-progress budget per shard); this crate also offers
  /// [`Self::hints_in_progress_for`] for the per-endpoint gauge.
  pub async fn too_many_in_flight_hints_for(&self, _endpoint: &EndpointId) -> bool {
    self.size_of_hints_in_progress() as u64 >= self.config.max_size_of_hints_in_progress
  }

  /// `check_dc_for(ep)` per §4.6: the snitch's datacenter is in the
  /// configured hintable set. An empty set hints to all datacenters.
  pub async fn check_dc_for(&self, endpoint: &EndpointId) -> bool {
    if self.config.hints_all_datacenters() {
      return true;
    }
    let dc = self.snitch.datacenter(endpoint).await;
    self.config.hinted_dcs.iter().any(|allowed| allowed == &dc)
  }

  /// Shard-wide gauge: sum of `hints_in_progress` across every endpoint
  /// manager currently registered.
  pub fn size_of_hints_in_progress(&self) -> i64 {
    self.stats.snapshot().size_of_hints_in_progress
  }

  pub async fn hints_in_progress_for(&self, endpoint: &EndpointId) -> u64 {
    match self.endpoints.lock().await.get(endpoint) {
      Some(manager) => manager.hints_in_progress(),
      None => 0,
    }
  }

  /// Whether the endpoint's manager currently admits new hints — the flag
  /// the watchdog (C5) toggles. Distinct from [`Self::can_hint_for`],
  /// which is the datacenter/hint-window policy consulted before a
  /// manager even exists. An endpoint with no manager yet (no hint ever
  /// admitted for it) is reported as open, since the watchdog has never
  /// had cause to forbid it.
  pub async fn hint_admission_open_for(&self, endpoint: &EndpointId) -> bool {
    match self.endpoints.lock().await.get(endpoint) {
      Some(manager) => manager.can_hint(),
      None => true,
    }
  }

  pub fn stats(&self) -> ShardStatsSnapshot {
    self.stats.snapshot()
  }

  pub fn config(&self) -> &HintsConfig {
    &self.config
  }

  /// Reserved no-op per §9: cross-shard rebalancing of hint files is out
  /// of scope for this crate (§1 Non-goals); do not invent semantics here.
  pub fn rebalance(&self) {}

  async fn endpoint_manager(self: &Arc<Self>, endpoint: &EndpointId) -> crate::error::Result<Arc<EndpointManager>> {
    {
      let endpoints = self.endpoints.lock().await;
      if let Some(existing) = endpoints.get(endpoint) {
        return Ok(existing.clone());
      }
    }

    let store = self.store_factory.get_or_create(endpoint).await?;
    let manager = Arc::new(EndpointManager::new(
      endpoint.clone(),
      store,
      self.config.clone(),
      self.stats.clone(),
      self.send_semaphore.clone(),
      self.failure_detector.clone(),
      self.topology.clone(),
      self.write_path.clone(),
      self.schema_catalog.clone(),
    ));

    let mut endpoints = self.endpoints.lock().await;
    // Another task may have raced us to create the same endpoint's
    // manager; keep whichever won so there is exactly one live manager
    // per endpoint at any time.
    let manager = endpoints.entry(endpoint.clone()).or_insert(manager).clone();
    drop(endpoints);
    manager.start().await?;
    Ok(manager)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::collaborators::{RecordingWritePath, StaticFailureDetector, StaticSchemaCatalog, StaticSnitch, StaticTopology};
  use crate::types::{FrozenMutation, PeerState};

  fn fixture_config(dir: &std::path::Path) -> HintsConfig {
    HintsConfig::builder(dir).build()
  }

  async fn wait_until(pred: impl Fn() -> bool, timeout: std::time::Duration) {
    let start = std::time::Instant::now();
    while !pred() {
      if start.elapsed() > timeout {
        panic!("condition not reached within {timeout:?}");
      }
      tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
  }

  #[tokio::test]
  async fn store_hint_creates_endpoint_manager_lazily() {
    let dir = tempfile::tempdir().unwrap();
    let shard = Arc::new(ShardManager::construct(
      fixture_config(dir.path()),
      Arc::new(StaticFailureDetector::new()),
      Arc::new(StaticTopology::new(vec![])),
      Arc::new(RecordingWritePath::new()),
      Arc::new(StaticSnitch::new("dc1")),
      Arc::new(StaticSchemaCatalog::new()),
    ));
    shard.start().await;

    let endpoint = EndpointId::new("10.0.0.5");
    let mutation = FrozenMutation { table: "users".into(), partition_key: vec![1], payload: vec![0; 32] };
    let accepted = shard.clone().store_hint(endpoint.clone(), SchemaVersion(1), mutation, Trace::none()).await;
    assert!(accepted);
    wait_until(|| shard.stats().written == 1, std::time::Duration::from_secs(2)).await;
    shard.stop().await;
  }

  #[tokio::test]
  async fn store_hint_refused_outside_hinted_datacenter() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture_config(dir.path());
    config.hinted_dcs = vec!["dc-allowed".to_string()];
    let shard = Arc::new(ShardManager::construct(
      config,
      Arc::new(StaticFailureDetector::new()),
      Arc::new(StaticTopology::new(vec![])),
      Arc::new(RecordingWritePath::new()),
      Arc::new(StaticSnitch::new("dc-other")),
      Arc::new(StaticSchemaCatalog::new()),
    ));
    shard.start().await;

    let endpoint = EndpointId::new("10.0.0.6");
    let mutation = FrozenMutation { table: "users".into(), partition_key: vec![1], payload: vec![0; 8] };
    let accepted = shard.clone().store_hint(endpoint, SchemaVersion(1), mutation, Trace::none()).await;
    assert!(!accepted);
    assert_eq!(shard.stats().dropped, 1);
    shard.stop().await;
  }

  #[tokio::test]
  async fn store_hint_refused_for_peer_outside_hint_window() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fixture_config(dir.path());
    config.max_hint_window = std::time::Duration::from_secs(0);
    let fd = Arc::new(StaticFailureDetector::new());
    let endpoint = EndpointId::new("10.0.0.7");
    fd.set_state(endpoint.clone(), PeerState::Normal);
    // `set_state` stamps `last_seen` at "now"; with a zero-width window,
    // any positive elapsed time already exceeds it.
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let shard = Arc::new(ShardManager::construct(
      config,
      fd,
      Arc::new(StaticTopology::new(vec![])),
      Arc::new(RecordingWritePath::new()),
      Arc::new(StaticSnitch::new("dc1")),
      Arc::new(StaticSchemaCatalog::new()),
    ));
    shard.start().await;

    let mutation = FrozenMutation { table: "users".into(), partition_key: vec![1], payload: vec![0; 8] };
    let accepted = shard.clone().store_hint(endpoint, SchemaVersion(1), mutation, Trace::none()).await;
    assert!(!accepted);
    shard.stop().await;
  }

  #[tokio::test]
  async fn rebalance_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let shard = ShardManager::construct(
      fixture_config(dir.path()),
      Arc::new(StaticFailureDetector::new()),
      Arc::new(StaticTopology::new(vec![])),
      Arc::new(RecordingWritePath::new()),
      Arc::new(StaticSnitch::new("dc1")),
      Arc::new(StaticSchemaCatalog::new()),
    );
    shard.rebalance();
  }
}
