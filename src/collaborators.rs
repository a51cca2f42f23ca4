//! Trait boundaries for the systems this crate treats as black boxes: the
//! gossip/failure-detector service, the replication/topology service, the
//! mutation write path, and the snitch. Each ships a process-local default
//! implementation suitable for tests and single-process deployment — not a
//! networked production implementation.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{ColumnMapping, EndpointId, FrozenMutation, PeerState, SchemaVersion};

/// Read-only consultation of peer liveness, modeled on a gossip-backed
/// failure detector.
#[async_trait]
pub trait FailureDetector: Send + Sync {
  async fn is_alive(&self, endpoint: &EndpointId) -> bool;
  async fn last_seen(&self, endpoint: &EndpointId) -> Option<Duration>;
  async fn state(&self, endpoint: &EndpointId) -> PeerState;
}

/// Consulted for the current natural endpoints of a mutation's partition
/// key, so the sender can detect ownership changes between capture and
/// replay.
#[async_trait]
pub trait TopologyService: Send + Sync {
  async fn natural_endpoints(&self, table: &str, partition_key: &[u8]) -> Vec<EndpointId>;
}

/// Consistency level requested on the replay path, per §4.3's dispatch
/// rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConsistency {
  /// Target exactly one endpoint; used when the original destination is
  /// still a natural replica.
  One,
  /// Let the write path pick any current replica; used once ownership has
  /// moved on from the original destination.
  Any,
}

/// The coordinator's mutation send path, used as a single future-returning
/// call in both of its consistency modes.
#[async_trait]
pub trait WritePath: Send + Sync {
  async fn mutate_directly(&self, endpoint: &EndpointId, mutation: &FrozenMutation) -> Result<()>;
  async fn mutate_any(&self, mutation: &FrozenMutation) -> Result<()>;
}

/// Maps an endpoint to its datacenter, for the hintable-DC allow-list
/// check.
#[async_trait]
pub trait Snitch: Send + Sync {
  async fn datacenter(&self, endpoint: &EndpointId) -> String;
}

/// Resolves a table's column mapping at a given schema version, so the
/// sender can decode a hint frozen under an older schema before replay.
/// The sender caches the result per replay file rather than calling this
/// once per entry.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
  async fn column_mapping(&self, table: &str, schema_version: SchemaVersion) -> Result<ColumnMapping>;
}

// ============================================================================
// Process-local default implementations (tests, single-process deployment)
// ============================================================================

/// In-memory failure detector driven by explicit test fixtures: callers
/// push state transitions, there is no background gossip.
pub struct StaticFailureDetector {
  state: RwLock<HashMap<EndpointId, (PeerState, Instant)>>,
}

impl StaticFailureDetector {
  pub fn new() -> Self {
    StaticFailureDetector { state: RwLock::new(HashMap::new()) }
  }

  pub fn set_state(&self, endpoint: EndpointId, state: PeerState) {
    self.state.write().unwrap().insert(endpoint, (state, Instant::now()));
  }
}

impl Default for StaticFailureDetector {
  fn default() -> Self {
    StaticFailureDetector::new()
  }
}

#[async_trait]
impl FailureDetector for StaticFailureDetector {
  async fn is_alive(&self, endpoint: &EndpointId) -> bool {
    matches!(
      self.state.read().unwrap().get(endpoint).map(|(s, _)| *s),
      Some(PeerState::Normal) | None
    )
  }

  async fn last_seen(&self, endpoint: &EndpointId) -> Option<Duration> {
    self.state.read().unwrap().get(endpoint).map(|(_, at)| at.elapsed())
  }

  async fn state(&self, endpoint: &EndpointId) -> PeerState {
    self.state.read().unwrap().get(endpoint).map(|(s, _)| *s).unwrap_or(PeerState::Normal)
  }
}

/// In-memory topology: a fixed endpoint -> owners map, overridable per
/// table/partition-key pair for tests that exercise retargeting.
pub struct StaticTopology {
  default_owners: RwLock<Vec<EndpointId>>,
  overrides: RwLock<HashMap<(String, Vec<u8>), Vec<EndpointId>>>,
}

impl StaticTopology {
  pub fn new(default_owners: Vec<EndpointId>) -> Self {
    StaticTopology { default_owners: RwLock::new(default_owners), overrides: RwLock::new(HashMap::new()) }
  }

  pub fn set_owners(&self, table: impl Into<String>, partition_key: impl Into<Vec<u8>>, owners: Vec<EndpointId>) {
    self.overrides.write().unwrap().insert((table.into(), partition_key.into()), owners);
  }

  pub fn set_default_owners(&self, owners: Vec<EndpointId>) {
    *self.default_owners.write().unwrap() = owners;
  }
}

#[async_trait]
impl TopologyService for StaticTopology {
  async fn natural_endpoints(&self, table: &str, partition_key: &[u8]) -> Vec<EndpointId> {
    let key = (table.to_string(), partition_key.to_vec());
    if let Some(owners) = self.overrides.read().unwrap().get(&key) {
      return owners.clone();
    }
    self.default_owners.read().unwrap().clone()
  }
}

/// In-memory write path that records every dispatched mutation instead of
/// sending it anywhere. Tests observe `directly`/`any` to assert dispatch
/// routing.
pub struct RecordingWritePath {
  pub directly: RwLock<Vec<(EndpointId, FrozenMutation)>>,
  pub any: RwLock<Vec<FrozenMutation>>,
  fail_next: RwLock<usize>,
}

impl RecordingWritePath {
  pub fn new() -> Self {
    RecordingWritePath { directly: RwLock::new(Vec::new()), any: RwLock::new(Vec::new()), fail_next: RwLock::new(0) }
  }

  /// Makes the next `n` dispatch calls (of either kind) return an error.
  pub fn fail_next(&self, n: usize) {
    *self.fail_next.write().unwrap() = n;
  }

  fn take_failure(&self) -> bool {
    let mut remaining = self.fail_next.write().unwrap();
    if *remaining > 0 {
      *remaining -= 1;
      true
    } else {
      false
    }
  }
}

impl Default for RecordingWritePath {
  fn default() -> Self {
    RecordingWritePath::new()
  }
}

#[async_trait]
impl WritePath for RecordingWritePath {
  async fn mutate_directly(&self, endpoint: &EndpointId, mutation: &FrozenMutation) -> Result<()> {
    if self.take_failure() {
      return Err(crate::error::HintError::SendFailed {
        endpoint: endpoint.to_string(),
        reason: "synthetic failure".into(),
      });
    }
    self.directly.write().unwrap().push((endpoint.clone(), mutation.clone()));
    Ok(())
  }

  async fn mutate_any(&self, mutation: &FrozenMutation) -> Result<()> {
    if self.take_failure() {
      return Err(crate::error::HintError::SendFailed { endpoint: "any".into(), reason: "synthetic failure".into() });
    }
    self.any.write().unwrap().push(mutation.clone());
    Ok(())
  }
}

/// Single-datacenter snitch; suffices for process-local deployment and
/// tests that do not exercise the DC allow-list.
pub struct StaticSnitch {
  dc: String,
}

impl StaticSnitch {
  pub fn new(dc: impl Into<String>) -> Self {
    StaticSnitch { dc: dc.into() }
  }
}

#[async_trait]
impl Snitch for StaticSnitch {
  async fn datacenter(&self, _endpoint: &EndpointId) -> String {
    self.dc.clone()
  }
}

/// Schema catalog that reports a fixed column mapping for every table and
/// schema version; suffices for single-process deployment where no real
/// schema migration history needs consulting.
pub struct StaticSchemaCatalog {
  mapping: ColumnMapping,
}

impl StaticSchemaCatalog {
  pub fn new() -> Self {
    StaticSchemaCatalog { mapping: ColumnMapping(Vec::new()) }
  }

  pub fn with_columns(columns: Vec<String>) -> Self {
    StaticSchemaCatalog { mapping: ColumnMapping(columns) }
  }
}

impl Default for StaticSchemaCatalog {
  fn default() -> Self {
    StaticSchemaCatalog::new()
  }
}

#[async_trait]
impl SchemaCatalog for StaticSchemaCatalog {
  async fn column_mapping(&self, _table: &str, _schema_version: SchemaVersion) -> Result<ColumnMapping> {
    Ok(self.mapping.clone())
  }
}
