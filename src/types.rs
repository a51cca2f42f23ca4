//! Shared value types used across the hint lifecycle engine.

use std::fmt;

/// Opaque network address of a replica. Used as a map key and, in string
/// form, as a directory name under the shard's hints root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(String);

impl EndpointId {
  pub fn new(raw: impl Into<String>) -> Self {
    EndpointId(raw.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for EndpointId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for EndpointId {
  fn from(s: &str) -> Self {
    EndpointId::new(s)
  }
}

impl From<String> for EndpointId {
  fn from(s: String) -> Self {
    EndpointId::new(s)
  }
}

/// A total order over hints within a single segment, assigned by the
/// segment log at append time. Deduplicates in-flight entries during a
/// single file-replay pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplayPosition(pub u64);

impl ReplayPosition {
  pub const ZERO: ReplayPosition = ReplayPosition(0);

  pub fn next(self) -> ReplayPosition {
    ReplayPosition(self.0 + 1)
  }
}

impl fmt::Display for ReplayPosition {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// Identifies the schema version a hint's mutation was frozen against, so
/// the sender can look up the correct column mapping before replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SchemaVersion(pub u32);

/// A mutation captured at write time, already serialized to bytes. The
/// writer never interprets the payload; only the sender's per-file
/// column-mapping cache resolves it (via `collaborators::SchemaCatalog`)
/// before dispatch.
#[derive(Debug, Clone)]
pub struct FrozenMutation {
  pub table: String,
  pub partition_key: Vec<u8>,
  pub payload: Vec<u8>,
}

/// The ordered column names a schema version maps a table's encoded
/// payload onto. Opaque to this crate beyond its length and identity;
/// resolved through `collaborators::SchemaCatalog` and cached per replay
/// file since a file only ever spans a handful of schema versions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping(pub Vec<String>);

impl FrozenMutation {
  pub fn size(&self) -> usize {
    self.partition_key.len() + self.payload.len()
  }
}

/// Correlation handle threaded through `store_hint` for structured logging.
/// Carried as an opaque value; this crate only ever records it into a
/// tracing span field.
#[derive(Debug, Clone, Default)]
pub struct Trace(pub Option<String>);

impl Trace {
  pub fn none() -> Self {
    Trace(None)
  }

  pub fn as_str(&self) -> &str {
    self.0.as_deref().unwrap_or("-")
  }
}

/// Liveness/ring state of a peer as reported by the failure detector and
/// topology service. Any state other than `Normal` causes the sender to
/// drain the endpoint's hints by discard rather than delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
  Normal,
  Leaving,
  Left,
  Joining,
  Unknown,
}

impl PeerState {
  pub fn is_normal(self) -> bool {
    matches!(self, PeerState::Normal)
  }
}
