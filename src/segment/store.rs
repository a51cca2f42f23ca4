//! Segment store factory (C1): maps an endpoint to its active segment log,
//! creating the endpoint's directory and first segment on demand.
//!
//! Guarantees at-most-one construction per endpoint under concurrent
//! lookup — the first caller to reach [`SegmentStoreFactory::get_or_create`]
//! for a key builds the entry; later callers observe the same handle.
//! Consumers hold a reference-counted [`EndpointSegmentStore`]; when the
//! last handle drops the map entry is reclaimed via
//! [`SegmentStoreFactory::release`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::RwLock as AsyncRwLock;

use crate::error::Result;
use crate::types::{EndpointId, ReplayPosition, SchemaVersion};

use super::log::SegmentLog;
use super::naming::{list_segment_files, segment_path};

/// Owns the active segment for one endpoint directory, rotating to a new
/// segment when the active one reaches the configured size.
pub struct EndpointSegmentStore {
  dir: PathBuf,
  active: AsyncRwLock<ActiveSegment>,
  next_seq: AtomicU64,
}

struct ActiveSegment {
  seq: u64,
  log: Arc<SegmentLog>,
}

impl EndpointSegmentStore {
  fn open(dir: PathBuf) -> Result<Self> {
    std::fs::create_dir_all(&dir).map_err(|e| crate::error::HintError::io(&dir, e))?;
    let existing = list_segment_files(&dir).map_err(|e| crate::error::HintError::io(&dir, e))?;
    let next_seq = existing.last().map(|(seq, _)| seq + 1).unwrap_or(0);
    let active_seq = existing.last().map(|(seq, _)| *seq).unwrap_or(0);
    let log = Arc::new(SegmentLog::open_or_create_append(segment_path(&dir, active_seq))?);
    Ok(EndpointSegmentStore {
      dir,
      active: AsyncRwLock::new(ActiveSegment { seq: active_seq, log }),
      next_seq: AtomicU64::new(next_seq.max(active_seq + 1)),
    })
  }

  pub fn dir(&self) -> &std::path::Path {
    &self.dir
  }

  /// Appends one hint to the active segment. If the append crosses
  /// `segment_max_bytes`, seals the now-full segment and opens the next
  /// one, returning the sealed segment's path so the caller (C2) can hand
  /// it to the replay sender.
  pub async fn append(
    &self,
    schema_version: SchemaVersion,
    table: &str,
    payload: &[u8],
    segment_max_bytes: u64,
  ) -> Result<(ReplayPosition, Option<PathBuf>)> {
    let guard = self.active.read().await;
    let rp = guard.log.append(schema_version, table, payload)?;
    let should_rotate = guard.log.size_bytes() >= segment_max_bytes;
    let sealed_path = guard.log.path().to_path_buf();
    drop(guard);

    if !should_rotate {
      return Ok((rp, None));
    }

    let mut guard = self.active.write().await;
    // Another task may have already rotated while we waited for the write
    // lock; only rotate if the active segment is still the one we sealed.
    if guard.log.path() == sealed_path {
      guard.log.sync()?;
      let next_seq = self.next_seq.fetch_add(1, Ordering::AcqRel);
      let next_log = Arc::new(SegmentLog::open_or_create_append(segment_path(&self.dir, next_seq))?);
      guard.seq = next_seq;
      guard.log = next_log;
      return Ok((rp, Some(sealed_path)));
    }
    Ok((rp, None))
  }

  /// Forces a durability barrier on the active segment.
  pub async fn sync_active(&self) -> Result<()> {
    self.active.read().await.log.sync()
  }

  pub async fn active_seq(&self) -> u64 {
    self.active.read().await.seq
  }

  /// Lists every segment file currently on disk, ascending.
  pub fn list_segments(&self) -> Result<Vec<PathBuf>> {
    Ok(list_segment_files(&self.dir).map_err(|e| crate::error::HintError::io(&self.dir, e))?.into_iter().map(|(_, p)| p).collect())
  }
}

/// Factory mapping endpoint identifier -> segment store, with at-most-once
/// construction per key.
pub struct SegmentStoreFactory {
  root: PathBuf,
  stores: AsyncMutex<HashMap<EndpointId, Arc<EndpointSegmentStore>>>,
}

impl SegmentStoreFactory {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    SegmentStoreFactory { root: root.into(), stores: AsyncMutex::new(HashMap::new()) }
  }

  pub async fn get_or_create(&self, endpoint: &EndpointId) -> Result<Arc<EndpointSegmentStore>> {
    let mut stores = self.stores.lock().await;
    if let Some(existing) = stores.get(endpoint) {
      return Ok(existing.clone());
    }
    let dir = self.root.join(endpoint.as_str());
    let store = Arc::new(EndpointSegmentStore::open(dir)?);
    stores.insert(endpoint.clone(), store.clone());
    Ok(store)
  }

  /// Drops this factory's handle to the endpoint's store. If no other
  /// handle remains (the common case, since the endpoint manager is the
  /// only other holder) the entry is removed and the segment log closes
  /// when the last `Arc` drops.
  pub async fn release(&self, endpoint: &EndpointId) {
    let mut stores = self.stores.lock().await;
    if let Some(store) = stores.get(endpoint) {
      if Arc::strong_count(store) <= 1 {
        stores.remove(endpoint);
      }
    }
  }
}
