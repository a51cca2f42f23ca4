//! hinted-handoff: the per-shard hint lifecycle engine for a sharded,
//! distributed database.
//!
//! When a replica is unavailable at write time, the coordinator records
//! the intended mutation as a durable *hint* on local disk and later
//! replays it once the replica becomes reachable again. This crate
//! implements the store-side admission and write path, the on-disk
//! segment layout, the per-endpoint replay state machine, and the
//! shard-wide disk-space watchdog that keeps a single slow peer from
//! exhausting shard storage.
//!
//! # Architecture
//!
//! - [`shard`] — the public entry point ([`ShardManager`]): lazily creates
//!   one [`manager::EndpointManager`] per destination, owns the shared
//!   send semaphore and the [`watchdog::SpaceWatchdog`], and exposes the
//!   admission policy predicates the write path consults.
//! - [`manager`] — a facade pairing one [`writer::EndpointHintWriter`]
//!   with one [`sender::EndpointReplaySender`] for a single destination.
//! - [`writer`] — admission, write accounting, and flush/rotation
//!   signalling (C2).
//! - [`sender`] — the replay state machine: throttled send, topology
//!   retargeting, grace expiry, segment deletion (C3).
//! - [`segment`] — the append-only segment log, its CRC-framed record
//!   codec, and the per-endpoint store factory (C1).
//! - [`watchdog`] — the shard-wide disk audit (C5).
//! - [`collaborators`] — trait boundaries for the gossip/failure-detector,
//!   topology, write-path, and snitch services this crate treats as
//!   external systems, plus process-local default implementations for
//!   tests and single-process deployment.
//! - [`config`] — the immutable [`config::HintsConfig`] record and its
//!   builder.
//! - [`metrics`] — the [`metrics::ShardStats`] counters and a Prometheus
//!   text-exposition renderer.
//!
//! # Non-goals
//!
//! Cross-shard rebalancing of hint files ([`ShardManager::rebalance`] is
//! a stub), cross-datacenter ordering, synchronous delivery, and
//! deduplication across coordinators are all explicitly out of scope —
//! see the design document for the full rationale.

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod gate;
pub mod manager;
pub mod metrics;
pub mod sender;
pub mod segment;
pub mod shard;
pub mod types;
pub mod watchdog;
pub mod writer;

pub use config::{HintsConfig, HintsConfigBuilder};
pub use error::{HintError, Result};
pub use shard::ShardManager;
pub use types::{EndpointId, FrozenMutation, PeerState, ReplayPosition, SchemaVersion, Trace};
