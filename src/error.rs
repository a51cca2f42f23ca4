//! Crate-wide error type.
//!
//! Mirrors the shape of the teacher crate's error enum: one `thiserror`
//! derive, IO and codec failures wrapped with context, plus domain-specific
//! variants for the things that can actually go wrong in this crate.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HintError {
  #[error("io error at {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("segment version mismatch: file requires {required}, reader supports {current}")]
  VersionMismatch { required: u16, current: u16 },

  #[error("segment frame checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
  CrcMismatch { stored: u32, computed: u32 },

  #[error("segment frame truncated or corrupt at offset {offset} in {path}")]
  CorruptFrame { path: PathBuf, offset: u64 },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("lock poisoned or unavailable for {0}")]
  LockFailed(String),

  #[error("admission refused for endpoint {endpoint}: {reason}")]
  AdmissionRefused { endpoint: String, reason: &'static str },

  #[error("no column mapping for table {table} at schema version {schema_version}")]
  SchemaNotFound { table: String, schema_version: u32 },

  #[error("send failed for endpoint {endpoint}: {reason}")]
  SendFailed { endpoint: String, reason: String },
}

impl HintError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    HintError::Io { path: path.into(), source }
  }
}

pub type Result<T> = std::result::Result<T, HintError>;
