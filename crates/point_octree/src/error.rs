//! Error taxonomy shared by every storage and octree operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OctreeError>;

/// Failure of a storage or octree operation.
///
/// Configuration and invariant errors are never retried. Plain absence of a
/// looked-up value is `Ok(None)` at the API level; `NotFound` is reserved for
/// ids an operation required to exist.
#[derive(Error, Debug)]
pub enum OctreeError {
  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("invariant violated: {0}")]
  Invariant(String),

  #[error("no value stored under key {key}")]
  NotFound { key: String },

  #[error("operation was cancelled")]
  Cancelled,

  #[error("failed to decode value stored under key {key}: {reason}")]
  Decode { key: String, reason: String },

  #[error("blob store I/O failed")]
  Io(#[from] std::io::Error),

  #[error("invalid point set record")]
  Json(#[from] serde_json::Error),
}

impl OctreeError {
  pub fn config(message: impl Into<String>) -> Self {
    Self::Config(message.into())
  }

  pub fn invariant(message: impl Into<String>) -> Self {
    Self::Invariant(message.into())
  }

  pub fn decode(key: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::Decode {
      key: key.into(),
      reason: reason.into(),
    }
  }

  /// True for cooperative cancellation, which callers treat differently from
  /// failure.
  pub fn is_cancelled(&self) -> bool {
    matches!(self, Self::Cancelled)
  }
}
