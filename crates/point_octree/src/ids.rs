//! NodeId - opaque content address of a persisted value.

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::error::OctreeError;

/// Random (v4) UUID. Its hyphenated text form is the storage key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(Uuid);

impl NodeId {
  /// Reserved value used on the wire for an empty subnode slot.
  pub const NIL: NodeId = NodeId(Uuid::nil());

  /// Generate a fresh random id.
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }

  pub fn from_u128(raw: u128) -> Self {
    Self(Uuid::from_u128(raw))
  }

  pub fn as_u128(&self) -> u128 {
    self.0.as_u128()
  }

  pub fn is_nil(&self) -> bool {
    self.0.is_nil()
  }

  /// 16-byte wire form: the 128-bit value, little-endian.
  pub fn to_le_bytes(&self) -> [u8; 16] {
    self.0.as_u128().to_le_bytes()
  }

  pub fn from_le_bytes(bytes: [u8; 16]) -> Self {
    Self::from_u128(u128::from_le_bytes(bytes))
  }

  /// Storage key of the value with this id.
  pub fn key(&self) -> String {
    self.to_string()
  }
}

impl Default for NodeId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    fmt::Display::fmt(&self.0.hyphenated(), f)
  }
}

impl fmt::Debug for NodeId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NodeId({self})")
  }
}

impl FromStr for NodeId {
  type Err = OctreeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Uuid::parse_str(s)
      .map(Self)
      .map_err(|e| OctreeError::decode(s, e.to_string()))
  }
}
