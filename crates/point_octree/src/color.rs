//! C4b - 8-bit RGBA point color.

use bytemuck::{Pod, Zeroable};

/// RGBA color stored as 4 consecutive bytes.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct C4b {
  pub r: u8,
  pub g: u8,
  pub b: u8,
  pub a: u8,
}

impl C4b {
  pub const WHITE: C4b = C4b::new(255, 255, 255, 255);

  pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
    Self { r, g, b, a }
  }
}
