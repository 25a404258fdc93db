//! Fixed little-endian layouts for the attribute arrays kept in the blob
//! store.
//!
//! | type | bytes per element |
//! |------|-------------------|
//! | `Vec3` | 12 (3 × f32) |
//! | `DVec3` | 24 (3 × f64) |
//! | `C4b` | 4 (r, g, b, a) |
//! | `i32` | 4 |
//! | `u8` | 1 |

use glam::{DVec3, Vec3};

use crate::color::C4b;
use crate::error::{OctreeError, Result};

#[inline]
fn array<const N: usize>(bytes: &[u8]) -> [u8; N] {
  let mut a = [0u8; N];
  a.copy_from_slice(bytes);
  a
}

fn check_len(key: &str, bytes: &[u8], element: usize, what: &str) -> Result<()> {
  if bytes.len() % element != 0 {
    return Err(OctreeError::decode(
      key,
      format!("{} bytes is not a whole number of {what} elements", bytes.len()),
    ));
  }
  Ok(())
}

pub fn encode_v3f(values: &[Vec3]) -> Vec<u8> {
  let mut out = Vec::with_capacity(values.len() * 12);
  for v in values {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
  }
  out
}

pub fn decode_v3f(key: &str, bytes: &[u8]) -> Result<Vec<Vec3>> {
  check_len(key, bytes, 12, "V3f")?;
  Ok(
    bytes
      .chunks_exact(12)
      .map(|c| {
        Vec3::new(
          f32::from_le_bytes(array(&c[0..4])),
          f32::from_le_bytes(array(&c[4..8])),
          f32::from_le_bytes(array(&c[8..12])),
        )
      })
      .collect(),
  )
}

pub fn encode_v3d(values: &[DVec3]) -> Vec<u8> {
  let mut out = Vec::with_capacity(values.len() * 24);
  for v in values {
    out.extend_from_slice(&v.x.to_le_bytes());
    out.extend_from_slice(&v.y.to_le_bytes());
    out.extend_from_slice(&v.z.to_le_bytes());
  }
  out
}

pub fn decode_v3d(key: &str, bytes: &[u8]) -> Result<Vec<DVec3>> {
  check_len(key, bytes, 24, "V3d")?;
  Ok(
    bytes
      .chunks_exact(24)
      .map(|c| {
        DVec3::new(
          f64::from_le_bytes(array(&c[0..8])),
          f64::from_le_bytes(array(&c[8..16])),
          f64::from_le_bytes(array(&c[16..24])),
        )
      })
      .collect(),
  )
}

pub fn encode_c4b(values: &[C4b]) -> Vec<u8> {
  bytemuck::cast_slice(values).to_vec()
}

pub fn decode_c4b(key: &str, bytes: &[u8]) -> Result<Vec<C4b>> {
  check_len(key, bytes, 4, "C4b")?;
  Ok(bytemuck::cast_slice(bytes).to_vec())
}

pub fn encode_i32(values: &[i32]) -> Vec<u8> {
  values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_i32(key: &str, bytes: &[u8]) -> Result<Vec<i32>> {
  check_len(key, bytes, 4, "i32")?;
  Ok(
    bytes
      .chunks_exact(4)
      .map(|c| i32::from_le_bytes(array(c)))
      .collect(),
  )
}

/// Little-endian reader over a record payload. Every read fails with a
/// `Decode` error naming `key` when the buffer runs short.
pub(crate) struct Reader<'a> {
  key: &'a str,
  bytes: &'a [u8],
  pos: usize,
}

impl<'a> Reader<'a> {
  pub fn new(key: &'a str, bytes: &'a [u8]) -> Self {
    Self { key, bytes, pos: 0 }
  }

  pub fn is_empty(&self) -> bool {
    self.pos >= self.bytes.len()
  }

  pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
    let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
    let Some(end) = end else {
      return Err(OctreeError::decode(
        self.key,
        format!("truncated record: need {n} bytes at offset {}", self.pos),
      ));
    };
    let slice = &self.bytes[self.pos..end];
    self.pos = end;
    Ok(slice)
  }

  pub fn u16(&mut self) -> Result<u16> {
    Ok(u16::from_le_bytes(array(self.take(2)?)))
  }

  pub fn u32(&mut self) -> Result<u32> {
    Ok(u32::from_le_bytes(array(self.take(4)?)))
  }

  pub fn i32(&mut self) -> Result<i32> {
    Ok(i32::from_le_bytes(array(self.take(4)?)))
  }

  pub fn u64(&mut self) -> Result<u64> {
    Ok(u64::from_le_bytes(array(self.take(8)?)))
  }

  pub fn i64(&mut self) -> Result<i64> {
    Ok(i64::from_le_bytes(array(self.take(8)?)))
  }

  pub fn f32(&mut self) -> Result<f32> {
    Ok(f32::from_le_bytes(array(self.take(4)?)))
  }

  pub fn f64(&mut self) -> Result<f64> {
    Ok(f64::from_le_bytes(array(self.take(8)?)))
  }

  pub fn u128(&mut self) -> Result<u128> {
    Ok(u128::from_le_bytes(array(self.take(16)?)))
  }

  pub fn vec3(&mut self) -> Result<Vec3> {
    Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
  }

  pub fn dvec3(&mut self) -> Result<DVec3> {
    Ok(DVec3::new(self.f64()?, self.f64()?, self.f64()?))
  }
}
