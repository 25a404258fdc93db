//! Settings file for the octree tool.

use anyhow::{Context, Result};
use point_octree::DEFAULT_CACHE_BYTES;
use serde::Deserialize;
use std::path::Path;

/// Runtime settings, all optional in the TOML file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Settings {
	/// Byte budget of the node cache.
	pub cache_size_bytes: usize,
	/// Worker threads; 0 uses all cores.
	pub max_degree_of_parallelism: usize,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			cache_size_bytes: DEFAULT_CACHE_BYTES,
			max_degree_of_parallelism: 0,
		}
	}
}

impl Settings {
	/// Load settings from a TOML file.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read settings file: {}", path.display()))?;
		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self> {
		let settings: Settings =
			toml::from_str(content).with_context(|| "Failed to parse settings TOML")?;

		if settings.cache_size_bytes == 0 {
			anyhow::bail!("cache_size_bytes must be positive");
		}

		Ok(settings)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_empty_file_uses_defaults() {
		let settings = Settings::parse("").unwrap();
		assert_eq!(settings.cache_size_bytes, DEFAULT_CACHE_BYTES);
		assert_eq!(settings.max_degree_of_parallelism, 0);
	}

	#[test]
	fn test_values_are_read() {
		let settings =
			Settings::parse("cache_size_bytes = 1024\nmax_degree_of_parallelism = 3\n").unwrap();
		assert_eq!(settings.cache_size_bytes, 1024);
		assert_eq!(settings.max_degree_of_parallelism, 3);
	}

	#[test]
	fn test_zero_cache_is_rejected() {
		assert!(Settings::parse("cache_size_bytes = 0").is_err());
	}

	#[test]
	fn test_load_reports_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let err = Settings::load(&dir.path().join("missing.toml")).unwrap_err();
		assert!(err.to_string().contains("missing.toml"));
	}
}
