//! CLI configuration management.
//!
//! Precedence, lowest first: defaults, JSON config file (`--config` or the
//! user config directory), `SPLAT_TILES_*` environment variables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use splat_tiles::BinningConfig;

/// Synthetic scene parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Number of splats to generate.
    pub splats: usize,
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels.
    pub height: u32,
    /// Seed for the scene generator.
    pub seed: u64,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            splats: 100_000,
            width: 1280,
            height: 720,
            seed: 42,
        }
    }
}

/// Application-wide configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Pipeline settings passed to the binner.
    pub binning: BinningConfig,
    /// Scene used by `bench` and `verify`.
    pub scene: SceneConfig,
}

impl Config {
    /// Load configuration from an explicit file, the user config file and
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        // Load .env file if present (silently ignore if missing)
        let _ = dotenvy::dotenv();

        let file = match path {
            Some(p) => Some(p.to_path_buf()),
            None => Self::config_file_path().filter(|p| p.exists()),
        };

        let mut config = match file {
            Some(config_path) => {
                let contents = std::fs::read_to_string(&config_path).with_context(|| {
                    format!("Failed to read config from {}", config_path.display())
                })?;
                serde_json::from_str(&contents).with_context(|| {
                    format!("Failed to parse config file {}", config_path.display())
                })?
            }
            None => Self::default(),
        };

        config.apply_env()?;
        config
            .binning
            .validate()
            .context("Invalid binning configuration")?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<()> {
        fn var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
        where
            T::Err: std::fmt::Display,
        {
            match std::env::var(name) {
                Ok(raw) => raw
                    .parse()
                    .map(Some)
                    .map_err(|e| anyhow::anyhow!("{name}={raw}: {e}")),
                Err(_) => Ok(None),
            }
        }

        let b = &mut self.binning;
        if let Some(v) = var("SPLAT_TILES_TILE_SIZE")? {
            b.tile_size = v;
        }
        if let Some(v) = var("SPLAT_TILES_MAX_PRIMITIVES")? {
            b.capacity.max_primitives = v;
        }
        if let Some(v) = var("SPLAT_TILES_MAX_PAIRS")? {
            b.capacity.max_pairs = v;
        }
        if let Some(v) = var("SPLAT_TILES_MAX_TILES")? {
            b.capacity.max_tiles = v;
        }
        if let Some(v) = var("SPLAT_TILES_MAX_FOOTPRINT")? {
            b.max_footprint = v;
        }
        if let Some(v) = var("SPLAT_TILES_RADIX_BITS")? {
            b.radix_bits = v;
        }
        if let Some(v) = var("SPLAT_TILES_SORT")? {
            b.sort = v;
        }
        if let Some(v) = var("SPLAT_TILES_CHECK_BOUNDS")? {
            b.check_bounds = v;
        }
        if let Some(v) = var("SPLAT_TILES_WORKERS")? {
            b.workers = v;
        }
        if let Some(v) = var("SPLAT_TILES_PROFILE_GPU")? {
            b.profile_gpu = v;
        }
        if let Some(v) = var("SPLAT_TILES_SEED")? {
            self.scene.seed = v;
        }
        Ok(())
    }

    /// Get the path to the user config file.
    pub fn config_file_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "splat-tiles", "splat-tiles")
            .map(|dirs| dirs.config_dir().join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config =
            serde_json::from_str(r#"{ "binning": { "radix_bits": 4 }, "scene": { "splats": 10 } }"#)
                .unwrap();
        assert_eq!(config.binning.radix_bits, 4);
        assert_eq!(config.binning.tile_size, 16);
        assert_eq!(config.scene.splats, 10);
        assert_eq!(config.scene.width, 1280);
    }
}
