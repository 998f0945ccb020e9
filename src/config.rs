//! Configuration management for BkSync

use crate::error::{Error, Result};
use crate::signature::{block_size_within, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE, TARGET_BLOCK_COUNT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default minimum fraction of the new file that must be reused from the base
pub const DEFAULT_MIN_MATCH_RATIO: f64 = 0.8;

/// Main configuration struct
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // ==================== Block Size Policy ====================

    /// Fixed block size in bytes (None = derive from the base file size)
    pub block_size: Option<usize>,

    /// Smallest block size the adaptive policy picks
    pub min_block_size: usize,

    /// Largest block size the adaptive policy picks
    pub max_block_size: usize,

    /// Number of blocks the adaptive policy aims for
    pub target_block_count: u64,

    // ==================== Transfer Policy ====================

    /// Match ratio below which a full upload is preferred
    pub min_match_ratio: f64,

    // ==================== Files ====================

    /// Directory for temporary delta and reconstructed files
    pub work_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_size: None,
            min_block_size: MIN_BLOCK_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
            target_block_count: TARGET_BLOCK_COUNT,
            min_match_ratio: DEFAULT_MIN_MATCH_RATIO,
            work_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::io("reading config", e))?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default config file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io("creating config dir", e))?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::config(format!("serializing config: {}", e)))?;
        std::fs::write(path, contents).map_err(|e| Error::io("writing config", e))?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("bksync").join("config.toml"))
            .ok_or_else(|| Error::config("could not determine config directory"))
    }

    /// Reject settings the engine cannot work with
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_match_ratio) {
            return Err(Error::config(format!(
                "min_match_ratio must be within [0, 1], got {}",
                self.min_match_ratio
            )));
        }
        if self.min_block_size == 0 || self.min_block_size > self.max_block_size {
            return Err(Error::config(format!(
                "invalid block size bounds [{}, {}]",
                self.min_block_size, self.max_block_size
            )));
        }
        if self.max_block_size > u32::MAX as usize {
            return Err(Error::config("max_block_size must fit in 32 bits"));
        }
        if self.target_block_count == 0 {
            return Err(Error::config("target_block_count must be positive"));
        }
        if let Some(size) = self.block_size {
            if size == 0 || size > u32::MAX as usize {
                return Err(Error::config(format!("invalid block size {}", size)));
            }
        }
        Ok(())
    }

    /// Block size to use for a base file of `file_size` bytes
    pub fn effective_block_size(&self, file_size: u64) -> usize {
        self.block_size.unwrap_or_else(|| {
            block_size_within(
                file_size,
                self.target_block_count,
                self.min_block_size,
                self.max_block_size,
            )
        })
    }

    /// Directory for temporary files (defaults to `$TMPDIR/bksync`)
    pub fn effective_work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("bksync"))
    }

    /// Parse a size string like "100", "100K", "100M", "100G" into bytes
    pub fn parse_size(s: &str) -> Result<u64> {
        let s = s.trim().to_uppercase();
        if s.is_empty() {
            return Err(Error::config("empty size value"));
        }

        let digits_end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (num_part, suffix) = s.split_at(digits_end);

        let multiplier = match suffix.trim() {
            "" | "B" => 1u64,
            "K" | "KB" | "KIB" => 1024,
            "M" | "MB" | "MIB" => 1024 * 1024,
            "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
            "T" | "TB" | "TIB" => 1024u64 * 1024 * 1024 * 1024,
            _ => return Err(Error::config(format!("invalid size suffix: {}", s))),
        };

        let num: u64 = num_part
            .parse()
            .map_err(|_| Error::config(format!("invalid size value: {}", s)))?;

        num.checked_mul(multiplier)
            .ok_or_else(|| Error::config(format!("size out of range: {}", s)))
    }
}
