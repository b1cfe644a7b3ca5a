use ramdisk_storage::{is_sector_aligned, BackingStore, SECTOR_SIZE};
use thiserror::Error;

use crate::host::DISK_NAME_LEN;
use crate::PAGE_SIZE;

pub const DEFAULT_NAME: &str = "ramdisk";
pub const DEFAULT_SIZE_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: usize = BackingStore::DEFAULT_CHUNK_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("invalid device config: {0}")]
    Invalid(&'static str),
}

/// Identity and geometry of a device before it is allocated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: String,
    /// `0` asks the host for a dynamic major.
    pub major: u32,
    /// Backing buffer size; capacity is derived from it.
    pub size_bytes: u64,
    pub physical_block_size: u32,
    pub chunk_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            major: 0,
            size_bytes: DEFAULT_SIZE_BYTES,
            physical_block_size: PAGE_SIZE as u32,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DeviceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds a config from an arbitrary variable source. Unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(name) = lookup("RAMDISK_NAME") {
            cfg.name = name.trim().to_string();
        }
        if let Some(major) = parse_var(&lookup, "RAMDISK_MAJOR")? {
            cfg.major = major;
        }
        if let Some(size) = parse_var(&lookup, "RAMDISK_SIZE_BYTES")? {
            cfg.size_bytes = size;
        }
        if let Some(pbs) = parse_var(&lookup, "RAMDISK_PHYSICAL_BLOCK_SIZE")? {
            cfg.physical_block_size = pbs;
        }
        if let Some(chunk) = parse_var(&lookup, "RAMDISK_CHUNK_SIZE")? {
            cfg.chunk_size = chunk;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Invalid("name must not be empty"));
        }
        if self.name.len() >= DISK_NAME_LEN {
            return Err(ConfigError::Invalid("name is too long"));
        }
        if self.size_bytes == 0 || !is_sector_aligned(self.size_bytes) {
            return Err(ConfigError::Invalid(
                "size must be a non-zero multiple of the sector size",
            ));
        }
        let pbs = self.physical_block_size;
        if !pbs.is_power_of_two() || (pbs as usize) < SECTOR_SIZE || pbs as usize > PAGE_SIZE {
            return Err(ConfigError::Invalid(
                "physical block size must be a power of two between 512 and 4096",
            ));
        }
        if self.chunk_size == 0 || !is_sector_aligned(self.chunk_size as u64) {
            return Err(ConfigError::Invalid(
                "chunk size must be a non-zero multiple of the sector size",
            ));
        }
        Ok(())
    }

    pub fn capacity_sectors(&self) -> u64 {
        self.size_bytes / SECTOR_SIZE as u64
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value: raw }),
    }
}
