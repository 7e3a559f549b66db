//! Configuration types for extmem
//!
//! This module defines the storage configuration consumed by the
//! file-backed block device.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Alignment requirement for direct I/O (typical filesystem block size)
pub const ALIGNMENT: usize = 4096;

/// Storage configuration for a file-backed block device
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the per-disk backing files
    pub data_dir: PathBuf,
    /// Number of parallel disks (one backing file and worker each)
    pub disks: usize,
    /// Raw size of one block in bytes
    pub block_bytes: usize,
    /// Use direct I/O (O_DIRECT on Linux), bypassing the OS page cache
    pub direct_io: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("extmem-data"),
            disks: 1,
            block_bytes: 2 * 1024 * 1024, // 2 MiB
            direct_io: false,
        }
    }
}

impl StorageConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.disks == 0 {
            return Err(Error::configuration("at least one disk is required"));
        }
        if self.block_bytes == 0 {
            return Err(Error::configuration("block size must be non-zero"));
        }
        if self.direct_io && self.block_bytes % ALIGNMENT != 0 {
            return Err(Error::configuration(format!(
                "direct I/O requires the block size ({}) to be a multiple of {}",
                self.block_bytes, ALIGNMENT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(StorageConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_disks() {
        let config = StorageConfig {
            disks: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unaligned_direct_io() {
        let config = StorageConfig {
            block_bytes: 1000,
            direct_io: true,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = StorageConfig {
            block_bytes: 8192,
            direct_io: true,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
