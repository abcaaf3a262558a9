//! Configuration structures for Cairn.

use crate::page::PAGE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the engine core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for data files.
    pub data_dir: PathBuf,
    /// Page size in bytes.
    pub page_size: usize,
    /// Buffer pool size in number of frames.
    pub buffer_pool_frames: usize,
    /// Enable fsync for durability.
    pub fsync_enabled: bool,
    /// Maximum number of entries in a B+ tree leaf node.
    pub leaf_max_size: usize,
    /// Maximum number of children of a B+ tree internal node.
    pub internal_max_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            page_size: PAGE_SIZE,
            buffer_pool_frames: 8192, // 128 MB with 16 KB pages
            fsync_enabled: true,
            leaf_max_size: 255,
            internal_max_size: 255,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn buffer_pool_size_bytes(&self) -> usize {
        self.buffer_pool_frames * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_config_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.page_size, PAGE_SIZE);
        assert_eq!(config.buffer_pool_frames, 8192);
        assert!(config.fsync_enabled);
        assert_eq!(config.leaf_max_size, 255);
        assert_eq!(config.internal_max_size, 255);
    }

    #[test]
    fn test_buffer_pool_size_bytes() {
        let config = StorageConfig::default();
        assert_eq!(config.buffer_pool_size_bytes(), 8192 * PAGE_SIZE);
        assert_eq!(config.buffer_pool_size_bytes(), 128 * 1024 * 1024);
    }

    #[test]
    fn test_storage_config_serde_roundtrip() {
        let config = StorageConfig {
            data_dir: PathBuf::from("/tmp/cairn"),
            page_size: PAGE_SIZE,
            buffer_pool_frames: 64,
            fsync_enabled: false,
            leaf_max_size: 32,
            internal_max_size: 16,
        };

        let serialized = serde_json::to_string(&config).unwrap();
        let deserialized: StorageConfig = serde_json::from_str(&serialized).unwrap();

        assert_eq!(config.data_dir, deserialized.data_dir);
        assert_eq!(config.buffer_pool_frames, deserialized.buffer_pool_frames);
        assert_eq!(config.fsync_enabled, deserialized.fsync_enabled);
        assert_eq!(config.leaf_max_size, deserialized.leaf_max_size);
        assert_eq!(config.internal_max_size, deserialized.internal_max_size);
    }
}
