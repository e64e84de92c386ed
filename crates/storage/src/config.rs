//! Tunables for page managers and the ordered map.
//!
//! `TreeConfig::default()` suits most callers; `TreeConfig::from_env()` lets
//! deployments override individual values without recompiling.

use log::warn;

use crate::error::{Result, StorageError};

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size accepted; page 0 of a file store must hold the header.
pub const MIN_PAGE_SIZE: usize = 64;

/// Largest page size accepted; page used lengths are stored in 2 bytes.
pub const MAX_PAGE_SIZE: usize = u16::MAX as usize;

/// Default number of frames in the file pager's buffer pool.
pub const DEFAULT_POOL_FRAMES: usize = 256;

/// Default occupancy (percent of capacity) below which a node is rebalanced.
pub const DEFAULT_MIN_FILL_PERCENT: usize = 35;

/// Configuration for page managers and maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Page size used when creating a new page store.
    /// Env: PAGETREE_PAGE_SIZE
    pub page_size: usize,
    /// Buffer pool capacity of the file pager, in pages.
    /// Env: PAGETREE_POOL_FRAMES
    pub pool_frames: usize,
    /// Non-root nodes holding fewer entries than this share of their capacity
    /// are merged with or refilled from a sibling after a delete.
    /// Env: PAGETREE_MIN_FILL_PERCENT
    pub min_fill_percent: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            pool_frames: DEFAULT_POOL_FRAMES,
            min_fill_percent: DEFAULT_MIN_FILL_PERCENT,
        }
    }
}

impl TreeConfig {
    /// Start from the defaults and apply any `PAGETREE_*` environment overrides.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(n) = env_usize("PAGETREE_PAGE_SIZE") {
            cfg.page_size = n;
        }
        if let Some(n) = env_usize("PAGETREE_POOL_FRAMES") {
            cfg.pool_frames = n;
        }
        if let Some(n) = env_usize("PAGETREE_MIN_FILL_PERCENT") {
            cfg.min_fill_percent = n;
        }
        cfg
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_pool_frames(mut self, pool_frames: usize) -> Self {
        self.pool_frames = pool_frames;
        self
    }

    pub fn with_min_fill_percent(mut self, percent: usize) -> Self {
        self.min_fill_percent = percent;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)?;
        if self.pool_frames == 0 {
            return Err(StorageError::InvalidArgument(
                "pool_frames must be at least 1".to_string(),
            ));
        }
        if self.min_fill_percent > 50 {
            return Err(StorageError::InvalidArgument(format!(
                "min_fill_percent {} exceeds 50",
                self.min_fill_percent
            )));
        }
        Ok(())
    }
}

/// Reject page sizes the page layouts cannot represent.
pub fn validate_page_size(page_size: usize) -> Result<()> {
    if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(StorageError::InvalidArgument(format!(
            "page size {} outside {}..={}",
            page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
        )));
    }
    Ok(())
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<usize>() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("ignoring {}={:?}: not an unsigned integer", name, raw);
            None
        }
    }
}
