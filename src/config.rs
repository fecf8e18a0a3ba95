/// Startup configuration: page geometry, cache behavior, reader cap,
/// stemming level. Values are read once at startup, either from defaults
/// or from a TOML file.
use std::path::Path;

use serde::Deserialize;

use crate::error::{QuarryError, Result};
use crate::store::{MAX_PAGE_COUNT, MAX_PAGE_SIZE, MIN_PAGE_COUNT, MIN_PAGE_SIZE};

/// Replacement policy of the page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    #[default]
    Lru,
    Fifo,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Size of each store page in bytes.
    pub page_size: u32,
    /// Initial number of data pages in a freshly created store.
    pub page_count: u32,
    /// Page cache size in bytes.
    pub cache_size: u32,
    pub cache_mode: CacheMode,
    /// Maximum number of query executors running at the same time.
    pub max_readers: usize,
    /// 0 = off, >= 3 folds postings into the stem representative.
    pub stemming_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: 1024,
            page_count: 1024,
            cache_size: 1024 * 1024,
            cache_mode: CacheMode::Lru,
            max_readers: 16,
            stemming_level: 0,
        }
    }
}

impl Config {
    /// Load a configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&text).map_err(|e| QuarryError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the page geometry constraints of the store.
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE || self.page_size > MAX_PAGE_SIZE {
            return Err(QuarryError::Config(format!(
                "page_size {} outside [{}, {}]",
                self.page_size, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if self.page_size % 4 != 0 {
            return Err(QuarryError::Config(format!(
                "page_size {} is not a multiple of 4",
                self.page_size
            )));
        }
        if self.page_count < MIN_PAGE_COUNT || self.page_count > MAX_PAGE_COUNT {
            return Err(QuarryError::Config(format!(
                "page_count {} outside [{}, {}]",
                self.page_count, MIN_PAGE_COUNT, MAX_PAGE_COUNT
            )));
        }
        // The page count must line up with the granularity of the page
        // layout table (one table page covers page_size / 4 entries).
        let ints_per_page = self.page_size / 4;
        if self.page_count % ints_per_page != 0 {
            return Err(QuarryError::Config(format!(
                "page_count {} is not a multiple of {} (layout granularity)",
                self.page_count, ints_per_page
            )));
        }
        if self.max_readers == 0 {
            return Err(QuarryError::Config("max_readers must be positive".into()));
        }
        Ok(())
    }
}
