//! Runtime configuration for paged-entity-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All cache-related knobs (block size, cacheable threshold, query field lists)
//! live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "paged-entity-cache", about = "Paginated entity cache demo service")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Entity store configuration.
    pub store: StoreConfig,

    /// Demo backend settings.
    pub demo: DemoConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,

    /// Capacity of the store change-notification channel.
    pub event_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
            event_buffer: 64,
        }
    }
}

/// Per-store cache and query settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Items per cached block.
    pub block_size: usize,

    /// Collections up to this size are cached completely and queried locally.
    /// Also bounds the number of resident blocks.
    pub max_cacheable_total: usize,

    /// Fields matched by the free-text `q` filter.
    pub searchable_fields: Vec<String>,

    /// Fields a view may be sorted by.
    pub sortable_fields: Vec<String>,

    /// Fields holding lists; filters on them test containment.
    pub array_fields: Vec<String>,

    /// Upper bound on plan/fetch rounds for a single view request.
    pub max_fetch_rounds: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            block_size: 100,
            max_cacheable_total: 5000,
            searchable_fields: Vec::new(),
            sortable_fields: Vec::new(),
            array_fields: Vec::new(),
            max_fetch_rounds: 4,
        }
    }
}

impl StoreConfig {
    /// Maximum number of resident blocks (at least one).
    pub fn max_blocks(&self) -> usize {
        if self.block_size == 0 {
            return 1;
        }
        (self.max_cacheable_total / self.block_size).max(1)
    }

    /// Reject settings the cache cannot operate with.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.block_size == 0 {
            return Err(StoreError::InvalidConfig {
                message: "block_size must be at least 1".to_string(),
            });
        }
        if self.max_fetch_rounds == 0 {
            return Err(StoreError::InvalidConfig {
                message: "max_fetch_rounds must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_max_cacheable_total(mut self, total: usize) -> Self {
        self.max_cacheable_total = total;
        self
    }

    pub fn with_searchable_fields(mut self, fields: &[&str]) -> Self {
        self.searchable_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_sortable_fields(mut self, fields: &[&str]) -> Self {
        self.sortable_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn with_array_fields(mut self, fields: &[&str]) -> Self {
        self.array_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }
}

/// Settings for the in-memory demo backend served by the binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Organization the seeded users belong to.
    pub organization_id: i64,

    /// Number of users generated at startup.
    pub seed_users: usize,

    /// Simulated backend latency per call, in milliseconds.
    pub latency_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            organization_id: 1,
            seed_users: 250,
            latency_ms: 25,
        }
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            config.store.validate()?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
