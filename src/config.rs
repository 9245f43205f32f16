//! Off-heap storage configuration
//!
//! Sizes are string-valued and parsed with [`SizeValue`]. A configuration can be
//! layered from an optional TOML file plus `PHOTON_OFFHEAP_*` environment variables:
//!
//! ```toml
//! enabled = true
//! shared = false
//! total_size = "256m"
//! chunk_size = "2k"
//! in_memory_format = "off_heap"
//! ```

use crate::error::Result;
use crate::size::{SizeUnit, SizeValue};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Ceiling used when the process ceiling cannot be discovered
pub const DEFAULT_MEMORY_CEILING_BYTES: u64 = 64 * 1024 * 1024;

/// Where record values live, chosen once per map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InMemoryFormat {
    /// Values kept as heap byte vectors
    Binary,
    /// Values kept in the chunked off-heap store
    #[default]
    OffHeap,
}

/// Off-heap storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffHeapConfig {
    pub enabled: bool,
    /// Use one process-wide store shared by every owner
    pub shared: bool,
    /// Total pool size; bare numerals are megabytes
    pub total_size: String,
    /// Chunk size; bare numerals are kilobytes
    pub chunk_size: String,
    /// Explicit segment count, derived from total size when absent
    pub segment_count: Option<u32>,
    /// Process memory ceiling; bare numerals are bytes
    pub max_direct_memory: Option<String>,
    pub in_memory_format: InMemoryFormat,
}

impl Default for OffHeapConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            shared: false,
            total_size: "256m".to_string(),
            chunk_size: "1k".to_string(),
            segment_count: None,
            max_direct_memory: None,
            in_memory_format: InMemoryFormat::default(),
        }
    }
}

impl OffHeapConfig {
    /// Load from an optional TOML file overlaid with `PHOTON_OFFHEAP_*` variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            debug!(path = ?path, "Loading off-heap configuration file");
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix("PHOTON_OFFHEAP").try_parsing(true))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn total_size(&self) -> Result<SizeValue> {
        SizeValue::parse(&self.total_size, SizeUnit::Megabytes)
    }

    pub fn chunk_size(&self) -> Result<SizeValue> {
        SizeValue::parse(&self.chunk_size, SizeUnit::Kilobytes)
    }

    pub fn max_direct_memory(&self) -> Result<Option<SizeValue>> {
        self.max_direct_memory
            .as_deref()
            .map(|s| SizeValue::parse(s, SizeUnit::Bytes))
            .transpose()
    }
}

/// Reads the memory ceiling the host process is allowed to use
pub trait MemoryCeiling: Send + Sync {
    /// Ceiling in bytes, if discoverable
    fn max_memory_bytes(&self) -> Option<u64>;
}

/// Ceiling from configuration, falling back to the machine's total memory
pub struct ProcessMemoryCeiling {
    configured: Option<u64>,
}

impl ProcessMemoryCeiling {
    pub fn new(configured: Option<SizeValue>) -> Self {
        Self {
            configured: configured.map(|v| v.bytes()),
        }
    }

    pub fn from_config(config: &OffHeapConfig) -> Result<Self> {
        Ok(Self::new(config.max_direct_memory()?))
    }
}

impl MemoryCeiling for ProcessMemoryCeiling {
    fn max_memory_bytes(&self) -> Option<u64> {
        if self.configured.is_some() {
            return self.configured;
        }

        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        match sys.total_memory() {
            0 => None,
            total => Some(total),
        }
    }
}

/// A fixed ceiling, mostly for tests and embedding
#[derive(Debug, Clone, Copy)]
pub struct FixedCeiling(pub Option<u64>);

impl MemoryCeiling for FixedCeiling {
    fn max_memory_bytes(&self) -> Option<u64> {
        self.0
    }
}

/// Resolve the ceiling, substituting a conservative default when unknown
pub fn resolve_ceiling(ceiling: &dyn MemoryCeiling) -> u64 {
    match ceiling.max_memory_bytes() {
        Some(bytes) => bytes,
        None => {
            warn!(
                default_bytes = DEFAULT_MEMORY_CEILING_BYTES,
                "Could not determine the process memory ceiling, using default"
            );
            DEFAULT_MEMORY_CEILING_BYTES
        }
    }
}
