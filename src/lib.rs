// PhotonDB Off-Heap Storage
// A chunked, fixed-size memory pool for cache entries held outside the heap allocator

#![warn(rust_2018_idioms)]

pub mod config;
pub mod record;
pub mod size;
pub mod storage;

// Re-exports for convenience
pub use config::{InMemoryFormat, MemoryCeiling, OffHeapConfig};
pub use record::{Record, RecordMap, RecordStore, RecordValue};
pub use size::{SizeUnit, SizeValue};
pub use storage::offheap::{
    create_storage, EntryRef, GetOutcome, OffHeapStore, ShardedStore, SharedStorageRegistry,
    StorageFactory,
};

/// Off-heap storage error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("Configuration error: {0}")]
        Configuration(String),

        #[error(
            "Capacity exhausted in segment {segment}: requested {requested} chunks, {available} available"
        )]
        CapacityExhausted {
            segment: usize,
            requested: usize,
            available: usize,
        },

        #[error("Storage closed: {0}")]
        Closed(String),

        #[error("Internal consistency error: {0}")]
        InternalConsistency(String),
    }

    impl Error {
        /// Whether the caller may reasonably retry (after evicting, for instance)
        pub fn is_retryable(&self) -> bool {
            matches!(self, Error::CapacityExhausted { .. })
        }
    }

    impl From<::config::ConfigError> for Error {
        fn from(e: ::config::ConfigError) -> Self {
            Error::Configuration(format!("Failed to load configuration: {}", e))
        }
    }

    impl From<toml::de::Error> for Error {
        fn from(e: toml::de::Error) -> Self {
            Error::Configuration(format!("Failed to parse TOML: {}", e))
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::error::Error;

    #[test]
    fn test_only_capacity_errors_are_retryable() {
        let exhausted = Error::CapacityExhausted {
            segment: 0,
            requested: 2,
            available: 1,
        };
        assert!(exhausted.is_retryable());
        assert!(!Error::Closed("segment 0".to_string()).is_retryable());
        assert!(!Error::Configuration("bad".to_string()).is_retryable());
    }
}
