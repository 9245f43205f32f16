//! Segment sizing for the sharded store
//!
//! Turns (total size, optional segment count, chunk size, memory ceiling) into
//! a layout where every segment has the same whole number of megabytes and no
//! segment exceeds [`MAX_SEGMENT_SIZE_MB`].

use crate::error::{Error, Result};
use serde::Serialize;
use tracing::{info, warn};

pub const MAX_SEGMENT_SIZE_MB: u64 = 1024;

const MB: u64 = 1024 * 1024;
const KB: u64 = 1024;

/// Requested storage dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizingRequest {
    pub total_size_mb: u64,
    /// Derived from the total size when `None`
    pub segment_count: Option<u32>,
    pub chunk_size_kb: u64,
    /// Ceiling the pool must stay under, in bytes
    pub memory_ceiling_bytes: u64,
}

/// A validated storage layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sizing {
    pub total_size_mb: u64,
    pub segment_count: u32,
    pub segment_size_mb: u64,
    pub chunk_size_kb: u64,
}

impl Sizing {
    pub fn segment_size_bytes(&self) -> Result<u64> {
        to_bytes(self.segment_size_mb, MB, "segment_size", "MB")
    }

    pub fn chunk_size_bytes(&self) -> Result<u64> {
        to_bytes(self.chunk_size_kb, KB, "chunk_size", "KB")
    }

    pub fn chunks_per_segment(&self) -> Result<u64> {
        self.segment_size_bytes()?
            .checked_div(self.chunk_size_bytes()?)
            .ok_or_else(|| Error::Configuration("chunk_size must be positive, got 0KB".to_string()))
    }

    pub fn total_size_bytes(&self) -> Result<u64> {
        to_bytes(self.total_size_mb, MB, "total_size", "MB")
    }
}

/// `amount` units as bytes; overflow is a configuration error naming `name`
fn to_bytes(amount: u64, unit_bytes: u64, name: &str, unit: &str) -> Result<u64> {
    amount.checked_mul(unit_bytes).ok_or_else(|| {
        Error::Configuration(format!(
            "{}={}{} does not fit in a 64-bit byte count",
            name, amount, unit
        ))
    })
}

/// Derives and validates a [`Sizing`]
pub struct SizingPolicy;

impl SizingPolicy {
    pub fn compute(request: SizingRequest) -> Result<Sizing> {
        let SizingRequest {
            mut total_size_mb,
            segment_count,
            chunk_size_kb,
            memory_ceiling_bytes,
        } = request;

        Self::validate(total_size_mb, chunk_size_kb, memory_ceiling_bytes)?;

        let mut count = match segment_count {
            Some(0) => {
                return Err(Error::Configuration(
                    "segment_count must be at least 1, got 0".to_string(),
                ))
            }
            Some(count) => count as u64,
            None => total_size_mb.div_ceil(MAX_SEGMENT_SIZE_MB).max(1),
        };

        let mut segment_size_mb = total_size_mb.div_ceil(count);
        if segment_size_mb > MAX_SEGMENT_SIZE_MB {
            warn!(
                segment_size_mb,
                max_segment_size_mb = MAX_SEGMENT_SIZE_MB,
                segment_count = count,
                "Segment size exceeds maximum, clamping"
            );
            segment_size_mb = MAX_SEGMENT_SIZE_MB;
        }

        if total_size_mb % segment_size_mb != 0 {
            let normalized = total_size_mb
                .div_ceil(segment_size_mb)
                .checked_mul(segment_size_mb)
                .ok_or_else(|| {
                    Error::Configuration(format!(
                        "total_size={}MB overflows when rounded up to whole segments",
                        total_size_mb
                    ))
                })?;
            warn!(
                requested_mb = total_size_mb,
                normalized_mb = normalized,
                segment_size_mb,
                "Total size is not a multiple of the segment size, rounding up"
            );
            total_size_mb = normalized;
            Self::check_ceiling(total_size_mb, memory_ceiling_bytes)?;
        }
        count = total_size_mb / segment_size_mb;

        if total_size_mb % count != 0 {
            return Err(Error::Configuration(format!(
                "Invalid segmentation: total_size={}MB, segment_count={}, segment_size={}MB",
                total_size_mb, count, segment_size_mb
            )));
        }
        let segment_count = u32::try_from(count).map_err(|_| {
            Error::Configuration(format!("Invalid segmentation: segment_count={}", count))
        })?;

        let sizing = Sizing {
            total_size_mb,
            segment_count,
            segment_size_mb,
            chunk_size_kb,
        };
        if sizing.segment_size_bytes()? % sizing.chunk_size_bytes()? != 0 {
            return Err(Error::Configuration(format!(
                "segment_size={}MB is not a multiple of chunk_size={}KB",
                segment_size_mb, chunk_size_kb
            )));
        }
        info!(
            total_size_mb,
            segment_count,
            segment_size_mb,
            chunk_size_kb,
            chunks_per_segment = sizing.chunks_per_segment()?,
            "Computed off-heap storage sizing"
        );
        Ok(sizing)
    }

    fn validate(total_size_mb: u64, chunk_size_kb: u64, ceiling: u64) -> Result<()> {
        if total_size_mb == 0 {
            return Err(Error::Configuration(
                "total_size must be positive, got 0MB".to_string(),
            ));
        }
        Self::check_ceiling(total_size_mb, ceiling)?;
        if !chunk_size_kb.is_power_of_two() {
            return Err(Error::Configuration(format!(
                "chunk_size must be a power of two, got {}KB",
                chunk_size_kb
            )));
        }
        let total_bytes = to_bytes(total_size_mb, MB, "total_size", "MB")?;
        let chunk_bytes = to_bytes(chunk_size_kb, KB, "chunk_size", "KB")?;
        if total_bytes <= chunk_bytes {
            return Err(Error::Configuration(format!(
                "total_size={}MB must be larger than chunk_size={}KB",
                total_size_mb, chunk_size_kb
            )));
        }
        Ok(())
    }

    fn check_ceiling(total_size_mb: u64, ceiling: u64) -> Result<()> {
        if ceiling <= to_bytes(total_size_mb, MB, "total_size", "MB")? {
            return Err(Error::Configuration(format!(
                "total_size={}MB must be below the memory ceiling of {} bytes",
                total_size_mb, ceiling
            )));
        }
        Ok(())
    }
}
