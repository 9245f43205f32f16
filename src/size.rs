//! Memory size values parsed from configuration strings
//!
//! Accepts a numeral with an optional case-insensitive suffix:
//!
//! ```text
//! "256m" → 256 MB      "1K" → 1 KB      "2g" → 2 GB      "512" → 512 <default unit>
//! ```
//!
//! Conversions between units round to the nearest whole unit so that chained
//! conversions don't accumulate truncation error.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of a [`SizeValue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeUnit {
    Bytes,
    Kilobytes,
    Megabytes,
    Gigabytes,
}

impl SizeUnit {
    /// Number of bytes in one unit
    pub const fn factor(self) -> u64 {
        match self {
            SizeUnit::Bytes => 1,
            SizeUnit::Kilobytes => 1 << 10,
            SizeUnit::Megabytes => 1 << 20,
            SizeUnit::Gigabytes => 1 << 30,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            SizeUnit::Bytes => "",
            SizeUnit::Kilobytes => "k",
            SizeUnit::Megabytes => "m",
            SizeUnit::Gigabytes => "g",
        }
    }

    fn from_suffix(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'k' => Some(SizeUnit::Kilobytes),
            'm' => Some(SizeUnit::Megabytes),
            'g' => Some(SizeUnit::Gigabytes),
            _ => None,
        }
    }
}

/// An immutable amount of memory in a given unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SizeValue {
    amount: u64,
    unit: SizeUnit,
}

impl SizeValue {
    pub const fn new(amount: u64, unit: SizeUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn bytes_of(amount: u64) -> Self {
        Self::new(amount, SizeUnit::Bytes)
    }

    pub const fn kilobytes_of(amount: u64) -> Self {
        Self::new(amount, SizeUnit::Kilobytes)
    }

    pub const fn megabytes_of(amount: u64) -> Self {
        Self::new(amount, SizeUnit::Megabytes)
    }

    pub const fn gigabytes_of(amount: u64) -> Self {
        Self::new(amount, SizeUnit::Gigabytes)
    }

    /// Parse a size string, using `default_unit` when there is no suffix
    pub fn parse(input: &str, default_unit: SizeUnit) -> Result<Self> {
        let trimmed = input.trim();
        let last = trimmed
            .chars()
            .last()
            .ok_or_else(|| Error::Configuration("Size value must not be empty".to_string()))?;

        let (digits, unit) = if last.is_ascii_digit() {
            (trimmed, default_unit)
        } else {
            let unit = SizeUnit::from_suffix(last).ok_or_else(|| {
                Error::Configuration(format!(
                    "Invalid size unit '{}' in '{}' (expected k, m or g)",
                    last, input
                ))
            })?;
            (&trimmed[..trimmed.len() - last.len_utf8()], unit)
        };

        let amount = digits.trim().parse::<u64>().map_err(|e| {
            Error::Configuration(format!("Invalid size value '{}': {}", input, e))
        })?;

        Ok(Self { amount, unit })
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn unit(&self) -> SizeUnit {
        self.unit
    }

    /// Convert to `target`, rounding to the nearest whole unit
    ///
    /// Saturates at `u64::MAX` rather than overflowing.
    pub fn to_unit(&self, target: SizeUnit) -> u64 {
        let bytes = self.amount as u128 * self.unit.factor() as u128;
        let factor = target.factor() as u128;
        let rounded = (bytes + factor / 2) / factor;
        u64::try_from(rounded).unwrap_or(u64::MAX)
    }

    pub fn bytes(&self) -> u64 {
        self.to_unit(SizeUnit::Bytes)
    }

    pub fn kilobytes(&self) -> u64 {
        self.to_unit(SizeUnit::Kilobytes)
    }

    pub fn megabytes(&self) -> u64 {
        self.to_unit(SizeUnit::Megabytes)
    }

    pub fn gigabytes(&self) -> u64 {
        self.to_unit(SizeUnit::Gigabytes)
    }
}

impl FromStr for SizeValue {
    type Err = Error;

    /// Bare numerals are read as bytes
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s, SizeUnit::Bytes)
    }
}

impl fmt::Display for SizeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}
