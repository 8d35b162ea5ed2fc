//! Data volume counters.
//!
//! Provider volumes routinely exceed 2^32 bytes (a 5 GB plan is 5368709120
//! bytes), so they are carried as `u64` end to end. Percentage checks use
//! widened integer math; no floating point is involved.

use serde::{Deserialize, Serialize};

/// A number of bytes reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataVolume(u64);

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

impl DataVolume {
    /// Creates a volume from a byte count.
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Creates a volume from whole mebibytes.
    pub const fn from_mib(mib: u64) -> Self {
        Self(mib * MIB)
    }

    /// Creates a volume from whole gibibytes.
    pub const fn from_gib(gib: u64) -> Self {
        Self(gib * GIB)
    }

    /// Returns the byte count.
    pub const fn bytes(&self) -> u64 {
        self.0
    }

    /// Returns `used / total * 100` rounded down, capped at 100.
    ///
    /// A zero total yields zero.
    pub fn percent_of(&self, total: DataVolume) -> u8 {
        if total.0 == 0 {
            return 0;
        }
        let pct = u128::from(self.0) * 100 / u128::from(total.0);
        pct.min(100) as u8
    }

    /// Returns true when `self / total * 100 >= threshold`.
    ///
    /// Compared as `used * 100 >= threshold * total` so that no precision is
    /// lost. A zero total never reaches a threshold.
    pub fn reaches_threshold(&self, total: DataVolume, threshold: u8) -> bool {
        if total.0 == 0 {
            return false;
        }
        u128::from(self.0) * 100 >= u128::from(threshold) * u128::from(total.0)
    }
}

impl std::fmt::Display for DataVolume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} bytes", self.0)
    }
}

impl From<u64> for DataVolume {
    fn from(bytes: u64) -> Self {
        Self(bytes)
    }
}

impl From<DataVolume> for u64 {
    fn from(volume: DataVolume) -> Self {
        volume.0
    }
}
