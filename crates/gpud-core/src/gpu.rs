//! GPU descriptors and difficulty classes

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse GPU class used to route tasks.
///
/// Every configured device belongs to exactly one class; requests are only
/// ever placed on devices of the matching class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Low,
    High,
}

impl std::fmt::Display for Difficulty {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Difficulty::Low => write!(f, "low"),
            Difficulty::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = crate::GpudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Difficulty::Low),
            "high" => Ok(Difficulty::High),
            other => Err(crate::GpudError::InvalidDifficulty(other.to_string())),
        }
    }
}

/// Telemetry sample for a single device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GpuMetrics {
    /// Device index the sample belongs to
    pub device_id: u32,
    /// Used memory in MiB
    pub memory_used_mb: u64,
    /// Total memory in MiB
    pub memory_total_mb: u64,
    /// Core temperature in degrees Celsius
    pub temperature_celsius: f32,
    /// Utilization percentage (0-100)
    pub utilization_percent: f32,
}

/// Point-in-time view of a device, served by `/health`.
///
/// The `is_available` flag is always consistent with the allocator; the
/// telemetry fields may lag behind by one refresh interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuStatus {
    pub device_id: u32,
    pub difficulty: Difficulty,
    pub is_available: bool,
    pub memory_used_mb: u64,
    pub memory_total_mb: u64,
    pub temperature_celsius: f32,
    pub utilization_percent: f32,
    /// Session or task currently holding the lease
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_owner: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_difficulty_round_trip() {
        assert_eq!(Difficulty::from_str("low").unwrap(), Difficulty::Low);
        assert_eq!(Difficulty::from_str("HIGH").unwrap(), Difficulty::High);
        assert_eq!(Difficulty::Low.to_string(), "low");
    }

    #[test]
    fn test_difficulty_rejects_unknown() {
        let err = Difficulty::from_str("medium").unwrap_err();
        assert_eq!(err.to_string(), "invalid difficulty: medium");
    }

    #[test]
    fn test_difficulty_serde_lowercase() {
        let json = serde_json::to_string(&Difficulty::High).unwrap();
        assert_eq!(json, "\"high\"");
        let back: Difficulty = serde_json::from_str("\"low\"").unwrap();
        assert_eq!(back, Difficulty::Low);
    }
}
