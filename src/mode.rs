// Copyright (c) 2026 Pegasus Heavy Industries LLC
// Licensed under the MIT License

//! Power modes and fan identifiers.
//!
//! Both are closed sets. Every hardware code the daemon ever sends for them
//! comes from the exhaustive matches below.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Thermal/performance profile understood by the G15 firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PowerMode {
    #[serde(rename = "Quiet")]
    Quiet,
    #[default]
    #[serde(rename = "Balanced")]
    Balanced,
    #[serde(rename = "Performance")]
    Performance,
    /// Unlocks manual fan boosts. Selecting it sends nothing to the firmware;
    /// its code is only written when G-Mode is cleared without a snapshot.
    #[serde(rename = "Custom")]
    Custom,
}

impl PowerMode {
    pub const ALL: [PowerMode; 4] = [
        PowerMode::Quiet,
        PowerMode::Balanced,
        PowerMode::Performance,
        PowerMode::Custom,
    ];

    /// Vendor mode byte passed to the thermal-control WMAX function.
    pub fn code(self) -> u8 {
        match self {
            PowerMode::Quiet => 0xa3,
            PowerMode::Balanced => 0xa0,
            PowerMode::Performance => 0xa1,
            PowerMode::Custom => 0xa2,
        }
    }

    /// Label used on the wire and in the persisted config.
    pub fn label(self) -> &'static str {
        match self {
            PowerMode::Quiet => "Quiet",
            PowerMode::Balanced => "Balanced",
            PowerMode::Performance => "Performance",
            PowerMode::Custom => "Custom",
        }
    }

    pub fn is_custom(self) -> bool {
        matches!(self, PowerMode::Custom)
    }
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PowerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PowerMode::ALL
            .into_iter()
            .find(|m| m.label() == s)
            .ok_or_else(|| format!("Unknown power mode: {s}"))
    }
}

/// One of the two chassis fans. Fan 1 cools the CPU, fan 2 the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanId {
    Cpu,
    Gpu,
}

impl FanId {
    pub const ALL: [FanId; 2] = [FanId::Cpu, FanId::Gpu];

    /// Protocol number (1 or 2).
    pub fn number(self) -> u8 {
        match self {
            FanId::Cpu => 1,
            FanId::Gpu => 2,
        }
    }

    /// Zero-based slot in per-fan arrays.
    pub fn index(self) -> usize {
        self.number() as usize - 1
    }

    /// ACPI sensor id for this fan: `0x32 + (fan - 1)`.
    pub fn sensor_id(self) -> u8 {
        0x32 + (self.number() - 1)
    }

    /// Fallback RPM reported when neither hwmon nor ACPI answer.
    pub fn default_rpm(self) -> u32 {
        match self {
            FanId::Cpu => 2500,
            FanId::Gpu => 2300,
        }
    }
}

impl TryFrom<i64> for FanId {
    type Error = i64;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(FanId::Cpu),
            2 => Ok(FanId::Gpu),
            other => Err(other),
        }
    }
}

impl fmt::Display for FanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fan{}", self.number())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip_through_from_str() {
        for mode in PowerMode::ALL {
            assert_eq!(mode.label().parse::<PowerMode>().unwrap(), mode);
        }
        assert!("Silent".parse::<PowerMode>().is_err());
    }

    #[test]
    fn test_vendor_codes() {
        assert_eq!(PowerMode::Quiet.code(), 0xa3);
        assert_eq!(PowerMode::Balanced.code(), 0xa0);
        assert_eq!(PowerMode::Performance.code(), 0xa1);
        assert_eq!(PowerMode::Custom.code(), 0xa2);
    }

    #[test]
    fn test_fan_sensor_ids() {
        assert_eq!(FanId::Cpu.sensor_id(), 0x32);
        assert_eq!(FanId::Gpu.sensor_id(), 0x33);
    }

    #[test]
    fn test_fan_id_rejects_out_of_range() {
        assert_eq!(FanId::try_from(1), Ok(FanId::Cpu));
        assert_eq!(FanId::try_from(2), Ok(FanId::Gpu));
        for bad in [-1, 0, 3, 255] {
            assert_eq!(FanId::try_from(bad), Err(bad));
        }
    }
}
