// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{InitrdInfo, SimResult, SimulationError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const MACHINE_SNAPSHOT_VERSION: u32 = 1;

/// Oldest snapshot layout any restore path still accepts.
pub const MIN_SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MachineSnapshot {
    pub version: u32,
    pub clock_ns: u64,
    pub cpu_irq_levels: u8,
    #[serde(default)]
    pub entry_pc: Option<u64>,
    #[serde(default)]
    pub initrd: Option<InitrdInfo>,
    pub peripherals: BTreeMap<String, serde_json::Value>,
}

pub fn check_version(name: &str, found: u32, current: u32) -> SimResult<()> {
    if (MIN_SNAPSHOT_VERSION..=current).contains(&found) {
        Ok(())
    } else {
        Err(SimulationError::SnapshotVersion {
            name: name.to_string(),
            found,
            min: MIN_SNAPSHOT_VERSION,
            max: current,
        })
    }
}

/// Decode a device snapshot and check its layout version.
///
/// The version is checked before the body is decoded, so a layout from a
/// newer build is reported as such rather than as a malformed document.
pub fn decode<T>(name: &str, state: serde_json::Value, current: u32) -> SimResult<T>
where
    T: DeserializeOwned + Versioned,
{
    let malformed = |reason: String| SimulationError::Snapshot {
        name: name.to_string(),
        reason,
    };

    let found = state
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| malformed("missing 'version'".to_string()))?;
    check_version(name, u32::try_from(found).unwrap_or(u32::MAX), current)?;

    let decoded: T = serde_json::from_value(state).map_err(|e| malformed(e.to_string()))?;
    debug_assert_eq!(u64::from(decoded.version()), found);
    Ok(decoded)
}

pub trait Versioned {
    fn version(&self) -> u32;
}
