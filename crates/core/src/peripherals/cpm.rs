// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::snapshot::{self, Versioned};
use crate::SimResult;
use serde::{Deserialize, Serialize};
use std::any::Any;

pub const CPM_SNAPSHOT_VERSION: u32 = 1;

pub const CPM_CPCCR: u64 = 0x00;
pub const CPM_CPAPCR: u64 = 0x10;
pub const CPM_CPMPCR: u64 = 0x14;
pub const CPM_CLKGR0: u64 = 0x20;
pub const CPM_CLKGR1: u64 = 0x28;

const CPCCR_RESET: u32 = 0x1021_0100;
const CPAPCR_RESET: u32 = 0x8C00_0000; // APLL on and locked
const CPMPCR_RESET: u32 = 0x8A00_0000; // MPLL on and locked

/// Minimal clock/power manager. Boot code polls the PLL lock bits and toggles
/// the clock gates; nothing downstream reacts to the values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpm {
    cpccr: u32,
    cpapcr: u32,
    cpmpcr: u32,
    clkgr0: u32,
    clkgr1: u32,
}

impl Default for Cpm {
    fn default() -> Self {
        Self::new()
    }
}

impl Cpm {
    pub fn new() -> Self {
        Self {
            cpccr: CPCCR_RESET,
            cpapcr: CPAPCR_RESET,
            cpmpcr: CPMPCR_RESET,
            clkgr0: 0,
            clkgr1: 0,
        }
    }

    fn reg_mut(&mut self, offset: u64) -> Option<&mut u32> {
        match offset {
            CPM_CPCCR => Some(&mut self.cpccr),
            CPM_CPAPCR => Some(&mut self.cpapcr),
            CPM_CPMPCR => Some(&mut self.cpmpcr),
            CPM_CLKGR0 => Some(&mut self.clkgr0),
            CPM_CLKGR1 => Some(&mut self.clkgr1),
            _ => None,
        }
    }
}

impl crate::Peripheral for Cpm {
    fn read(&mut self, offset: u64) -> u32 {
        match self.reg_mut(offset) {
            Some(reg) => *reg,
            None => {
                tracing::warn!("ingenic-cpm: unimplemented read @ {:#x}", offset);
                0
            }
        }
    }

    fn write(&mut self, offset: u64, value: u32) {
        match self.reg_mut(offset) {
            Some(reg) => *reg = value,
            None => tracing::warn!(
                "ingenic-cpm: unimplemented write @ {:#x} value {:#x}",
                offset,
                value
            ),
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        let state = CpmSnapshot {
            version: CPM_SNAPSHOT_VERSION,
            regs: self.clone(),
        };
        serde_json::to_value(state).unwrap_or(serde_json::Value::Null)
    }

    fn validate_snapshot(&self, state: &serde_json::Value) -> SimResult<()> {
        snapshot::decode::<CpmSnapshot>("cpm", state.clone(), CPM_SNAPSHOT_VERSION).map(|_| ())
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        let state: CpmSnapshot = snapshot::decode("cpm", state, CPM_SNAPSHOT_VERSION)?;
        *self = state.regs;
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CpmSnapshot {
    version: u32,
    #[serde(flatten)]
    regs: Cpm,
}

impl Versioned for CpmSnapshot {
    fn version(&self) -> u32 {
        self.version
    }
}
