// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::interrupt::InterruptController;
use crate::signals::InterruptLine;
use crate::snapshot::{self, Versioned};
use crate::SimResult;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;

pub use halley_config::INTC_NUM_IRQS;

pub const INTC_SNAPSHOT_VERSION: u32 = 1;

// Bank 0 registers; bank 1 sits at the same offsets + 0x20.
pub const ISR0: u64 = 0x00;
pub const IMR0: u64 = 0x04;
pub const IMSR0: u64 = 0x08;
pub const IMCR0: u64 = 0x0C;
pub const IPR0: u64 = 0x10;
pub const ISR1: u64 = 0x20;
pub const IMR1: u64 = 0x24;
pub const IMSR1: u64 = 0x28;
pub const IMCR1: u64 = 0x2C;
pub const IPR1: u64 = 0x30;

/// Pending bits are the asserted lines that are not masked.
#[inline]
pub const fn pending_bits(raw_status: u32, mask: u32) -> u32 {
    raw_status & !mask
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntcBank {
    pub raw_status: u32,
    pub mask: u32,
}

impl IntcBank {
    const RESET: Self = Self {
        raw_status: 0,
        mask: 0xFFFF_FFFF,
    };

    pub fn pending(&self) -> u32 {
        pending_bits(self.raw_status, self.mask)
    }
}

/// Ingenic interrupt aggregator: 64 level inputs in two 32-bit banks
/// feeding a single upstream line to the CPU.
#[derive(Debug)]
pub struct Intc {
    banks: [IntcBank; 2],
    upstream: InterruptLine,
}

impl Intc {
    pub fn new(upstream: InterruptLine) -> Self {
        Self {
            banks: [IntcBank::RESET; 2],
            upstream,
        }
    }

    pub fn bank(&self, index: usize) -> Option<IntcBank> {
        self.banks.get(index).copied()
    }

    pub fn upstream_asserted(&self) -> bool {
        self.banks.iter().any(|b| b.pending() != 0)
    }

    /// Recompute the upstream level from raw status and mask and drive it.
    /// Called after every mutation, whether or not the level changed.
    fn update(&self) {
        self.upstream.set(self.upstream_asserted());
    }

    /// Set or clear input `index` (0..64).
    pub fn set_line(&mut self, index: u32, level: bool) {
        debug_assert!(index < INTC_NUM_IRQS, "INTC input {} out of range", index);
        if index >= INTC_NUM_IRQS {
            tracing::error!("ingenic-intc: input {} out of range", index);
            return;
        }

        let bank = &mut self.banks[(index / 32) as usize];
        let bit = 1u32 << (index % 32);
        if level {
            bank.raw_status |= bit;
        } else {
            bank.raw_status &= !bit;
        }

        self.update();
    }

    pub fn read_register(&self, offset: u64) -> u32 {
        match offset {
            ISR0 => self.banks[0].raw_status,
            IMR0 => self.banks[0].mask,
            IPR0 => self.banks[0].pending(),
            ISR1 => self.banks[1].raw_status,
            IMR1 => self.banks[1].mask,
            IPR1 => self.banks[1].pending(),
            _ => {
                tracing::warn!("ingenic-intc: unimplemented read @ {:#x}", offset);
                0
            }
        }
    }

    pub fn write_register(&mut self, offset: u64, value: u32) {
        match offset {
            // Set mask bits (disable interrupts)
            IMSR0 => self.banks[0].mask |= value,
            // Clear mask bits (enable interrupts)
            IMCR0 => self.banks[0].mask &= !value,
            IMSR1 => self.banks[1].mask |= value,
            IMCR1 => self.banks[1].mask &= !value,
            _ => {
                tracing::warn!(
                    "ingenic-intc: unimplemented write @ {:#x} value {:#x}",
                    offset,
                    value
                );
            }
        }

        self.update();
    }
}

impl crate::Peripheral for Intc {
    fn read(&mut self, offset: u64) -> u32 {
        self.read_register(offset)
    }

    fn write(&mut self, offset: u64, value: u32) {
        self.write_register(offset, value);
    }

    fn reset(&mut self) {
        self.banks = [IntcBank::RESET; 2];
        self.update();
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        let state = IntcSnapshot {
            version: INTC_SNAPSHOT_VERSION,
            isr: [self.banks[0].raw_status, self.banks[1].raw_status],
            imr: [self.banks[0].mask, self.banks[1].mask],
            ipr: [self.banks[0].pending(), self.banks[1].pending()],
        };
        serde_json::to_value(state).unwrap_or(serde_json::Value::Null)
    }

    fn validate_snapshot(&self, state: &serde_json::Value) -> SimResult<()> {
        snapshot::decode::<IntcSnapshot>("intc", state.clone(), INTC_SNAPSHOT_VERSION).map(|_| ())
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        let state: IntcSnapshot = snapshot::decode("intc", state, INTC_SNAPSHOT_VERSION)?;
        for (i, bank) in self.banks.iter_mut().enumerate() {
            bank.raw_status = state.isr[i];
            bank.mask = state.imr[i];
        }
        // Saved pending bits are informational; they are re-derived here.
        self.update();
        Ok(())
    }
}

/// Board-side input handle: device lines wired to the aggregator land here.
impl InterruptController for RefCell<Intc> {
    fn set_irq(&self, irq: u32, level: bool) {
        self.borrow_mut().set_line(irq, level);
    }

    fn irq_level(&self, irq: u32) -> bool {
        if irq >= INTC_NUM_IRQS {
            return false;
        }
        let bank = self.borrow().banks[(irq / 32) as usize];
        (bank.raw_status >> (irq % 32)) & 1 != 0
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct IntcSnapshot {
    version: u32,
    isr: [u32; 2],
    imr: [u32; 2],
    #[serde(default)]
    ipr: [u32; 2],
}

impl Versioned for IntcSnapshot {
    fn version(&self) -> u32 {
        self.version
    }
}
