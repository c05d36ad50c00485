// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use std::cell::Cell;
use std::fmt::Debug;

/// Trait representing anything with level-triggered interrupt inputs.
///
/// Implemented by the interrupt aggregator (64 device inputs) and by the CPU
/// pin bank it drives, so board assembly can wire either end through the same
/// [`crate::signals::InterruptLine`] handle.
pub trait InterruptController: Debug {
    /// Drive input `irq` to `level`.
    fn set_irq(&self, irq: u32, level: bool);

    /// Current level latched on input `irq`.
    fn irq_level(&self, irq: u32) -> bool;
}

/// Number of hardware interrupt inputs on the XBurst core (IP0..IP7).
pub const CPU_IRQ_INPUTS: u32 = 8;

/// The CPU's interrupt input pins.
///
/// There is no instruction model behind them; the machine exposes the latched
/// levels so a CPU model or a test can observe interrupt delivery.
#[derive(Debug, Default)]
pub struct CpuIrqPins {
    levels: Cell<u8>,
}

impl CpuIrqPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bitmap of asserted inputs, bit n for IPn.
    pub fn levels(&self) -> u8 {
        self.levels.get()
    }

    pub fn set_levels(&self, levels: u8) {
        self.levels.set(levels);
    }

    pub fn clear(&self) {
        self.levels.set(0);
    }
}

impl InterruptController for CpuIrqPins {
    fn set_irq(&self, irq: u32, level: bool) {
        if irq >= CPU_IRQ_INPUTS {
            tracing::error!("CPU interrupt input {} does not exist", irq);
            return;
        }
        let bit = 1u8 << irq;
        let levels = self.levels.get();
        self.levels
            .set(if level { levels | bit } else { levels & !bit });
    }

    fn irq_level(&self, irq: u32) -> bool {
        irq < CPU_IRQ_INPUTS && (self.levels.get() & (1 << irq)) != 0
    }
}
