// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::memory::LinearMemory;
use crate::{AccessWidth, Bus, Peripheral, SimResult, SimulationError};
use std::cell::RefCell;
use std::rc::Rc;

pub struct PeripheralEntry {
    pub name: String,
    pub base: u64,
    pub size: u64,
    pub dev: Rc<RefCell<dyn Peripheral>>,
}

impl PeripheralEntry {
    fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr - self.base < self.size
    }
}

pub struct SystemBus {
    pub ram: LinearMemory,
    pub peripherals: Vec<PeripheralEntry>,
}

impl SystemBus {
    pub fn new(ram: LinearMemory) -> Self {
        Self {
            ram,
            peripherals: Vec::new(),
        }
    }

    /// Map a device window. Windows are assumed not to overlap; the board
    /// descriptor is validated before anything is mapped.
    pub fn map(
        &mut self,
        name: impl Into<String>,
        base: u64,
        size: u64,
        dev: Rc<RefCell<dyn Peripheral>>,
    ) {
        let name = name.into();
        tracing::debug!("Mapped {} at {:#x} (+{:#x})", name, base, size);
        self.peripherals.push(PeripheralEntry {
            name,
            base,
            size,
            dev,
        });
    }

    pub fn peripheral(&self, name: &str) -> Option<&PeripheralEntry> {
        self.peripherals.iter().find(|p| p.name == name)
    }

    fn find(&self, addr: u64) -> Option<&PeripheralEntry> {
        self.peripherals.iter().find(|p| p.contains(addr))
    }

    /// Earliest pending device callback as `(peripheral index, deadline)`.
    /// Ties go to the device mapped first.
    pub fn next_deadline(&self) -> Option<(usize, u64)> {
        self.peripherals
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.dev.borrow().next_deadline().map(|d| (i, d)))
            .min_by_key(|&(_, d)| d)
    }

    pub fn fire_deadline(&self, index: usize) {
        if let Some(p) = self.peripherals.get(index) {
            tracing::trace!("Callback for {}", p.name);
            p.dev.borrow_mut().on_deadline();
        }
    }

    /// Resolve a device register access. Register windows only take aligned
    /// 32-bit accesses.
    fn register_access(&self, addr: u64, width: AccessWidth) -> SimResult<&PeripheralEntry> {
        let p = self
            .find(addr)
            .ok_or(SimulationError::MemoryViolation(addr))?;
        if width != AccessWidth::Word {
            return Err(SimulationError::InvalidAccessWidth {
                addr,
                width: width.bytes(),
            });
        }
        if addr % 4 != 0 {
            return Err(SimulationError::UnalignedAccess {
                addr,
                width: width.bytes(),
            });
        }
        Ok(p)
    }
}

impl Bus for SystemBus {
    fn read(&self, addr: u64, width: AccessWidth) -> SimResult<u32> {
        if let Some(val) = self.ram.read_le(addr, width.bytes() as u64) {
            return Ok(val);
        }

        let p = self.register_access(addr, width)?;
        Ok(p.dev.borrow_mut().read(addr - p.base))
    }

    fn write(&mut self, addr: u64, width: AccessWidth, value: u32) -> SimResult<()> {
        if self.ram.write_le(addr, width.bytes() as u64, value) {
            return Ok(());
        }

        let p = self.register_access(addr, width)?;
        p.dev.borrow_mut().write(addr - p.base, value);
        Ok(())
    }
}
