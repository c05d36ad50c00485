// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

pub mod bus;
pub mod config;
pub mod interrupt;
pub mod memory;
pub mod peripherals;
pub mod signals;
pub mod snapshot;
pub mod system;
pub mod time;

use std::any::Any;
use std::rc::Rc;

pub use config::SimulationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Arch {
    Mips,
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u64),
    #[error("Unaligned {width}-byte access at {addr:#x}")]
    UnalignedAccess { addr: u64, width: u8 },
    #[error("Unsupported {width}-byte access to register window at {addr:#x}")]
    InvalidAccessWidth { addr: u64, width: u8 },
    #[error("Image of {len} bytes at {addr:#x} does not fit in RAM")]
    ImageLoad { addr: u64, len: usize },
    #[error("Snapshot for '{name}' has version {found}, supported {min}..={max}")]
    SnapshotVersion {
        name: String,
        found: u32,
        min: u32,
        max: u32,
    },
    #[error("Malformed snapshot for '{name}': {reason}")]
    Snapshot { name: String, reason: String },
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Trait representing a memory-mapped peripheral with 32-bit registers.
///
/// Register accessors are total: offsets a device does not implement read as
/// zero and ignore writes. Access-width checking happens on the bus before a
/// device is reached.
pub trait Peripheral: std::fmt::Debug {
    fn read(&mut self, offset: u64) -> u32;
    fn write(&mut self, offset: u64, value: u32);

    /// Return to power-on state.
    fn reset(&mut self);

    /// Virtual time at which the device wants [`Peripheral::on_deadline`].
    fn next_deadline(&self) -> Option<u64> {
        None
    }

    /// Deliver the scheduled callback. The machine has already moved the
    /// clock to the deadline.
    fn on_deadline(&mut self) {}

    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        None
    }
    fn snapshot(&self) -> serde_json::Value {
        serde_json::Value::Null
    }
    /// Check that `state` would be accepted by [`Peripheral::restore`]
    /// without touching the device.
    fn validate_snapshot(&self, _state: &serde_json::Value) -> SimResult<()> {
        Ok(())
    }
    fn restore(&mut self, _state: serde_json::Value) -> SimResult<()> {
        Ok(())
    }
}

/// Width of a single bus access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessWidth {
    Byte = 1,
    Half = 2,
    Word = 4,
}

impl AccessWidth {
    pub fn bytes(self) -> u8 {
        self as u8
    }
}

/// Trait representing the system bus; this is the access-width dispatch boundary.
pub trait Bus {
    fn read(&self, addr: u64, width: AccessWidth) -> SimResult<u32>;
    fn write(&mut self, addr: u64, width: AccessWidth, value: u32) -> SimResult<()>;

    fn read_u8(&self, addr: u64) -> SimResult<u8> {
        Ok(self.read(addr, AccessWidth::Byte)? as u8)
    }

    fn read_u16(&self, addr: u64) -> SimResult<u16> {
        Ok(self.read(addr, AccessWidth::Half)? as u16)
    }

    fn read_u32(&self, addr: u64) -> SimResult<u32> {
        self.read(addr, AccessWidth::Word)
    }

    fn write_u8(&mut self, addr: u64, value: u8) -> SimResult<()> {
        self.write(addr, AccessWidth::Byte, value as u32)
    }

    fn write_u16(&mut self, addr: u64, value: u16) -> SimResult<()> {
        self.write(addr, AccessWidth::Half, value as u32)
    }

    fn write_u32(&mut self, addr: u64, value: u32) -> SimResult<()> {
        self.write(addr, AccessWidth::Word, value)
    }
}

/// Where board assembly placed the initial ramdisk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct InitrdInfo {
    pub addr: u64,
    pub size: u64,
}

pub struct Machine {
    pub bus: bus::SystemBus,
    pub clock: time::VirtualClock,
    pub cpu_irq: Rc<interrupt::CpuIrqPins>,
    pub config: SimulationConfig,

    // Boot state
    pub entry_pc: Option<u64>,
    pub initrd: Option<InitrdInfo>,
}

impl Machine {
    pub fn new(
        bus: bus::SystemBus,
        clock: time::VirtualClock,
        cpu_irq: Rc<interrupt::CpuIrqPins>,
        config: SimulationConfig,
    ) -> Self {
        Self {
            bus,
            clock,
            cpu_irq,
            config,
            entry_pc: None,
            initrd: None,
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn load_firmware(&mut self, image: &memory::ProgramImage) -> SimResult<()> {
        if image.arch != Arch::Mips {
            tracing::warn!("Firmware architecture is {:?}, expected Mips", image.arch);
        }

        for segment in &image.segments {
            if !self.bus.ram.load_from_segment(segment) {
                return Err(SimulationError::ImageLoad {
                    addr: segment.start_addr,
                    len: segment.data.len(),
                });
            }
            tracing::debug!(
                "Loaded {} bytes at {:#x}",
                segment.data.len(),
                segment.start_addr
            );
        }

        self.entry_pc = Some(image.entry_point);
        tracing::info!("Entry point: {:#x}", image.entry_point);
        Ok(())
    }

    /// Places an initial ramdisk at the top of RAM, 4 KiB aligned.
    pub fn load_initrd(&mut self, data: &[u8]) -> SimResult<InitrdInfo> {
        let ram_base = self.bus.ram.base_addr;
        let ram_size = self.bus.ram.data.len() as u64;
        let len = data.len() as u64;
        if len == 0 || len > ram_size {
            return Err(SimulationError::ImageLoad {
                addr: ram_base,
                len: data.len(),
            });
        }

        let offset = (ram_size - len) & !(4096 - 1);
        let segment = memory::Segment {
            start_addr: ram_base + offset,
            data: data.to_vec(),
        };
        if !self.bus.ram.load_from_segment(&segment) {
            return Err(SimulationError::ImageLoad {
                addr: segment.start_addr,
                len: data.len(),
            });
        }

        let info = InitrdInfo {
            addr: segment.start_addr,
            size: len,
        };
        tracing::info!("Initrd: {} bytes at {:#x}", info.size, info.addr);
        self.initrd = Some(info);
        Ok(info)
    }

    /// System reset: every device returns to its reset state and the CPU
    /// interrupt inputs are released. Virtual time keeps running.
    pub fn reset(&mut self) {
        self.cpu_irq.clear();
        for p in &self.bus.peripherals {
            p.dev.borrow_mut().reset();
        }
        tracing::debug!("System reset at {} ns", self.clock.now_ns());
    }

    /// Advance virtual time by `delta_ns`, delivering scheduled callbacks.
    pub fn advance_ns(&mut self, delta_ns: u64) {
        let target = self.clock.now_ns().saturating_add(delta_ns);
        self.run_until(target);
    }

    /// Advance virtual time to `target_ns`, delivering every callback whose
    /// deadline falls at or before it, earliest first.
    pub fn run_until(&mut self, target_ns: u64) {
        while let Some((index, deadline)) = self.bus.next_deadline() {
            if deadline > target_ns {
                break;
            }
            self.clock.advance_to(deadline);
            self.bus.fire_deadline(index);
        }
        self.clock.advance_to(target_ns);
    }

    pub fn snapshot(&self) -> snapshot::MachineSnapshot {
        snapshot::MachineSnapshot {
            version: snapshot::MACHINE_SNAPSHOT_VERSION,
            clock_ns: self.clock.now_ns(),
            cpu_irq_levels: self.cpu_irq.levels(),
            entry_pc: self.entry_pc,
            initrd: self.initrd,
            peripherals: self
                .bus
                .peripherals
                .iter()
                .map(|p| (p.name.clone(), p.dev.borrow().snapshot()))
                .collect(),
        }
    }

    pub fn apply_snapshot(&mut self, snapshot: snapshot::MachineSnapshot) -> SimResult<()> {
        snapshot::check_version(
            "machine",
            snapshot.version,
            snapshot::MACHINE_SNAPSHOT_VERSION,
        )?;

        // Nothing is modified until every device has accepted its state.
        for p in &self.bus.peripherals {
            match snapshot.peripherals.get(&p.name) {
                Some(state) => p.dev.borrow().validate_snapshot(state)?,
                None => tracing::warn!("Snapshot has no state for '{}'; left as is", p.name),
            }
        }

        self.clock.set_now_ns(snapshot.clock_ns);
        self.cpu_irq.set_levels(snapshot.cpu_irq_levels);
        self.entry_pc = snapshot.entry_pc;
        self.initrd = snapshot.initrd;
        let mut peripherals = snapshot.peripherals;
        for p in &self.bus.peripherals {
            if let Some(state) = peripherals.remove(&p.name) {
                p.dev.borrow_mut().restore(state)?;
            }
        }
        Ok(())
    }

    /// Drive an interrupt controller input from outside the board, standing
    /// in for a device that is not modelled. Returns false if the board has
    /// no interrupt controller.
    pub fn set_irq_line(&self, index: u32, level: bool) -> bool {
        for p in &self.bus.peripherals {
            let mut dev = p.dev.borrow_mut();
            if let Some(intc) = dev
                .as_any_mut()
                .and_then(|a| a.downcast_mut::<peripherals::intc::Intc>())
            {
                intc.set_line(index, level);
                return true;
            }
        }
        false
    }

    pub fn peek_peripheral(&self, name: &str) -> Option<serde_json::Value> {
        self.bus.peripheral(name).map(|p| p.dev.borrow().snapshot())
    }
}
