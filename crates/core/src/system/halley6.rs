// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::bus::SystemBus;
use crate::interrupt::{CpuIrqPins, InterruptController, CPU_IRQ_INPUTS};
use crate::memory::LinearMemory;
use crate::peripherals::cpm::Cpm;
use crate::peripherals::intc::Intc;
use crate::peripherals::ost::Ost;
use crate::signals::InterruptLine;
use crate::time::VirtualClock;
use crate::{Machine, Peripheral, SimulationConfig};
use anyhow::Context;
use halley_config::{parse_size, BoardDescriptor, PeripheralKind};
use std::cell::RefCell;
use std::rc::Rc;

/// Instantiate every device of `board`, wire interrupt lines and map the
/// register windows.
///
/// The aggregator is created first so that sources can be handed a line
/// into it; its own output drives the CPU input named by its `irq`.
pub fn build(board: &BoardDescriptor) -> anyhow::Result<Machine> {
    board.validate()?;

    let clock = VirtualClock::new();
    let cpu_irq = Rc::new(CpuIrqPins::new());
    let config = SimulationConfig::from(&board.timing);

    let ram_size = parse_size(&board.ram.size).context("Invalid 'ram.size'")?;
    let ram_size = usize::try_from(ram_size).context("RAM does not fit in host memory")?;
    let mut bus = SystemBus::new(LinearMemory::new(ram_size, board.ram.base));

    let intc_cfg = board
        .peripherals
        .iter()
        .find(|p| p.r#type == PeripheralKind::Intc)
        .context("Board has no interrupt controller")?;
    let upstream = match intc_cfg.irq {
        Some(input) if input < CPU_IRQ_INPUTS => {
            InterruptLine::new(cpu_irq.clone(), input)
        }
        Some(input) => anyhow::bail!(
            "Interrupt controller '{}' targets CPU input {}, only 0..{} exist",
            intc_cfg.id,
            input,
            CPU_IRQ_INPUTS
        ),
        None => {
            tracing::warn!("Interrupt controller '{}' is not wired to the CPU", intc_cfg.id);
            InterruptLine::disconnected()
        }
    };
    let intc = Rc::new(RefCell::new(Intc::new(upstream)));
    let intc_handle: Rc<dyn InterruptController> = intc.clone();

    for p_cfg in &board.peripherals {
        let line = match p_cfg.irq {
            Some(irq) if p_cfg.r#type != PeripheralKind::Intc => {
                InterruptLine::new(intc_handle.clone(), irq)
            }
            _ => InterruptLine::disconnected(),
        };

        let dev: Rc<RefCell<dyn Peripheral>> = match p_cfg.r#type {
            PeripheralKind::Intc => intc.clone(),
            PeripheralKind::Ost => {
                if !line.is_connected() {
                    tracing::warn!("Timer '{}' has no interrupt line", p_cfg.id);
                }
                Rc::new(RefCell::new(Ost::new(clock.clone(), line, &config)))
            }
            PeripheralKind::Cpm => Rc::new(RefCell::new(Cpm::new())),
        };

        bus.map(
            p_cfg.id.clone(),
            p_cfg.base_address,
            p_cfg.window_size()?,
            dev,
        );
    }

    tracing::info!(
        "Board '{}': {} devices, RAM {:#x} bytes at {:#x}",
        board.name,
        bus.peripherals.len(),
        ram_size,
        board.ram.base
    );

    Ok(Machine::new(bus, clock, cpu_irq, config))
}
