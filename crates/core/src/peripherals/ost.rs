// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Ingenic operating-system timer.
//!
//! The 64-bit counter is never ticked. It is brought up to date from elapsed
//! virtual time whenever it is observed: on every register access and on the
//! periodic compare callback. The callback runs every `callback_period_ns`
//! while the timer is enabled and is the only place a compare match is
//! detected, so a guest waiting on the interrupt sees it within one period.

use crate::signals::InterruptLine;
use crate::snapshot::{self, Versioned};
use crate::time::{self, ScheduledEvent, VirtualClock};
use crate::{SimResult, SimulationConfig};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::any::Any;

pub const OST_SNAPSHOT_VERSION: u32 = 1;

pub const OST_ER: u64 = 0x00; // Enable
pub const OST_DR: u64 = 0x04; // Disable
pub const OST_CNTH: u64 = 0x08; // Counter high 32 bits
pub const OST_CNTL: u64 = 0x0C; // Counter low 32 bits
pub const OST_TCSR: u64 = 0x10; // Control
pub const OST_TCRB: u64 = 0x14; // Compare
pub const OST_TFR: u64 = 0x18; // Flags
pub const OST_TMR: u64 = 0x1C; // Mask

bitflags! {
    /// ER/DR bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OstEnable: u32 {
        const COUNTER = 1 << 0;
    }
}

bitflags! {
    /// TFR/TMR bit layout. Other bits are stored but never set by hardware.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OstFlags: u32 {
        const COMPARE_MATCH = 1 << 0;
    }
}

#[derive(Debug)]
pub struct Ost {
    clock: VirtualClock,
    irq: InterruptLine,
    frequency_hz: u64,
    callback_period_ns: u64,
    callback: ScheduledEvent,

    // Registers
    enable: OstEnable,
    control: u32,
    compare: u32,
    flags: OstFlags,
    mask: OstFlags,

    // Counter state
    counter: u64,
    last_sync_ns: u64,
}

impl Ost {
    pub fn new(clock: VirtualClock, irq: InterruptLine, config: &SimulationConfig) -> Self {
        let last_sync_ns = clock.now_ns();
        Self {
            clock,
            irq,
            frequency_hz: config.ost_frequency_hz,
            callback_period_ns: config.ost_callback_period_ns,
            callback: ScheduledEvent::new(),
            enable: OstEnable::empty(),
            control: 0,
            compare: 0,
            flags: OstFlags::empty(),
            mask: OstFlags::empty(),
            counter: 0,
            last_sync_ns,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enable.contains(OstEnable::COUNTER)
    }

    /// Counter value as of now.
    pub fn counter(&mut self) -> u64 {
        self.sync_counter();
        self.counter
    }

    /// Bring the counter up to the current virtual instant.
    fn sync_counter(&mut self) {
        let now = self.clock.now_ns();
        if self.is_enabled() && now > self.last_sync_ns {
            let ticks = time::ticks_for(now - self.last_sync_ns, self.frequency_hz);
            self.counter = self.counter.wrapping_add(ticks);
            self.last_sync_ns = now;
        }
    }

    fn schedule_callback(&mut self) {
        let deadline = self.clock.now_ns().saturating_add(self.callback_period_ns);
        self.callback.schedule_at(deadline);
    }

    /// Periodic compare evaluation.
    fn on_callback(&mut self) {
        if !self.callback.take_due(self.clock.now_ns()) {
            return;
        }
        self.sync_counter();

        if self.counter >= u64::from(self.compare) {
            self.flags |= OstFlags::COMPARE_MATCH;
            if !self.mask.contains(OstFlags::COMPARE_MATCH) {
                self.irq.raise();
            }
        }

        if self.is_enabled() {
            self.schedule_callback();
        }
    }

    pub fn read_register(&mut self, offset: u64) -> u32 {
        self.sync_counter();

        match offset {
            OST_ER => self.enable.bits(),
            OST_CNTH => (self.counter >> 32) as u32,
            OST_CNTL => self.counter as u32,
            OST_TCSR => self.control,
            OST_TCRB => self.compare,
            OST_TFR => self.flags.bits(),
            OST_TMR => self.mask.bits(),
            _ => {
                tracing::warn!("ingenic-ost: unimplemented read @ {:#x}", offset);
                0
            }
        }
    }

    pub fn write_register(&mut self, offset: u64, value: u32) {
        self.sync_counter();

        match offset {
            OST_ER => {
                let bits = OstEnable::from_bits_truncate(value);
                self.enable |= bits;
                if bits.contains(OstEnable::COUNTER) {
                    self.last_sync_ns = self.clock.now_ns();
                    self.schedule_callback();
                    tracing::debug!("ingenic-ost: enabled at {} ns", self.last_sync_ns);
                }
            }
            OST_DR => {
                self.enable &= !OstEnable::from_bits_truncate(value);
                if !self.is_enabled() {
                    self.callback.cancel();
                }
            }
            OST_TCSR => self.control = value,
            OST_TCRB => self.compare = value,
            OST_TFR => {
                // Writing 1 clears flags
                self.flags &= !OstFlags::from_bits_retain(value);
                if !self.flags.contains(OstFlags::COMPARE_MATCH) {
                    self.irq.lower();
                }
            }
            OST_TMR => self.mask = OstFlags::from_bits_retain(value),
            _ => {
                tracing::warn!(
                    "ingenic-ost: unimplemented write @ {:#x} value {:#x}",
                    offset,
                    value
                );
            }
        }
    }
}

impl crate::Peripheral for Ost {
    fn read(&mut self, offset: u64) -> u32 {
        self.read_register(offset)
    }

    fn write(&mut self, offset: u64, value: u32) {
        self.write_register(offset, value);
    }

    fn reset(&mut self) {
        self.enable = OstEnable::empty();
        self.control = 0;
        self.compare = 0;
        self.flags = OstFlags::empty();
        self.mask = OstFlags::empty();
        self.counter = 0;
        self.last_sync_ns = self.clock.now_ns();
        self.callback.cancel();
    }

    fn next_deadline(&self) -> Option<u64> {
        self.callback.deadline()
    }

    fn on_deadline(&mut self) {
        self.on_callback();
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }

    fn as_any_mut(&mut self) -> Option<&mut dyn Any> {
        Some(self)
    }

    fn snapshot(&self) -> serde_json::Value {
        let state = OstSnapshot {
            version: OST_SNAPSHOT_VERSION,
            enable: self.enable.bits(),
            control: self.control,
            compare: self.compare,
            flags: self.flags.bits(),
            mask: self.mask.bits(),
            counter: self.counter,
            last_sync_ns: self.last_sync_ns,
            next_callback_ns: self.callback.deadline(),
        };
        serde_json::to_value(state).unwrap_or(serde_json::Value::Null)
    }

    fn validate_snapshot(&self, state: &serde_json::Value) -> SimResult<()> {
        snapshot::decode::<OstSnapshot>("ost", state.clone(), OST_SNAPSHOT_VERSION).map(|_| ())
    }

    fn restore(&mut self, state: serde_json::Value) -> SimResult<()> {
        let state: OstSnapshot = snapshot::decode("ost", state, OST_SNAPSHOT_VERSION)?;
        self.enable = OstEnable::from_bits_truncate(state.enable);
        self.control = state.control;
        self.compare = state.compare;
        self.flags = OstFlags::from_bits_retain(state.flags);
        self.mask = OstFlags::from_bits_retain(state.mask);
        self.counter = state.counter;
        self.last_sync_ns = state.last_sync_ns;

        // A callback is armed exactly when the counter is enabled.
        match (self.is_enabled(), state.next_callback_ns) {
            (true, Some(deadline)) => self.callback.schedule_at(deadline),
            (true, None) => self.schedule_callback(),
            (false, _) => self.callback.cancel(),
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OstSnapshot {
    version: u32,
    enable: u32,
    control: u32,
    compare: u32,
    flags: u32,
    mask: u32,
    counter: u64,
    last_sync_ns: u64,
    #[serde(default)]
    next_callback_ns: Option<u64>,
}

impl Versioned for OstSnapshot {
    fn version(&self) -> u32 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interrupt::{CpuIrqPins, InterruptController};
    use crate::Peripheral;
    use std::rc::Rc;

    const MS: u64 = 1_000_000;

    struct Bench {
        clock: VirtualClock,
        line: Rc<CpuIrqPins>,
        ost: Ost,
    }

    impl Bench {
        fn new() -> Self {
            let clock = VirtualClock::new();
            let line = Rc::new(CpuIrqPins::new());
            let ost = Ost::new(
                clock.clone(),
                InterruptLine::new(line.clone(), 0),
                &SimulationConfig::default(),
            );
            Self { clock, line, ost }
        }

        fn irq(&self) -> bool {
            self.line.irq_level(0)
        }

        /// Move time forward, delivering the callback the way the machine does.
        fn advance(&mut self, delta_ns: u64) {
            let target = self.clock.now_ns() + delta_ns;
            while let Some(deadline) = self.ost.next_deadline() {
                if deadline > target {
                    break;
                }
                self.clock.advance_to(deadline);
                self.ost.on_deadline();
            }
            self.clock.advance_to(target);
        }

        fn counter(&mut self) -> u64 {
            let hi = self.ost.read_register(OST_CNTH) as u64;
            let lo = self.ost.read_register(OST_CNTL) as u64;
            (hi << 32) | lo
        }
    }

    #[test]
    fn test_reset_state() {
        let mut b = Bench::new();
        for offset in [OST_ER, OST_CNTH, OST_CNTL, OST_TCSR, OST_TCRB, OST_TFR, OST_TMR] {
            assert_eq!(b.ost.read_register(offset), 0, "offset {:#x}", offset);
        }
        assert_eq!(b.ost.next_deadline(), None);
    }

    #[test]
    fn test_compare_match_after_one_millisecond() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 1500);
        b.ost.write_register(OST_ER, 1);
        assert_eq!(b.ost.next_deadline(), Some(MS));

        b.advance(MS);
        assert_eq!(b.ost.read_register(OST_CNTL), 1500);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());
        assert_eq!(b.ost.next_deadline(), Some(2 * MS));
    }

    #[test]
    fn test_counter_synchronized_between_callbacks() {
        let mut b = Bench::new();
        b.ost.write_register(OST_ER, 1);
        b.advance(MS / 2);
        assert_eq!(b.counter(), 750);
        // Reads never return a stale value even with no callback fired yet.
        b.advance(1_000);
        assert_eq!(b.ost.read_register(OST_CNTL), 751);
    }

    #[test]
    fn test_compare_not_reached_leaves_flag_clear() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 3001);
        b.ost.write_register(OST_ER, 1);
        b.advance(2 * MS);
        assert_eq!(b.ost.read_register(OST_TFR), 0);
        assert!(!b.irq());
        b.advance(MS);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());
    }

    #[test]
    fn test_compare_already_passed_fires_on_next_callback_only() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 100_000);
        b.ost.write_register(OST_ER, 1);
        b.advance(MS / 2);
        b.ost.write_register(OST_TCRB, 10);
        assert_eq!(b.ost.read_register(OST_TFR), 0);
        assert!(!b.irq());

        b.advance(MS / 2);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());
    }

    #[test]
    fn test_flag_write_one_to_clear_lowers_line() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 1500);
        b.ost.write_register(OST_ER, 1);
        b.advance(MS);
        assert!(b.irq());

        // Writing zero clears nothing.
        b.ost.write_register(OST_TFR, 0);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());

        b.ost.write_register(OST_TFR, 1);
        assert_eq!(b.ost.read_register(OST_TFR), 0);
        assert!(!b.irq());

        // The counter is still past compare, so the next callback re-asserts.
        b.advance(MS);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());
    }

    #[test]
    fn test_masked_match_sets_flag_without_irq() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TMR, 1);
        b.ost.write_register(OST_TCRB, 1500);
        b.ost.write_register(OST_ER, 1);
        b.advance(MS);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(!b.irq());
    }

    #[test]
    fn test_masking_does_not_lower_raised_line() {
        // Documented quirk: the mask only gates future raises.
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 1500);
        b.ost.write_register(OST_ER, 1);
        b.advance(MS);
        assert!(b.irq());

        b.ost.write_register(OST_TMR, 1);
        assert_eq!(b.ost.read_register(OST_TMR), 1);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());

        // Clearing the flag is still what lowers it.
        b.ost.write_register(OST_TFR, 1);
        assert!(!b.irq());
        b.advance(MS);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(!b.irq());
    }

    #[test]
    fn test_disable_freezes_and_enable_resumes() {
        let mut b = Bench::new();
        b.ost.write_register(OST_ER, 1);
        b.advance(MS);
        assert_eq!(b.counter(), 1500);

        b.ost.write_register(OST_DR, 1);
        assert!(!b.ost.is_enabled());
        assert_eq!(b.ost.next_deadline(), None);
        b.advance(10 * MS);
        assert_eq!(b.counter(), 1500);

        b.ost.write_register(OST_ER, 1);
        b.advance(2 * MS);
        assert_eq!(b.counter(), 4500);
    }

    #[test]
    fn test_disable_ignores_other_bits() {
        let mut b = Bench::new();
        b.ost.write_register(OST_ER, 1);
        b.ost.write_register(OST_DR, 0xFFFF_FFFE);
        assert!(b.ost.is_enabled());
        assert!(b.ost.next_deadline().is_some());

        // Repeated disables are idempotent.
        b.ost.write_register(OST_DR, 1);
        b.ost.write_register(OST_DR, 1);
        assert!(!b.ost.is_enabled());
        assert_eq!(b.ost.read_register(OST_ER), 0);
    }

    #[test]
    fn test_enable_write_of_zero_is_noop() {
        let mut b = Bench::new();
        b.ost.write_register(OST_ER, 0);
        assert!(!b.ost.is_enabled());
        assert_eq!(b.ost.next_deadline(), None);

        b.ost.write_register(OST_ER, 0xFFFF_FFFF);
        assert_eq!(b.ost.read_register(OST_ER), 1);
    }

    #[test]
    fn test_reenable_pushes_callback_out() {
        let mut b = Bench::new();
        b.ost.write_register(OST_ER, 1);
        b.advance(MS / 2);
        b.ost.write_register(OST_ER, 1);
        assert_eq!(b.ost.next_deadline(), Some(MS / 2 + MS));
        assert_eq!(b.counter(), 750);
    }

    #[test]
    fn test_disabled_callback_never_fires() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 0);
        b.ost.write_register(OST_ER, 1);
        b.advance(MS / 2);
        b.ost.write_register(OST_DR, 1);
        b.advance(5 * MS);
        assert_eq!(b.ost.read_register(OST_TFR), 0);
        assert!(!b.irq());
    }

    #[test]
    fn test_counter_high_word() {
        let mut b = Bench::new();
        b.ost.write_register(OST_ER, 1);
        // 2^32 ticks at 1.5 MHz, plus 2 ms. Callbacks are irrelevant here.
        let ns = (1u64 << 32) * 1_000_000_000 / 1_500_000 + 2 * MS;
        b.clock.advance_to(ns);
        let counter = b.counter();
        assert_eq!(counter >> 32, 1);
        assert_eq!(b.ost.read_register(OST_CNTH), 1);
    }

    #[test]
    fn test_control_is_passthrough() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCSR, 0xDEAD_BEEF);
        assert_eq!(b.ost.read_register(OST_TCSR), 0xDEAD_BEEF);
        assert!(!b.ost.is_enabled());
    }

    #[test]
    fn test_counter_registers_are_read_only() {
        let mut b = Bench::new();
        b.ost.write_register(OST_CNTL, 1234);
        b.ost.write_register(OST_CNTH, 1);
        assert_eq!(b.counter(), 0);
        assert_eq!(b.ost.read_register(0x20), 0);
    }

    #[test]
    fn test_reset_cancels_and_zeroes() {
        let mut b = Bench::new();
        b.ost.write_register(OST_TCRB, 1);
        b.ost.write_register(OST_TMR, 1);
        b.ost.write_register(OST_ER, 1);
        b.advance(3 * MS);

        b.ost.reset();
        assert_eq!(b.ost.next_deadline(), None);
        assert_eq!(b.counter(), 0);
        assert_eq!(b.ost.read_register(OST_TMR), 0);
        assert_eq!(b.ost.read_register(OST_TFR), 0);
        b.advance(3 * MS);
        assert_eq!(b.counter(), 0);
    }

    #[test]
    fn test_snapshot_restore_matches_uninterrupted_run() {
        let mut a = Bench::new();
        a.ost.write_register(OST_TCRB, 2500);
        a.ost.write_register(OST_ER, 1);
        a.advance(MS + 300_000);
        let saved = a.ost.snapshot();
        assert_eq!(saved["next_callback_ns"], 2 * MS);

        let mut b = Bench::new();
        b.clock.set_now_ns(a.clock.now_ns());
        b.ost.restore(saved).unwrap();
        assert_eq!(b.ost.next_deadline(), Some(2 * MS));

        a.advance(MS);
        b.advance(MS);
        assert_eq!(a.counter(), b.counter());
        assert_eq!(a.ost.read_register(OST_TFR), 1);
        assert_eq!(b.ost.read_register(OST_TFR), 1);
        assert!(b.irq());
    }

    #[test]
    fn test_restore_without_deadline_rearms_enabled_timer() {
        let mut b = Bench::new();
        let state = serde_json::json!({
            "version": 1,
            "enable": 1,
            "control": 0,
            "compare": 0,
            "flags": 0,
            "mask": 0,
            "counter": 42,
            "last_sync_ns": 0,
        });
        b.ost.restore(state).unwrap();
        assert_eq!(b.ost.next_deadline(), Some(MS));
        assert_eq!(b.counter(), 42);
    }
}
