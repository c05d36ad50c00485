// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Virtual time for peripheral models.
//!
//! All timer devices derive their state from guest virtual time: a monotonic
//! nanosecond count owned by the [`crate::Machine`] and shared read-only with
//! the devices that need it. Nothing here looks at the host clock, so a run is
//! fully determined by the sequence of register accesses and time advances.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::rc::Rc;

pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Shared handle to the machine's virtual clock.
///
/// Cloning the handle shares the underlying time value. Devices only read it;
/// the machine advances it while delivering scheduled callbacks.
#[derive(Debug, Clone, Default)]
pub struct VirtualClock {
    now_ns: Rc<Cell<u64>>,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current virtual time, in nanoseconds.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.now_ns.get()
    }

    /// Moves the clock forward to `target_ns`. Earlier targets are ignored.
    pub fn advance_to(&self, target_ns: u64) {
        if target_ns > self.now_ns.get() {
            self.now_ns.set(target_ns);
        }
    }

    /// Sets the current time, intended for snapshot restore only.
    ///
    /// This may move time backwards; callers must restore every device that
    /// holds timestamps from the same snapshot.
    pub fn set_now_ns(&self, now_ns: u64) {
        self.now_ns.set(now_ns);
    }
}

/// Converts an elapsed virtual duration into whole ticks of a `frequency_hz`
/// oscillator, truncating any partial tick.
pub fn ticks_for(elapsed_ns: u64, frequency_hz: u64) -> u64 {
    let ticks = (elapsed_ns as u128) * (frequency_hz as u128) / (NANOS_PER_SEC as u128);
    u64::try_from(ticks).unwrap_or(u64::MAX)
}

/// A cancellable deferred callback owned by a single device.
///
/// The device arms it with [`ScheduledEvent::schedule_at`] and disarms it with
/// [`ScheduledEvent::cancel`]. The machine polls armed events and delivers
/// them in deadline order; a cancelled event is never delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    deadline_ns: Option<u64>,
}

impl ScheduledEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the event for `deadline_ns`, replacing any earlier deadline.
    pub fn schedule_at(&mut self, deadline_ns: u64) {
        self.deadline_ns = Some(deadline_ns);
    }

    pub fn cancel(&mut self) {
        self.deadline_ns = None;
    }

    pub fn deadline(&self) -> Option<u64> {
        self.deadline_ns
    }

    pub fn is_due(&self, now_ns: u64) -> bool {
        self.deadline_ns.is_some_and(|d| d <= now_ns)
    }

    /// Disarms the event if it is due, reporting whether it was.
    pub fn take_due(&mut self, now_ns: u64) -> bool {
        if self.is_due(now_ns) {
            self.deadline_ns = None;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_handles_share_time() {
        let clock = VirtualClock::new();
        let view = clock.clone();
        clock.advance_to(1_000);
        assert_eq!(view.now_ns(), 1_000);

        // Never moves backwards through advance_to.
        clock.advance_to(500);
        assert_eq!(view.now_ns(), 1_000);

        clock.set_now_ns(10);
        assert_eq!(view.now_ns(), 10);
    }

    #[test]
    fn test_ticks_for_ost_frequency() {
        assert_eq!(ticks_for(1_000_000, 1_500_000), 1_500);
        assert_eq!(ticks_for(666, 1_500_000), 0);
        assert_eq!(ticks_for(667, 1_500_000), 1);
        assert_eq!(ticks_for(0, 1_500_000), 0);
        // One hour of virtual time does not overflow the intermediate product.
        assert_eq!(
            ticks_for(3_600 * NANOS_PER_SEC, 1_500_000),
            3_600 * 1_500_000
        );
    }

    #[test]
    fn test_scheduled_event_lifecycle() {
        let mut ev = ScheduledEvent::new();
        assert_eq!(ev.deadline(), None);
        assert!(!ev.take_due(u64::MAX));

        ev.schedule_at(100);
        assert_eq!(ev.deadline(), Some(100));
        assert!(!ev.is_due(99));
        assert!(ev.is_due(100));

        ev.schedule_at(200);
        assert!(!ev.take_due(150));
        assert!(ev.take_due(200));
        assert_eq!(ev.deadline(), None);

        ev.schedule_at(300);
        ev.cancel();
        assert!(!ev.is_due(u64::MAX));
    }
}
