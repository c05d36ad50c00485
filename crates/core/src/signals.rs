// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::interrupt::InterruptController;
use std::fmt;
use std::rc::Rc;

/// Output end of a level-triggered interrupt wire.
///
/// A device owns one of these per output and drives it; board assembly
/// decides where it leads by pointing it at an input of an
/// [`InterruptController`]. An unconnected line drops every level change.
#[derive(Clone, Default)]
pub struct InterruptLine {
    target: Option<Rc<dyn InterruptController>>,
    irq: u32,
}

impl InterruptLine {
    pub fn new(target: Rc<dyn InterruptController>, irq: u32) -> Self {
        Self {
            target: Some(target),
            irq,
        }
    }

    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    /// Input index on the target controller.
    pub fn irq(&self) -> u32 {
        self.irq
    }

    pub fn set(&self, level: bool) {
        if let Some(target) = &self.target {
            target.set_irq(self.irq, level);
        }
    }

    pub fn raise(&self) {
        self.set(true);
    }

    pub fn lower(&self) {
        self.set(false);
    }
}

impl fmt::Debug for InterruptLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptLine")
            .field("connected", &self.is_connected())
            .field("irq", &self.irq)
            .finish()
    }
}
