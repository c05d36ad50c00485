// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use halley_config::TimingConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Nominal OST oscillator frequency.
    pub ost_frequency_hz: u64,
    /// Interval between OST compare-match evaluations in virtual time.
    pub ost_callback_period_ns: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ost_frequency_hz: 1_500_000,
            ost_callback_period_ns: 1_000_000, // 1 ms
        }
    }
}

impl From<&TimingConfig> for SimulationConfig {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            ost_frequency_hz: timing.ost_frequency_hz,
            ost_callback_period_ns: timing.ost_callback_period_ns,
        }
    }
}
