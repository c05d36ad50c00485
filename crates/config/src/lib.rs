// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default schema version for YAML configs
fn default_schema_version() -> String {
    "1.0".to_string()
}

pub const SUPPORTED_SCHEMA_VERSION: &str = "1.0";

/// Number of interrupt inputs on the aggregator.
pub const INTC_NUM_IRQS: u32 = 64;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsupported schema_version '{0}'; supported: '1.0'")]
    SchemaVersion(String),
    #[error("board must declare exactly one 'intc' peripheral, found {0}")]
    IntcCount(usize),
    #[error("duplicate peripheral id '{0}'")]
    DuplicateId(String),
    #[error("peripheral '{id}' irq {irq} is outside the interrupt controller range 0..64")]
    IrqOutOfRange { id: String, irq: u32 },
    #[error("peripheral '{a}' overlaps '{b}'")]
    Overlap { a: String, b: String },
    #[error("window of '{0}' runs past the end of the address space")]
    WindowOverflow(String),
    #[error("'{0}' must be greater than zero")]
    Zero(&'static str),
    #[error("scenario has no steps and no assertions")]
    EmptyScenario,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeripheralKind {
    Intc,
    Ost,
    Cpm,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MemoryRange {
    pub base: u64,
    pub size: String, // e.g. "64MiB"
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PeripheralConfig {
    pub id: String,
    pub r#type: PeripheralKind,
    pub base_address: u64,
    #[serde(default)]
    pub size: Option<String>,
    /// For interrupt sources: the aggregator input index.
    /// For the aggregator itself: the CPU interrupt input it drives.
    #[serde(default)]
    pub irq: Option<u32>,
}

fn default_ost_frequency_hz() -> u64 {
    1_500_000
}

fn default_ost_callback_period_ns() -> u64 {
    1_000_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TimingConfig {
    #[serde(default = "default_ost_frequency_hz")]
    pub ost_frequency_hz: u64,
    #[serde(default = "default_ost_callback_period_ns")]
    pub ost_callback_period_ns: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ost_frequency_hz: default_ost_frequency_hz(),
            ost_callback_period_ns: default_ost_callback_period_ns(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BoardDescriptor {
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
    pub name: String,
    pub ram: MemoryRange,
    pub peripherals: Vec<PeripheralConfig>,
    #[serde(default)]
    pub timing: TimingConfig,
}

impl BoardDescriptor {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read board descriptor at {:?}", path))?;
        Self::from_yaml(&content)
            .with_context(|| format!("Invalid board descriptor {:?}", path))
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let board: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Board Descriptor YAML")?;
        board.validate()?;
        tracing::debug!(
            "Board '{}': {} peripherals",
            board.name,
            board.peripherals.len()
        );
        Ok(board)
    }

    /// The Halley6 development board memory map.
    pub fn halley6() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: "halley6".to_string(),
            ram: MemoryRange {
                base: 0x0000_0000,
                size: "64MiB".to_string(),
            },
            peripherals: vec![
                PeripheralConfig {
                    id: "cpm".to_string(),
                    r#type: PeripheralKind::Cpm,
                    base_address: 0x1000_0000,
                    size: Some("4KiB".to_string()),
                    irq: None,
                },
                PeripheralConfig {
                    id: "intc".to_string(),
                    r#type: PeripheralKind::Intc,
                    base_address: 0x1000_1000,
                    size: Some("4KiB".to_string()),
                    irq: Some(2),
                },
                PeripheralConfig {
                    id: "ost".to_string(),
                    r#type: PeripheralKind::Ost,
                    base_address: 0x1200_0000,
                    size: Some("4KiB".to_string()),
                    irq: Some(15),
                },
            ],
            timing: TimingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(ValidationError::SchemaVersion(self.schema_version.clone()).into());
        }
        if self.timing.ost_frequency_hz == 0 {
            return Err(ValidationError::Zero("timing.ost_frequency_hz").into());
        }
        if self.timing.ost_callback_period_ns == 0 {
            return Err(ValidationError::Zero("timing.ost_callback_period_ns").into());
        }
        let ram_size = parse_size(&self.ram.size).context("Invalid 'ram.size'")?;
        if self.ram.base.checked_add(ram_size).is_none() {
            return Err(ValidationError::WindowOverflow("ram".to_string()).into());
        }

        let intc_count = self
            .peripherals
            .iter()
            .filter(|p| p.r#type == PeripheralKind::Intc)
            .count();
        if intc_count != 1 {
            return Err(ValidationError::IntcCount(intc_count).into());
        }

        let mut seen = HashSet::new();
        let mut windows = Vec::with_capacity(self.peripherals.len());
        for p in &self.peripherals {
            if !seen.insert(p.id.as_str()) {
                return Err(ValidationError::DuplicateId(p.id.clone()).into());
            }
            if p.r#type != PeripheralKind::Intc {
                if let Some(irq) = p.irq {
                    if irq >= INTC_NUM_IRQS {
                        return Err(ValidationError::IrqOutOfRange {
                            id: p.id.clone(),
                            irq,
                        }
                        .into());
                    }
                }
            }
            let size = p.window_size()?;
            let end = p
                .base_address
                .checked_add(size)
                .ok_or_else(|| ValidationError::WindowOverflow(p.id.clone()))?;
            windows.push((p.id.as_str(), p.base_address, end));
        }

        for (i, a) in windows.iter().enumerate() {
            for b in &windows[i + 1..] {
                if a.1 < b.2 && b.1 < a.2 {
                    return Err(ValidationError::Overlap {
                        a: a.0.to_string(),
                        b: b.0.to_string(),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

impl PeripheralConfig {
    /// Size of the MMIO window, defaulting to one 4 KiB page.
    pub fn window_size(&self) -> Result<u64> {
        match &self.size {
            Some(size) => parse_size(size)
                .with_context(|| format!("Invalid size for peripheral '{}'", self.id)),
            None => Ok(0x1000),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct ScenarioInputs {
    #[serde(default)]
    pub board: Option<String>,
    #[serde(default)]
    pub firmware: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WriteStep {
    pub address: u64,
    pub value: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ReadStep {
    pub address: u64,
    #[serde(default)]
    pub expect: Option<u32>,
    #[serde(default)]
    pub mask: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SetIrqStep {
    pub line: u32,
    pub level: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStep {
    Write(WriteStep),
    Read(ReadStep),
    AdvanceNs(u64),
    SetIrq(SetIrqStep),
    Reset,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegisterValueDetails {
    pub address: u64,
    pub expected_value: u32,
    #[serde(default)]
    pub mask: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RegisterValueAssertion {
    pub register_value: RegisterValueDetails,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CpuIrqDetails {
    pub input: u32,
    pub level: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CpuIrqAssertion {
    pub cpu_irq: CpuIrqDetails,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum ScenarioAssertion {
    RegisterValue(RegisterValueAssertion),
    CpuIrq(CpuIrqAssertion),
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScenarioScript {
    pub schema_version: String,
    #[serde(default)]
    pub inputs: ScenarioInputs,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

impl ScenarioScript {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read scenario script at {:?}", path.as_ref()))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let script: Self =
            serde_yaml::from_str(yaml).context("Failed to parse Scenario Script YAML")?;
        script.validate()?;
        Ok(script)
    }

    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SUPPORTED_SCHEMA_VERSION {
            return Err(ValidationError::SchemaVersion(self.schema_version.clone()).into());
        }
        if self.steps.is_empty() && self.assertions.is_empty() {
            return Err(ValidationError::EmptyScenario.into());
        }
        for step in &self.steps {
            if let ScenarioStep::SetIrq(s) = step {
                if s.line >= INTC_NUM_IRQS {
                    return Err(ValidationError::IrqOutOfRange {
                        id: "set_irq".to_string(),
                        irq: s.line,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

pub fn parse_size(size_str: &str) -> Result<u64> {
    use human_size::{Byte, Size, SpecificSize};
    let s: Size = size_str
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid size format: {}", e))?;
    let bytes: SpecificSize<Byte> = s.into();
    Ok(bytes.value() as u64)
}
