// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::Context;
use clap::{Parser, Subcommand};
use halley_config::{
    RegisterValueAssertion, RegisterValueDetails, ScenarioAssertion, ScenarioScript, ScenarioStep,
};
use halley_core::interrupt::{InterruptController, CPU_IRQ_INPUTS};
use halley_core::snapshot::MachineSnapshot;
use halley_core::system::builder::build_machine;
use halley_core::{Bus, Machine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::str::FromStr;
use tracing::{debug, error, info};

const EXIT_PASS: u8 = 0;
const EXIT_ASSERT_FAIL: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

const RESULT_SCHEMA_VERSION: &str = "1.0";
const SNAPSHOT_SCHEMA_VERSION: &str = "1.0";

fn parse_u64(s: &str) -> Result<u64, String> {
    let trimmed = s.trim().replace('_', "");
    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value '{}': {}", s, e))
    } else {
        u64::from_str(&trimmed).map_err(|e| format!("Invalid value '{}': {}", s, e))
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Halley6 peripheral simulator",
    long_about = None
)]
struct Cli {
    /// Enable debug-level logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the board, load images and advance virtual time.
    Run(RunArgs),

    /// Deterministic, CI-friendly runner mode driven by a scenario script (YAML).
    Test(TestArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Path to the board descriptor (YAML); the built-in Halley6 map when omitted
    #[arg(short, long)]
    board: Option<PathBuf>,

    /// Firmware image (MIPS ELF, or raw binary placed at the start of RAM)
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Initial ramdisk, placed at the top of RAM
    #[arg(long)]
    initrd: Option<PathBuf>,

    /// Virtual time to advance, in nanoseconds
    #[arg(long, value_parser = parse_u64)]
    duration_ns: u64,

    /// Write a machine snapshot (JSON) when the run ends
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Resume from a snapshot written by --snapshot before advancing
    #[arg(long)]
    restore: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct TestArgs {
    /// Path to the scenario script (YAML)
    #[arg(short = 'c', long)]
    script: PathBuf,

    /// Board descriptor (takes precedence over the script)
    #[arg(short, long)]
    board: Option<PathBuf>,

    /// Firmware image (takes precedence over the script)
    #[arg(short, long)]
    firmware: Option<PathBuf>,

    /// Directory to write test artifacts (result.json)
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TestResult {
    result_schema_version: String,
    status: String,
    steps_executed: u64,
    virtual_time_ns: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    assertions: Vec<AssertionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    firmware_hash: Option<String>,
    config: TestConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct AssertionResult {
    assertion: ScenarioAssertion,
    passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    observed: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct TestConfig {
    script: PathBuf,
    board: Option<PathBuf>,
    firmware: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RunSnapshot {
    snapshot_schema_version: String,
    #[serde(default)]
    firmware_hash: Option<String>,
    machine: MachineSnapshot,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing with appropriate level based on --trace flag
    if cli.trace {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();
    }

    match cli.command {
        Commands::Run(args) => run(args),
        Commands::Test(args) => run_test(args),
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Load a firmware image into RAM, returning its SHA-256.
fn load_firmware(machine: &mut Machine, path: &Path) -> anyhow::Result<String> {
    info!("Loading firmware: {:?}", path);
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read firmware: {:?}", path))?;
    let hash = hash_bytes(&bytes);
    let image = halley_loader::load_firmware_bytes(bytes, machine.bus.ram.base_addr)
        .with_context(|| format!("Invalid firmware {:?}", path))?;
    machine
        .load_firmware(&image)
        .with_context(|| format!("Failed to place firmware {:?}", path))?;
    Ok(hash)
}

fn load_initrd(machine: &mut Machine, path: &Path) -> anyhow::Result<()> {
    let data =
        std::fs::read(path).with_context(|| format!("Failed to read initrd: {:?}", path))?;
    machine
        .load_initrd(&data)
        .with_context(|| format!("Failed to place initrd {:?}", path))?;
    Ok(())
}

fn read_snapshot(path: &Path) -> anyhow::Result<RunSnapshot> {
    let file =
        std::fs::File::open(path).with_context(|| format!("Failed to open snapshot {:?}", path))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse snapshot {:?}", path))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
    }
    let f = std::fs::File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    serde_json::to_writer_pretty(f, value).with_context(|| format!("Failed to write {:?}", path))
}

fn report_summary(machine: &Machine) {
    info!("Virtual time: {} ns", machine.now_ns());
    info!("CPU interrupt inputs: {:#04x}", machine.cpu_irq.levels());
    for p in &machine.bus.peripherals {
        debug!("{} @ {:#x}: {}", p.name, p.base, p.dev.borrow().snapshot());
    }
}

fn run(args: RunArgs) -> ExitCode {
    info!("Starting Halley6 simulator");

    let mut machine = match build_machine(args.board.as_deref()) {
        Ok(machine) => machine,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let mut firmware_hash = None;
    if let Some(path) = &args.firmware {
        match load_firmware(&mut machine, path) {
            Ok(hash) => firmware_hash = Some(hash),
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        }
    }

    if let Some(path) = &args.initrd {
        if let Err(e) = load_initrd(&mut machine, path) {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    }

    if let Some(path) = &args.restore {
        let restored = read_snapshot(path).and_then(|snapshot| {
            if firmware_hash.is_some() && snapshot.firmware_hash != firmware_hash {
                tracing::warn!("Snapshot {:?} was taken with different firmware", path);
            }
            machine
                .apply_snapshot(snapshot.machine)
                .with_context(|| format!("Failed to restore {:?}", path))
        });
        if let Err(e) = restored {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
        info!("Resumed at {} ns", machine.now_ns());
    }

    machine.advance_ns(args.duration_ns);
    report_summary(&machine);

    if let Some(path) = &args.snapshot {
        let snapshot = RunSnapshot {
            snapshot_schema_version: SNAPSHOT_SCHEMA_VERSION.to_string(),
            firmware_hash,
            machine: machine.snapshot(),
        };
        if let Err(e) = write_json(path, &snapshot) {
            error!("{:#}", e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
        info!("Snapshot written to {:?}", path);
    }

    ExitCode::from(EXIT_PASS)
}

fn check_register(
    machine: &Machine,
    address: u64,
    expected_value: u32,
    mask: Option<u32>,
) -> AssertionResult {
    let assertion = ScenarioAssertion::RegisterValue(RegisterValueAssertion {
        register_value: RegisterValueDetails {
            address,
            expected_value,
            mask,
        },
    });
    let mask = mask.unwrap_or(u32::MAX);
    match machine.bus.read_u32(address) {
        Ok(value) => AssertionResult {
            assertion,
            passed: value & mask == expected_value & mask,
            observed: Some(serde_json::json!(value)),
            message: None,
        },
        Err(e) => AssertionResult {
            assertion,
            passed: false,
            observed: None,
            message: Some(e.to_string()),
        },
    }
}

fn evaluate(machine: &Machine, assertion: &ScenarioAssertion) -> AssertionResult {
    match assertion {
        ScenarioAssertion::RegisterValue(a) => {
            let d = &a.register_value;
            check_register(machine, d.address, d.expected_value, d.mask)
        }
        ScenarioAssertion::CpuIrq(a) => {
            let input = a.cpu_irq.input;
            if input >= CPU_IRQ_INPUTS {
                return AssertionResult {
                    assertion: assertion.clone(),
                    passed: false,
                    observed: None,
                    message: Some(format!("CPU has no interrupt input {}", input)),
                };
            }
            let level = machine.cpu_irq.irq_level(input);
            AssertionResult {
                assertion: assertion.clone(),
                passed: level == a.cpu_irq.level,
                observed: Some(serde_json::json!(level)),
                message: None,
            }
        }
    }
}

/// Apply one scenario step. Reads with an expectation record a result.
fn execute_step(
    machine: &mut Machine,
    step: &ScenarioStep,
    results: &mut Vec<AssertionResult>,
) -> anyhow::Result<()> {
    match step {
        ScenarioStep::Write(w) => {
            machine
                .bus
                .write_u32(w.address, w.value)
                .with_context(|| format!("write of {:#x} to {:#x}", w.value, w.address))?;
        }
        ScenarioStep::Read(r) => match r.expect {
            Some(expected) => results.push(check_register(machine, r.address, expected, r.mask)),
            None => {
                let value = machine
                    .bus
                    .read_u32(r.address)
                    .with_context(|| format!("read of {:#x}", r.address))?;
                info!("read {:#x} = {:#x}", r.address, value);
            }
        },
        ScenarioStep::AdvanceNs(delta) => machine.advance_ns(*delta),
        ScenarioStep::SetIrq(s) => {
            if !machine.set_irq_line(s.line, s.level) {
                anyhow::bail!("board has no interrupt controller for set_irq");
            }
        }
        ScenarioStep::Reset => machine.reset(),
    }
    Ok(())
}

fn resolve_input(
    base_dir: &Path,
    cli: Option<&PathBuf>,
    script: Option<&String>,
) -> Option<PathBuf> {
    cli.cloned().or_else(|| script.map(|p| base_dir.join(p)))
}

fn write_result(args: &TestArgs, result: &TestResult) {
    let Some(output_dir) = &args.output_dir else {
        return;
    };
    if let Err(e) = write_json(&output_dir.join("result.json"), result) {
        error!("{:#}", e);
    }
}

fn config_error(args: &TestArgs, config: TestConfig, message: String) -> ExitCode {
    error!("{}", message);
    let result = TestResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: "error".to_string(),
        steps_executed: 0,
        virtual_time_ns: 0,
        message: Some(message),
        assertions: Vec::new(),
        firmware_hash: None,
        config,
    };
    write_result(args, &result);
    ExitCode::from(EXIT_CONFIG_ERROR)
}

fn run_test(args: TestArgs) -> ExitCode {
    let mut config = TestConfig {
        script: args.script.clone(),
        board: args.board.clone(),
        firmware: args.firmware.clone(),
    };

    let script = match ScenarioScript::from_file(&args.script) {
        Ok(script) => script,
        Err(e) => return config_error(&args, config, format!("{:#}", e)),
    };

    // Paths in a script are relative to the script itself.
    let base_dir = args
        .script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    config.board = resolve_input(&base_dir, args.board.as_ref(), script.inputs.board.as_ref());
    config.firmware = resolve_input(
        &base_dir,
        args.firmware.as_ref(),
        script.inputs.firmware.as_ref(),
    );

    let mut machine = match build_machine(config.board.as_deref()) {
        Ok(machine) => machine,
        Err(e) => return config_error(&args, config, format!("{:#}", e)),
    };

    let mut firmware_hash = None;
    if let Some(path) = config.firmware.clone() {
        match load_firmware(&mut machine, &path) {
            Ok(hash) => firmware_hash = Some(hash),
            Err(e) => return config_error(&args, config, format!("{:#}", e)),
        }
    }

    let mut results = Vec::new();
    let mut steps_executed = 0u64;
    let mut runtime_error = None;
    for (i, step) in script.steps.iter().enumerate() {
        debug!("step {}: {:?}", i, step);
        if let Err(e) = execute_step(&mut machine, step, &mut results) {
            runtime_error = Some(format!("step {}: {:#}", i, e));
            break;
        }
        steps_executed += 1;
    }

    if runtime_error.is_none() {
        results.extend(script.assertions.iter().map(|a| evaluate(&machine, a)));
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    let (status, code) = if runtime_error.is_some() {
        ("error", EXIT_RUNTIME_ERROR)
    } else if failed > 0 {
        ("fail", EXIT_ASSERT_FAIL)
    } else {
        ("pass", EXIT_PASS)
    };

    match &runtime_error {
        Some(msg) => error!("Scenario aborted: {}", msg),
        None => info!(
            "Scenario {}: {}/{} checks passed",
            status,
            results.len() - failed,
            results.len()
        ),
    }
    for r in results.iter().filter(|r| !r.passed) {
        error!(
            "Failed: {:?} (observed {:?}{})",
            r.assertion,
            r.observed,
            r.message
                .as_deref()
                .map(|m| format!(", {}", m))
                .unwrap_or_default()
        );
    }

    let result = TestResult {
        result_schema_version: RESULT_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        steps_executed,
        virtual_time_ns: machine.now_ns(),
        message: runtime_error,
        assertions: results,
        firmware_hash,
        config,
    };
    write_result(&args, &result);

    ExitCode::from(code)
}
