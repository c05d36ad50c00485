use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn temp_dir(prefix: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir()
        .join("halley-tests")
        .join(format!("{}-{}-{}", prefix, std::process::id(), nonce));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn halley(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_halley"))
        .args(args)
        .output()
        .expect("Failed to execute halley")
}

fn run_script(script: &str, out: &Path) -> (Output, serde_json::Value) {
    let script = fixture(script);
    let output = halley(&[
        "test",
        "--script",
        script.to_str().unwrap(),
        "--output-dir",
        out.to_str().unwrap(),
    ]);
    let result = std::fs::read_to_string(out.join("result.json")).expect("result.json missing");
    (output, serde_json::from_str(&result).unwrap())
}

#[test]
fn test_scenario_pass() {
    let out = temp_dir("pass");
    let (output, result) = run_script("ost_interrupt.yaml", &out);
    assert_eq!(
        output.status.code(),
        Some(0),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(result["status"], "pass");
    assert_eq!(result["steps_executed"], 6);
    assert_eq!(result["virtual_time_ns"], 1_000_000);
    // Two read expectations plus three assertions.
    let checks = result["assertions"].as_array().unwrap();
    assert_eq!(checks.len(), 5);
    assert!(checks.iter().all(|c| c["passed"] == true));
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_scenario_board_relative_to_script() {
    let out = temp_dir("board");
    let (output, result) = run_script("external_line.yaml", &out);
    assert_eq!(output.status.code(), Some(0), "{}", result);
    assert!(result["config"]["board"]
        .as_str()
        .unwrap()
        .ends_with("slow_board.yaml"));
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_scenario_assertion_failure() {
    let out = temp_dir("fail");
    let (output, result) = run_script("failing_assertion.yaml", &out);
    assert_eq!(output.status.code(), Some(1));
    assert_eq!(result["status"], "fail");
    let checks = result["assertions"].as_array().unwrap();
    assert_eq!(checks[0]["passed"], false);
    assert_eq!(checks[0]["observed"], 1500);
    assert_eq!(checks[1]["passed"], true);
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_scenario_runtime_error() {
    let out = temp_dir("runtime");
    let (output, result) = run_script("unmapped_write.yaml", &out);
    assert_eq!(output.status.code(), Some(3));
    assert_eq!(result["status"], "error");
    assert_eq!(result["steps_executed"], 1);
    assert!(result["message"].as_str().unwrap().contains("0x30000000"));
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_scenario_config_error() {
    let out = temp_dir("config");
    let (output, result) = run_script("bad_version.yaml", &out);
    assert_eq!(output.status.code(), Some(2));
    assert_eq!(result["status"], "error");
    assert!(result["message"].as_str().unwrap().contains("9.9"));
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_run_snapshot_and_resume() {
    let out = temp_dir("run");
    let first = out.join("first.json");
    let second = out.join("second.json");

    let output = halley(&[
        "run",
        "--duration-ns",
        "2_000_000",
        "--snapshot",
        first.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let snap: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&first).unwrap()).unwrap();
    assert_eq!(snap["snapshot_schema_version"], "1.0");
    assert_eq!(snap["machine"]["clock_ns"], 2_000_000);
    assert_eq!(snap["machine"]["peripherals"]["cpm"]["cpccr"], 0x1021_0100);

    let output = halley(&[
        "run",
        "--restore",
        first.to_str().unwrap(),
        "--duration-ns",
        "0xF4240",
        "--snapshot",
        second.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let snap: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&second).unwrap()).unwrap();
    assert_eq!(snap["machine"]["clock_ns"], 3_000_000);
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_run_with_raw_firmware_and_initrd() {
    let out = temp_dir("images");
    let firmware = out.join("fw.bin");
    let initrd = out.join("initrd.img");
    let snapshot = out.join("snap.json");
    std::fs::write(&firmware, [0u8; 64]).unwrap();
    std::fs::write(&initrd, [1u8; 8192]).unwrap();

    let output = halley(&[
        "run",
        "--firmware",
        firmware.to_str().unwrap(),
        "--initrd",
        initrd.to_str().unwrap(),
        "--duration-ns",
        "1000",
        "--snapshot",
        snapshot.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    let snap: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&snapshot).unwrap()).unwrap();
    assert_eq!(snap["machine"]["entry_pc"], 0);
    assert_eq!(snap["machine"]["initrd"]["size"], 8192);
    assert_eq!(snap["firmware_hash"].as_str().unwrap().len(), 64);
    std::fs::remove_dir_all(&out).ok();
}

#[test]
fn test_run_missing_firmware_is_config_error() {
    let output = halley(&[
        "run",
        "--firmware",
        "/nonexistent/firmware.elf",
        "--duration-ns",
        "1",
    ]);
    assert_eq!(output.status.code(), Some(2));
}
