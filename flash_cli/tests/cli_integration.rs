use assert_cmd::prelude::*;
use predicates::prelude::*;
use rstest::rstest;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::{TempDir, tempdir};

// Fast simulated experiment: 10 ms ticks, a furnace already near flash
// temperature and a short dwell, so a full run takes about a second.
const FAST: &[(&str, &str, &str)] = &[
    ("timing", "tick_ms", "10"),
    ("timing", "sensor_timeout_ms", "5"),
    ("ramp", "rate_v_per_s", "200.0"),
    ("ramp", "ramp_down_rate_v_per_s", "1000.0"),
    ("dwell", "duration_ms", "300"),
    ("simulation", "furnace_start_c", "790.0"),
];

fn write_config(dir: &TempDir, overrides: &[(&str, &str, &str)]) -> PathBuf {
    let mut tables: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();
    for &(table, key, value) in FAST.iter().chain(overrides) {
        tables.entry(table).or_default().insert(key, value);
    }
    let mut text = String::new();
    for (table, entries) in &tables {
        writeln!(text, "[{table}]").unwrap();
        for (k, v) in entries {
            writeln!(text, "{k} = {v}").unwrap();
        }
    }
    let path = dir.path().join("cfg.toml");
    fs::write(&path, text).unwrap();
    path
}

fn flash(cfg: &Path) -> Command {
    let mut cmd = Command::cargo_bin("flash").unwrap();
    cmd.arg("--config").arg(cfg).arg("--log-level").arg("warn");
    cmd
}

#[rstest]
#[case(&[], &["--help"], 0, "Usage:", "stdout")]
#[case(&[], &["run"], 0, "complete", "stdout")]
#[case(&[], &["check-config"], 0, "flash detector: absolute_current", "stdout")]
#[case(&[], &["self-check"], 0, "self-check ok", "stdout")]
#[case(&[("timing", "sensor_timeout_ms", "10")], &["check-config"], 1, "Configuration is invalid", "stderr")]
#[case(&[("safety", "max_temperature_c", "700.0")], &["run"], 3, "over-temperature", "stderr")]
#[case(&[("simulation", "read_latency_ms", "8")], &["run"], 4, "voltage sensor failed 4 reads", "stderr")]
#[case(&[("simulation", "read_latency_ms", "8")], &["self-check"], 1, "sensor read timed out", "stderr")]
#[case(&[("dwell", "duration_ms", "600000")], &["run", "--timeout-s", "1"], 2, "aborted", "stderr")]
#[case(&[], &["run", "--current", "50"], 1, "current setpoint", "stderr")]
fn cli_table_cases(
    #[case] overrides: &[(&str, &str, &str)],
    #[case] args: &[&str],
    #[case] exit_code: i32,
    #[case] needle: &str,
    #[case] stream: &str,
) {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, overrides);
    let assert = flash(&cfg).args(args).assert().code(exit_code);
    match stream {
        "stdout" => {
            assert.stdout(predicate::str::contains(needle));
        }
        "stderr" => {
            assert.stderr(predicate::str::contains(needle));
        }
        other => panic!("unknown stream: {other}"),
    }
}

#[test]
fn unreadable_config_is_explained() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nope.toml");
    flash(&missing)
        .arg("check-config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("config file could not be read"));
}

#[test]
fn malformed_config_is_explained() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    fs::write(&path, "[timing]\ntick_ms = \"fast\"\n").unwrap();
    flash(&path)
        .arg("check-config")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not valid TOML"));
}

#[test]
fn csv_record_covers_the_whole_experiment() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &[]);
    let out = dir.path().join("run.csv");
    flash(&cfg)
        .arg("run")
        .arg("--record")
        .arg(&out)
        .assert()
        .success();

    let text = fs::read_to_string(&out).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("experiment,tick,t_s,voltage_v,current_a,temperature_c,commanded_v,state")
    );
    let rows: Vec<Vec<&str>> = lines.map(|l| l.split(',').collect()).collect();
    assert!(rows.len() > 20, "only {} rows", rows.len());
    assert!(rows.iter().all(|r| r.len() == 8 && r[0] == "1"));
    assert_eq!(rows.first().unwrap()[7], "ramping");
    assert_eq!(rows.last().unwrap()[7], "complete");
    assert!(rows.iter().any(|r| r[7] == "current_limited"));
    let ticks: Vec<u64> = rows.iter().map(|r| r[1].parse().unwrap()).collect();
    assert!(ticks.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn json_mode_emits_summary_and_jsonl_records() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &[]);
    let out = dir.path().join("run.jsonl");
    let output = flash(&cfg)
        .arg("--json")
        .args(["run", "--format", "jsonl", "--record"])
        .arg(&out)
        .output()
        .unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).unwrap();
    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let summary = events.last().unwrap();
    assert_eq!(summary["event"], "summary");
    assert_eq!(summary["state"], "complete");
    assert!(summary["fault"].is_null());
    assert!(summary["records_written"].as_u64().unwrap() > 20);
    assert!(
        events
            .iter()
            .any(|e| e["event"] == "state" && e["state"] == "current_limited")
    );

    let records: Vec<serde_json::Value> = fs::read_to_string(&out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(
        records.len() as u64,
        summary["records_written"].as_u64().unwrap()
    );
    assert_eq!(records.last().unwrap()["state"], "complete");
    assert_eq!(records.last().unwrap()["commanded_v"], 0.0);
}

#[test]
fn json_errors_name_the_fault() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &[("safety", "max_temperature_c", "700.0")]);
    let output = flash(&cfg).arg("--json").arg("run").output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    let stdout = String::from_utf8(output.stdout).unwrap();
    let err: serde_json::Value = serde_json::from_str(stdout.lines().last().unwrap()).unwrap();
    assert_eq!(err["reason"], "safety");
    assert_eq!(err["details"]["violation"], "over_temperature");
    assert_eq!(err["details"]["limit"], 700.0);
}

#[test]
fn stats_go_to_stderr() {
    let dir = tempdir().unwrap();
    let cfg = write_config(&dir, &[]);
    flash(&cfg)
        .args(["run", "--stats"])
        .assert()
        .success()
        .stderr(predicate::str::contains("--- Control Loop Stats ---"))
        .stdout(predicate::str::contains("records: 0 written"));
}
