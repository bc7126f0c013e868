use flash_config::{Config, FlashStrategy, load_toml};
use rstest::rstest;

const BASE: &str = r#"
[timing]
tick_ms = 50
sensor_timeout_ms = 20
max_consecutive_invalid = 3

[pid]
kp = 20.0
ki = 40.0
kd = 0.1
integral_limit = 5.0
output_min = 0.0
output_max = 300.0

[ramp]
target_voltage_v = 120.0
rate_v_per_s = 10.0

[current]
setpoint_a = 1.0
hard_limit_a = 1.5

[flash]
strategy = "absolute_current"
threshold_a = 0.5

[dwell]
duration_ms = 30000

[safety]
max_voltage_v = 300.0
max_current_a = 2.0
max_temperature_c = 1400.0
max_ramp_rate_v_per_s = 500.0
"#;

#[test]
fn accepts_complete_config() {
    let cfg = load_toml(BASE).expect("parse TOML");
    cfg.validate().expect("valid config should pass");
    assert_eq!(cfg.flash.strategy, FlashStrategy::AbsoluteCurrent);
    assert_eq!(cfg.dwell.duration_ms, 30_000);
}

#[test]
fn empty_file_uses_defaults() {
    let cfg = load_toml("").expect("parse TOML");
    cfg.validate().expect("defaults validate");
    assert_eq!(cfg.timing.tick_ms, 50);
}

#[rstest]
#[case("tick_ms = 50", "tick_ms = 0", "timing.tick_ms must be > 0")]
#[case("sensor_timeout_ms = 20", "sensor_timeout_ms = 50", "sensor_timeout_ms must be < timing.tick_ms")]
#[case("max_consecutive_invalid = 3", "max_consecutive_invalid = 0", "max_consecutive_invalid must be >= 1")]
#[case("kp = 20.0", "kp = -1.0", "pid.kp must be finite and >= 0")]
#[case("output_min = 0.0", "output_min = 10.0", "must contain 0")]
#[case("integral_limit = 5.0", "integral_limit = 50.0", "ki * pid.integral_limit")]
#[case("target_voltage_v = 120.0", "target_voltage_v = 350.0", "target_voltage_v must be <= safety.max_voltage_v")]
#[case("rate_v_per_s = 10.0", "rate_v_per_s = 600.0", "rate_v_per_s must be <= safety.max_ramp_rate_v_per_s")]
#[case("setpoint_a = 1.0", "setpoint_a = 1.8", "setpoint_a must be <= current.hard_limit_a")]
#[case("hard_limit_a = 1.5", "hard_limit_a = 2.5", "hard_limit_a must be in")]
#[case("threshold_a = 0.5", "threshold_a = 0.0", "flash.threshold_a must be > 0")]
#[case("threshold_a = 0.5", "threshold_a = 1.6", "flash.threshold_a must be <= current.hard_limit_a")]
#[case("max_current_a = 2.0", "max_current_a = 0.0", "safety.max_current_a must be > 0")]
fn rejects_invalid_values(#[case] from: &str, #[case] to: &str, #[case] msg: &str) {
    let toml = BASE.replacen(from, to, 1);
    assert_ne!(toml, BASE, "replacement `{from}` did not apply");
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("should reject");
    assert!(format!("{err}").contains(msg), "unexpected error: {err}");
}

#[test]
fn zero_gains_rejected() {
    let toml = BASE
        .replacen("kp = 20.0", "kp = 0.0", 1)
        .replacen("ki = 40.0", "ki = 0.0", 1)
        .replacen("kd = 0.1", "kd = 0.0", 1);
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("all-zero gains");
    assert!(format!("{err}").contains("must not all be zero"));
}

#[test]
fn negative_tick_does_not_parse() {
    let toml = BASE.replacen("tick_ms = 50", "tick_ms = -50", 1);
    assert!(load_toml(&toml).is_err());
}

#[test]
fn unknown_flash_strategy_does_not_parse() {
    let toml = BASE.replacen("\"absolute_current\"", "\"voodoo\"", 1);
    assert!(load_toml(&toml).is_err());
}

#[test]
fn sample_geometry_overrides_setpoints() {
    let toml = format!(
        "{BASE}\n[sample]\nelectrode_distance_cm = 1.0\nelectric_field_v_per_cm = 30.0\nwidth_mm = 1.6\nthickness_mm = 1.0\ncurrent_density_ma_per_mm2 = 100.0\n"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    cfg.validate().expect("geometry config valid");
    assert_eq!(cfg.target_voltage_v(), 30.0);
    assert!((cfg.current_setpoint_a() - 0.16).abs() < 1e-12);
}

#[test]
fn geometry_exceeding_safety_is_rejected() {
    let toml = format!(
        "{BASE}\n[sample]\nelectrode_distance_cm = 2.0\nelectric_field_v_per_cm = 200.0\n"
    );
    let cfg = load_toml(&toml).expect("parse TOML");
    let err = cfg.validate().expect_err("400 V exceeds 300 V");
    assert!(format!("{err}").contains("safety.max_voltage_v"));
}

#[test]
fn loads_from_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("flash.toml");
    std::fs::write(&path, BASE).expect("write config");
    let s = std::fs::read_to_string(&path).expect("read config");
    let cfg = load_toml(&s).expect("parse TOML");
    assert_eq!(cfg.ramp.target_voltage_v, 120.0);
}

#[test]
fn shipped_sample_config_matches_defaults() {
    let cfg = load_toml(include_str!("../../etc/flash_config.toml")).expect("sample parses");
    cfg.validate().expect("sample validates");
    let d = Config::default();
    assert_eq!(cfg.timing.tick_ms, d.timing.tick_ms);
    assert_eq!(cfg.pid.kp, d.pid.kp);
    assert_eq!(cfg.pid.ki, d.pid.ki);
    assert_eq!(cfg.ramp.rate_v_per_s, d.ramp.rate_v_per_s);
    assert_eq!(cfg.current.setpoint_a, d.current.setpoint_a);
    assert_eq!(cfg.flash.strategy, d.flash.strategy);
    assert_eq!(cfg.dwell.duration_ms, d.dwell.duration_ms);
    assert_eq!(cfg.simulation.furnace_setpoint_c, d.simulation.furnace_setpoint_c);
    assert_eq!(cfg.logging.level.as_deref(), Some("info"));
    assert!(cfg.sample.target_voltage_v().is_none());
}
