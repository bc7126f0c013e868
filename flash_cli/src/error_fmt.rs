//! Operator-facing error text, exit codes and structured JSON errors.

use flash_core::error::{BuildError, FaultKind, FlashError, Violation};
use serde_json::json;

/// Stable short name of a fault, used in JSON output.
pub fn fault_name(kind: &FaultKind) -> &'static str {
    match kind {
        FaultKind::Safety(_) => "safety",
        FaultKind::SensorFailure { .. } => "sensor_failure",
        FaultKind::ActuatorFailure(_) => "actuator_failure",
        FaultKind::Aborted => "aborted",
    }
}

fn violation_name(v: &Violation) -> &'static str {
    match v {
        Violation::OverVoltage { .. } => "over_voltage",
        Violation::OverCurrent { .. } => "over_current",
        Violation::OverTemperature { .. } => "over_temperature",
        Violation::RampRate { .. } => "ramp_rate",
    }
}

fn humanize_fault(kind: &FaultKind) -> String {
    match kind {
        FaultKind::Safety(v) => {
            let (causes, fix) = match v {
                Violation::OverVoltage { .. } => (
                    "Supply overshoot or a voltage sense lead picking up the supply output directly.",
                    "Check the voltage sense wiring; lower ramp.target_voltage_v or raise safety.max_voltage_v if the limit is too tight.",
                ),
                Violation::OverCurrent { .. } => (
                    "Flash developed faster than the regulator could follow, or the current limit output is not wired.",
                    "Lower current.setpoint_a, soften pid gains, or check the supply's current-limit programming.",
                ),
                Violation::OverTemperature { .. } => (
                    "Runaway Joule heating after flash or a furnace setpoint above the sample limit.",
                    "Reduce current.setpoint_a or the dwell, and check the furnace program.",
                ),
                Violation::RampRate { .. } => (
                    "A voltage step larger than the ramp allows, usually a noisy voltage reading.",
                    "Check the voltage sensor for spikes, or raise safety.max_ramp_rate_v_per_s.",
                ),
            };
            format!(
                "What happened: The experiment was stopped by a safety limit ({v}).\nLikely causes: {causes}\nHow to fix: {fix}"
            )
        }
        FaultKind::SensorFailure {
            channel,
            consecutive,
        } => format!(
            "What happened: The {channel} sensor failed {consecutive} reads in a row.\nLikely causes: Instrument disconnected, conversion slower than timing.sensor_timeout_ms, or readings out of range.\nHow to fix: Check the {channel} instrument and its cabling; raise timing.sensor_timeout_ms or timing.max_consecutive_invalid if the instrument is just slow."
        ),
        FaultKind::ActuatorFailure(msg) => format!(
            "What happened: The power supply rejected a command ({msg}).\nLikely causes: Supply offline, interlock open, or a communication error.\nHow to fix: Check the supply's interface and interlocks before starting a new experiment."
        ),
        FaultKind::Aborted => "What happened: The experiment was aborted.\nLikely causes: Operator interrupt (Ctrl-C) or the --timeout-s watchdog expired.\nHow to fix: Nothing to repair; start a new run when ready, with a longer --timeout-s if the watchdog fired.".to_string(),
    }
}

/// Map an `eyre::Report` to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingSensor(channel) => format!(
                "What happened: No {channel} sensor was provided to the controller.\nLikely causes: The instrument failed to initialize or was not registered with the builder.\nHow to fix: Register a sensor for every channel with with_sensor(...)."
            ),
            BuildError::MissingActuator => "What happened: No voltage output was provided to the controller.\nLikely causes: The power supply failed to initialize.\nHow to fix: Ensure the supply is created and passed via with_voltage_output(...).".to_string(),
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid experiment parameters ({msg}).\nLikely causes: Out-of-range values in the TOML or on the command line.\nHow to fix: Edit the config or the overrides, then rerun `flash check-config`."
            ),
        };
    }

    if let Some(fe) = err.downcast_ref::<FlashError>() {
        return match fe {
            FlashError::Fault(kind) => humanize_fault(kind),
            FlashError::Timeout => "What happened: A sensor read timed out.\nLikely causes: Instrument conversion slower than timing.sensor_timeout_ms, or the instrument is not answering.\nHow to fix: Check the instrument, or raise timing.sensor_timeout_ms (it must stay below timing.tick_ms).".to_string(),
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = format!("{err:#}");
    let lower = msg.to_ascii_lowercase();

    if lower.contains("failed to read config") {
        return format!(
            "What happened: The config file could not be read ({msg}).\nLikely causes: Wrong --config path or missing permissions.\nHow to fix: Pass --config with the path to a readable TOML file."
        );
    }
    if lower.contains("failed to parse config") {
        return format!(
            "What happened: The config file is not valid TOML for this tool ({msg}).\nLikely causes: A typo in a key, a misplaced section, or a value of the wrong type.\nHow to fix: Compare with etc/flash_config.toml and fix the reported line."
        );
    }
    if lower.contains("invalid config") {
        return format!(
            "What happened: Configuration is invalid ({msg}).\nLikely causes: Out-of-range or inconsistent values.\nHow to fix: Edit the TOML config and rerun `flash check-config`."
        );
    }

    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

fn fault_of(err: &eyre::Report) -> Option<&FaultKind> {
    match err.downcast_ref::<FlashError>() {
        Some(FlashError::Fault(kind)) => Some(kind),
        _ => None,
    }
}

/// Stable exit codes per fault kind; any other error returns 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match fault_of(err) {
        Some(FaultKind::Aborted) => 2,
        Some(FaultKind::Safety(_)) => 3,
        Some(FaultKind::SensorFailure { .. }) => 4,
        Some(FaultKind::ActuatorFailure(_)) => 5,
        None => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let message = humanize(err);
    let Some(kind) = fault_of(err) else {
        let reason = match err.downcast_ref::<FlashError>() {
            Some(FlashError::Timeout) => "timeout",
            _ if err.downcast_ref::<BuildError>().is_some() => "config",
            _ => "error",
        };
        return json!({ "reason": reason, "message": message }).to_string();
    };

    let details = match kind {
        FaultKind::Safety(v) => {
            let (observed, limit) = match *v {
                Violation::OverVoltage { observed, limit }
                | Violation::OverCurrent { observed, limit }
                | Violation::OverTemperature { observed, limit }
                | Violation::RampRate { observed, limit } => (observed, limit),
            };
            Some(json!({ "violation": violation_name(v), "observed": observed, "limit": limit }))
        }
        FaultKind::SensorFailure {
            channel,
            consecutive,
        } => Some(json!({ "channel": channel.as_str(), "consecutive": consecutive })),
        FaultKind::ActuatorFailure(msg) => Some(json!({ "error": msg })),
        FaultKind::Aborted => None,
    };
    match details {
        Some(d) => json!({ "reason": fault_name(kind), "details": d, "message": message }),
        None => json!({ "reason": fault_name(kind), "message": message }),
    }
    .to_string()
}
