//! `check-config` and `self-check`.
use std::path::Path;
use std::sync::Arc;

use flash_core::flash::detector_for;
use flash_core::hw_error::map_hw_error;
use flash_hardware::SimulatedRig;
use flash_traits::{ActuatorChannel, ChannelId, MonotonicClock, SensorChannel};
use serde_json::json;

use crate::cli::json_mode;
use crate::run::{experiment_cfg, sim_params};

/// Print the experiment parameters the config resolves to.
pub fn check_config(path: &Path, cfg: &flash_config::Config) -> eyre::Result<()> {
    let exp = experiment_cfg(cfg, None)?;
    let detector = detector_for(&exp.flash, exp.current.setpoint_a);
    let tick_ms = flash_core::util::millis(exp.timing.tick);
    let dwell_ms = flash_core::util::millis(exp.dwell);

    if json_mode() {
        println!(
            "{}",
            json!({
                "ok": true,
                "config": path.display().to_string(),
                "tick_ms": tick_ms,
                "target_voltage_v": exp.ramp.target_voltage_v,
                "ramp_rate_v_per_s": exp.ramp.rate_v_per_s,
                "current_setpoint_a": exp.current.setpoint_a,
                "current_hard_limit_a": exp.current.hard_limit_a,
                "detector": detector.name(),
                "dwell_ms": dwell_ms,
            })
        );
        return Ok(());
    }
    println!("config ok: {}", path.display());
    println!(
        "  tick {tick_ms} ms, sensor timeout {} ms",
        flash_core::util::millis(exp.timing.sensor_timeout)
    );
    println!(
        "  ramp to {:.1} V at {:.1} V/s",
        exp.ramp.target_voltage_v, exp.ramp.rate_v_per_s
    );
    if let Some(t) = exp.ramp.start_temperature_c {
        println!("  ramp waits for {t:.1} C");
    }
    println!(
        "  current setpoint {:.3} A (hard limit {:.3} A)",
        exp.current.setpoint_a, exp.current.hard_limit_a
    );
    println!("  flash detector: {}", detector.name());
    println!("  dwell {:.1} s", exp.dwell.as_secs_f64());
    Ok(())
}

/// Read each channel once within the configured timeout, then command both
/// supply outputs to zero.
pub fn self_check(cfg: &flash_config::Config) -> eyre::Result<()> {
    let exp = experiment_cfg(cfg, None)?;
    let timeout = exp.timing.sensor_timeout;
    let rig = SimulatedRig::new(sim_params(&cfg.simulation), Arc::new(MonotonicClock::new()));

    let mut values = Vec::with_capacity(ChannelId::ALL.len());
    for channel in ChannelId::ALL {
        let mut sensor = rig.sensor(channel);
        match sensor.read(timeout) {
            Ok(v) => values.push((channel, v)),
            Err(e) => {
                let mapped = map_hw_error(e.as_ref());
                tracing::error!(%channel, error = %e, "self-check read failed");
                return Err(eyre::Report::new(mapped));
            }
        }
    }
    rig.voltage_output()
        .set_output(0.0)
        .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
    rig.current_limit_output()
        .set_output(0.0)
        .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;

    if json_mode() {
        let readings: serde_json::Map<String, serde_json::Value> = values
            .iter()
            .map(|(c, v)| (c.as_str().to_string(), json!(v)))
            .collect();
        println!("{}", json!({ "ok": true, "readings": readings, "outputs": "zeroed" }));
    } else {
        for (channel, v) in &values {
            println!("{:<12} {v:>10.3} {}", channel.as_str(), channel.unit().symbol());
        }
        println!("outputs zeroed");
        println!("self-check ok");
    }
    Ok(())
}
