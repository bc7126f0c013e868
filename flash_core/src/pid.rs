//! PID control law with integral clamp and a filtered derivative.
//!
//! output = bias + Kp·e + Ki·∫e dt + Kd·d(ē)/dt, where ē is an EMA of the
//! error. The integral accumulator is clamped to ±`integral_limit` and the
//! output to `[output_min, output_max]`.
use crate::config::PidCfg;

/// Observable PID state; a copy is published with every snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidState {
    pub integral: f64,
    /// `None` until the first update after a reset.
    pub filtered_error: Option<f64>,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub integral_limit: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub bias: f64,
}

#[derive(Debug, Clone)]
pub struct Pid {
    cfg: PidCfg,
    bias: f64,
    integral: f64,
    filtered_error: Option<f64>,
    last_output: f64,
}

impl Pid {
    pub fn new(cfg: PidCfg) -> Self {
        let last_output = 0.0_f64.clamp(cfg.output_min, cfg.output_max);
        Self {
            cfg,
            bias: 0.0,
            integral: 0.0,
            filtered_error: None,
            last_output,
        }
    }

    /// Feed-forward term added to every output; used to start regulation
    /// from the voltage held at the mode switch.
    pub fn set_bias(&mut self, bias: f64) {
        if bias.is_finite() {
            self.bias = bias;
        }
    }

    /// Advance the controller by `dt` seconds with the given error.
    ///
    /// A non-finite error repeats the previous output. A non-positive or
    /// non-finite `dt` skips integration and differentiation.
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        if !error.is_finite() {
            return self.last_output;
        }
        let step = dt.is_finite() && dt > 0.0;
        if step {
            let lim = self.cfg.integral_limit;
            self.integral = (self.integral + error * dt).clamp(-lim, lim);
        }

        let alpha = self.cfg.derivative_filter;
        let filtered = match self.filtered_error {
            Some(prev) => prev + alpha * (error - prev),
            None => error,
        };
        let derivative = match self.filtered_error {
            Some(prev) if step => (filtered - prev) / dt,
            _ => 0.0,
        };
        self.filtered_error = Some(filtered);

        let raw = self.bias
            + self.cfg.kp * error
            + self.cfg.ki * self.integral
            + self.cfg.kd * derivative;
        let out = if raw.is_nan() {
            self.cfg.output_min
        } else {
            raw.clamp(self.cfg.output_min, self.cfg.output_max)
        };
        self.last_output = out;
        out
    }

    /// Zero the integral and forget the derivative history. The bias is kept.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.filtered_error = None;
        self.last_output = self.bias.clamp(self.cfg.output_min, self.cfg.output_max);
    }

    pub fn integral(&self) -> f64 {
        self.integral
    }

    pub fn state(&self) -> PidState {
        PidState {
            integral: self.integral,
            filtered_error: self.filtered_error,
            kp: self.cfg.kp,
            ki: self.cfg.ki,
            kd: self.cfg.kd,
            integral_limit: self.cfg.integral_limit,
            output_min: self.cfg.output_min,
            output_max: self.cfg.output_max,
            bias: self.bias,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kp: f64, ki: f64, kd: f64) -> PidCfg {
        PidCfg {
            kp,
            ki,
            kd,
            integral_limit: 10.0,
            output_min: -1000.0,
            output_max: 1000.0,
            derivative_filter: 1.0,
        }
    }

    #[test]
    fn proportional_only() {
        let mut pid = Pid::new(cfg(2.0, 0.0, 0.0));
        assert_eq!(pid.update(3.0, 0.05), 6.0);
        assert_eq!(pid.update(-1.0, 0.05), -2.0);
    }

    #[test]
    fn first_update_after_reset_has_no_derivative_kick() {
        let mut pid = Pid::new(cfg(0.0, 0.0, 1.0));
        assert_eq!(pid.update(5.0, 0.1), 0.0);
        let d = pid.update(6.0, 0.1);
        assert!((d - 10.0).abs() < 1e-9, "derivative {d}");
        pid.reset();
        assert_eq!(pid.update(100.0, 0.1), 0.0);
    }

    #[test]
    fn integral_is_clamped_and_reset() {
        let mut pid = Pid::new(cfg(1.0, 0.5, 0.1));
        for _ in 0..1000 {
            pid.update(100.0, 0.05);
            assert!(pid.integral().abs() <= 10.0);
        }
        assert_eq!(pid.integral(), 10.0);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.state().filtered_error, None);
    }

    #[test]
    fn bias_shifts_output_and_survives_reset() {
        let mut pid = Pid::new(PidCfg {
            output_min: 0.0,
            output_max: 300.0,
            ..cfg(1.0, 0.0, 0.0)
        });
        pid.set_bias(120.0);
        assert_eq!(pid.update(0.0, 0.05), 120.0);
        pid.reset();
        assert_eq!(pid.update(-200.0, 0.05), 0.0);
        assert_eq!(pid.update(500.0, 0.05), 300.0);
    }

    #[test]
    fn bad_inputs_do_not_poison_state() {
        let mut pid = Pid::new(cfg(1.0, 1.0, 0.0));
        let a = pid.update(1.0, 0.1);
        assert_eq!(pid.update(f64::NAN, 0.1), a);
        pid.update(1.0, -0.1);
        pid.update(1.0, f64::INFINITY);
        assert!((pid.integral() - 0.1).abs() < 1e-12);
    }
}
