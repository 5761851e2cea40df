use micromath::F32Ext;

use crate::clamp;

// below this we skip the derivative and integral time divisions
const MIN_TIME: f32 = 1e-4;
// control magnitude that counts as moving in a direction
const DIRECTION_DEADBAND: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidTuning {
    pub p: f32, // output per unit of error
    pub i_time: f32, // in seconds
    pub d_time: f32, // in seconds
    /// error below which control is zero
    pub threshold: f32,
    /// error allowed against the last control direction
    pub overshoot_threshold: f32,
}

impl PidTuning {
    pub fn from_defaults(defaults: &config::ChannelDefaults) -> PidTuning {
        PidTuning {
            p: defaults.p,
            i_time: defaults.i_time,
            d_time: defaults.d_time,
            threshold: defaults.threshold,
            overshoot_threshold: defaults.overshoot_threshold,
        }
    }
}

/// PID with a dead band that is wider when the error points against the
/// direction we were last driving.
///
/// Backlash in the gearing makes small reversals useless, so once a joint has
/// overshot by less than `overshoot_threshold` we stop pushing instead of
/// wiggling back. Output is in [-1, +1].
#[derive(Debug, Clone, PartialEq)]
pub struct HysteresisPid {
    pub tuning: PidTuning,

    control: f32,
    last_direction: i8,
    last_error: f32,
    last_target: f32,
    integral_control: f32,
    primed: bool,
}

impl HysteresisPid {
    pub fn new(tuning: PidTuning) -> HysteresisPid {
        HysteresisPid {
            tuning,
            control: 0.0,
            last_direction: 0,
            last_error: 0.0,
            last_target: 0.0,
            integral_control: 0.0,
            primed: false,
        }
    }

    /// Forget history; the next update has no derivative term.
    pub fn reset(&mut self) {
        *self = HysteresisPid::new(self.tuning);
    }

    pub fn control(&self) -> f32 {
        self.control
    }

    pub fn integral_control(&self) -> f32 {
        self.integral_control
    }

    pub fn last_direction(&self) -> i8 {
        self.last_direction
    }

    /// `elapsed` is the time since the previous update in seconds, and must not be negative.
    pub fn update(&mut self, measured: f32, target: f32, elapsed: f32) -> f32 {
        let PidTuning { p, i_time, d_time, threshold, overshoot_threshold } = self.tuning;

        let mut error = target - measured;
        let overshoot = error * f32::from(self.last_direction) < 0.0;

        // derivative keeps working inside the dead band to stop momentum
        if error.abs() < threshold || (overshoot && error.abs() < overshoot_threshold) {
            error = 0.0;
            self.integral_control = 0.0;
        }

        if !self.primed {
            self.last_error = error;
            self.last_target = target;
            self.primed = true;
        }

        // target movement is not tracking error, take it out of the derivative
        let diff = if elapsed > MIN_TIME {
            (error - self.last_error - (target - self.last_target)) * d_time / elapsed
        } else {
            0.0
        };

        self.last_error = error;
        self.last_target = target;

        let pd_control = p * (error + diff);

        // crossed the target, stop compounding the old integral
        if pd_control * self.integral_control < 0.0 {
            self.integral_control = 0.0;
        }

        if pd_control.abs() >= 1.0 {
            self.integral_control = 0.0;
        } else if i_time > MIN_TIME {
            self.integral_control = clamp(self.integral_control + p * error * elapsed / i_time, -1.0, 1.0);
        }

        self.control = clamp(pd_control + self.integral_control, -1.0, 1.0);

        if self.control > DIRECTION_DEADBAND {
            self.last_direction = 1;
        } else if self.control < -DIRECTION_DEADBAND {
            self.last_direction = -1;
        }

        self.control
    }
}
