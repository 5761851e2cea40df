use crate::clamp;
use crate::limiter::{self, CurrentLimits, CurrentUsage};
use crate::mux::{ChipId, Route};
use crate::pid::{HysteresisPid, PidTuning};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub min_position: f32,
    pub max_position: f32,
    pub reverse_output: bool,
    pub reverse_input: bool,
    pub min_power: f32,
    pub max_current: f32, // in amps
    pub max_avg_current: f32, // in amps
}

impl Calibration {
    pub fn from_defaults(defaults: &config::ChannelDefaults) -> Calibration {
        Calibration {
            min_position: defaults.min_position,
            max_position: defaults.max_position,
            reverse_output: false,
            reverse_input: false,
            min_power: defaults.min_power,
            max_current: defaults.max_current,
            max_avg_current: defaults.max_avg_current,
        }
    }

    /// Pulls every field back into the range the loop can use.
    pub fn sanitized(self) -> Calibration {
        let finite_or = |v: f32, fallback: f32| if v.is_finite() { v } else { fallback };
        let min_position = clamp(finite_or(self.min_position, 0.0), 0.0, 1.0);
        let max_position = clamp(finite_or(self.max_position, 1.0), 0.0, 1.0);

        Calibration {
            min_position: min_position.min(max_position),
            max_position: max_position.max(min_position),
            min_power: clamp(finite_or(self.min_power, 0.0), 0.0, 1.0),
            max_current: finite_or(self.max_current, 0.0).max(0.0),
            max_avg_current: finite_or(self.max_avg_current, 0.0).max(0.0),
            ..self
        }
    }
}

/// Everything about a channel that is configured rather than measured.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    pub calibration: Calibration,
    pub tuning: PidTuning,
}

impl ChannelConfig {
    pub fn from_defaults(defaults: &config::ChannelDefaults) -> ChannelConfig {
        ChannelConfig {
            calibration: Calibration::from_defaults(defaults),
            tuning: PidTuning::from_defaults(defaults),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub calibration: Calibration,
    pub pid: HysteresisPid,
    pub chip: ChipId,
    pub enabled: bool,

    /// smoothed, with reverse_input applied, `None` when unread or unbound
    pub position: Option<f32>,
    pub current: f32, // in amps
    pub avg_current: f32, // in amps
    pub power: f32,
    pub avg_abs_power: f32,

    pub power_offset: f32,
    pub seek: Option<f32>,
}

impl Channel {
    pub fn new(config: ChannelConfig, chip: ChipId) -> Channel {
        Channel {
            calibration: config.calibration.sanitized(),
            pid: HysteresisPid::new(config.tuning),
            chip,
            enabled: true,
            position: None,
            current: 0.0,
            avg_current: 0.0,
            power: 0.0,
            avg_abs_power: 0.0,
            power_offset: 0.0,
            seek: None,
        }
    }

    pub fn config(&self) -> ChannelConfig {
        ChannelConfig {
            calibration: self.calibration,
            tuning: self.pid.tuning,
        }
    }

    /// Applies new settings. Controller history survives a retune.
    pub fn configure(&mut self, config: ChannelConfig) {
        self.calibration = config.calibration.sanitized();
        self.pid.tuning = config.tuning;
        self.seek = self.seek.map(|seek| self.clamp_position(seek));
    }

    pub fn route(&self) -> Route {
        Route {
            chip: self.chip,
            reverse_input: self.calibration.reverse_input,
            reverse_output: self.calibration.reverse_output,
        }
    }

    pub fn clamp_position(&self, position: f32) -> f32 {
        clamp(position, self.calibration.min_position, self.calibration.max_position)
    }

    /// Stores a host drive request. `seek` of `None` stops position control.
    pub fn set_drive(&mut self, power_offset: f32, seek: Option<f32>) {
        self.power_offset = if power_offset.is_nan() { 0.0 } else { clamp(power_offset, -1.0, 1.0) };

        let seek = seek.filter(|s| !s.is_nan()).map(|s| self.clamp_position(s));
        if self.seek.is_none() && seek.is_some() {
            // old error and target are from an unrelated move
            self.pid.reset();
        }
        self.seek = seek;
    }

    pub fn halt(&mut self) {
        self.power_offset = 0.0;
        self.seek = None;
    }

    /// Takes a new raw position reading in [0, 1].
    pub fn observe_position(&mut self, raw: f32, smoothing: impl FnOnce(f32, f32) -> f32) {
        let logical = if self.calibration.reverse_input { 1.0 - raw } else { raw };
        self.position = Some(match self.position {
            Some(previous) => smoothing(logical, previous),
            None => logical,
        });
    }

    pub fn usage(&self) -> CurrentUsage {
        CurrentUsage {
            current: self.current,
            avg_current: self.avg_current,
            power: self.power,
            avg_abs_power: self.avg_abs_power,
        }
    }

    /// Power this joint asks for before limiting.
    pub fn requested_power(&mut self, elapsed: f32) -> f32 {
        let mut power = self.power_offset;
        if let (Some(seek), Some(position)) = (self.seek, self.position) {
            let target = self.clamp_position(seek);
            power += self.pid.update(position, target, elapsed);
        }
        power
    }

    /// Runs the controller and the limiter, returning the logical power for this tick.
    pub fn step(&mut self, elapsed: f32, current_fraction: f32) -> f32 {
        if !self.enabled {
            // no history builds up while nothing is driven
            self.pid.reset();
            return 0.0;
        }

        let requested = self.requested_power(elapsed);
        let limits = CurrentLimits {
            max_current: self.calibration.max_current,
            max_avg_current: self.calibration.max_avg_current,
            current_fraction,
        };
        limiter::allocate(requested, self.calibration.min_power, self.enabled, &self.usage(), &limits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaugeConfig {
    pub zero_offset: f32, // in volts
    pub coefficient: f32, // units per volt
}

impl Default for GaugeConfig {
    fn default() -> Self {
        GaugeConfig {
            zero_offset: 0.0,
            coefficient: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gauge {
    pub config: GaugeConfig,
    pub strain: f32,
}

impl Gauge {
    pub fn observe(&mut self, volts: f32, smoothing: impl FnOnce(f32, f32) -> f32) {
        let strain = (volts - self.config.zero_offset) * self.config.coefficient;
        self.strain = smoothing(strain, self.strain);
    }
}
