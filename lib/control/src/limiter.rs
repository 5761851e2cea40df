use micromath::F32Ext;

use crate::clamp;

// readings below this are treated as no current
pub const MIN_CURRENT: f32 = 0.001; // in amps

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CurrentUsage {
    pub current: f32, // in amps
    pub avg_current: f32, // in amps
    /// power applied on the previous tick
    pub power: f32,
    pub avg_abs_power: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentLimits {
    pub max_current: f32, // in amps
    pub max_avg_current: f32, // in amps
    /// board wide scale on both limits
    pub current_fraction: f32,
}

/// Largest power magnitude that keeps the projected current inside the limits.
///
/// Current is assumed to scale linearly with power, so the projection is
/// `power * limit / current`. Both the instantaneous and the averaged pair
/// only apply once the joint is drawing measurable current.
pub fn max_power(usage: &CurrentUsage, limits: &CurrentLimits) -> f32 {
    let mut max_power = 1.0f32;

    if usage.current > MIN_CURRENT && usage.power != 0.0 {
        max_power = max_power.min(usage.power.abs() * limits.max_current * limits.current_fraction / usage.current);
    }

    if usage.avg_current > MIN_CURRENT && usage.avg_abs_power != 0.0 {
        max_power = max_power
            .min(usage.avg_abs_power * limits.max_avg_current * limits.current_fraction / usage.avg_current);
    }

    max_power.max(0.0)
}

/// Small nonzero requests are raised to `min_power` so the motor overcomes stiction.
pub fn snap_to_min_power(power: f32, min_power: f32) -> f32 {
    if power != 0.0 && power.abs() < min_power {
        min_power.copysign(power)
    } else {
        power
    }
}

/// Final power for a joint given the requested control signal.
pub fn allocate(requested: f32, min_power: f32, enabled: bool, usage: &CurrentUsage, limits: &CurrentLimits) -> f32 {
    if !enabled {
        return 0.0;
    }

    let power = snap_to_min_power(requested, min_power);
    let max_power = max_power(usage, limits);

    clamp(power, -max_power, max_power)
}
