use crate::channel::{ChannelConfig, GaugeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SupplySample {
    pub voltage: f32, // in volts
    pub current: f32, // in amps
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoardState {
    pub voltage: f32, // in volts
    pub current: f32, // in amps
    pub power: f32, // in watts
    pub energy: f32, // in joules
    pub fps: f32,
    pub max_loop_time: f32, // in seconds
    pub update_time_ms: u32,
    pub bus_errors: u32,
    pub current_fraction: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelTelemetry {
    pub position: Option<f32>,
    pub current: f32,
    pub power: f32,
    pub seek: Option<f32>,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry<const N: usize, const G: usize> {
    pub board: BoardState,
    pub channels: [ChannelTelemetry; N],
    pub strains: [f32; G],
}

#[derive(Debug, Clone, PartialEq)]
pub struct Configuration<const N: usize, const G: usize> {
    pub channels: [ChannelConfig; N],
    pub gauges: [GaugeConfig; G],
}

/// What the loop publishes after each tick. `version` counts ticks, so readers
/// can tell a fresh snapshot from one they already sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<const N: usize, const G: usize> {
    pub version: u32,
    pub telemetry: Telemetry<N, G>,
    pub configuration: Configuration<N, G>,
}
