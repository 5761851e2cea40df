#![no_std]

pub const CHANNELS: usize = 24;
pub const GAUGES: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDefaults {
    pub min_position: f32,
    pub max_position: f32,
    pub min_power: f32,
    pub max_current: f32, // in amps
    pub max_avg_current: f32, // in amps

    pub p: f32, // full power at 1/p of travel
    pub i_time: f32, // in seconds
    pub d_time: f32, // in seconds
    pub threshold: f32,
    pub overshoot_threshold: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    // loop timing
    pub min_loop_period_us: u32,
    pub fps_gamma: f32,

    // smoothing
    pub state_half_life: f32, // in seconds
    pub average_half_life: f32, // in seconds

    /// derates every channel's current ceilings, 1.0 on a healthy supply
    pub current_fraction: f32,

    // command channel
    pub hold_window_ms: u32,
    pub long_press_ms: u32,

    // driver chips
    pub onboard_slots: u8,
    pub driver_chips: u8,
    pub slots_per_driver: u8,

    pub channel: ChannelDefaults,
}

impl Config {
    pub fn new() -> Self {
        Config {
            min_loop_period_us: 1_000,
            fps_gamma: 0.99,
            state_half_life: 0.030,
            average_half_life: 1.0,
            current_fraction: 1.0,
            hold_window_ms: 1_000,
            long_press_ms: 1_000,
            onboard_slots: 0,
            driver_chips: 3,
            slots_per_driver: 8,
            channel: ChannelDefaults {
                min_position: 0.0,
                max_position: 1.0,
                min_power: 0.0,
                max_current: 1.0,
                max_avg_current: 0.5,
                p: 4.0,
                i_time: 2.0,
                d_time: 0.050,
                threshold: 0.01,
                overshoot_threshold: 0.02,
            },
        }
    }

    /// Hand controller: two H-bridges on the main MCU, three 6 channel PID drive boards.
    pub fn hand() -> Self {
        Config {
            min_loop_period_us: 10_000,
            onboard_slots: 2,
            driver_chips: 3,
            slots_per_driver: 6,
            ..Config::new()
        }
    }

    pub fn total_slots(&self) -> usize {
        self.onboard_slots as usize + self.driver_chips as usize * self.slots_per_driver as usize
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::new()
    }
}
