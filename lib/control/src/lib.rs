#![no_std]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

pub mod channel;
pub mod command;
pub mod control_loop;
pub mod limiter;
pub mod mux;
pub mod output;
pub mod pid;
pub mod storage;
pub mod telemetry;
pub mod timing;

pub use channel::{Calibration, Channel, ChannelConfig, Gauge, GaugeConfig};
pub use command::LoopCommand;
pub use control_loop::{ControlLoop, SensorFrame, SensorSource, TickReport};
pub use mux::ChipId;
pub use output::{DriveSink, SlotCommand, SlotDrive};
pub use pid::{HysteresisPid, PidTuning};
pub use storage::{ConfigStore, StorageError, StorageStatus};
pub use telemetry::{BoardState, Snapshot, SupplySample, Telemetry};
pub use timing::Clock;

/// `value` limited to the range spanned by `a` and `b`, in either order. Never panics.
pub fn clamp(value: f32, a: f32, b: f32) -> f32 {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    if value < low {
        low
    } else if value > high {
        high
    } else {
        value
    }
}
