#![no_std]

#[cfg(any(feature = "std", test))]
#[macro_use]
extern crate std;

use bincode::config::{BigEndian, Configuration, Fixint, NoLimit};
use bincode::error::{DecodeError, EncodeError};
use bincode::{Decode, Encode};
use config::{CHANNELS, GAUGES};
use control::channel::{Calibration, ChannelConfig, GaugeConfig};
use control::telemetry::{Configuration as LoopConfiguration, Telemetry};
use control::{LoopCommand, PidTuning};

pub mod authority;

pub use authority::{ClientId, CommandAuthority, CommandRouter, Routed, StateSubscription};

pub static BINCODE_CFG: Configuration<BigEndian, Fixint, NoLimit> = bincode::config::standard()
    .with_big_endian()
    .with_fixed_int_encoding();

/// First byte of every message.
pub mod code {
    pub const STATE: u8 = 0x00;
    pub const COMMAND: u8 = 0x01;
    pub const CONFIGURATION: u8 = 0x02;
    pub const CONFIGURE: u8 = 0x03;
    pub const REQUEST_STATE_UPDATES: u8 = 0x07;
    pub const REQUEST_CONFIGURATION: u8 = 0x08;
    pub const RELOAD_CONFIGURATION: u8 = 0x09;
    pub const ENABLE: u8 = 0x0A;
}

/// Seek value meaning "no position control", also sent for unknown positions.
pub const NO_VALUE: f32 = -1.0;

pub const CHANNEL_SETTINGS_LEN: usize = 42;
pub const STATE_LEN: usize = 1 + 6 * 4 + CHANNELS * 16 + GAUGES * 4;
pub const CONFIGURATION_LEN: usize = 1 + CHANNELS * CHANNEL_SETTINGS_LEN + GAUGES * 8;
pub const MAX_MESSAGE_LEN: usize = CONFIGURATION_LEN + 1;

#[derive(Debug)]
pub enum ProtocolError {
    Empty,
    UnknownCode(u8),
    TrailingBytes { code: u8, extra: usize },
    BufferTooSmall,
    Decode(DecodeError),
    Encode(EncodeError),
}

impl From<DecodeError> for ProtocolError {
    fn from(e: DecodeError) -> Self {
        ProtocolError::Decode(e)
    }
}

impl From<EncodeError> for ProtocolError {
    fn from(e: EncodeError) -> Self {
        ProtocolError::Encode(e)
    }
}

fn optional(value: f32) -> Option<f32> {
    if value == NO_VALUE || value.is_nan() {
        None
    } else {
        Some(value)
    }
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelState {
    pub position: f32,
    pub current: f32,
    pub power: f32,
    pub seek: f32,
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Default)]
pub struct StateFrame {
    pub voltage: f32,
    pub current: f32,
    pub power: f32,
    pub fps: f32,
    pub max_loop_time: f32,
    pub update_time: u32, // in ms
    pub channels: [ChannelState; CHANNELS],
    pub strains: [f32; GAUGES],
}

impl From<&Telemetry<CHANNELS, GAUGES>> for StateFrame {
    fn from(telemetry: &Telemetry<CHANNELS, GAUGES>) -> Self {
        let board = &telemetry.board;
        let mut frame = StateFrame {
            voltage: board.voltage,
            current: board.current,
            power: board.power,
            fps: board.fps,
            max_loop_time: board.max_loop_time,
            update_time: board.update_time_ms,
            channels: Default::default(),
            strains: telemetry.strains,
        };
        for (wire, channel) in frame.channels.iter_mut().zip(telemetry.channels.iter()) {
            *wire = ChannelState {
                position: channel.position.unwrap_or(NO_VALUE),
                current: channel.current,
                power: channel.power,
                seek: channel.seek.unwrap_or(NO_VALUE),
            };
        }
        frame
    }
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq)]
pub struct ChannelDrive {
    pub power_offset: f32,
    pub seek: f32,
}

impl Default for ChannelDrive {
    fn default() -> Self {
        ChannelDrive {
            power_offset: 0.0,
            seek: NO_VALUE,
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Default)]
pub struct CommandFrame {
    pub channels: [ChannelDrive; CHANNELS],
}

impl CommandFrame {
    pub fn to_loop_command(&self) -> LoopCommand<CHANNELS, GAUGES> {
        LoopCommand::Drive {
            power_offset: self.channels.map(|c| c.power_offset),
            seek: self.channels.map(|c| optional(c.seek)),
        }
    }
}

/// 42 bytes per channel on the wire.
#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Default)]
pub struct ChannelSettings {
    pub min_position: f32,
    pub max_position: f32,
    pub reverse_output: bool,
    pub reverse_input: bool,
    pub p: f32,
    pub i_time: f32,
    pub d_time: f32,
    pub threshold: f32,
    pub overshoot_threshold: f32,
    pub min_power: f32,
    pub max_current: f32,
    pub max_avg_current: f32,
}

impl From<ChannelConfig> for ChannelSettings {
    fn from(config: ChannelConfig) -> Self {
        let ChannelConfig { calibration, tuning } = config;
        ChannelSettings {
            min_position: calibration.min_position,
            max_position: calibration.max_position,
            reverse_output: calibration.reverse_output,
            reverse_input: calibration.reverse_input,
            p: tuning.p,
            i_time: tuning.i_time,
            d_time: tuning.d_time,
            threshold: tuning.threshold,
            overshoot_threshold: tuning.overshoot_threshold,
            min_power: calibration.min_power,
            max_current: calibration.max_current,
            max_avg_current: calibration.max_avg_current,
        }
    }
}

impl From<ChannelSettings> for ChannelConfig {
    fn from(settings: ChannelSettings) -> Self {
        ChannelConfig {
            calibration: Calibration {
                min_position: settings.min_position,
                max_position: settings.max_position,
                reverse_output: settings.reverse_output,
                reverse_input: settings.reverse_input,
                min_power: settings.min_power,
                max_current: settings.max_current,
                max_avg_current: settings.max_avg_current,
            },
            tuning: PidTuning {
                p: settings.p,
                i_time: settings.i_time,
                d_time: settings.d_time,
                threshold: settings.threshold,
                overshoot_threshold: settings.overshoot_threshold,
            },
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, Copy, PartialEq, Default)]
pub struct GaugeSettings {
    pub zero_offset: f32,
    pub coefficient: f32,
}

impl From<GaugeConfig> for GaugeSettings {
    fn from(config: GaugeConfig) -> Self {
        GaugeSettings {
            zero_offset: config.zero_offset,
            coefficient: config.coefficient,
        }
    }
}

impl From<GaugeSettings> for GaugeConfig {
    fn from(settings: GaugeSettings) -> Self {
        GaugeConfig {
            zero_offset: settings.zero_offset,
            coefficient: settings.coefficient,
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Default)]
pub struct ConfigurationFrame {
    pub channels: [ChannelSettings; CHANNELS],
    pub gauges: [GaugeSettings; GAUGES],
}

impl From<&LoopConfiguration<CHANNELS, GAUGES>> for ConfigurationFrame {
    fn from(configuration: &LoopConfiguration<CHANNELS, GAUGES>) -> Self {
        ConfigurationFrame {
            channels: configuration.channels.map(ChannelSettings::from),
            gauges: configuration.gauges.map(GaugeSettings::from),
        }
    }
}

#[derive(Encode, Decode, Debug, Clone, PartialEq, Default)]
pub struct ConfigureFrame {
    pub save: bool,
    pub configuration: ConfigurationFrame,
}

impl ConfigureFrame {
    pub fn to_loop_command(&self) -> LoopCommand<CHANNELS, GAUGES> {
        LoopCommand::Configure {
            channels: self.configuration.channels.map(ChannelConfig::from),
            gauges: self.configuration.gauges.map(GaugeConfig::from),
            persist: self.save,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostToDevice {
    Command(CommandFrame),
    Configure(ConfigureFrame),
    RequestStateUpdates,
    RequestConfiguration,
    ReloadConfiguration,
    /// bit i enables channel i
    Enable(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceToHost {
    State(StateFrame),
    Configuration(ConfigurationFrame),
}

fn encode_message<T: Encode>(code: u8, payload: &T, buf: &mut [u8]) -> Result<usize, ProtocolError> {
    let (first, rest) = buf.split_first_mut().ok_or(ProtocolError::BufferTooSmall)?;
    *first = code;
    let length = bincode::encode_into_slice(payload, rest, BINCODE_CFG)?;
    Ok(length + 1)
}

fn decode_payload<T: Decode<()>>(code: u8, payload: &[u8]) -> Result<T, ProtocolError> {
    let (value, used) = bincode::decode_from_slice(payload, BINCODE_CFG)?;
    if used != payload.len() {
        return Err(ProtocolError::TrailingBytes {
            code,
            extra: payload.len() - used,
        });
    }
    Ok(value)
}

impl HostToDevice {
    pub fn code(&self) -> u8 {
        match self {
            HostToDevice::Command(_) => code::COMMAND,
            HostToDevice::Configure(_) => code::CONFIGURE,
            HostToDevice::RequestStateUpdates => code::REQUEST_STATE_UPDATES,
            HostToDevice::RequestConfiguration => code::REQUEST_CONFIGURATION,
            HostToDevice::ReloadConfiguration => code::RELOAD_CONFIGURATION,
            HostToDevice::Enable(_) => code::ENABLE,
        }
    }

    pub fn decode(buf: &[u8]) -> Result<HostToDevice, ProtocolError> {
        let (&code, payload) = buf.split_first().ok_or(ProtocolError::Empty)?;
        Ok(match code {
            code::COMMAND => HostToDevice::Command(decode_payload(code, payload)?),
            code::CONFIGURE => HostToDevice::Configure(decode_payload(code, payload)?),
            code::REQUEST_STATE_UPDATES => {
                decode_payload::<()>(code, payload)?;
                HostToDevice::RequestStateUpdates
            }
            code::REQUEST_CONFIGURATION => {
                decode_payload::<()>(code, payload)?;
                HostToDevice::RequestConfiguration
            }
            code::RELOAD_CONFIGURATION => {
                decode_payload::<()>(code, payload)?;
                HostToDevice::ReloadConfiguration
            }
            code::ENABLE => HostToDevice::Enable(decode_payload(code, payload)?),
            other => return Err(ProtocolError::UnknownCode(other)),
        })
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        let code = self.code();
        match self {
            HostToDevice::Command(frame) => encode_message(code, frame, buf),
            HostToDevice::Configure(frame) => encode_message(code, frame, buf),
            HostToDevice::Enable(mask) => encode_message(code, mask, buf),
            _ => encode_message(code, &(), buf),
        }
    }
}

impl DeviceToHost {
    pub fn decode(buf: &[u8]) -> Result<DeviceToHost, ProtocolError> {
        let (&code, payload) = buf.split_first().ok_or(ProtocolError::Empty)?;
        Ok(match code {
            code::STATE => DeviceToHost::State(decode_payload(code, payload)?),
            code::CONFIGURATION => DeviceToHost::Configuration(decode_payload(code, payload)?),
            other => return Err(ProtocolError::UnknownCode(other)),
        })
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        match self {
            DeviceToHost::State(frame) => encode_message(code::STATE, frame, buf),
            DeviceToHost::Configuration(frame) => encode_message(code::CONFIGURATION, frame, buf),
        }
    }
}
