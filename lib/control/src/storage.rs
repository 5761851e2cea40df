use crate::channel::{ChannelConfig, GaugeConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    NoSpace,
    Corrupt,
    Bus,
}

pub type StorageStatus = Result<(), StorageError>;

/// Non-volatile home of the channel and gauge settings.
pub trait ConfigStore {
    /// Overwrites `channels` and `gauges` with the stored settings.
    /// On error their contents are unspecified.
    fn load(&mut self, channels: &mut [ChannelConfig], gauges: &mut [GaugeConfig]) -> StorageStatus;
    fn save(&mut self, channels: &[ChannelConfig], gauges: &[GaugeConfig]) -> StorageStatus;
}
