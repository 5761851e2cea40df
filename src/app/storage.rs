use common::{ConfigurationFrame, BINCODE_CFG, MAX_MESSAGE_LEN};
use control::{ChannelConfig, ConfigStore, GaugeConfig, StorageError, StorageStatus};

/// One erasable region of non-volatile memory.
pub trait Sector {
    fn read(&self) -> &[u8];
    fn erase(&mut self) -> Result<(), ()>;
    fn program(&mut self, offset: usize, bytes: &[u8]) -> Result<(), ()>;
}

const MAGIC: [u8; 4] = *b"MDCF";
const HEADER_LEN: usize = 6; // magic, payload length
const CHECKSUM_LEN: usize = 2;
const MAX_RECORD_LEN: usize = HEADER_LEN + MAX_MESSAGE_LEN + CHECKSUM_LEN;

fn fletcher16(data: &[u8]) -> u16 {
    let (mut low, mut high) = (0u16, 0u16);
    for byte in data {
        low = (low + *byte as u16) % 255;
        high = (high + low) % 255;
    }
    high << 8 | low
}

/// Settings record at the start of a flash sector: magic, big endian payload
/// length, bincode configuration, fletcher16 of the payload.
pub struct FlashStore<S: Sector> {
    sector: S,
}

impl<S: Sector> FlashStore<S> {
    pub fn new(sector: S) -> FlashStore<S> {
        FlashStore { sector }
    }

    pub fn sector(&self) -> &S {
        &self.sector
    }

    fn record(&self) -> Result<ConfigurationFrame, StorageError> {
        let data = self.sector.read();
        if data.len() < HEADER_LEN || data[..4] != MAGIC {
            return Err(StorageError::Corrupt);
        }
        let length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let payload = data.get(HEADER_LEN..HEADER_LEN + length).ok_or(StorageError::Corrupt)?;
        let checksum = data
            .get(HEADER_LEN + length..HEADER_LEN + length + CHECKSUM_LEN)
            .ok_or(StorageError::Corrupt)?;
        if checksum != fletcher16(payload).to_be_bytes() {
            return Err(StorageError::Corrupt);
        }

        let (frame, used) = bincode::decode_from_slice(payload, BINCODE_CFG).map_err(|_| StorageError::Corrupt)?;
        if used != length {
            return Err(StorageError::Corrupt);
        }
        Ok(frame)
    }
}

impl<S: Sector> ConfigStore for FlashStore<S> {
    fn load(&mut self, channels: &mut [ChannelConfig], gauges: &mut [GaugeConfig]) -> StorageStatus {
        let frame = self.record()?;
        for (config, settings) in channels.iter_mut().zip(frame.channels) {
            *config = settings.into();
        }
        for (config, settings) in gauges.iter_mut().zip(frame.gauges) {
            *config = settings.into();
        }
        Ok(())
    }

    fn save(&mut self, channels: &[ChannelConfig], gauges: &[GaugeConfig]) -> StorageStatus {
        let mut frame = ConfigurationFrame::default();
        for (settings, config) in frame.channels.iter_mut().zip(channels) {
            *settings = (*config).into();
        }
        for (settings, config) in frame.gauges.iter_mut().zip(gauges) {
            *settings = (*config).into();
        }

        let mut record = [0u8; MAX_RECORD_LEN];
        let length = bincode::encode_into_slice(&frame, &mut record[HEADER_LEN..], BINCODE_CFG)
            .map_err(|_| StorageError::NoSpace)?;
        record[..4].copy_from_slice(&MAGIC);
        record[4..6].copy_from_slice(&(length as u16).to_be_bytes());
        let checksum = fletcher16(&record[HEADER_LEN..HEADER_LEN + length]);
        record[HEADER_LEN + length..HEADER_LEN + length + CHECKSUM_LEN].copy_from_slice(&checksum.to_be_bytes());

        let record = &record[..HEADER_LEN + length + CHECKSUM_LEN];
        if record.len() > self.sector.read().len() {
            return Err(StorageError::NoSpace);
        }

        self.sector.erase().map_err(|_| StorageError::Bus)?;
        self.sector.program(0, record).map_err(|_| StorageError::Bus)?;
        Ok(())
    }
}
