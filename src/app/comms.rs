use bbqueue::{BBBuffer, Consumer, Producer};
use common::{ClientId, CommandRouter, DeviceToHost, HostToDevice, ProtocolError, Routed, MAX_MESSAGE_LEN};
use config::{CHANNELS, GAUGES};
use control::command::CommandProducer;
use control::{LoopCommand, Snapshot};
use heapless::spsc::{Consumer as SpscConsumer, Producer as SpscProducer, Queue};
use heapless::Vec;

#[derive(Debug)]
pub enum CommsError {
    SendBufferFull,
    Framing,
    Protocol(ProtocolError),
}

impl From<ProtocolError> for CommsError {
    fn from(e: ProtocolError) -> Self {
        CommsError::Protocol(e)
    }
}

/// A decoded host message and who sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub client: ClientId,
    pub message: HostToDevice,
}

/// Turns a byte stream into host messages, one COBS frame at a time.
pub struct FrameReader<const N: usize> {
    buf: Vec<u8, N>,
}

impl<const N: usize> FrameReader<N> {
    pub const fn new() -> Self {
        FrameReader { buf: Vec::new() }
    }

    pub fn space(&self) -> usize {
        N - self.buf.len()
    }

    /// Appends received bytes. Everything buffered is dropped on overflow.
    pub fn extend(&mut self, bytes: &[u8]) {
        if self.buf.extend_from_slice(bytes).is_err() {
            log::warn!("receive buffer overflow, dropping {} bytes", self.buf.len() + bytes.len());
            self.buf.clear();
        }
    }

    pub fn next_message(&mut self) -> Option<Result<HostToDevice, CommsError>> {
        let end = self.buf.iter().position(|b| *b == 0)?;

        let mut decoded = [0u8; MAX_MESSAGE_LEN];
        let mut codec = framed::bytes::Config::default().to_codec();
        let result = codec
            .decode_to_slice(&self.buf[..=end], &mut decoded)
            .map_err(|_| CommsError::Framing)
            .and_then(|length| Ok(HostToDevice::decode(&decoded[..length])?));

        let rest = self.buf.len() - end - 1;
        self.buf.copy_within(end + 1.., 0);
        self.buf.truncate(rest);

        Some(result)
    }
}

impl<const N: usize> Default for FrameReader<N> {
    fn default() -> Self {
        FrameReader::new()
    }
}

pub struct ControllerComms<const SEND_BUF: usize, const RECV_BUF: usize, const CMD_BUF: usize> {
    send_p: Producer<'static, SEND_BUF>,
    recv_c: SpscConsumer<'static, Incoming, RECV_BUF>,
    commands: CommandProducer<'static, CHANNELS, GAUGES, CMD_BUF>,
    router: CommandRouter,
    last_sent: Option<u32>,
    dropped: u32,
}

impl<const SEND_BUF: usize, const RECV_BUF: usize, const CMD_BUF: usize> ControllerComms<SEND_BUF, RECV_BUF, CMD_BUF> {
    /// Loop commands lost to a full queue.
    pub fn dropped(&self) -> u32 {
        self.dropped
    }

    fn forward(&mut self, command: LoopCommand<CHANNELS, GAUGES>) {
        if self.commands.enqueue(command).is_err() {
            self.dropped += 1;
            log::warn!("loop command queue full");
        }
    }

    fn send(&mut self, message: &DeviceToHost) -> Result<(), CommsError> {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let length = message.encode(&mut buf)?;

        let mut grant = self
            .send_p
            .grant_exact(framed::bytes::max_encoded_len(length))
            .map_err(|_| CommsError::SendBufferFull)?;
        let mut codec = framed::bytes::Config::default().to_codec();
        let encoded_len = codec
            .encode_to_slice(&buf[..length], grant.buf())
            .map_err(|_| CommsError::Framing)?;
        grant.commit(encoded_len);
        Ok(())
    }

    /// Routes everything the host sent since the last call and streams the
    /// snapshot if it is new and someone asked for it.
    pub fn tick(&mut self, now_ms: u32, snapshot: &Snapshot<CHANNELS, GAUGES>) -> Result<(), CommsError> {
        if let Some(halt) = self.router.poll(now_ms) {
            self.forward(halt);
        }

        while let Some(Incoming { client, message }) = self.recv_c.dequeue() {
            match self.router.route(message, client, now_ms) {
                Routed::Loop(command) => self.forward(command),
                Routed::SendConfiguration => {
                    self.send(&DeviceToHost::Configuration((&snapshot.configuration).into()))?
                }
                Routed::Subscribed => {}
                Routed::Rejected(holder) => log::debug!("{:?} ignored, {:?} holds command", client, holder),
            }
        }

        if self.router.streaming(now_ms) && self.last_sent != Some(snapshot.version) {
            self.send(&DeviceToHost::State((&snapshot.telemetry).into()))?;
            self.last_sent = Some(snapshot.version);
        }

        Ok(())
    }
}

/// Transport half of the comms: drains framed replies and feeds decoded messages.
pub struct CommsEnds<const SEND_BUF: usize, const RECV_BUF: usize> {
    pub send_c: Consumer<'static, SEND_BUF>,
    pub recv_p: SpscProducer<'static, Incoming, RECV_BUF>,
}

pub fn get_comms_pair<const SEND_BUF: usize, const RECV_BUF: usize, const CMD_BUF: usize>(
    bbq: &'static BBBuffer<SEND_BUF>,
    q: &'static mut Queue<Incoming, RECV_BUF>,
    commands: CommandProducer<'static, CHANNELS, GAUGES, CMD_BUF>,
    hold_window_ms: u32,
) -> Result<(ControllerComms<SEND_BUF, RECV_BUF, CMD_BUF>, CommsEnds<SEND_BUF, RECV_BUF>), bbqueue::Error> {
    let (s_p, s_c) = bbq.try_split()?;
    let (r_p, r_c) = q.split();
    Ok((
        ControllerComms {
            send_p: s_p,
            recv_c: r_c,
            commands,
            router: CommandRouter::new(hold_window_ms),
            last_sent: None,
            dropped: 0,
        },
        CommsEnds {
            send_c: s_c,
            recv_p: r_p,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{CommandFrame, StateFrame};
    use control::command::{CommandConsumer, CommandQueue};
    use control::ControlLoop;
    use std::boxed::Box;

    const SEND_BUF: usize = 4096;
    const USB: ClientId = ClientId(0);

    type Comms = ControllerComms<SEND_BUF, 4, 4>;

    fn setup() -> (Comms, CommsEnds<SEND_BUF, 4>, CommandConsumer<'static, CHANNELS, GAUGES, 4>) {
        let bbq: &'static BBBuffer<SEND_BUF> = Box::leak(Box::new(BBBuffer::new()));
        let q: &'static mut Queue<Incoming, 4> = Box::leak(Box::new(Queue::new()));
        let commands: &'static mut CommandQueue<CHANNELS, GAUGES, 4> = Box::leak(Box::new(CommandQueue::new()));
        let (command_p, command_c) = commands.split();

        let (comms, ends) = get_comms_pair(bbq, q, command_p, 1000).unwrap();
        (comms, ends, command_c)
    }

    fn frame(message: &HostToDevice) -> std::vec::Vec<u8> {
        let mut buf = [0u8; MAX_MESSAGE_LEN];
        let length = message.encode(&mut buf).unwrap();
        let mut framed_buf = std::vec![0u8; framed::bytes::max_encoded_len(length)];
        let mut codec = framed::bytes::Config::default().to_codec();
        let encoded_len = codec.encode_to_slice(&buf[..length], &mut framed_buf).unwrap();
        framed_buf.truncate(encoded_len);
        framed_buf
    }

    fn read_reply(ends: &mut CommsEnds<SEND_BUF, 4>) -> Option<DeviceToHost> {
        let grant = ends.send_c.read().ok()?;
        let end = grant.buf().iter().position(|b| *b == 0)?;
        let mut decoded = [0u8; MAX_MESSAGE_LEN];
        let mut codec = framed::bytes::Config::default().to_codec();
        let length = codec.decode_to_slice(&grant.buf()[..=end], &mut decoded).ok()?;
        grant.release(end + 1);
        DeviceToHost::decode(&decoded[..length]).ok()
    }

    #[test]
    fn test_frame_reader_splits_stream() {
        let mut reader = FrameReader::<4096>::new();
        let mut stream = frame(&HostToDevice::Enable(5));
        stream.extend(frame(&HostToDevice::RequestStateUpdates));
        let (first, second) = stream.split_at(7);

        reader.extend(first);
        reader.extend(second);

        assert_eq!(reader.next_message().unwrap().unwrap(), HostToDevice::Enable(5));
        assert_eq!(reader.next_message().unwrap().unwrap(), HostToDevice::RequestStateUpdates);
        assert!(reader.next_message().is_none());
        assert_eq!(reader.space(), 4096);
    }

    #[test]
    fn test_frame_reader_recovers_from_garbage() {
        let mut reader = FrameReader::<4096>::new();
        reader.extend(&[0x13, 0x37, 0x00]);
        reader.extend(&frame(&HostToDevice::ReloadConfiguration));

        assert!(reader.next_message().unwrap().is_err());
        assert_eq!(reader.next_message().unwrap().unwrap(), HostToDevice::ReloadConfiguration);
    }

    #[test]
    fn test_frame_reader_overflow() {
        let mut reader = FrameReader::<8>::new();
        reader.extend(&[1, 2, 3, 4, 5]);
        reader.extend(&[6, 7, 8, 9]);

        assert_eq!(reader.space(), 8);
        assert!(reader.next_message().is_none());
    }

    #[test]
    fn test_commands_reach_loop() {
        let (mut comms, mut ends, mut commands) = setup();
        let mut control = ControlLoop::<CHANNELS, GAUGES>::new(config::Config::new());

        let mut command = CommandFrame::default();
        command.channels[4].power_offset = 0.25;
        command.channels[4].seek = 0.5;
        ends.recv_p
            .enqueue(Incoming {
                client: USB,
                message: HostToDevice::Command(command),
            })
            .unwrap();

        comms.tick(0, &control.snapshot()).unwrap();
        assert_eq!(control.apply_pending(&mut commands), 1);
        assert_eq!(control.channels()[4].power_offset, 0.25);
        assert_eq!(control.channels()[4].seek, Some(0.5));

        // host went quiet
        comms.tick(1500, &control.snapshot()).unwrap();
        assert_eq!(control.apply_pending(&mut commands), 1);
        assert_eq!(control.channels()[4].seek, None);
        assert!(read_reply(&mut ends).is_none());
    }

    #[test]
    fn test_streams_new_snapshots_only() {
        let (mut comms, mut ends, _commands) = setup();
        let control = ControlLoop::<CHANNELS, GAUGES>::new(config::Config::new());
        let snapshot = control.snapshot();

        ends.recv_p
            .enqueue(Incoming {
                client: USB,
                message: HostToDevice::RequestStateUpdates,
            })
            .unwrap();
        comms.tick(0, &snapshot).unwrap();
        comms.tick(1, &snapshot).unwrap();

        match read_reply(&mut ends) {
            Some(DeviceToHost::State(state)) => assert_eq!(state, StateFrame::from(&snapshot.telemetry)),
            other => panic!("unexpected {:?}", other),
        }
        assert!(read_reply(&mut ends).is_none());

        // subscription lapsed
        let mut later = snapshot.clone();
        later.version += 1;
        comms.tick(2000, &later).unwrap();
        assert!(read_reply(&mut ends).is_none());
    }

    #[test]
    fn test_configuration_reply() {
        let (mut comms, mut ends, _commands) = setup();
        let control = ControlLoop::<CHANNELS, GAUGES>::new(config::Config::new());
        let snapshot = control.snapshot();

        ends.recv_p
            .enqueue(Incoming {
                client: USB,
                message: HostToDevice::RequestConfiguration,
            })
            .unwrap();
        comms.tick(0, &snapshot).unwrap();

        match read_reply(&mut ends) {
            Some(DeviceToHost::Configuration(configuration)) => {
                assert_eq!(configuration.channels[0].max_current, 1.0);
                assert_eq!(configuration.channels[23].p, 4.0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
