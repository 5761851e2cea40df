use usb_device::class_prelude::UsbBus;
use usb_device::prelude::*;
use usbd_serial::CdcAcmClass;

use crate::app::comms::{CommsEnds, FrameReader, Incoming};
use common::ClientId;

/// The USB host is the only client on this transport.
pub const USB_CLIENT: ClientId = ClientId(0);

pub struct UsbCommunicator<B: UsbBus + 'static, const SEND_BUF: usize, const RECV_BUF: usize, const FRAME_BUF: usize> {
    cdc: CdcAcmClass<'static, B>,
    bus: UsbDevice<'static, B>,
    ends: CommsEnds<SEND_BUF, RECV_BUF>,
    reader: FrameReader<FRAME_BUF>,
}

impl<B: UsbBus + 'static, const SEND_BUF: usize, const RECV_BUF: usize, const FRAME_BUF: usize>
    UsbCommunicator<B, SEND_BUF, RECV_BUF, FRAME_BUF>
{
    pub fn new(cdc: CdcAcmClass<'static, B>, bus: UsbDevice<'static, B>, ends: CommsEnds<SEND_BUF, RECV_BUF>) -> Self {
        UsbCommunicator {
            cdc,
            bus,
            ends,
            reader: FrameReader::new(),
        }
    }

    /// One round of USB servicing: at most one packet out and one packet in.
    pub fn poll(&mut self) {
        self.bus.poll(&mut [&mut self.cdc]);

        if let Ok(grant) = self.ends.send_c.read() {
            let write_length = grant.len().min(self.cdc.max_packet_size() as usize);
            match self.cdc.write_packet(&grant.buf()[..write_length]) {
                Ok(written) => grant.release(written),
                Err(_) => grant.release(0),
            }
        }

        let packet_size = self.cdc.max_packet_size() as usize;
        if self.reader.space() >= packet_size {
            let mut packet = [0u8; 64];
            if let Ok(read_length) = self.cdc.read_packet(&mut packet[..packet_size.min(64)]) {
                self.reader.extend(&packet[..read_length]);
            }
        }

        while self.ends.recv_p.ready() {
            match self.reader.next_message() {
                None => break,
                Some(Ok(message)) => {
                    // guarded by .ready above
                    let _ = self.ends.recv_p.enqueue(Incoming {
                        client: USB_CLIENT,
                        message,
                    });
                }
                Some(Err(e)) => log::warn!("dropping host frame: {:?}", e),
            }
        }
    }
}
