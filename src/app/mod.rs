pub mod board;
pub mod comms;
pub mod storage;

#[cfg(feature = "board")]
pub mod rtt_log;
#[cfg(feature = "board")]
pub mod usb;
