//! Chained error types. Each layer wraps the layer beneath it as its
//! `#[source]`, so a `CanOpenError::Send` printed with `{:#}` or inspected
//! via `std::error::Error::source` shows the originating back-end failure
//! (serial I/O, FTDI status, socketcan errno) underneath the device-level
//! complaint that triggered it.

use thiserror::Error;

use crate::protocol::abort::AbortCode;

/// Failures from the CAN-CPC (SocketCAN) back-end.
#[derive(Error, Debug)]
pub enum CpcError {
    #[error("failed to open CAN-CPC device: {0}")]
    Open(String),
    #[error("failed to close CAN-CPC device: {0}")]
    Close(String),
    #[error("failed to set up CAN-CPC device: {0}")]
    Setup(String),
    #[error("CAN-CPC device timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("failed to send to CAN-CPC device: {0}")]
    Send(String),
    #[error("failed to receive from CAN-CPC device: {0}")]
    Receive(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Socket(#[from] socketcan::Error),
}

/// Failures from the CAN-Serial (RS-232) back-end.
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("CAN-Serial conversion error: {0}")]
    Convert(String),
    #[error("failed to send to CAN-Serial device: {0}")]
    Send(String),
    #[error("failed to receive from CAN-Serial device: {0}")]
    Receive(String),
    #[error("CAN-Serial checksum error")]
    Crc,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serial(#[from] serialport::Error),
}

/// Failures from the CAN-USB (FTDI D2XX) back-end.
#[derive(Error, Debug)]
pub enum UsbError {
    #[error("no such CAN-USB device: {0}")]
    Device(String),
    #[error("CAN-USB conversion error: {0}")]
    Convert(String),
    #[error("failed to send to CAN-USB device: {0}")]
    Send(String),
    #[error("failed to receive from CAN-USB device: {0}")]
    Receive(String),
    #[error("CAN-USB checksum error")]
    Crc,
    #[error("CAN-USB unexpected response: 0x{0:02x}")]
    UnexpectedResponse(u8),
    #[error("FTDI driver status: {0:?}")]
    Ftdi(libftd2xx::FtStatus),
}

/// A back-end failure, opaque to the generic [`crate::device::Device`] but
/// distinguishable by the caller via pattern matching.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error(transparent)]
    Cpc(#[from] CpcError),
    #[error(transparent)]
    Serial(#[from] SerialError),
    #[error(transparent)]
    Usb(#[from] UsbError),
}

/// Configuration parameter validation failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unknown configuration parameter: {0}")]
    UnknownParam(String),
    #[error("invalid value for parameter `{name}`: {reason}")]
    InvalidValue { name: String, reason: String },
    #[error("wrong type for parameter `{name}`: expected {expected}, found {found}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// The top-level, device-facing error type.
#[derive(Error, Debug)]
pub enum CanOpenError {
    #[error("CAN device configuration error")]
    Config(#[source] ConfigError),

    #[error("failed to open CAN device")]
    Open(#[source] BackendError),

    #[error("failed to set up CAN device")]
    Setup(#[source] BackendError),

    #[error("failed to close CAN device")]
    Close(#[source] BackendError),

    #[error("CAN device is not open (non-zero reference count expected)")]
    NotOpen,

    #[error("CAN protocol error: {0}")]
    Protocol(String),

    #[error("CAN connection error: {0}")]
    Connection(String),

    #[error("failed to send message from CAN device")]
    Send(#[source] BackendError),

    #[error("failed to receive message on CAN device")]
    Receive(#[source] BackendError),

    #[error("CAN conversion error: {0}")]
    Convert(String),

    #[error("CAN overflow error: {0}")]
    Overflow(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("frame is not a valid {0} message")]
    BadMessage(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown communication object with COB-ID {0:#05x}")]
    UnknownCobId(u16),

    #[error("SDO abort: {0:?}")]
    SdoAbort(AbortCode),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<ConfigError> for CanOpenError {
    fn from(e: ConfigError) -> Self {
        CanOpenError::Config(e)
    }
}
