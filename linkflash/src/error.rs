//! Error types for linkflash.

use std::io;
use thiserror::Error;

/// Result type for linkflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for linkflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// Packet violates the constraints of the wire format it is sent on.
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// Bytes could not be decoded into a frame.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Firmware image cannot be transferred.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// No candidate port answered the echo probe.
    #[error("No device found")]
    DeviceNotFound,

    /// Operation on a transport that has already been closed.
    #[error("Port {0} is closed")]
    PortClosed(String),

    /// A block kept failing on the device side.
    #[error("Block at offset {offset} failed {attempts} times, giving up")]
    RetriesExhausted {
        /// Byte offset of the block in the image.
        offset: usize,
        /// Number of transmissions made for the block.
        attempts: u32,
    },

    /// The embedding application asked the operation to stop.
    #[error("Operation interrupted")]
    Interrupted,

    /// Unsupported operation on this platform or build.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}
