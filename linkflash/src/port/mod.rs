//! Byte-stream abstraction underneath the packet transports.
//!
//! The transports never talk to `serialport` directly. They get a boxed
//! [`Port`], clone a second handle for the background receiver, and keep the
//! original for writes.
//!
//! ```text
//! +------------------+        +------------------+
//! | caller thread    |        | receiver thread  |
//! |  transmit()      |        |  read() -> parse |
//! +--------+---------+        +--------+---------+
//!          |                           |
//!          v                           v
//! +--------+---------+        +--------+---------+
//! | Port (writer)    |  clone | Port (reader)    |
//! +--------+---------+ -----> +--------+---------+
//!          |                           |
//!          +------------+--------------+
//!                       v
//!              serial device / mock
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use linkflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> linkflash::Result<()> {
//!     port.write_all_bytes(b"Hello")?;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the gateway link.
pub const DEFAULT_BAUD: u32 = 115200;

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read/write timeout.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: Duration::from_millis(1000),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
    /// Software flow control (XON/XOFF).
    Software,
}

/// Byte stream a transport runs on.
///
/// Reads are expected to honour [`Port::timeout`] and fail with
/// `ErrorKind::TimedOut` when nothing arrived, which is how the receiver
/// thread gets a chance to notice a stop request.
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Whether the port is still usable for I/O.
    fn is_open(&self) -> bool;

    /// Open a second handle on the same device.
    ///
    /// Used to give the receiver thread its own reader while the caller keeps
    /// writing through the original handle.
    fn try_clone_port(&self) -> Result<Box<dyn Port>>;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

// Re-export the appropriate implementation based on features
#[cfg(feature = "native")]
pub use native::NativePort;
