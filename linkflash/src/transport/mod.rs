//! Packet transports over a serial byte stream.
//!
//! A [`Transport`] hides which wire format is in use. Callers pick one with
//! [`LinkKind`] when the link is opened and only deal in [`Packet`]s after
//! that.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use linkflash::{LinkKind, Packet, SerialConfig, open_transport};
//!
//! fn main() -> linkflash::Result<()> {
//!     let config = SerialConfig::new("/dev/ttyACM0", 115200);
//!     let mut link = open_transport(LinkKind::Usb, &config)?;
//!     link.transmit(&Packet::link_local(1, 1, b"hello".to_vec()))?;
//!     if let Some(reply) = link.receive(Duration::from_secs(1)) {
//!         println!("{:?}", reply.payload());
//!     }
//!     link.close()
//! }
//! ```

pub mod interface;

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::debug;

use crate::error::{Error, Result};
#[cfg(feature = "native")]
use crate::port::NativePort;
use crate::port::{Port, SerialConfig};
use crate::protocol::Packet;

pub use interface::{SerialInterface, UartTransport, UsbTransport};

/// Address the host uses on a multi-drop bus.
pub const DEFAULT_HOST_ADDRESS: u8 = 1;

/// Address of the device being flashed.
pub const DEFAULT_DEVICE_ADDRESS: u8 = 2;

/// Port that echoes every packet back.
pub const ECHO_PORT: u8 = 1;

/// How long to wait for a reply to a request.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(1);

/// A packet link, independent of its wire format.
pub trait Transport: Send {
    /// Next received packet, waiting up to `timeout`.
    ///
    /// A zero timeout polls without blocking.
    fn receive(&mut self, timeout: Duration) -> Option<Packet>;

    /// Everything received so far, in arrival order.
    ///
    /// If nothing is queued, waits up to `timeout` for the first packet.
    fn receive_all(&mut self, timeout: Duration) -> Vec<Packet>;

    /// Encode `packet` and write it to the link.
    fn transmit(&mut self, packet: &Packet) -> Result<()>;

    /// Stop receiving and release the link. Calling it again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Whether the link can still be used.
    fn is_open(&self) -> bool;

    /// Path of the underlying port.
    fn port_path(&self) -> &str;

    /// Send a probe and check that the device echoes it back unchanged.
    ///
    /// Packets queued before the probe are discarded so they cannot be taken
    /// for the answer.
    fn ping_expect_echo(&mut self, probe: &EchoProbe) -> Result<bool> {
        let stale = self.receive_all(Duration::ZERO);
        if !stale.is_empty() {
            debug!("Discarded {} stale packet(s) before ping", stale.len());
        }

        let data = probe.data.clone().unwrap_or_else(timestamp_payload);
        let packet = Packet::new(
            probe.source_address,
            probe.destination_address,
            probe.source_port,
            probe.port,
            data.clone(),
        );
        self.transmit(&packet)?;

        match self.receive(probe.timeout) {
            Some(reply) if reply.payload() == data.as_slice() => Ok(true),
            Some(reply) => {
                debug!(
                    "{}: echo mismatch ({} bytes back)",
                    self.port_path(),
                    reply.payload().len()
                );
                Ok(false)
            },
            None => Ok(false),
        }
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn receive(&mut self, timeout: Duration) -> Option<Packet> {
        (**self).receive(timeout)
    }

    fn receive_all(&mut self, timeout: Duration) -> Vec<Packet> {
        (**self).receive_all(timeout)
    }

    fn transmit(&mut self, packet: &Packet) -> Result<()> {
        (**self).transmit(packet)
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn port_path(&self) -> &str {
        (**self).port_path()
    }

    fn ping_expect_echo(&mut self, probe: &EchoProbe) -> Result<bool> {
        (**self).ping_expect_echo(probe)
    }
}

fn timestamp_payload() -> Vec<u8> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{:.6}", now.as_secs_f64()).into_bytes()
}

/// Parameters of an echo probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoProbe {
    /// Sender address (ignored on USB).
    pub source_address: u8,
    /// Receiver address (ignored on USB).
    pub destination_address: u8,
    /// Destination port of the echo service.
    pub port: u8,
    /// Port the reply should come back to.
    pub source_port: u8,
    /// Bytes to send; a timestamp string when `None`.
    pub data: Option<Vec<u8>>,
    /// How long to wait for the echo.
    pub timeout: Duration,
}

impl Default for EchoProbe {
    fn default() -> Self {
        Self {
            source_address: DEFAULT_HOST_ADDRESS,
            destination_address: DEFAULT_DEVICE_ADDRESS,
            port: ECHO_PORT,
            source_port: ECHO_PORT,
            data: None,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

impl EchoProbe {
    /// Use fixed probe bytes.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Set how long to wait for the echo.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the bus addresses.
    #[must_use]
    pub fn with_addresses(mut self, source: u8, destination: u8) -> Self {
        self.source_address = source;
        self.destination_address = destination;
        self
    }
}

/// Wire format of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum LinkKind {
    /// Multi-drop UART bus, preamble/CRC framing.
    Uart,
    /// Point-to-point USB CDC link, byte-stuffed framing.
    #[default]
    Usb,
}

impl LinkKind {
    /// Lowercase name, as accepted by [`FromStr`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uart => "uart",
            Self::Usb => "usb",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LinkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "uart" => Ok(Self::Uart),
            "usb" => Ok(Self::Usb),
            other => Err(Error::Config(format!(
                "unknown link kind '{other}' (expected 'uart' or 'usb')"
            ))),
        }
    }
}

/// Start a transport of the given kind on an already opened port.
pub fn bind_transport(kind: LinkKind, port: Box<dyn Port>) -> Result<Box<dyn Transport>> {
    Ok(match kind {
        LinkKind::Uart => Box::new(UartTransport::new(port)?),
        LinkKind::Usb => Box::new(UsbTransport::new(port)?),
    })
}

/// Open a serial port and start a transport of the given kind on it.
#[cfg(feature = "native")]
pub fn open_transport(kind: LinkKind, config: &SerialConfig) -> Result<Box<dyn Transport>> {
    let port = NativePort::open(config)?;
    bind_transport(kind, Box::new(port))
}

/// Without serial support there is no port to open.
#[cfg(not(feature = "native"))]
pub fn open_transport(kind: LinkKind, config: &SerialConfig) -> Result<Box<dyn Transport>> {
    Err(Error::Unsupported(format!(
        "cannot open {kind} link on {}: built without serial port support",
        config.port_name
    )))
}
