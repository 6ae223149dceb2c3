//! # linkflash
//!
//! A library for updating the firmware of gateway devices over a serial
//! link.
//!
//! This crate provides:
//!
//! - Two packet framings: preamble/CRC-32 for multi-drop UART buses and
//!   byte stuffing for point-to-point USB CDC links
//! - A [`Transport`] that parses frames on a background thread
//! - Echo-probe device discovery
//! - The INIT/BLOCK/CANCEL update session with retries of failed blocks
//!
//! ## Features
//!
//! - `native` (default): serial ports through the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use linkflash::{FirmwareImage, LinkKind, UpdateConfig, UpdateSession};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("firmware.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut link = linkflash::host::auto_discover(LinkKind::Usb, 115200)?;
//!         let mut session = UpdateSession::new(&mut *link, &image, UpdateConfig::default())?;
//!         session.run(|p| println!("block {}/{}", p.ordinal + 1, p.total))?;
//!         link.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod device;
pub mod error;
pub mod host;
pub mod image;
pub mod port;
pub mod protocol;
pub mod transport;
pub mod update;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DetectedPort, DeviceKind},
    error::{Error, Result},
    host::{discover_device, discover_ports},
    image::FirmwareImage,
    port::{Port, SerialConfig},
    protocol::{DiscardPolicy, Framing, Packet, UartFramer, UsbFramer},
    transport::{
        EchoProbe, LinkKind, SerialInterface, Transport, UartTransport, UsbTransport,
        bind_transport, open_transport,
    },
    update::{
        BlockProgress, CommandFrame, CommandKind, RetryPolicy, UpdateConfig, UpdateReport,
        UpdateSession,
    },
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        assert!(!is_interrupted_requested());
    }
}
