//! Wire protocols.
//!
//! Two incompatible framings carry the same [`Packet`]:
//!
//! - [`uart`]: preamble + addresses + CRC-32, for multi-drop buses.
//! - [`usb`]: byte stuffing + delimiter, for point-to-point links.

pub mod crc;
pub mod packet;
pub mod stuffing;
pub mod uart;
pub mod usb;

use crate::error::Result;

// Re-export common types
pub use packet::Packet;
pub use uart::{DiscardPolicy, UartFramer};
pub use usb::UsbFramer;

/// A wire encoding with its stateful frame parser.
///
/// `encode` is stateless; `push` reassembles packets out of raw bytes as they
/// arrive and never fails, dropping whatever does not validate.
pub trait Framing: Default + Send + 'static {
    /// Short name used in logs and thread names.
    const NAME: &'static str;

    /// Serialize one packet into its on-wire bytes.
    fn encode(packet: &Packet) -> Result<Vec<u8>>;

    /// Feed received bytes, returning packets completed by them in order.
    fn push(&mut self, data: &[u8]) -> Vec<Packet>;
}
