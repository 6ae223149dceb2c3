//! Byte-stuffed framing for point-to-point USB CDC links.
//!
//! ```text
//! stuffed(DPRT SPRT Data...) FF
//! ```
//!
//! Addresses are not carried; decoded packets use [`LINK_LOCAL_ADDRESS`].
//!
//! [`LINK_LOCAL_ADDRESS`]: crate::protocol::packet::LINK_LOCAL_ADDRESS

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::Framing;
use crate::protocol::packet::Packet;
use crate::protocol::{stuffing, uart};

/// Escape value used for stuffing.
pub const ESCAPE: u8 = 250;

/// End-of-frame marker.
pub const DELIMITER: u8 = 255;

/// Longest undelimited run kept while waiting for [`DELIMITER`]: the largest
/// payload with every byte escaped.
pub const MAX_FRAME_LEN: usize = 2 * uart::MAX_PAYLOAD_SIZE;

/// Serialize `packet` into a stuffed, delimited frame.
pub fn encode(packet: &Packet) -> Vec<u8> {
    let mut raw = Vec::with_capacity(packet.payload().len() + 2);
    raw.push(packet.destination_port());
    raw.push(packet.source_port());
    raw.extend_from_slice(packet.payload());

    let mut frame = stuffing::encode(&raw, ESCAPE);
    frame.push(DELIMITER);
    frame
}

fn decode_frame(frame: &[u8]) -> Result<Packet> {
    let decoded = stuffing::decode(frame, ESCAPE)?;
    if decoded.len() < 2 {
        return Err(Error::MalformedFrame(format!(
            "frame of {} bytes has no port header",
            decoded.len()
        )));
    }
    Ok(Packet::link_local(decoded[1], decoded[0], &decoded[2..]))
}

/// Splits the incoming stream on [`DELIMITER`].
#[derive(Debug, Default)]
pub struct UsbFramer {
    buffer: Vec<u8>,
}

impl UsbFramer {
    /// Append `data` and return every packet it completed.
    pub fn push(&mut self, data: &[u8]) -> Vec<Packet> {
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        let mut start = 0;
        while let Some(len) = self.buffer[start..].iter().position(|&b| b == DELIMITER) {
            let frame = &self.buffer[start..start + len];
            if frame.is_empty() {
                trace!("Ignoring empty USB frame");
            } else {
                match decode_frame(frame) {
                    Ok(packet) => {
                        debug!(
                            "USB frame port {} -> {} ({} bytes)",
                            packet.source_port(),
                            packet.destination_port(),
                            packet.payload().len()
                        );
                        packets.push(packet);
                    },
                    Err(e) => debug!("Dropping USB frame: {e}"),
                }
            }
            start += len + 1;
        }
        self.buffer.drain(..start);

        if self.buffer.len() > MAX_FRAME_LEN {
            debug!(
                "Discarding {} bytes without a frame delimiter",
                self.buffer.len()
            );
            self.buffer.clear();
        }

        packets
    }

    /// Bytes held back waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Framing for UsbFramer {
    const NAME: &'static str = "usb";

    fn encode(packet: &Packet) -> Result<Vec<u8>> {
        Ok(encode(packet))
    }

    fn push(&mut self, data: &[u8]) -> Vec<Packet> {
        UsbFramer::push(self, data)
    }
}
