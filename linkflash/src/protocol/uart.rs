//! Preamble/CRC framing for multi-drop UART buses.
//!
//! ## Frame Format
//!
//! ```text
//! +-------------+-----+-----+------+------+------+----------+-------+---------+
//! |  Preamble   | DST | SRC | Size | DPRT | SPRT |   Data   | CRC32 | Padding |
//! +-------------+-----+-----+------+------+------+----------+-------+---------+
//! |  4 bytes    |  1  |  1  |  2   |  1   |  1   | Size - 2 |   4   |  0x0F.. |
//! +-------------+-----+-----+------+------+------+----------+-------+---------+
//! | F0 F0 F0 F0 |     |     |  LE  |      |      |          |  LE   | to x16  |
//! +-------------+-----+-----+------+------+------+----------+-------+---------+
//! ```
//!
//! `Size` counts both port bytes plus the data. The CRC covers everything from
//! `DST` to the end of the data. Frames are padded with `0x0F` up to a multiple
//! of 16 bytes; a frame that is 16 bytes or shorter before padding first gets a
//! whole extra 16-byte block.

use byteorder::{LittleEndian, WriteBytesExt};
use log::{debug, trace};

use crate::error::{Error, Result};
use crate::protocol::Framing;
use crate::protocol::crc::crc32;
use crate::protocol::packet::{MAX_ADDRESS, Packet};

/// Value of each preamble byte.
pub const PREAMBLE_BYTE: u8 = 0xF0;

/// Number of preamble bytes.
pub const PREAMBLE_LEN: usize = 4;

/// Padding byte appended after the CRC.
pub const PADDING_BYTE: u8 = 0x0F;

/// Frames are padded to a multiple of this.
pub const FRAME_ALIGN: usize = 16;

/// Shortest frame unit; a candidate needs twice this many bytes buffered.
pub const MIN_FRAME_LEN: usize = FRAME_ALIGN;

/// Preamble, both addresses and the size field.
pub const HEADER_LEN: usize = PREAMBLE_LEN + 4;

/// CRC trailer length.
pub const CRC_LEN: usize = 4;

/// Largest value of the size field.
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Destination and source port bytes counted by the size field.
pub const PORT_BYTES: usize = 2;

/// Largest packet payload the size field can describe.
pub const MAX_DATA_LEN: usize = MAX_PAYLOAD_SIZE - PORT_BYTES;

const PREAMBLE: [u8; PREAMBLE_LEN] = [PREAMBLE_BYTE; PREAMBLE_LEN];

/// What to throw away after a frame parsed successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscardPolicy {
    /// Clear the whole reassembly buffer, including bytes already buffered
    /// for a following frame.
    #[default]
    Buffer,
    /// Drop bytes only up to the end of the parsed frame and keep parsing.
    Frame,
}

fn valid_addresses(source: u8, destination: u8) -> bool {
    source != 0
        && destination != 0
        && source != destination
        && source <= MAX_ADDRESS
        && destination <= MAX_ADDRESS
}

/// Total on-wire length for a frame of `len` bytes before padding.
pub fn padded_len(len: usize) -> usize {
    let len = if len <= FRAME_ALIGN {
        len + FRAME_ALIGN
    } else {
        len
    };
    len.div_ceil(FRAME_ALIGN) * FRAME_ALIGN
}

/// Serialize `packet` into a complete, padded UART frame.
#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
pub fn encode(packet: &Packet) -> Result<Vec<u8>> {
    let (source, destination) = (packet.source_address(), packet.destination_address());
    if !valid_addresses(source, destination) {
        return Err(Error::InvalidPacket(format!(
            "addresses {source} -> {destination} must be distinct and within 1..={MAX_ADDRESS}"
        )));
    }
    let data = packet.payload();
    if data.is_empty() || data.len() > MAX_DATA_LEN {
        return Err(Error::InvalidPacket(format!(
            "payload of {} bytes outside 1..={MAX_DATA_LEN}",
            data.len()
        )));
    }

    let size = data.len() + PORT_BYTES;
    let unpadded = HEADER_LEN + size + CRC_LEN;
    let mut buf = Vec::with_capacity(padded_len(unpadded));

    buf.extend_from_slice(&PREAMBLE);
    buf.push(destination);
    buf.push(source);
    // Safe cast: size <= MAX_PAYLOAD_SIZE
    buf.write_u16::<LittleEndian>(size as u16).unwrap();
    buf.push(packet.destination_port());
    buf.push(packet.source_port());
    buf.extend_from_slice(data);

    let crc = crc32(&buf[PREAMBLE_LEN..]);
    buf.write_u32::<LittleEndian>(crc).unwrap();

    buf.resize(padded_len(unpadded), PADDING_BYTE);
    Ok(buf)
}

/// Result of examining one candidate start position.
#[derive(Debug)]
enum Candidate {
    /// A valid frame ending at `end` (relative to the candidate).
    Frame { packet: Packet, end: usize },
    /// Might still become a frame once more bytes arrive.
    Incomplete,
    /// Can never be a frame, whatever arrives later.
    Invalid(&'static str),
}

fn examine(buf: &[u8]) -> Candidate {
    if buf.len() < 2 * MIN_FRAME_LEN {
        return Candidate::Incomplete;
    }
    if buf[..PREAMBLE_LEN] != PREAMBLE {
        return Candidate::Invalid("preamble");
    }

    let destination = buf[PREAMBLE_LEN];
    let source = buf[PREAMBLE_LEN + 1];
    if !valid_addresses(source, destination) {
        return Candidate::Invalid("address");
    }

    let size = usize::from(u16::from_le_bytes([buf[PREAMBLE_LEN + 2], buf[PREAMBLE_LEN + 3]]));
    if size == 0 || size > MAX_PAYLOAD_SIZE {
        return Candidate::Invalid("payload size");
    }
    let body_end = HEADER_LEN + size;
    let end = body_end + CRC_LEN;
    if end > buf.len() {
        return Candidate::Incomplete;
    }

    let expected = u32::from_le_bytes([buf[body_end], buf[body_end + 1], buf[body_end + 2], buf[body_end + 3]]);
    if crc32(&buf[PREAMBLE_LEN..body_end]) != expected {
        return Candidate::Invalid("crc");
    }
    if size <= PORT_BYTES {
        return Candidate::Invalid("no data");
    }

    let destination_port = buf[HEADER_LEN];
    let source_port = buf[HEADER_LEN + 1];
    let packet = Packet::new(
        source,
        destination,
        source_port,
        destination_port,
        &buf[HEADER_LEN + PORT_BYTES..body_end],
    );
    Candidate::Frame { packet, end }
}

/// Reassembles UART frames out of arbitrarily chunked bytes.
///
/// Owned by a single receiver; never shared.
#[derive(Debug, Default)]
pub struct UartFramer {
    buffer: Vec<u8>,
    /// Every position before this has been ruled out for good.
    cursor: usize,
    policy: DiscardPolicy,
}

impl UartFramer {
    /// Create a parser with the given discard policy.
    pub fn with_policy(policy: DiscardPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Bytes currently held for reassembly.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append `data` and return every packet that became complete.
    pub fn push(&mut self, data: &[u8]) -> Vec<Packet> {
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        let mut pos = self.cursor;
        // Stays true while every position before `pos` is ruled out.
        let mut settled = true;

        while pos < self.buffer.len() {
            let Some(skip) = self.buffer[pos..]
                .iter()
                .position(|&b| b == PREAMBLE_BYTE)
            else {
                if settled {
                    self.cursor = self.buffer.len();
                }
                break;
            };
            pos += skip;
            if settled {
                self.cursor = pos;
            }

            match examine(&self.buffer[pos..]) {
                Candidate::Frame { packet, end } => {
                    debug!(
                        "UART frame {} -> {} ({} bytes)",
                        packet.source_address(),
                        packet.destination_address(),
                        packet.payload().len()
                    );
                    packets.push(packet);
                    match self.policy {
                        DiscardPolicy::Buffer => {
                            self.buffer.clear();
                            self.cursor = 0;
                            break;
                        },
                        DiscardPolicy::Frame => {
                            self.buffer.drain(..pos + end);
                            self.cursor = 0;
                            pos = 0;
                            settled = true;
                        },
                    }
                },
                Candidate::Incomplete => {
                    settled = false;
                    pos += 1;
                },
                Candidate::Invalid(reason) => {
                    trace!("Rejected UART candidate at {pos}: {reason}");
                    pos += 1;
                    if settled {
                        self.cursor = pos;
                    }
                },
            }
        }

        if self.cursor > 0 {
            self.buffer.drain(..self.cursor);
            self.cursor = 0;
        }

        packets
    }
}

impl Framing for UartFramer {
    const NAME: &'static str = "uart";

    fn encode(packet: &Packet) -> Result<Vec<u8>> {
        encode(packet)
    }

    fn push(&mut self, data: &[u8]) -> Vec<Packet> {
        UartFramer::push(self, data)
    }
}
