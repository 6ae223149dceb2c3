//! Update command payloads.
//!
//! Every command is carried as the payload of one packet sent to the update
//! port. The first byte is the command kind; multi-byte fields are
//! little-endian.
//!
//! ```text
//! INIT   = 0x0A | total_size: u32 | block_size: u16 | sha256: [u8; 32]
//! BLOCK  = 0x0B | ordinal: u16    | data
//! CANCEL = 0x0C
//! ```
//!
//! The device replies to each command with at least one byte. A reply to
//! `BLOCK` that is longer than one byte lists the ordinals of blocks it
//! failed to store, one byte each.

use byteorder::{LittleEndian, WriteBytesExt};

use crate::image::DIGEST_LEN;

/// Update command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandKind {
    /// Announce an image: size, block size and digest.
    Init = 10,
    /// One block of the image.
    Block = 11,
    /// Abandon whatever session the device thinks is running.
    Cancel = 12,
}

impl CommandKind {
    /// Command name for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "INIT",
            Self::Block => "BLOCK",
            Self::Cancel => "CANCEL",
        }
    }
}

impl TryFrom<u8> for CommandKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        match value {
            10 => Ok(Self::Init),
            11 => Ok(Self::Block),
            12 => Ok(Self::Cancel),
            other => Err(other),
        }
    }
}

/// Update command builder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    kind: CommandKind,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create an empty command of the given kind.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            data: Vec::new(),
        }
    }

    /// Build an INIT command.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn init(total_size: u32, block_size: u16, digest: &[u8; DIGEST_LEN]) -> Self {
        let mut frame = Self::new(CommandKind::Init);
        frame.data.write_u32::<LittleEndian>(total_size).unwrap();
        frame.data.write_u16::<LittleEndian>(block_size).unwrap();
        frame.data.extend_from_slice(digest);
        frame
    }

    /// Build a BLOCK command for block number `ordinal`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn block(ordinal: u16, block: &[u8]) -> Self {
        let mut frame = Self::new(CommandKind::Block);
        frame.data.write_u16::<LittleEndian>(ordinal).unwrap();
        frame.data.extend_from_slice(block);
        frame
    }

    /// Build a CANCEL command.
    pub fn cancel() -> Self {
        Self::new(CommandKind::Cancel)
    }

    /// Command kind.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Serialize into a packet payload.
    pub fn build(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(1 + self.data.len());
        payload.push(self.kind as u8);
        payload.extend_from_slice(&self.data);
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_layout() {
        let digest = [0x11; DIGEST_LEN];
        let payload = CommandFrame::init(100, 32, &digest).build();
        assert_eq!(payload.len(), 1 + 4 + 2 + DIGEST_LEN);
        assert_eq!(payload[0], 10);
        assert_eq!(&payload[1..5], &[100, 0, 0, 0]);
        assert_eq!(&payload[5..7], &[32, 0]);
        assert_eq!(&payload[7..], &digest);
    }

    #[test]
    fn test_block_layout() {
        let payload = CommandFrame::block(0x0102, &[9, 8, 7]).build();
        assert_eq!(payload, vec![11, 0x02, 0x01, 9, 8, 7]);
    }

    #[test]
    fn test_cancel_layout() {
        assert_eq!(CommandFrame::cancel().build(), vec![12]);
        assert_eq!(CommandFrame::cancel().kind(), CommandKind::Cancel);
    }

    #[test]
    fn test_kind_from_byte() {
        assert_eq!(CommandKind::try_from(11), Ok(CommandKind::Block));
        assert_eq!(CommandKind::try_from(13), Err(13));
        assert_eq!(CommandKind::Init.name(), "INIT");
    }
}
