//! Firmware images.
//!
//! An image is an opaque blob. The only metadata the device gets is its size
//! and SHA-256 digest, sent with the update request.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of the content digest.
pub const DIGEST_LEN: usize = 32;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; DIGEST_LEN] {
    Sha256::digest(data).into()
}

/// A firmware binary ready for transfer.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    digest: [u8; DIGEST_LEN],
}

impl FirmwareImage {
    /// Load an image from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading firmware from: {}", path.display());

        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;

        Self::from_bytes(data)
    }

    /// Wrap raw image bytes.
    ///
    /// The size must fit the 32-bit field of the update request.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidImage("image is empty".into()));
        }
        if u32::try_from(data.len()).is_err() {
            return Err(Error::InvalidImage(format!(
                "image of {} bytes exceeds 4 GiB",
                data.len()
            )));
        }

        let digest = sha256(&data);
        debug!("Image: {} bytes, sha256 {}", data.len(), hex(&digest));
        Ok(Self { data, digest })
    }

    /// Raw image bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false; empty images are rejected on construction.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// SHA-256 digest of the whole image.
    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// Digest as lowercase hex.
    pub fn digest_hex(&self) -> String {
        hex(&self.digest)
    }

    /// Number of blocks of `block_size` bytes, counting a short last block.
    pub fn block_count(&self, block_size: usize) -> usize {
        if block_size == 0 {
            return 0;
        }
        self.data.len().div_ceil(block_size)
    }

    /// Byte offsets of every block, ascending.
    pub fn block_offsets(&self, block_size: usize) -> impl Iterator<Item = usize> + use<> {
        let len = if block_size == 0 { 0 } else { self.data.len() };
        (0..len).step_by(block_size.max(1))
    }

    /// Block starting at `offset`; the last one may be short.
    pub fn block(&self, offset: usize, block_size: usize) -> Option<&[u8]> {
        if offset >= self.data.len() || block_size == 0 {
            return None;
        }
        let end = (offset + block_size).min(self.data.len());
        Some(&self.data[offset..end])
    }
}

fn hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}
