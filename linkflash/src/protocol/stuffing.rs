//! Escape-value byte stuffing.
//!
//! Every byte at or above the escape value is sent as two bytes,
//! `escape, byte - escape`. With the escape below the USB delimiter (255) the
//! delimiter can never show up inside a stuffed stream.
//!
//! ```text
//! escape = 250
//!   in:  01 F9 FA FF 07
//!   out: 01 F9 FA 00 FA 05 07
//! ```

use crate::error::{Error, Result};

/// Stuff `data` with `escape`.
///
/// For `escape >= 128` no output byte exceeds `escape`; below that an escaped
/// value `byte - escape` may be larger than the escape itself.
pub fn encode(data: &[u8], escape: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 4);
    for &d in data {
        if d >= escape {
            out.push(escape);
            out.push(d - escape);
        } else {
            out.push(d);
        }
    }
    out
}

/// Reverse [`encode`].
///
/// The byte following an escape is always taken as an escaped value, even
/// when it equals the escape itself. A trailing escape or an escaped value
/// above 255 means the input was not produced by [`encode`].
pub fn decode(data: &[u8], escape: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut pending = false;
    for &d in data {
        if pending {
            let value = d.checked_add(escape).ok_or_else(|| {
                Error::MalformedFrame(format!(
                    "escaped value 0x{d:02X} overflows escape 0x{escape:02X}"
                ))
            })?;
            out.push(value);
            pending = false;
        } else if d == escape {
            pending = true;
        } else {
            out.push(d);
        }
    }
    if pending {
        return Err(Error::MalformedFrame("dangling escape byte".into()));
    }
    Ok(out)
}
