//! Finding the device among the host's serial ports.
//!
//! Every candidate is opened in turn and sent an echo probe; the first port
//! whose device echoes the probe back wins. Ports that fail to open or stay
//! silent are skipped.

use log::{debug, info};

#[cfg(feature = "native")]
use crate::error::Error;
use crate::error::Result;
#[cfg(feature = "native")]
use crate::port::SerialConfig;
use crate::transport::{EchoProbe, Transport};
#[cfg(feature = "native")]
use crate::transport::{LinkKind, open_transport};

/// Echo probes sent to each candidate before moving on.
pub const DISCOVERY_ATTEMPTS: u32 = 3;

/// Serial ports in the order discovery probes them.
#[must_use]
pub fn discover_ports() -> Vec<crate::device::DetectedPort> {
    crate::device::candidate_ports()
}

/// Probe `candidates` with `open` and return the first link that echoes.
///
/// Links that do not answer are closed before the next candidate is tried.
/// Returns `None` if nobody answered or the operation was interrupted.
pub fn discover_device<T, O>(
    candidates: &[String],
    mut open: O,
    probe: &EchoProbe,
    attempts: u32,
) -> Option<T>
where
    T: Transport,
    O: FnMut(&str) -> Result<T>,
{
    for name in candidates {
        if crate::is_interrupted_requested() {
            debug!("Discovery interrupted");
            return None;
        }

        let mut link = match open(name) {
            Ok(link) => link,
            Err(e) => {
                debug!("Skipping {name}: {e}");
                continue;
            },
        };

        for attempt in 1..=attempts {
            match link.ping_expect_echo(probe) {
                Ok(true) => {
                    info!("Device found on {name}");
                    return Some(link);
                },
                Ok(false) => debug!("No echo from {name} (attempt {attempt}/{attempts})"),
                Err(e) => {
                    debug!("Probe on {name} failed: {e}");
                    break;
                },
            }
        }

        if let Err(e) = link.close() {
            debug!("Error closing {name}: {e}");
        }
    }

    None
}

/// Enumerate the host's ports and return a link to the first device that
/// answers the default echo probe.
#[cfg(feature = "native")]
pub fn auto_discover(kind: LinkKind, baud_rate: u32) -> Result<Box<dyn Transport>> {
    let candidates: Vec<String> = discover_ports().into_iter().map(|p| p.name).collect();
    if candidates.is_empty() {
        return Err(Error::DeviceNotFound);
    }
    info!("Probing {} serial port(s) for a {kind} device", candidates.len());

    let found = discover_device(
        &candidates,
        |name| open_transport(kind, &SerialConfig::new(name, baud_rate)),
        &EchoProbe::default(),
        DISCOVERY_ATTEMPTS,
    );

    match found {
        Some(link) => Ok(link),
        None if crate::is_interrupted_requested() => Err(Error::Interrupted),
        None => Err(Error::DeviceNotFound),
    }
}
