//! Firmware update over a packet [`Transport`](crate::Transport).
//!
//! ## Session Flow
//!
//! ```text
//! host                                device
//!  | -- INIT(size, block, sha256) -->  |
//!  | <------------- ack -------------- |   (no reply: CANCEL, then INIT again)
//!  | -- BLOCK(0, data) -------------> |
//!  | <------------- ack -------------- |
//!  | -- BLOCK(1, data) -------------> |
//!  | <------ ack + failed ordinals --- |   failed blocks go to the back of the queue
//!  | ...                               |
//! ```

pub mod command;
pub mod session;

use std::time::Duration;

use crate::protocol::uart::MAX_DATA_LEN;
use crate::transport::{DEFAULT_DEVICE_ADDRESS, DEFAULT_HOST_ADDRESS, DEFAULT_RESPONSE_TIMEOUT};

pub use command::{CommandFrame, CommandKind};
pub use session::UpdateSession;

/// Port of the update service on the device.
pub const UPDATE_PORT: u8 = 2;

/// Block size the device firmware expects by default.
pub const DEFAULT_BLOCK_SIZE: usize = 96;

/// Largest block that still fits a UART packet with the BLOCK header.
pub const MAX_BLOCK_SIZE: usize = MAX_DATA_LEN - 3;

/// Pause after the device accepted INIT, and between CANCEL and the next INIT.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);

/// How often a block reported as failed may be sent again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transmissions allowed per block; `None` for no limit.
    pub max_attempts: Option<u32>,
    /// Delay before the first retransmission; doubled for each further one.
    pub backoff: Duration,
    /// Upper bound for the delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Some(10),
            backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Retry failed blocks forever, without waiting.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Allow at most `max_attempts` transmissions per block.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set the initial and maximum backoff.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration, max_backoff: Duration) -> Self {
        self.backoff = backoff;
        self.max_backoff = max_backoff;
        self
    }

    /// Whether a block already sent `attempts` times may be sent again.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempts < max)
    }

    /// Delay before retransmission number `retry` (starting at 1).
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 || self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Update session parameters.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Host address (UART only).
    pub source_address: u8,
    /// Device address (UART only).
    pub destination_address: u8,
    /// Port replies are addressed to.
    pub source_port: u8,
    /// Update service port on the device.
    pub destination_port: u8,
    /// Image bytes per BLOCK command.
    pub block_size: usize,
    /// How long to wait for each reply.
    pub response_timeout: Duration,
    /// See [`SETTLE_DELAY`].
    pub settle_delay: Duration,
    /// Handling of blocks the device reports as failed.
    pub retry: RetryPolicy,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            source_address: DEFAULT_HOST_ADDRESS,
            destination_address: DEFAULT_DEVICE_ADDRESS,
            source_port: UPDATE_PORT,
            destination_port: UPDATE_PORT,
            block_size: DEFAULT_BLOCK_SIZE,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            settle_delay: SETTLE_DELAY,
            retry: RetryPolicy::default(),
        }
    }
}

impl UpdateConfig {
    /// Set the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the settle delay.
    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
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

/// State reported before each BLOCK transmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct BlockProgress {
    /// Byte offset of the block.
    pub offset: usize,
    /// Block number sent on the wire.
    pub ordinal: usize,
    /// Transmission count for this block, including this one.
    pub attempt: u32,
    /// Blocks still queued after this one.
    pub pending: usize,
    /// Number of blocks in the image.
    pub total: usize,
}

/// Summary of a completed session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct UpdateReport {
    /// INIT commands sent (2 when the first went unanswered).
    pub init_attempts: u32,
    /// BLOCK commands sent, retransmissions included.
    pub blocks_sent: usize,
    /// BLOCK commands sent for blocks the device reported as failed.
    pub retransmissions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_policy_default() {
        let policy = RetryPolicy::default();
        assert!(policy.allows(9));
        assert!(!policy.allows(10));
    }

    #[test]
    fn test_retry_policy_unbounded() {
        let policy = RetryPolicy::unbounded();
        assert!(policy.allows(u32::MAX));
        assert_eq!(policy.delay(5), Duration::ZERO);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::ZERO);
        assert_eq!(policy.delay(1), Duration::from_millis(10));
        assert_eq!(policy.delay(2), Duration::from_millis(20));
        assert_eq!(policy.delay(4), Duration::from_millis(80));
        assert_eq!(policy.delay(8), Duration::from_secs(1));
        assert_eq!(policy.delay(40), Duration::from_secs(1));
    }

    #[test]
    fn test_update_config_builder() {
        let config = UpdateConfig::default()
            .with_block_size(32)
            .with_settle_delay(Duration::ZERO)
            .with_addresses(5, 6);
        assert_eq!(config.block_size, 32);
        assert_eq!(config.settle_delay, Duration::ZERO);
        assert_eq!(config.source_address, 5);
        assert_eq!(config.destination_address, 6);
        assert_eq!(config.destination_port, UPDATE_PORT);
    }

    #[test]
    fn test_max_block_fits_uart_packet() {
        let block = vec![0u8; MAX_BLOCK_SIZE];
        let payload = CommandFrame::block(0, &block).build();
        assert_eq!(payload.len(), MAX_DATA_LEN);
    }
}
