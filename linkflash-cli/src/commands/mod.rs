//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

use anyhow::Result;
use linkflash::LinkKind;
use linkflash::port::DEFAULT_BAUD;
use linkflash::{RetryPolicy, UpdateConfig};

use crate::Cli;
use crate::config::Config;

pub(crate) mod flash;
pub(crate) mod ports;

/// Effective settings after merging CLI/env, config files and defaults.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    /// Explicit port; `None` means probe for the device.
    pub(crate) port: Option<String>,
    pub(crate) baud: u32,
    pub(crate) link: LinkKind,
    pub(crate) update: UpdateConfig,
}

impl Settings {
    /// Resolve settings; CLI/env values win over config values.
    pub(crate) fn resolve(cli: &Cli, config: &Config) -> Result<Self> {
        let mut update = UpdateConfig::default();

        if let Some(block_size) = cli.block_size.or(config.update.block_size) {
            update = update.with_block_size(block_size);
        }

        match cli.max_retries.or(config.update.max_retries) {
            Some(0) => update = update.with_retry(RetryPolicy::unbounded()),
            Some(n) => update = update.with_retry(RetryPolicy::default().with_max_attempts(n)),
            None => {},
        }

        let source = config
            .update
            .host_address
            .unwrap_or(update.source_address);
        let destination = config
            .update
            .device_address
            .unwrap_or(update.destination_address);
        update = update.with_addresses(source, destination);

        Ok(Self {
            port: cli.port.clone().or_else(|| config.connection.serial.clone()),
            baud: cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD),
            link: cli.link.or(config.connection.link).unwrap_or_default(),
            update,
        })
    }
}
