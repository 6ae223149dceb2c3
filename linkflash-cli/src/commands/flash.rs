//! Flash command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use linkflash::host::auto_discover;
use linkflash::{
    BlockProgress, DetectedPort, FirmwareImage, SerialConfig, Transport, UpdateSession,
    discover_ports,
};
use std::path::Path;

use super::Settings;
use crate::{Cli, CliError, use_fancy_output, was_interrupted};

pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if was_interrupted() {
        Err(CliError::Cancelled("interrupted by user".into()).into())
    } else {
        Ok(())
    }
}

/// Probing is not allowed in non-interactive mode.
fn require_port_if_non_interactive(cli: &Cli, settings: &Settings) -> Result<()> {
    if cli.non_interactive && settings.port.is_none() {
        return Err(CliError::Usage(
            "no port given; pass --port or set LINKFLASH_PORT in non-interactive mode".into(),
        )
        .into());
    }
    Ok(())
}

/// Probing needs at least one serial port on the host.
fn require_candidate_ports(ports: &[DetectedPort]) -> Result<()> {
    if ports.is_empty() {
        return Err(CliError::Usage(
            "no serial ports found; connect the device or pass --port".into(),
        )
        .into());
    }
    Ok(())
}

/// Open the configured port, or probe for the device when none is set.
pub(crate) fn connect(cli: &Cli, settings: &Settings) -> Result<Box<dyn Transport>> {
    if let Some(ref port) = settings.port {
        if !cli.quiet {
            eprintln!(
                "{} Using {} ({} link, {} baud)",
                style("🔌").cyan(),
                port,
                settings.link,
                settings.baud
            );
        }
        return linkflash::open_transport(settings.link, &SerialConfig::new(port, settings.baud))
            .with_context(|| format!("failed to open {port}"));
    }

    require_port_if_non_interactive(cli, settings)?;
    require_candidate_ports(&discover_ports())?;

    if !cli.quiet {
        eprintln!(
            "{} Looking for a device ({} link)...",
            style("⏳").yellow(),
            settings.link
        );
    }
    let link = auto_discover(settings.link, settings.baud)?;
    if !cli.quiet {
        eprintln!(
            "{} Device found on {}",
            style("✓").green(),
            link.port_path()
        );
    }
    Ok(link)
}

fn progress_bar(cli: &Cli, total: usize) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total as u64);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Flash command implementation.
pub(crate) fn cmd_flash(cli: &Cli, settings: &Settings, firmware: &Path) -> Result<()> {
    require_port_if_non_interactive(cli, settings)?;

    if !cli.quiet {
        eprintln!(
            "{} Loading firmware: {}",
            style("📦").cyan(),
            firmware.display()
        );
    }
    let image = FirmwareImage::from_file(firmware)
        .with_context(|| format!("failed to load firmware {}", firmware.display()))?;
    let total = image.block_count(settings.update.block_size);
    if !cli.quiet {
        eprintln!(
            "{} {} bytes, {} blocks of {}, sha256 {}",
            style("ℹ").blue(),
            image.len(),
            total,
            settings.update.block_size,
            image.digest_hex()
        );
    }

    let mut link = connect(cli, settings)?;
    if let Err(err) = ensure_not_interrupted() {
        if let Err(e) = link.close() {
            log::debug!("Error closing {}: {e}", link.port_path());
        }
        return Err(err);
    }

    let pb = progress_bar(cli, total);
    let fancy = !pb.is_hidden();
    let mut done = 0u64;

    let result = UpdateSession::new(&mut *link, &image, settings.update.clone()).and_then(
        |mut session| {
            session.run(|p: &BlockProgress| {
                if p.attempt > 1 {
                    pb.set_message(format!("retrying block {} (attempt {})", p.ordinal, p.attempt));
                } else {
                    done += 1;
                    pb.set_position(done);
                }
                if !fancy && !cli.quiet {
                    eprintln!(
                        "  block {}/{} (offset 0x{:08X}, attempt {})",
                        p.ordinal + 1,
                        p.total,
                        p.offset,
                        p.attempt
                    );
                }
            })
        },
    );

    if let Err(e) = link.close() {
        log::debug!("Error closing {}: {e}", link.port_path());
    }

    let report = match result {
        Ok(report) => report,
        Err(err) => {
            pb.abandon();
            return Err(err).context("firmware update failed");
        },
    };
    pb.finish_with_message("done");

    if !cli.quiet {
        eprintln!(
            "\n{} Update complete: {} block(s) sent, {} retransmitted",
            style("🎉").green().bold(),
            report.blocks_sent,
            report.retransmissions
        );
    }

    Ok(())
}
