//! Port listing and echo ping command implementations.

use anyhow::{Result, bail};
use console::style;
use linkflash::host::DISCOVERY_ATTEMPTS;
use linkflash::{EchoProbe, Transport, discover_ports};

use super::Settings;
use super::flash::{connect, ensure_not_interrupted};
use crate::Cli;

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let detected = discover_ports();

    if json {
        let ports: Vec<serde_json::Value> = detected
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name,
                    "device": p.device.name(),
                    "known": p.device.is_known(),
                    "vid": p.vid,
                    "pid": p.pid,
                    "manufacturer": p.manufacturer,
                    "product": p.product,
                    "serial": p.serial,
                })
            })
            .collect();
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports,
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!("{}", style("Serial ports (probe order):").bold().underlined());
    if detected.is_empty() {
        eprintln!("  {}", style("no serial ports found").dim());
        return Ok(());
    }

    for line in linkflash::device::format_port_list(&detected) {
        println!("  {} {line}", style("•").dim());
    }
    Ok(())
}

/// Send echo probes until one comes back or the attempts run out.
fn ping_attempts(link: &mut dyn Transport, probe: &EchoProbe) -> Result<bool> {
    for attempt in 1..=DISCOVERY_ATTEMPTS {
        ensure_not_interrupted()?;
        log::debug!("Echo probe {attempt}/{DISCOVERY_ATTEMPTS}");
        if link.ping_expect_echo(probe)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Ping command implementation.
pub(crate) fn cmd_ping(cli: &Cli, settings: &Settings) -> Result<()> {
    let probe = EchoProbe::default().with_addresses(
        settings.update.source_address,
        settings.update.destination_address,
    );
    let mut link = connect(cli, settings)?;

    // a discovered link has already echoed
    let answered = if settings.port.is_some() {
        ping_attempts(&mut *link, &probe)
    } else {
        Ok(true)
    };

    let path = link.port_path().to_string();
    if let Err(e) = link.close() {
        log::debug!("Error closing {path}: {e}");
    }

    if !answered? {
        bail!("no echo from device on {path}");
    }
    if cli.quiet {
        println!("{path}");
    } else {
        eprintln!("{} Device answered on {path}", style("✓").green());
    }
    Ok(())
}
