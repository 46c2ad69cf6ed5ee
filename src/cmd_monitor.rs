//! Polls one printer and prints a line per tick until interrupted.

use std::time::Duration;

use anyhow::{bail, Result};
use flashforge::{DeviceSession, DeviceSnapshot, TransportConfig};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::MissedTickBehavior,
};

/// Ask the user for a printer address on stdin.
pub async fn prompt_for_host() -> Result<String> {
    eprint!("No printer found. Enter the printer's IP address: ");

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    let host = line.trim();
    if host.is_empty() {
        bail!("no printer address given");
    }
    Ok(host.to_owned())
}

/// Connect, then refresh status, temperature and progress every `interval`.
///
/// Refresh failures are logged and retried on the next tick; the session
/// reconnects by itself. Returns once Ctrl-C is received.
pub async fn run(transport: TransportConfig, interval: Duration, json: bool, log: slog::Logger) -> Result<()> {
    let mut session = DeviceSession::new(transport, Some(log));

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("monitoring {} every {:?}, press Ctrl-C to stop", session.host(), interval);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping monitor");
                break;
            }
            _ = ticker.tick() => {
                if let Err(err) = session.refresh_all().await {
                    tracing::warn!("refresh of {} failed: {}", session.host(), err);
                    continue;
                }

                if json {
                    println!("{}", serde_json::to_string(session.snapshot())?);
                } else {
                    println!("{}", summary(session.snapshot()));
                }
            }
        }
    }

    session.disconnect().await;
    Ok(())
}

/// One human readable line describing the printer's state.
pub fn summary(snapshot: &DeviceSnapshot) -> String {
    let mut parts = vec![snapshot.machine_status.clone().unwrap_or_else(|| "UNKNOWN".to_owned())];

    if let Some(percent) = snapshot.print_percent {
        parts.push(format!("{percent}%"));
    }
    if let (Some(layer), Some(total)) = (snapshot.print_layer, snapshot.total_layers) {
        parts.push(format!("layer {layer}/{total}"));
    }
    for tool in snapshot.extruders.iter().chain(snapshot.beds.iter()) {
        parts.push(format!("{} {}/{}", tool.name, tool.current, tool.target));
    }
    if let Some(file) = snapshot.job_file.as_deref().filter(|f| !f.trim().is_empty()) {
        parts.push(file.to_owned());
    }

    parts.join("  ")
}
