//! Link monitor and port listing for debugging
//!
//! `--monitor` connects through the regular transport and prints every
//! decoded event without touching any volume.

use anyhow::{Context, Result};
use colored::*;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::protocol::{format_hex, Event, EventType};
use crate::transport::{
    Connector, DeviceFilter, LinkStatus, SerialConnector, Transport, TransportConfig,
};

/// One printed monitor line
pub fn format_event_line(elapsed_ms: u64, event: &Event) -> String {
    let hex = format_hex(&event.encode());
    let hex = match event.kind {
        EventType::Cw => hex.bright_green(),
        EventType::Ccw => hex.bright_red(),
        EventType::Click | EventType::DoubleClick => hex.bright_yellow(),
        EventType::Set => hex.bright_cyan(),
        EventType::Ack => hex.bright_magenta(),
    };

    format!(
        "[{}ms] {} | {} => {}",
        format!("{:08}", elapsed_ms).dimmed(),
        chrono::Local::now().format("%H:%M:%S%.3f"),
        hex,
        event.to_string().bright_blue()
    )
}

fn format_status(status: &LinkStatus) -> ColoredString {
    match status {
        LinkStatus::Disconnected => "disconnected".red(),
        LinkStatus::Searching { attempt } => format!("searching (attempt {})", attempt).yellow(),
        LinkStatus::Connected { port } => format!("connected to {}", port).green(),
        LinkStatus::Closed => "closed".dimmed(),
    }
}

/// Print device events until `cancel` fires
pub async fn run_monitor(
    connector: Arc<dyn Connector>,
    filter: DeviceFilter,
    config: TransportConfig,
    cancel: CancellationToken,
) -> Result<()> {
    monitor_to(connector, filter, config, cancel, &mut io::stdout()).await
}

async fn monitor_to<W: Write>(
    connector: Arc<dyn Connector>,
    filter: DeviceFilter,
    config: TransportConfig,
    cancel: CancellationToken,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "{}", "=== Combo Link Monitor ===".bold().cyan())?;
    writeln!(out, "Press Ctrl+C to exit\n")?;
    writeln!(out, "{}", "Format: [elapsed] time | HEX => EVENT".dimmed())?;
    writeln!(out, "{}\n", "─".repeat(60).dimmed())?;

    let mut transport = Transport::spawn(connector, filter.into_matcher(), config, cancel.child_token());
    let mut events = transport
        .receive_channel()
        .context("Receive channel already taken")?;
    let mut status = transport.subscribe_status();
    let start = Instant::now();

    let initial = status.borrow_and_update().clone();
    writeln!(out, "{} link {}", "●".bold(), format_status(&initial))?;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                writeln!(out, "{} link {}", "●".bold(), format_status(&current))?;
            }
            event = events.recv() => match event {
                Some(event) => {
                    writeln!(out, "{}", format_event_line(start.elapsed().as_millis() as u64, &event))?;
                }
                None => break,
            },
        }
    }

    transport.close().await;
    let stats = transport.stats();
    writeln!(
        out,
        "\n{} ({} received, {} invalid frame(s) skipped)",
        "Monitor stopped".yellow(),
        stats.frames_received(),
        stats.invalid_frames()
    )?;
    info!("Monitor stopped");
    Ok(())
}

/// List serial ports, flagging the ones the configured filter accepts
pub fn list_ports_formatted(filter: &DeviceFilter) -> Result<()> {
    println!("\n{}", "=== Available Serial Ports ===".bold().cyan());

    let ports = SerialConnector::list_ports()?;
    if ports.is_empty() {
        println!("  {}", "No serial ports found".dimmed());
    }

    for port in &ports {
        let marker = if filter.matches(port) {
            "[MATCH]".green()
        } else {
            "       ".normal()
        };
        let ids = match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => format!("{:04X}:{:04X}", vid, pid),
            _ => "----:----".to_string(),
        };
        println!(
            "  {} {:20} {} {}",
            marker,
            port.port_name.bright_white(),
            ids.yellow(),
            port.product.as_deref().unwrap_or("").dimmed()
        );
    }

    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxedConnection, DeviceDescriptor, TransportError};

    #[test]
    fn test_event_line_contains_hex_and_event() {
        colored::control::set_override(false);
        let line = format_event_line(42, &Event::set(1, 70));
        assert!(line.starts_with("[00000042ms]"));
        assert!(line.contains("69 69 05 01 46"));
        assert!(line.contains("Set"));
    }

    struct NoDevices;

    #[async_trait::async_trait]
    impl Connector for NoDevices {
        async fn discover(&self) -> Result<Vec<DeviceDescriptor>, TransportError> {
            Ok(Vec::new())
        }

        async fn open(&self, _device: &DeviceDescriptor) -> Result<BoxedConnection, TransportError> {
            Err(TransportError::DeviceNotFound)
        }
    }

    #[tokio::test]
    async fn test_monitor_prints_initial_status() {
        colored::control::set_override(false);
        let cancel = CancellationToken::new();
        let stopper = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            stopper.cancel();
        });

        let mut out = Vec::new();
        monitor_to(
            Arc::new(NoDevices),
            DeviceFilter::default(),
            TransportConfig::default(),
            cancel,
            &mut out,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        let first_status = text.lines().find(|l| l.contains(" link ")).unwrap();
        assert_eq!(first_status, "● link disconnected");
        assert!(text.contains("Monitor stopped (0 received"));
    }

    #[test]
    fn test_status_display() {
        colored::control::set_override(false);
        assert_eq!(
            format_status(&LinkStatus::Connected { port: "COM3".into() }).to_string(),
            "connected to COM3"
        );
        assert_eq!(
            format_status(&LinkStatus::Searching { attempt: 2 }).to_string(),
            "searching (attempt 2)"
        );
    }
}
