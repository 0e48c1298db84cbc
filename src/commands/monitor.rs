//! Raw byte commands

use std::time::Duration;

use tokio::time::Instant;
use uartlink_core::ControlLines;
use uartlink_serial::SerialService;

use super::{hex_string, parse_hex_bytes};
use crate::cli::DeviceArgs;
use crate::config::Profile;

/// Print incoming bytes until `deadline` (or Ctrl-C when `None`)
async fn dump(
    service: &SerialService,
    deadline: Option<Instant>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let mut total = 0;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        tokio::select! {
            _ = &mut ctrl_c => break,
            chunk = service.read() => {
                if let Some(bytes) = chunk? {
                    total += bytes.len();
                    println!("RX [{:3}] {}", bytes.len(), hex_string(&bytes));
                }
            }
        }
    }
    Ok(total)
}

/// Print received bytes as hex
pub async fn run_monitor(
    profile: &Profile,
    device: &DeviceArgs,
    dtr: bool,
    rts: bool,
    duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut service = super::open(profile, device, Default::default()).await?;

    let mut lines = ControlLines::empty();
    lines.set(ControlLines::DTR, dtr);
    lines.set(ControlLines::RTS, rts);
    if !lines.is_empty() {
        service.set_control_line(lines, true).await?;
    }

    println!("Monitoring, press Ctrl-C to stop");
    let deadline = duration.map(|d| Instant::now() + d);
    let result = dump(&service, deadline).await;
    service.close().await;

    println!("Received {} bytes", result?);
    Ok(())
}

/// Send raw bytes and optionally print the reply
pub async fn run_send(
    profile: &Profile,
    device: &DeviceArgs,
    data: &[String],
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = parse_hex_bytes(data)?;
    if bytes.is_empty() {
        return Err("Nothing to send".into());
    }

    let mut service = super::open(profile, device, Default::default()).await?;
    let result = async {
        service.write(&bytes).await?;
        println!("TX [{:3}] {}", bytes.len(), hex_string(&bytes));
        if !wait.is_zero() {
            dump(&service, Some(Instant::now() + wait)).await?;
        }
        Ok::<_, Box<dyn std::error::Error>>(())
    }
    .await;
    service.close().await;
    result
}
