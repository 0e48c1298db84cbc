//! uartlink - USB-serial bridges and Modbus RTU from the command line
//!
//! Talks to PL2303 and CP210x bridges directly over USB, without a kernel
//! serial driver.
//!
//! # Architecture
//!
//! - `uartlink-core`: the driver contract and the USB host boundary
//! - `uartlink-prolific`, `uartlink-cp210x`: one driver per chip family
//! - `uartlink-nusb`: the native USB host
//! - `uartlink-modbus`: Modbus RTU master and poller
//! - `uartlink-serial`: device registry and the service used here

mod cli;
mod commands;
mod config;
mod devices;

use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use config::Profile;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let profile = match cli.config.as_deref() {
        Some(path) => match Profile::load(path) {
            Ok(profile) => {
                log::debug!("Loaded profile {}", path.display());
                profile
            }
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        },
        None => Profile::default(),
    };

    match cli.command {
        Commands::List { supported } => {
            commands::run_list(supported);
            Ok(())
        }
        Commands::Read {
            device,
            modbus,
            input,
            address,
            count,
        } => commands::run_read(&profile, &device, &modbus, input, address, count).await,
        Commands::Write {
            device,
            modbus,
            address,
            value,
        } => commands::run_write(&profile, &device, &modbus, address, value).await,
        Commands::Poll {
            device,
            modbus,
            address,
            count,
            interval_ms,
            updates,
        } => {
            commands::run_poll(
                &profile,
                &device,
                &modbus,
                address,
                count,
                Duration::from_millis(interval_ms),
                updates,
            )
            .await
        }
        Commands::Monitor {
            device,
            dtr,
            rts,
            duration_ms,
        } => {
            commands::run_monitor(
                &profile,
                &device,
                dtr,
                rts,
                duration_ms.map(Duration::from_millis),
            )
            .await
        }
        Commands::Send {
            device,
            data,
            wait_ms,
        } => commands::run_send(&profile, &device, &data, Duration::from_millis(wait_ms)).await,
    }
}
