//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Parse a string as a hex or decimal u16
pub fn parse_hex_u16(s: &str) -> Result<u16, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u16>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u8
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let value = parse_hex_u16(s)?;
    u8::try_from(value).map_err(|_| format!("Value out of range: {}", s))
}

fn device_help() -> String {
    format!(
        "Device to open: dummy, <vid>:<pid>, id=<n> or a family name [families: {}]",
        crate::devices::family_names()
    )
}

#[derive(Parser)]
#[command(name = "uartlink")]
#[command(author, version, about = "USB-serial bridge and Modbus RTU tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Profile with default device, line and Modbus settings (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Device and line settings shared across commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct DeviceArgs {
    #[arg(short, long, help = device_help())]
    pub device: Option<String>,

    /// Baud rate
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Data bits (5-8)
    #[arg(long)]
    pub data_bits: Option<u8>,

    /// Parity (none, odd, even, mark, space)
    #[arg(long)]
    pub parity: Option<String>,

    /// Stop bits (1, 1.5, 2)
    #[arg(long)]
    pub stop_bits: Option<String>,

    /// Flow control (none, rtscts, dtrdsr, xonxoff)
    #[arg(long)]
    pub flow: Option<String>,
}

/// Modbus addressing and timing shared across commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct ModbusArgs {
    /// Slave id
    #[arg(short, long, value_parser = parse_hex_u8)]
    pub slave: Option<u8>,

    /// Response timeout in milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List attached devices and supported chips
    List {
        /// Also print the table of supported vendor/product ids
        #[arg(long)]
        supported: bool,
    },

    /// Read holding or input registers
    Read {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        modbus: ModbusArgs,

        /// Read input registers instead of holding registers
        #[arg(long)]
        input: bool,

        /// First register address (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_hex_u16)]
        address: u16,

        /// Number of registers (1-125)
        #[arg(default_value = "1")]
        count: u16,
    },

    /// Write a single holding register
    Write {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        modbus: ModbusArgs,

        /// Register address (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_hex_u16)]
        address: u16,

        /// Value (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_hex_u16)]
        value: u16,
    },

    /// Poll holding registers periodically
    Poll {
        #[command(flatten)]
        device: DeviceArgs,

        #[command(flatten)]
        modbus: ModbusArgs,

        /// First register address (hex with 0x prefix, or decimal)
        #[arg(value_parser = parse_hex_u16)]
        address: u16,

        /// Number of registers (1-125)
        #[arg(default_value = "1")]
        count: u16,

        /// Poll interval in milliseconds
        #[arg(short, long, default_value = "1000")]
        interval_ms: u64,

        /// Stop after this many updates (default: until Ctrl-C)
        #[arg(short = 'n', long)]
        updates: Option<usize>,
    },

    /// Print received bytes as hex until Ctrl-C
    Monitor {
        #[command(flatten)]
        device: DeviceArgs,

        /// Assert DTR after opening
        #[arg(long)]
        dtr: bool,

        /// Assert RTS after opening
        #[arg(long)]
        rts: bool,

        /// Stop after this many milliseconds
        #[arg(long)]
        duration_ms: Option<u64>,
    },

    /// Send raw bytes given as hex (e.g. "01 03 00 00 00 02 C4 0B")
    Send {
        #[command(flatten)]
        device: DeviceArgs,

        /// Hex bytes; whitespace is ignored
        data: Vec<String>,

        /// Print whatever arrives within this many milliseconds afterwards
        #[arg(long, default_value = "0")]
        wait_ms: u64,
    },
}
