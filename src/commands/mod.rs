//! CLI command implementations
//!
//! Every command opens its device through [`open`], which resolves the
//! selector and line settings (flags first, then the profile) and applies
//! the requested flow control.

mod list;
mod modbus;
mod monitor;

pub use list::run_list;
pub use modbus::{run_poll, run_read, run_write};
pub use monitor::{run_monitor, run_send};

use uartlink_modbus::MasterConfig;
use uartlink_serial::SerialService;

use crate::cli::DeviceArgs;
use crate::config::Profile;

/// Open the selected device with the effective settings
pub async fn open(
    profile: &Profile,
    args: &DeviceArgs,
    master_config: MasterConfig,
) -> Result<SerialService, Box<dyn std::error::Error>> {
    let selector = profile.selector(args)?;
    let line = profile.line_config(args)?;
    let flow = profile.flow_control(args)?;

    let mut service = crate::devices::service(master_config);
    service.open(&selector, &line).await?;
    if let Some(flow) = flow {
        service.set_flow_control(flow).await?;
    }

    if let Some((descriptor, family)) = service.device() {
        println!("Opened {} ({}) at {}", descriptor.display_name(), family, line);
    }
    Ok(service)
}

/// Format bytes as space-separated hex
pub fn hex_string(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse hex bytes; whitespace between and inside arguments is ignored
pub fn parse_hex_bytes(parts: &[String]) -> Result<Vec<u8>, String> {
    let joined: String = parts
        .iter()
        .flat_map(|p| p.chars())
        .filter(|c| !c.is_whitespace())
        .collect();
    let digits: Vec<char> = joined.replace("0x", "").replace("0X", "").chars().collect();
    if let Some(bad) = digits.iter().find(|c| !c.is_ascii_hexdigit()) {
        return Err(format!("Invalid hex digit '{}'", bad));
    }
    if digits.len() % 2 != 0 {
        return Err(format!("Odd number of hex digits in '{}'", joined));
    }
    digits
        .chunks(2)
        .map(|pair| {
            let byte: String = pair.iter().collect();
            u8::from_str_radix(&byte, 16).map_err(|_| format!("Invalid hex byte '{}'", byte))
        })
        .collect()
}
