//! Device selector strings
//!
//! A selector names the device to open:
//!
//! - `dummy`: the in-memory Modbus emulator
//! - `067b:2303`: vendor and product id in hex
//! - `id=1002`: enumeration id
//! - `pl2303`, `cp210x:index=1`: a chip family, optionally the n-th
//!   attached device of that family

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Parsed device selector
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Dummy,
    VidPid { vendor_id: u16, product_id: u16 },
    Id(u32),
    Family { name: String, index: usize },
}

fn parse_hex_u16(s: &str) -> Option<u16> {
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    if s.is_empty() || s.len() > 4 {
        return None;
    }
    u16::from_str_radix(s, 16).ok()
}

fn parse_family(name: &str, opts: &str) -> Result<DeviceSelector, Error> {
    let mut index = 0;
    if !opts.is_empty() {
        for opt in opts.split(',') {
            match opt.split_once('=') {
                Some(("index", value)) => {
                    index = value.parse().map_err(|_| {
                        Error::InvalidSelector(format!("Invalid index: '{}'", value))
                    })?;
                }
                Some((key, _)) => {
                    return Err(Error::InvalidSelector(format!(
                        "Unknown parameter '{}' for {}",
                        key, name
                    )))
                }
                None => {
                    return Err(Error::InvalidSelector(format!(
                        "Invalid parameter format: '{}' (expected key=value)",
                        opt
                    )))
                }
            }
        }
    }
    Ok(DeviceSelector::Family {
        name: name.to_string(),
        index,
    })
}

impl FromStr for DeviceSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("dummy") {
            return Ok(DeviceSelector::Dummy);
        }
        if let Some(id) = s.strip_prefix("id=") {
            return id
                .parse()
                .map(DeviceSelector::Id)
                .map_err(|_| Error::InvalidSelector(format!("Invalid device id: '{}'", id)));
        }

        let (name, opts) = s.split_once(':').unwrap_or((s, ""));
        if let (Some(vendor_id), Some(product_id)) = (parse_hex_u16(name), parse_hex_u16(opts)) {
            return Ok(DeviceSelector::VidPid {
                vendor_id,
                product_id,
            });
        }

        let name = name.to_ascii_lowercase();
        if crate::registry::find_family(&name).is_some() {
            return parse_family(&name, opts);
        }
        Err(Error::InvalidSelector(format!("Unknown device: '{}'", s)))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Dummy => write!(f, "dummy"),
            DeviceSelector::VidPid {
                vendor_id,
                product_id,
            } => write!(f, "{:04x}:{:04x}", vendor_id, product_id),
            DeviceSelector::Id(id) => write!(f, "id={}", id),
            DeviceSelector::Family { name, index: 0 } => write!(f, "{}", name),
            DeviceSelector::Family { name, index } => write!(f, "{}:index={}", name, index),
        }
    }
}
