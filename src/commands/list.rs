//! List command implementation

use uartlink_serial::supported_devices;

/// Print attached devices, and optionally the supported-device table
pub fn run_list(supported: bool) {
    let service = crate::devices::service(Default::default());
    let devices = service.list_available_devices();

    if devices.is_empty() {
        println!("No supported devices attached");
    } else {
        println!("Attached devices:");
        println!();
        for name in &devices {
            println!("  {}", name);
        }
    }

    if supported {
        println!();
        println!("Supported devices:");
        println!();
        println!("{:<8} {:<6} {:<6} Part", "Family", "VID", "PID");
        println!("{}", "-".repeat(36));
        for row in supported_devices() {
            println!(
                "{:<8} {:04x}   {:04x}   {}",
                row.family, row.vendor_id, row.product_id, row.part
            );
        }
    }
}
