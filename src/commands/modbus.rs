//! Modbus register commands

use std::time::Duration;

use uartlink_modbus::PollConfig;

use crate::cli::{DeviceArgs, ModbusArgs};
use crate::config::Profile;

fn print_registers(address: u16, registers: &[u16]) {
    for (i, value) in registers.iter().enumerate() {
        let reg = u32::from(address) + i as u32;
        println!("  0x{:04X} ({:5}): 0x{:04X} {:6}", reg, reg, value, value);
    }
}

/// Read a block of holding or input registers
pub async fn run_read(
    profile: &Profile,
    device: &DeviceArgs,
    modbus: &ModbusArgs,
    input: bool,
    address: u16,
    count: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let slave = profile.slave(modbus);
    let mut service = super::open(profile, device, profile.master_config(modbus)).await?;

    let result = if input {
        service.modbus_read_input_registers(slave, address, count).await
    } else {
        service
            .modbus_read_holding_registers(slave, address, count)
            .await
    };
    service.close().await;

    let registers = result?;
    println!(
        "Slave {}: {} {} register(s)",
        slave,
        registers.len(),
        if input { "input" } else { "holding" }
    );
    print_registers(address, &registers);
    Ok(())
}

/// Write one holding register
pub async fn run_write(
    profile: &Profile,
    device: &DeviceArgs,
    modbus: &ModbusArgs,
    address: u16,
    value: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let slave = profile.slave(modbus);
    let mut service = super::open(profile, device, profile.master_config(modbus)).await?;

    let result = service
        .modbus_write_single_register(slave, address, value)
        .await;
    service.close().await;

    result?;
    println!(
        "Slave {}: wrote 0x{:04X} to register 0x{:04X}",
        slave, value, address
    );
    Ok(())
}

/// Poll holding registers until Ctrl-C or `updates` results
pub async fn run_poll(
    profile: &Profile,
    device: &DeviceArgs,
    modbus: &ModbusArgs,
    address: u16,
    count: u16,
    interval: Duration,
    updates: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    let slave = profile.slave(modbus);
    let mut service = super::open(profile, device, profile.master_config(modbus)).await?;
    let mut rx = service.subscribe();

    let config = PollConfig {
        slave,
        address,
        count,
        interval,
    };
    let session = match service.start_polling(config).await {
        Ok(session) => session,
        Err(e) => {
            service.close().await;
            return Err(e.into());
        }
    };

    let mut received = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = rx.recv() => match update {
                Ok(update) if update.session == session => {
                    received += 1;
                    println!("#{} slave {}:", received, update.slave);
                    print_registers(update.address, &update.registers);
                    if updates.is_some_and(|limit| received >= limit) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Skipped {} poll results", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    service.stop_polling().await;
    service.close().await;
    Ok(())
}
