//! The driver contract shared by every chip family

use std::time::Duration;

use crate::error::{Error, Result};
use crate::line::{ControlLines, FlowControl, LineConfig};
use crate::usb::DeviceDescriptor;

/// Default timeout for bulk and control transfers
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);
/// Timeout used by the liveness probe
pub const TEST_CONNECTION_TIMEOUT: Duration = Duration::from_millis(100);
/// Size of the bulk-in scratch buffer
pub const DEFAULT_BUFFER_LENGTH: usize = 4096;
/// Interface claimed when the caller does not choose one
pub const DEFAULT_INTERFACE: u8 = 0;

/// Per-session transfer timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub read: Duration,
    pub write: Duration,
    pub control: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: DEFAULT_TIMEOUT,
            write: DEFAULT_TIMEOUT,
            control: DEFAULT_TIMEOUT,
        }
    }
}

/// Options applied when a driver opens its session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverOptions {
    /// Interface to claim
    pub interface: u8,
    pub timeouts: Timeouts,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            interface: DEFAULT_INTERFACE,
            timeouts: Timeouts::default(),
        }
    }
}

/// Uniform byte-stream interface over a USB-serial bridge
///
/// Every chip family implements this trait by sequencing its own vendor
/// control transfers. Callers only ever see these operations; session
/// state (endpoints, control lines) stays inside the driver.
///
/// All operations block for at most the configured timeouts.
pub trait SerialDriver: Send {
    /// Short family name (e.g. "pl2303")
    fn name(&self) -> &'static str;

    /// The device this driver was created for
    fn descriptor(&self) -> &DeviceDescriptor;

    /// Open the device and apply the line configuration
    ///
    /// Opening an already open driver replaces the previous session.
    fn open(&mut self, config: &LineConfig) -> Result<()>;

    /// Release the device; calling it on a closed driver does nothing
    fn close(&mut self);

    /// Whether a session is currently open
    fn is_open(&self) -> bool;

    /// Send bytes to the UART
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Receive whatever the bridge has buffered
    ///
    /// Returns `Ok(None)` when nothing arrived within the read timeout.
    fn read(&mut self) -> Result<Option<Vec<u8>>>;

    /// Drive DTR and/or RTS
    fn set_control_line(&mut self, lines: ControlLines, enabled: bool) -> Result<()>;

    /// Current state of the control lines
    fn control_lines(&self) -> ControlLines;

    /// Change the flow-control mode
    ///
    /// Families without hardware flow control only accept
    /// [`FlowControl::None`].
    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        match flow {
            FlowControl::None => Ok(()),
            other => Err(Error::InvalidArgument(format!(
                "{} does not support {:?} flow control",
                self.name(),
                other
            ))),
        }
    }

    /// Best-effort liveness probe; never fails
    fn test_connection(&mut self) -> bool;
}

impl<D: SerialDriver + ?Sized> SerialDriver for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn descriptor(&self) -> &DeviceDescriptor {
        (**self).descriptor()
    }

    fn open(&mut self, config: &LineConfig) -> Result<()> {
        (**self).open(config)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).read()
    }

    fn set_control_line(&mut self, lines: ControlLines, enabled: bool) -> Result<()> {
        (**self).set_control_line(lines, enabled)
    }

    fn control_lines(&self) -> ControlLines {
        (**self).control_lines()
    }

    fn set_flow_control(&mut self, flow: FlowControl) -> Result<()> {
        (**self).set_flow_control(flow)
    }

    fn test_connection(&mut self) -> bool {
        (**self).test_connection()
    }
}
