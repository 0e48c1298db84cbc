//! Modbus RTU master
//!
//! Each request runs as one transaction on the [`Link`]:
//!
//! 1. take the transaction lock
//! 2. drop whatever stale bytes the bridge still buffers
//! 3. send the request frame, then wait `post_write_delay`
//! 4. collect the fixed-size response header
//! 5. collect the rest of the frame, whose length the header declares
//! 6. validate and decode
//!
//! Steps 4 and 5 share one deadline that starts when the request has been
//! sent, so a trickle of tiny chunks cannot extend the transaction.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, ErrorKind, Result};
use crate::frame::{self, Request};
use crate::link::{Link, Transaction};

/// Default time allowed for a complete response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2000);
/// Default pause between sending a request and the first read
pub const DEFAULT_POST_WRITE_DELAY: Duration = Duration::from_millis(10);
/// Default pause after a read that returned nothing
pub const DEFAULT_IDLE_DELAY: Duration = Duration::from_millis(10);

/// Timing of master transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterConfig {
    pub response_timeout: Duration,
    pub post_write_delay: Duration,
    pub idle_delay: Duration,
    /// Read once and discard before sending each request
    pub drain_before_write: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            post_write_delay: DEFAULT_POST_WRITE_DELAY,
            idle_delay: DEFAULT_IDLE_DELAY,
            drain_before_write: true,
        }
    }
}

/// Modbus RTU master bound to one link
#[derive(Clone)]
pub struct ModbusMaster {
    link: Link,
    config: MasterConfig,
}

impl ModbusMaster {
    pub fn new(link: Link) -> Self {
        Self::with_config(link, MasterConfig::default())
    }

    pub fn with_config(link: Link, config: MasterConfig) -> Self {
        Self { link, config }
    }

    pub fn config(&self) -> &MasterConfig {
        &self.config
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    /// Read `count` holding registers (function 0x03)
    pub async fn read_holding_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.read_registers(Request::ReadHoldingRegisters {
            slave,
            address,
            count,
        })
        .await
    }

    /// Read `count` input registers (function 0x04)
    pub async fn read_input_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.read_registers(Request::ReadInputRegisters {
            slave,
            address,
            count,
        })
        .await
    }

    /// Write one holding register (function 0x06)
    ///
    /// Succeeds once the slave has echoed the request.
    pub async fn write_single_register(&self, slave: u8, address: u16, value: u16) -> Result<()> {
        let request = Request::WriteSingleRegister {
            slave,
            address,
            value,
        };
        self.transact(&request)
            .await
            .and_then(|buf| frame::parse_write_response(slave, request.function(), &buf))
            .map_err(|kind| Error::new(request, kind))
    }

    /// Coil access is not supported
    pub async fn read_coils(&self, slave: u8, address: u16, count: u16) -> Result<Vec<bool>> {
        let request = Request::ReadCoils {
            slave,
            address,
            count,
        };
        Err(self.reject(request))
    }

    /// Coil access is not supported
    pub async fn write_single_coil(&self, slave: u8, address: u16, value: bool) -> Result<()> {
        let request = Request::WriteSingleCoil {
            slave,
            address,
            value,
        };
        Err(self.reject(request))
    }

    fn reject(&self, request: Request) -> Error {
        let kind = match request.validate() {
            Err(kind) => kind,
            Ok(()) => ErrorKind::InvalidArgument("unsupported request".into()),
        };
        Error::new(request, kind)
    }

    async fn read_registers(&self, request: Request) -> Result<Vec<u16>> {
        let count = match request {
            Request::ReadHoldingRegisters { count, .. }
            | Request::ReadInputRegisters { count, .. } => count,
            _ => return Err(self.reject(request)),
        };
        self.transact(&request)
            .await
            .and_then(|buf| frame::parse_read_response(request.slave(), count, &buf))
            .map_err(|kind| Error::new(request, kind))
    }

    /// Send `request` and return the raw response frame
    async fn transact(&self, request: &Request) -> std::result::Result<Vec<u8>, ErrorKind> {
        request.validate()?;
        let frame = request.encode();

        let mut txn = self.link.begin().await;

        if self.config.drain_before_write {
            match txn.read().await {
                Ok(Some(stale)) => log::debug!("Discarded {} stale bytes", stale.len()),
                Ok(None) => {}
                Err(e) => log::warn!("Draining before {} failed: {}", request, e),
            }
        }

        log::trace!("TX {:02X?}", frame);
        txn.write(&frame).await?;
        let deadline = Instant::now() + self.config.response_timeout;
        tokio::time::sleep(self.config.post_write_delay).await;

        let buf = self.receive(&mut txn, request, deadline).await?;
        log::trace!("RX {:02X?}", buf);
        Ok(buf)
    }

    /// Two-phase reassembly of the response
    async fn receive(
        &self,
        txn: &mut Transaction,
        request: &Request,
        deadline: Instant,
    ) -> std::result::Result<Vec<u8>, ErrorKind> {
        let header_len = request.response_header_len();
        let mut buf = Vec::with_capacity(header_len);

        if !self.fill(txn, &mut buf, header_len, deadline).await? {
            return Err(self.timed_out(request, &buf));
        }

        let total = header_len + request.remaining_len(&buf[..header_len]);
        if !self.fill(txn, &mut buf, total, deadline).await? {
            return Err(self.timed_out(request, &buf));
        }

        if buf.len() > total {
            log::debug!("Ignoring {} trailing bytes", buf.len() - total);
            buf.truncate(total);
        }
        Ok(buf)
    }

    /// Read until `buf` holds `needed` bytes; `false` if the deadline passed
    async fn fill(
        &self,
        txn: &mut Transaction,
        buf: &mut Vec<u8>,
        needed: usize,
        deadline: Instant,
    ) -> std::result::Result<bool, ErrorKind> {
        while buf.len() < needed {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            match txn.read().await? {
                Some(chunk) if !chunk.is_empty() => buf.extend_from_slice(&chunk),
                _ => tokio::time::sleep(self.config.idle_delay).await,
            }
        }
        Ok(true)
    }

    fn timed_out(&self, request: &Request, buf: &[u8]) -> ErrorKind {
        if request.is_write() {
            if let Some(exception) = frame::partial_write_exception(request.slave(), buf) {
                return exception;
            }
        }
        ErrorKind::ResponseTimeout {
            timeout: self.config.response_timeout,
            received: buf.len(),
        }
    }
}
