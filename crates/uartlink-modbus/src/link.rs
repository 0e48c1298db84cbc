//! Exclusive access to a serial driver from async code
//!
//! Drivers block for up to their transfer timeouts, so every call runs on
//! the blocking thread pool. A half-duplex link cannot multiplex requests:
//! callers first take the transaction lock with [`Link::begin`] and keep the
//! returned [`Transaction`] until the exchange is over. Dropping the
//! transaction releases the lock on every path.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;
use uartlink_core::{
    ControlLines, Error as CoreError, FlowControl, Result as CoreResult, SerialDriver,
};

type SharedDriver = Arc<Mutex<Box<dyn SerialDriver>>>;

/// Shared handle to one open driver
#[derive(Clone)]
pub struct Link {
    driver: SharedDriver,
    lock: Arc<tokio::sync::Mutex<()>>,
}

/// Run `f` against the driver on the blocking pool
async fn run_blocking<R, F>(driver: SharedDriver, f: F) -> CoreResult<R>
where
    R: Send + 'static,
    F: FnOnce(&mut dyn SerialDriver) -> CoreResult<R> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || {
        let mut guard = driver.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut **guard)
    });
    match task.await {
        Ok(result) => result,
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => Err(CoreError::Aborted(e.to_string())),
    }
}

impl Link {
    pub fn new(driver: Box<dyn SerialDriver>) -> Self {
        Self {
            driver: Arc::new(Mutex::new(driver)),
            lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Wait for exclusive use of the link
    pub async fn begin(&self) -> Transaction {
        let guard = self.lock.clone().lock_owned().await;
        Transaction {
            driver: self.driver.clone(),
            _guard: guard,
        }
    }

    /// Whether a transaction currently holds the link
    pub fn is_busy(&self) -> bool {
        self.lock.try_lock().is_err()
    }

    /// Close the driver once any running transaction has finished
    pub async fn close(&self) {
        let _txn = self.begin().await;
        let result = run_blocking(self.driver.clone(), |driver| {
            driver.close();
            Ok(())
        })
        .await;
        if let Err(e) = result {
            log::warn!("Closing driver failed: {}", e);
        }
    }
}

/// Exclusive access to the link for one request/response exchange
pub struct Transaction {
    driver: SharedDriver,
    _guard: OwnedMutexGuard<()>,
}

impl Transaction {
    pub async fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        let data = data.to_vec();
        run_blocking(self.driver.clone(), move |driver| driver.write(&data)).await
    }

    /// One driver read; `None` means nothing arrived within the read timeout
    pub async fn read(&mut self) -> CoreResult<Option<Vec<u8>>> {
        run_blocking(self.driver.clone(), |driver| driver.read()).await
    }

    pub async fn set_control_line(
        &mut self,
        lines: ControlLines,
        enabled: bool,
    ) -> CoreResult<()> {
        run_blocking(self.driver.clone(), move |driver| {
            driver.set_control_line(lines, enabled)
        })
        .await
    }

    pub async fn set_flow_control(&mut self, flow: FlowControl) -> CoreResult<()> {
        run_blocking(self.driver.clone(), move |driver| driver.set_flow_control(flow)).await
    }

    /// Liveness probe; transport problems count as "not connected"
    pub async fn test_connection(&mut self) -> bool {
        run_blocking(self.driver.clone(), |driver| {
            Ok(driver.is_open() && driver.test_connection())
        })
        .await
        .unwrap_or(false)
    }
}
