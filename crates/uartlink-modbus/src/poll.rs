//! Periodic register polling
//!
//! A [`Poller`] runs at most one background loop that reads a block of
//! holding registers on a fixed interval and broadcasts every successful
//! read. Starting a new poll replaces the old one. Each loop carries a
//! session id so subscribers can tell updates of a stopped loop apart from
//! those of its replacement.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};
use crate::frame::Request;
use crate::master::ModbusMaster;

/// Capacity of the update channel; slow subscribers see `Lagged`
pub const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// What to poll and how often
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub slave: u8,
    pub address: u16,
    pub count: u16,
    pub interval: Duration,
}

/// One successful poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollUpdate {
    /// Id of the loop that produced this update
    pub session: u64,
    pub slave: u8,
    pub address: u16,
    pub registers: Vec<u16>,
}

struct ActivePoll {
    session: u64,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of the background polling loop
pub struct Poller {
    master: ModbusMaster,
    tx: broadcast::Sender<PollUpdate>,
    active: Option<ActivePoll>,
    next_session: u64,
}

impl Poller {
    pub fn new(master: ModbusMaster) -> Self {
        let (tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self::with_sender(master, tx)
    }

    /// Publish on an existing channel, so subscribers outlive this poller
    pub fn with_sender(master: ModbusMaster, tx: broadcast::Sender<PollUpdate>) -> Self {
        Self {
            master,
            tx,
            active: None,
            next_session: 1,
        }
    }

    /// Receive updates from the current and all later polling loops
    pub fn subscribe(&self) -> broadcast::Receiver<PollUpdate> {
        self.tx.subscribe()
    }

    /// Start polling, stopping any loop that is already running
    ///
    /// Returns the session id of the new loop. The request is validated
    /// up front, so a bad `count` fails here instead of inside the loop.
    pub async fn start(&mut self, config: PollConfig) -> Result<u64> {
        let request = Request::ReadHoldingRegisters {
            slave: config.slave,
            address: config.address,
            count: config.count,
        };
        request
            .validate()
            .map_err(|kind| Error::new(request, kind))?;
        if config.interval.is_zero() {
            return Err(Error::new(
                request,
                ErrorKind::InvalidArgument("poll interval must be non-zero".into()),
            ));
        }

        self.stop().await;

        let session = self.next_session;
        self.next_session += 1;
        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.master.clone(),
            config,
            session,
            token.clone(),
            self.tx.clone(),
        ));
        log::info!(
            "Polling slave {} registers {}..{} every {:?} (session {})",
            config.slave,
            config.address,
            u32::from(config.address) + u32::from(config.count),
            config.interval,
            session
        );

        self.active = Some(ActivePoll {
            session,
            token,
            handle,
        });
        Ok(session)
    }

    /// Stop the running loop and wait for it to exit
    ///
    /// A transaction that is already on the wire completes first; its
    /// result is discarded.
    pub async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
            if let Err(e) = active.handle.await {
                log::warn!("Polling session {} ended abnormally: {}", active.session, e);
            }
            log::info!("Stopped polling session {}", active.session);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.handle.is_finished())
    }

    /// Id of the running loop, if any
    pub fn session(&self) -> Option<u64> {
        self.active
            .as_ref()
            .filter(|active| !active.handle.is_finished())
            .map(|active| active.session)
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.token.cancel();
        }
    }
}

async fn poll_loop(
    master: ModbusMaster,
    config: PollConfig,
    session: u64,
    token: CancellationToken,
    tx: broadcast::Sender<PollUpdate>,
) {
    while !token.is_cancelled() {
        // Never raced against cancellation: dropping the future mid-transfer
        // would leave half a response in the bridge.
        let result = master
            .read_holding_registers(config.slave, config.address, config.count)
            .await;

        if token.is_cancelled() {
            break;
        }
        match result {
            Ok(registers) => {
                // No subscribers is fine
                let _ = tx.send(PollUpdate {
                    session,
                    slave: config.slave,
                    address: config.address,
                    registers,
                });
            }
            Err(e) => log::warn!("Poll (session {}) failed: {}", session, e),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
    }
    log::debug!("Polling session {} exited", session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::Link;
    use crate::master::MasterConfig;
    use uartlink_core::{LineConfig, SerialDriver};
    use uartlink_dummy::{DummyPort, DummyPortHandle};

    fn poller() -> (Poller, DummyPortHandle) {
        let mut port = DummyPort::new_default();
        port.open(&LineConfig::default()).unwrap();
        let handle = port.handle();
        let config = MasterConfig {
            response_timeout: Duration::from_millis(200),
            post_write_delay: Duration::from_millis(1),
            idle_delay: Duration::from_millis(1),
            drain_before_write: false,
        };
        let master = ModbusMaster::with_config(Link::new(Box::new(port)), config);
        (Poller::new(master), handle)
    }

    fn poll(address: u16, count: u16) -> PollConfig {
        PollConfig {
            slave: 1,
            address,
            count,
            interval: Duration::from_millis(10),
        }
    }

    async fn next(rx: &mut broadcast::Receiver<PollUpdate>) -> PollUpdate {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no update within 2 s")
            .expect("channel closed")
    }

    #[tokio::test]
    async fn test_updates_are_published() {
        let (mut poller, _port) = poller();
        let mut rx = poller.subscribe();
        let session = poller.start(poll(4, 3)).await.unwrap();
        assert!(poller.is_active());
        assert_eq!(poller.session(), Some(session));

        for _ in 0..3 {
            let update = next(&mut rx).await;
            assert_eq!(update.session, session);
            assert_eq!(update.registers, vec![4, 5, 6]);
        }

        poller.stop().await;
        assert!(!poller.is_active());
        assert_eq!(poller.session(), None);
    }

    #[tokio::test]
    async fn test_restart_replaces_previous_loop() {
        let (mut poller, _port) = poller();
        let mut rx = poller.subscribe();
        let first = poller.start(poll(0, 10)).await.unwrap();
        assert_eq!(next(&mut rx).await.session, first);

        let second = poller.start(poll(20, 1)).await.unwrap();
        assert_ne!(first, second);

        // Updates queued before the restart may still be in the channel
        loop {
            let update = next(&mut rx).await;
            if update.session == second {
                assert_eq!(update.registers, vec![20]);
                break;
            }
            assert_eq!(update.session, first);
        }

        poller.stop().await;
        while let Ok(update) = rx.try_recv() {
            assert_eq!(update.session, second);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_invalid_count_does_not_start() {
        let (mut poller, port) = poller();
        let err = poller.start(poll(0, 0)).await.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidArgument(_)));
        assert!(!poller.is_active());
        assert!(port.written().is_empty());
    }

    #[tokio::test]
    async fn test_failed_reads_keep_polling() {
        let (mut poller, port) = poller();
        let mut rx = poller.subscribe();
        port.set_fail_writes(true);
        poller.start(poll(0, 1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(poller.is_active());
        assert!(rx.try_recv().is_err());

        port.set_fail_writes(false);
        assert_eq!(next(&mut rx).await.registers, vec![0]);
        poller.stop().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let (mut poller, _port) = poller();
        poller.stop().await;
        assert!(!poller.is_active());
    }
}
