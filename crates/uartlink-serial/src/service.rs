//! Application-facing serial service
//!
//! [`SerialService`] owns at most one open device. It resolves selectors
//! through the [`DeviceRegistry`], runs the Modbus master and the poller
//! on top of the open driver, and makes sure raw I/O never interleaves
//! with a Modbus frame.

use std::sync::Arc;

use tokio::sync::broadcast;
use uartlink_core::{
    ControlLines, DeviceDescriptor, FlowControl, LineConfig, SerialDriver, UsbHost,
};
use uartlink_modbus::{Link, MasterConfig, ModbusMaster, PollConfig, PollUpdate, Poller};

use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use crate::selector::DeviceSelector;

struct Session {
    descriptor: DeviceDescriptor,
    family: &'static str,
    link: Link,
    master: ModbusMaster,
    poller: Poller,
}

/// Facade over device discovery, raw I/O and Modbus
pub struct SerialService {
    registry: DeviceRegistry,
    master_config: MasterConfig,
    updates: broadcast::Sender<PollUpdate>,
    session: Option<Session>,
}

impl SerialService {
    pub fn new(host: Arc<dyn UsbHost>) -> Self {
        Self::with_registry(DeviceRegistry::new(host), MasterConfig::default())
    }

    pub fn with_registry(registry: DeviceRegistry, master_config: MasterConfig) -> Self {
        let (updates, _) = broadcast::channel(uartlink_modbus::poll::UPDATE_CHANNEL_CAPACITY);
        Self {
            registry,
            master_config,
            updates,
            session: None,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Presentation names of attached supported devices
    pub fn list_available_devices(&self) -> Vec<String> {
        self.registry.list_available_devices()
    }

    fn resolve(&self, selector: &DeviceSelector) -> Result<Box<dyn SerialDriver>> {
        let driver = match selector {
            #[cfg(feature = "dummy")]
            DeviceSelector::Dummy => {
                Box::new(uartlink_dummy::DummyPort::new_default()) as Box<dyn SerialDriver>
            }
            #[cfg(not(feature = "dummy"))]
            DeviceSelector::Dummy => {
                return Err(Error::InvalidSelector(
                    "dummy device support is not compiled in".into(),
                ))
            }
            DeviceSelector::VidPid {
                vendor_id,
                product_id,
            } => self.registry.create_driver(*vendor_id, *product_id)?,
            DeviceSelector::Id(id) => self.registry.create_driver_by_id(*id)?,
            DeviceSelector::Family { name, index } => {
                self.registry.create_driver_for_family(name, *index)?
            }
        };
        Ok(driver)
    }

    /// Open the selected device, closing any device that is already open
    pub async fn open(&mut self, selector: &DeviceSelector, config: &LineConfig) -> Result<()> {
        let driver = self.resolve(selector)?;
        self.open_driver(driver, config).await
    }

    /// Open a driver constructed by the caller
    pub async fn open_driver(
        &mut self,
        mut driver: Box<dyn SerialDriver>,
        config: &LineConfig,
    ) -> Result<()> {
        self.close().await;

        let config = *config;
        let driver = tokio::task::spawn_blocking(move || -> uartlink_core::Result<_> {
            driver.open(&config)?;
            Ok(driver)
        })
        .await
        .map_err(|e| uartlink_core::Error::Aborted(e.to_string()))??;

        let descriptor = driver.descriptor().clone();
        let family = driver.name();
        log::info!(
            "Opened {} device {} at {}",
            family,
            descriptor.display_name(),
            config
        );

        let link = Link::new(driver);
        let master = ModbusMaster::with_config(link.clone(), self.master_config);
        let poller = Poller::with_sender(master.clone(), self.updates.clone());
        self.session = Some(Session {
            descriptor,
            family,
            link,
            master,
            poller,
        });
        Ok(())
    }

    /// Stop polling and release the device; does nothing when closed
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.poller.stop().await;
            session.link.close().await;
            log::info!("Closed {}", session.descriptor.display_name());
        }
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// Descriptor and family of the open device
    pub fn device(&self) -> Option<(&DeviceDescriptor, &'static str)> {
        self.session
            .as_ref()
            .map(|session| (&session.descriptor, session.family))
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(Error::NotOpen)
    }

    fn session_mut(&mut self) -> Result<&mut Session> {
        self.session.as_mut().ok_or(Error::NotOpen)
    }

    /// Send raw bytes
    pub async fn write(&self, data: &[u8]) -> Result<()> {
        let mut txn = self.session()?.link.begin().await;
        Ok(txn.write(data).await?)
    }

    /// Read raw bytes; `None` when nothing arrived within the read timeout
    pub async fn read(&self) -> Result<Option<Vec<u8>>> {
        let mut txn = self.session()?.link.begin().await;
        Ok(txn.read().await?)
    }

    pub async fn set_control_line(&self, lines: ControlLines, enabled: bool) -> Result<()> {
        let mut txn = self.session()?.link.begin().await;
        Ok(txn.set_control_line(lines, enabled).await?)
    }

    pub async fn set_flow_control(&self, flow: FlowControl) -> Result<()> {
        let mut txn = self.session()?.link.begin().await;
        Ok(txn.set_flow_control(flow).await?)
    }

    /// Whether a device is open and still answering
    pub async fn is_connected(&self) -> bool {
        match &self.session {
            Some(session) => session.link.begin().await.test_connection().await,
            None => false,
        }
    }

    pub async fn modbus_read_holding_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let master = &self.session()?.master;
        Ok(master.read_holding_registers(slave, address, count).await?)
    }

    pub async fn modbus_read_input_registers(
        &self,
        slave: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let master = &self.session()?.master;
        Ok(master.read_input_registers(slave, address, count).await?)
    }

    pub async fn modbus_write_single_register(
        &self,
        slave: u8,
        address: u16,
        value: u16,
    ) -> Result<()> {
        let master = &self.session()?.master;
        Ok(master.write_single_register(slave, address, value).await?)
    }

    /// Start polling holding registers, replacing any running poll
    ///
    /// Returns the session id carried by the resulting updates.
    pub async fn start_polling(&mut self, config: PollConfig) -> Result<u64> {
        let session = self.session_mut()?;
        Ok(session.poller.start(config).await?)
    }

    pub async fn stop_polling(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.poller.stop().await;
        }
    }

    pub fn is_polling_active(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.poller.is_active())
    }

    /// Poll updates of this and every later device session
    pub fn subscribe(&self) -> broadcast::Receiver<PollUpdate> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uartlink_dummy::{DummyDevice, DummyHost, DummyPort, DummyPortHandle};

    fn fast() -> MasterConfig {
        MasterConfig {
            response_timeout: Duration::from_millis(200),
            post_write_delay: Duration::from_millis(1),
            idle_delay: Duration::from_millis(1),
            drain_before_write: true,
        }
    }

    fn service(host: DummyHost) -> SerialService {
        SerialService::with_registry(DeviceRegistry::new(Arc::new(host)), fast())
    }

    async fn with_dummy_port() -> (SerialService, DummyPortHandle) {
        let mut service = service(DummyHost::new());
        let port = DummyPort::new_default();
        let handle = port.handle();
        service
            .open_driver(Box::new(port), &LineConfig::new(19_200))
            .await
            .unwrap();
        (service, handle)
    }

    #[tokio::test]
    async fn test_closed_service() {
        let mut service = service(DummyHost::new());
        assert!(!service.is_open());
        assert!(!service.is_connected().await);
        assert!(matches!(service.read().await, Err(Error::NotOpen)));
        assert!(matches!(service.write(&[1]).await, Err(Error::NotOpen)));
        assert!(matches!(
            service.modbus_read_holding_registers(1, 0, 1).await,
            Err(Error::NotOpen)
        ));
        let poll = PollConfig {
            slave: 1,
            address: 0,
            count: 1,
            interval: Duration::from_millis(10),
        };
        assert!(matches!(service.start_polling(poll).await, Err(Error::NotOpen)));
        assert!(!service.is_polling_active());
        service.stop_polling().await;
        service.close().await;
    }

    #[tokio::test]
    async fn test_open_by_selector() {
        let device = DummyDevice::cp210x(0xea60, 5);
        let mut service = service(DummyHost::new().with_device(device.clone()));

        let selector: DeviceSelector = "10c4:ea60".parse().unwrap();
        service.open(&selector, &LineConfig::default()).await.unwrap();
        assert!(service.is_open());
        assert!(service.is_connected().await);
        let (descriptor, family) = service.device().unwrap();
        assert_eq!(descriptor.device_id, 5);
        assert_eq!(family, "cp210x");

        device.state().read_chunks.push_back(vec![0x55]);
        assert_eq!(service.read().await.unwrap(), Some(vec![0x55]));
        service.write(b"hi").await.unwrap();
        assert_eq!(device.state().written, b"hi".to_vec());

        service.close().await;
        assert!(!service.is_open());
        assert_eq!(device.state().closed, 1);
    }

    #[tokio::test]
    async fn test_line_settings_pass_through() {
        let device = DummyDevice::cp210x(0xea60, 5);
        let mut service = service(DummyHost::new().with_device(device.clone()));
        service
            .open(&"cp210x".parse().unwrap(), &LineConfig::default())
            .await
            .unwrap();
        device.clear_control_log();

        service.set_control_line(ControlLines::RTS, true).await.unwrap();
        assert_eq!(device.control_log().len(), 1);
        assert!(service.set_flow_control(FlowControl::None).await.is_ok());
        assert!(matches!(
            service.set_flow_control(FlowControl::RtsCts).await,
            Err(Error::Transport(uartlink_core::Error::InvalidArgument(_)))
        ));
    }

    #[tokio::test]
    async fn test_open_failures() {
        let device = DummyDevice::cp210x(0xea60, 5);
        device.state().refuse_open = true;
        let mut service = service(DummyHost::new().with_device(device));

        let err = service
            .open(&DeviceSelector::Id(5), &LineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(uartlink_core::Error::OpenFailed(_))
        ));
        assert!(!service.is_open());

        let err = service
            .open(&"067b:2303".parse().unwrap(), &LineConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Transport(uartlink_core::Error::DeviceNotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_modbus_through_service() {
        let (service, port) = with_dummy_port().await;
        assert_eq!(
            port.state().line_config,
            Some(LineConfig::new(19_200))
        );

        service.modbus_write_single_register(1, 3, 0xBEEF).await.unwrap();
        assert_eq!(
            service.modbus_read_holding_registers(1, 2, 2).await.unwrap(),
            vec![2, 0xBEEF]
        );
        assert_eq!(
            service.modbus_read_input_registers(1, 1, 1).await.unwrap(),
            vec![0x1001]
        );

        let err = service
            .modbus_read_holding_registers(1, 0, 126)
            .await
            .unwrap_err();
        match err {
            Error::Modbus(e) => {
                assert!(matches!(e.kind, uartlink_modbus::ErrorKind::InvalidArgument(_)))
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_polling_lifecycle() {
        let (mut service, _port) = with_dummy_port().await;
        let mut rx = service.subscribe();

        let poll = PollConfig {
            slave: 1,
            address: 8,
            count: 2,
            interval: Duration::from_millis(10),
        };
        let session = service.start_polling(poll).await.unwrap();
        assert!(service.is_polling_active());

        let update = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.session, session);
        assert_eq!(update.registers, vec![8, 9]);

        // Raw I/O shares the transaction lock with the poller
        service.write(&[]).await.unwrap();

        service.close().await;
        assert!(!service.is_polling_active());
        while rx.try_recv().is_ok() {}
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reopen_replaces_session() {
        let (mut service, first) = with_dummy_port().await;
        let second = DummyPort::new_default();
        let second_handle = second.handle();
        service
            .open_driver(Box::new(second), &LineConfig::default())
            .await
            .unwrap();
        assert_eq!(first.state().closed, 1);
        assert_eq!(second_handle.state().opened, 1);
        assert!(service.is_connected().await);
    }
}
