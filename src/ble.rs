//! Bluetooth Low Energy transport.
//!
//! The controller exposes the Nordic UART service: one characteristic to
//! write requests to and one that notifies responses. Responses are split
//! across notifications of whatever size the radio picks, so this transport
//! does no framing at all. It forwards every notification as it arrives and
//! leaves reassembly to the frame codec.
//!
//! Link loss shows up as the notification stream ending or failing; that is
//! reported as an unexpected disconnect.

use bluest::Adapter;
use bluest::AdvertisingDevice;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::StreamExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::link::DeviceId;
use crate::transport::{EventSender, Transport, TransportEvent};

struct BleLink {
    device: Device,
    write: Characteristic,
    forwarder: JoinHandle<()>,
}

pub struct BleTransport {
    events: EventSender,
    adapter: Option<Adapter>,
    link: Option<BleLink>,
}

impl BleTransport {
    const NORDIC_UART_SERVICE_ID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
    const NORDIC_UART_WRITE_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
    const NORDIC_UART_NOTIFY_CHARACTERISTIC_ID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);
    // How long to scan for the named device before giving up on this attempt
    const SCAN_TIMEOUT_S: u64 = 30;

    /// A transport that reports inbound traffic on `events`.
    pub fn new(events: EventSender) -> Self {
        Self { events, adapter: None, link: None }
    }

    async fn adapter(&mut self) -> Result<Adapter> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = Adapter::default().await.ok_or(Error::AdapterUnavailable)?;
        adapter.wait_available().await?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    async fn discover_device(name: &str, adapter: &Adapter) -> Result<AdvertisingDevice> {
        let required_services = [Self::NORDIC_UART_SERVICE_ID];
        let mut adapter_events = adapter.scan(&required_services).await?;
        while let Some(device) = adapter_events.next().await {
            match device.device.name_async().await {
                Ok(device_name) if device_name == name => return Ok(device),
                Ok(device_name) => debug!("Skipping device {device_name}"),
                Err(err) => debug!("Skipping device without a readable name: {err}"),
            }
        }

        Err(Error::DeviceNotFound { name: name.to_string() })
    }

    async fn characteristic(
        service: &bluest::Service,
        uuid: Uuid,
        role: &'static str,
    ) -> Result<Characteristic> {
        service
            .discover_characteristics_with_uuid(uuid)
            .await?
            .first()
            .cloned()
            .ok_or(Error::CharacteristicMissing { role })
    }

    /// Resolve the UART characteristics and start forwarding notifications.
    async fn open_uart(&self, device: &Device) -> Result<BleLink> {
        let nordic_uart_service = device
            .discover_services_with_uuid(Self::NORDIC_UART_SERVICE_ID)
            .await?
            .first()
            .cloned()
            .ok_or(Error::ServiceMissing)?;
        let write =
            Self::characteristic(&nordic_uart_service, Self::NORDIC_UART_WRITE_CHARACTERISTIC_ID, "write").await?;
        let notify =
            Self::characteristic(&nordic_uart_service, Self::NORDIC_UART_NOTIFY_CHARACTERISTIC_ID, "notify").await?;

        let (ready_tx, ready_rx) = oneshot::channel();
        let forwarder = tokio::spawn(Self::forward_notifications(notify, self.events.clone(), ready_tx));
        // Subscribed before returning, so the first response is not missed
        ready_rx.await.map_err(|_| Error::NotConnected)??;

        Ok(BleLink { device: device.clone(), write, forwarder })
    }

    async fn forward_notifications(
        notify: Characteristic,
        events: EventSender,
        ready: oneshot::Sender<Result<()>>,
    ) {
        let mut reader = match notify.notify().await {
            Ok(reader) => {
                let _ = ready.send(Ok(()));
                reader
            }
            Err(err) => {
                let _ = ready.send(Err(err.into()));
                return;
            }
        };

        while let Some(read_result) = reader.next().await {
            match read_result {
                Ok(data) => {
                    trace!("RX notification: 0x{}", hex::encode(&data));
                    if events.send(TransportEvent::Bytes(data)).await.is_err() {
                        // Nobody is listening any more
                        return;
                    }
                }
                Err(err) => {
                    warn!("Notification error: {err}");
                    break;
                }
            }
        }

        info!("End of notification stream");
        let _ = events.send(TransportEvent::Disconnected { expected: false }).await;
    }
}

#[async_trait::async_trait]
impl Transport for BleTransport {
    async fn connect(&mut self, device_id: &DeviceId) -> Result<()> {
        self.disconnect().await?;

        let adapter = self.adapter().await?;
        let device = timeout(
            Duration::from_secs(Self::SCAN_TIMEOUT_S),
            Self::discover_device(device_id.as_str(), &adapter),
        )
        .await
        .map_err(|_| Error::DeviceNotFound { name: device_id.to_string() })??;

        adapter.connect_device(&device.device).await?;
        match self.open_uart(&device.device).await {
            Ok(link) => {
                info!("Connected to {device_id}");
                self.link = Some(link);
                Ok(())
            }
            Err(err) => {
                if let Err(disconnect_err) = adapter.disconnect_device(&device.device).await {
                    warn!("Failed to disconnect after setup error: {disconnect_err}");
                }
                Err(err)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            return Ok(());
        };
        // Stop forwarding first so the drop is not reported as link loss
        link.forwarder.abort();
        if let Some(adapter) = &self.adapter {
            adapter.disconnect_device(&link.device).await?;
        }
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        let link = self.link.as_ref().ok_or(Error::NotConnected)?;
        trace!("TX: {}", hex::encode(bytes));
        link.write.write(bytes).await?;
        Ok(())
    }
}

impl Drop for BleTransport {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            link.forwarder.abort();
        }
    }
}
