use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CharPropFlags, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use tokio::sync::OnceCell;
use tokio::time::{Instant, sleep_until, timeout, timeout_at};
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, instrument, trace};

use super::adapter::{BleAdapter, BleConnection, WriteMode};
use super::model::{
    CharacteristicInfo, CharacteristicProperty, DiscoveredDevice, PropertySet, ServiceInfo,
};
use crate::error::InteractionError;

const PROPERTY_FLAGS: [(CharPropFlags, CharacteristicProperty); 8] = [
    (CharPropFlags::BROADCAST, CharacteristicProperty::Broadcast),
    (CharPropFlags::READ, CharacteristicProperty::Read),
    (
        CharPropFlags::WRITE_WITHOUT_RESPONSE,
        CharacteristicProperty::WriteWithoutResponse,
    ),
    (CharPropFlags::WRITE, CharacteristicProperty::Write),
    (CharPropFlags::NOTIFY, CharacteristicProperty::Notify),
    (CharPropFlags::INDICATE, CharacteristicProperty::Indicate),
    (
        CharPropFlags::AUTHENTICATED_SIGNED_WRITES,
        CharacteristicProperty::AuthenticatedSignedWrites,
    ),
    (
        CharPropFlags::EXTENDED_PROPERTIES,
        CharacteristicProperty::ExtendedProperties,
    ),
];

/// Adapter backed by `btleplug`. The platform manager is created on first use.
#[derive(Debug, Default)]
pub(crate) struct BtleplugAdapter {
    manager: OnceCell<Manager>,
    discovered: Mutex<HashMap<String, ScannedPeripheral>>,
}

#[derive(Debug, Clone)]
struct ScannedPeripheral {
    peripheral: Peripheral,
    device: DiscoveredDevice,
}

#[derive(Debug)]
struct AdapterHandle {
    adapter: Adapter,
    name: String,
}

impl BtleplugAdapter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    async fn manager(&self) -> Result<&Manager, InteractionError> {
        self.manager
            .get_or_try_init(|| async { Manager::new().await.map_err(InteractionError::from) })
            .await
    }

    #[instrument(skip(self), level = "trace")]
    async fn adapters(&self) -> Result<Vec<AdapterHandle>, InteractionError> {
        let adapters = self.manager().await?.adapters().await?;
        if adapters.is_empty() {
            return Err(InteractionError::NoAdapters);
        }

        let mut handles = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let name = adapter.adapter_info().await?;
            handles.push(AdapterHandle { adapter, name });
        }
        Ok(handles)
    }

    fn lock_discovered(&self) -> MutexGuard<'_, HashMap<String, ScannedPeripheral>> {
        self.discovered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl BleAdapter for BtleplugAdapter {
    #[instrument(skip(self), level = "debug", fields(scan_timeout = %humantime::format_duration(scan_timeout)))]
    async fn scan(&self, scan_timeout: Duration) -> Result<Vec<DiscoveredDevice>, InteractionError> {
        let adapters = self.adapters().await?;
        info!(adapter_count = adapters.len(), "starting BLE scan");

        let scanning = StopOnDrop::new(stop_scans(
            adapters.iter().map(|handle| handle.adapter.clone()).collect(),
        ));
        for handle in &adapters {
            handle.adapter.start_scan(ScanFilter::default()).await?;
        }
        watch_discoveries(&adapters, scan_timeout).await;
        scanning.finish().await;

        let mut devices = Vec::new();
        let mut discovered = HashMap::new();
        for handle in &adapters {
            for peripheral in handle.adapter.peripherals().await? {
                let (local_name, rssi) = peripheral
                    .properties()
                    .await?
                    .map(|properties| (properties.local_name, properties.rssi))
                    .unwrap_or_default();
                let device = DiscoveredDevice::new(
                    handle.name.clone(),
                    peripheral.id().to_string(),
                    local_name,
                    rssi,
                );
                discovered.insert(
                    device.address().to_ascii_lowercase(),
                    ScannedPeripheral {
                        peripheral,
                        device: device.clone(),
                    },
                );
                devices.push(device);
            }
        }

        *self.lock_discovered() = discovered;
        Ok(devices)
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn BleConnection>, InteractionError> {
        let ScannedPeripheral { peripheral, device } = self
            .lock_discovered()
            .get(&address.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| InteractionError::UnknownDevice {
                address: address.to_string(),
            })?;

        let link = async {
            if !peripheral.is_connected().await? {
                peripheral.connect().await?;
            }
            Ok::<(), btleplug::Error>(())
        };
        if let Ok(result) = timeout(connect_timeout, link).await {
            result?;
        } else {
            if let Err(error) = peripheral.disconnect().await {
                debug!(?error, "failed to abandon timed-out connection attempt");
            }
            return Err(InteractionError::TimedOut {
                operation: "connect",
                timeout: connect_timeout,
            });
        }

        info!(address, "connected to peripheral");
        Ok(Box::new(BtleplugConnection {
            device,
            peripheral,
            characteristics: Mutex::new(HashMap::new()),
        }))
    }
}

#[derive(Debug)]
struct BtleplugConnection {
    device: DiscoveredDevice,
    peripheral: Peripheral,
    characteristics: Mutex<HashMap<String, Characteristic>>,
}

impl BtleplugConnection {
    fn characteristic_for(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<Characteristic, InteractionError> {
        self.characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&characteristic.uuid().to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| InteractionError::CharacteristicUnavailable {
                uuid: characteristic.uuid().to_string(),
            })
    }
}

#[async_trait]
impl BleConnection for BtleplugConnection {
    fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    #[instrument(skip(self), level = "debug")]
    async fn enumerate_services(&self) -> Result<Vec<ServiceInfo>, InteractionError> {
        self.peripheral.discover_services().await?;
        let (services, characteristics_by_uuid) =
            collect_services_and_characteristics(&self.peripheral);
        *self
            .characteristics
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = characteristics_by_uuid;
        Ok(services)
    }

    #[instrument(skip(self, characteristic), level = "trace", fields(uuid = characteristic.uuid()))]
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<Vec<u8>, InteractionError> {
        let characteristic = self.characteristic_for(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    #[instrument(
        skip(self, characteristic, payload),
        level = "trace",
        fields(uuid = characteristic.uuid(), %mode, payload_len = payload.len())
    )]
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicInfo,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError> {
        let characteristic = self.characteristic_for(characteristic)?;
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(&characteristic, payload, write_type)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), level = "debug", fields(address = self.device.address()))]
    async fn close(&self) -> Result<(), InteractionError> {
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// Runs a cleanup future exactly once: awaited by [`StopOnDrop::finish`], or
/// spawned when dropped first.
struct StopOnDrop<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    stop: Option<F>,
}

impl<F> StopOnDrop<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn new(stop: F) -> Self {
        Self { stop: Some(stop) }
    }

    async fn finish(mut self) {
        if let Some(stop) = self.stop.take() {
            stop.await;
        }
    }
}

impl<F> Drop for StopOnDrop<F>
where
    F: Future<Output = ()> + Send + 'static,
{
    fn drop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(stop);
            }
            Err(_error) => debug!("no async runtime available to stop an abandoned BLE scan"),
        }
    }
}

async fn stop_scans(adapters: Vec<Adapter>) {
    for adapter in adapters {
        if let Err(error) = adapter.stop_scan().await {
            debug!(?error, "failed to stop adapter scan cleanly");
        }
    }
}

/// Drains adapter events until the scan window closes.
async fn watch_discoveries(adapters: &[AdapterHandle], scan_timeout: Duration) {
    let deadline = Instant::now() + scan_timeout;
    let mut events = StreamMap::new();
    for handle in adapters {
        match handle.adapter.events().await {
            Ok(stream) => {
                events.insert(handle.name.clone(), stream);
            }
            Err(error) => debug!(adapter = %handle.name, ?error, "adapter event stream unavailable"),
        }
    }

    loop {
        match timeout_at(deadline, events.next()).await {
            Ok(Some((adapter, CentralEvent::DeviceDiscovered(id)))) => {
                trace!(%adapter, peripheral = %id, "discovered peripheral");
            }
            Ok(Some(_)) => {}
            Ok(None) => {
                sleep_until(deadline).await;
                break;
            }
            Err(_elapsed) => break,
        }
    }
}

fn collect_services_and_characteristics(
    peripheral: &Peripheral,
) -> (Vec<ServiceInfo>, HashMap<String, Characteristic>) {
    let mut services = Vec::new();
    let mut characteristics_by_uuid = HashMap::new();

    for service in peripheral.services() {
        let mut characteristics = Vec::new();
        for characteristic in &service.characteristics {
            let characteristic_uuid = characteristic.uuid.to_string().to_lowercase();
            characteristics_by_uuid
                .entry(characteristic_uuid.clone())
                .or_insert_with(|| characteristic.clone());
            characteristics.push(CharacteristicInfo::new(
                characteristic_uuid,
                property_set(characteristic.properties),
            ));
        }

        services.push(ServiceInfo::new(
            service.uuid.to_string().to_lowercase(),
            service.primary,
            characteristics,
        ));
    }

    (services, characteristics_by_uuid)
}

fn property_set(flags: CharPropFlags) -> PropertySet {
    PROPERTY_FLAGS
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|(_, property)| *property)
        .collect()
}
