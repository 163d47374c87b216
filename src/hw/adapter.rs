use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use super::btleplug_backend::BtleplugAdapter;
use super::fake_backend::{FakeAdapter, FakeBackendConfig};
use super::model::{CharacteristicInfo, DiscoveredDevice, ServiceInfo};
use crate::error::InteractionError;

/// GATT write semantics.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Acknowledged write.
    #[display("with_response")]
    WithResponse,
    /// Unacknowledged write command.
    #[display("without_response")]
    WithoutResponse,
}

/// Radio-side capabilities used by the session controller.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Runs one discovery pass for roughly `scan_timeout` and returns every
    /// device seen.
    async fn scan(&self, scan_timeout: Duration) -> Result<Vec<DiscoveredDevice>, InteractionError>;

    /// Connects to a device seen during the last scan.
    async fn connect(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn BleConnection>, InteractionError>;
}

/// A live connection to one peripheral.
#[async_trait]
pub trait BleConnection: Send + Sync {
    /// Returns the device this connection was opened to.
    fn device(&self) -> &DiscoveredDevice;

    /// Enumerates the GATT service tree.
    async fn enumerate_services(&self) -> Result<Vec<ServiceInfo>, InteractionError>;

    /// Reads the current value of a characteristic.
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<Vec<u8>, InteractionError>;

    /// Writes a value to a characteristic.
    async fn write_characteristic(
        &self,
        characteristic: &CharacteristicInfo,
        payload: &[u8],
        mode: WriteMode,
    ) -> Result<(), InteractionError>;

    /// Disconnects. Closing an already-closed connection succeeds.
    async fn close(&self) -> Result<(), InteractionError>;
}

#[cfg(test)]
impl std::fmt::Debug for dyn BleConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleConnection").finish_non_exhaustive()
    }
}

/// Builds the btleplug-backed adapter.
pub(crate) fn real_adapter() -> Box<dyn BleAdapter> {
    Box::new(BtleplugAdapter::new())
}

/// Builds the fixture-driven adapter.
pub(crate) fn fake_adapter(config: FakeBackendConfig) -> Box<dyn BleAdapter> {
    info!("using fake BLE backend");
    Box::new(FakeAdapter::new(config))
}
