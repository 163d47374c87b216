use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bon::Builder;
use clap::ValueEnum;
use tokio::time::sleep;
use tracing::{debug, instrument};

use super::adapter::{BleAdapter, BleConnection, WriteMode};
use super::model::{
    CharacteristicInfo, CharacteristicProperty, DiscoveredDevice, PropertySet, ServiceInfo,
};
use crate::error::{FixtureError, InteractionError};
use crate::protocol::{CharacteristicUuid, EndpointId, endpoint_metadata};

const DEFAULT_STATISTICS_PAYLOAD: [u8; 9] = [0x00, 0x05, 0x1E, 0x0A, 0x0D, 0x14, 0x03, 0x06, 0x19];
const DEFAULT_SERVICE_UUID: &str = "00004000-1212-efde-1523-785feabcd123";

/// Parsed fake scan fixture records. An empty fixture means nothing was found.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct ScanFixture {
    devices: Vec<DiscoveredDevice>,
}

impl FromStr for ScanFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.trim().is_empty() {
            return Ok(Self {
                devices: Vec::new(),
            });
        }
        let devices = value
            .split(';')
            .map(parse_scan_record)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { devices })
    }
}

/// Parsed fake hex payload.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct HexPayload {
    payload: Vec<u8>,
}

impl FromStr for HexPayload {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let cleaned: String = value.chars().filter(|c| !c.is_whitespace()).collect();
        Ok(Self {
            payload: hex::decode(cleaned)?,
        })
    }
}

/// Parsed fake GATT tree: `service|characteristic|prop,prop;...`.
#[derive(Debug, Clone, derive_more::Into)]
pub(crate) struct GattFixture {
    services: Vec<ServiceInfo>,
}

impl FromStr for GattFixture {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut grouped: Vec<(String, Vec<CharacteristicInfo>)> = Vec::new();
        for record in value.split(';').filter(|record| !record.trim().is_empty()) {
            let fields: Vec<&str> = record.split('|').map(str::trim).collect();
            let [service, characteristic, properties] = fields.as_slice() else {
                return Err(FixtureError::InvalidGattRecordFieldCount);
            };
            let service = canonical_uuid(service)?;
            let characteristic = CharacteristicInfo::new(
                canonical_uuid(characteristic)?,
                properties.parse::<PropertySet>()?,
            );

            match grouped.iter_mut().find(|(uuid, _)| *uuid == service) {
                Some((_, characteristics)) => characteristics.push(characteristic),
                None => grouped.push((service, vec![characteristic])),
            }
        }

        Ok(Self {
            services: grouped
                .into_iter()
                .map(|(uuid, characteristics)| ServiceInfo::new(uuid, true, characteristics))
                .collect(),
        })
    }
}

/// Stage at which the fake backend injects a failure.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FakeFailureStage {
    Connect,
    Services,
    Read,
    Write,
}

/// Settings for constructing a fake adapter.
#[derive(Debug, Builder)]
pub(crate) struct FakeBackendConfig {
    scan_fixture: ScanFixture,
    statistics_payload: Option<HexPayload>,
    gatt: Option<GattFixture>,
    failure: Option<FakeFailureStage>,
    #[builder(default)]
    discovery_delay: Duration,
}

/// Fixture-driven adapter used in tests and non-hardware environments.
#[derive(Debug)]
pub(crate) struct FakeAdapter {
    devices: Vec<DiscoveredDevice>,
    services: Vec<ServiceInfo>,
    statistics_payload: Vec<u8>,
    failure: Option<FakeFailureStage>,
    discovery_delay: Duration,
}

impl FakeAdapter {
    pub(crate) fn new(config: FakeBackendConfig) -> Self {
        Self {
            devices: config.scan_fixture.into(),
            services: config.gatt.map_or_else(default_services, Into::into),
            statistics_payload: config
                .statistics_payload
                .map_or_else(|| DEFAULT_STATISTICS_PAYLOAD.to_vec(), Into::into),
            failure: config.failure,
            discovery_delay: config.discovery_delay,
        }
    }

    fn injected(&self, stage: FakeFailureStage) -> Result<(), InteractionError> {
        if self.failure == Some(stage) {
            return Err(InteractionError::InjectedFailure { stage });
        }
        Ok(())
    }
}

#[async_trait]
impl BleAdapter for FakeAdapter {
    #[instrument(skip(self), level = "debug")]
    async fn scan(&self, scan_timeout: Duration) -> Result<Vec<DiscoveredDevice>, InteractionError> {
        if !self.discovery_delay.is_zero() {
            sleep(self.discovery_delay).await;
        }
        debug!(device_count = self.devices.len(), "fake scan complete");
        Ok(self.devices.clone())
    }

    #[instrument(skip(self), level = "debug")]
    async fn connect(
        &self,
        address: &str,
        connect_timeout: Duration,
    ) -> Result<Box<dyn BleConnection>, InteractionError> {
        self.injected(FakeFailureStage::Connect)?;
        let device = self
            .devices
            .iter()
            .find(|device| device.address().eq_ignore_ascii_case(address))
            .cloned()
            .ok_or_else(|| InteractionError::UnknownDevice {
                address: address.to_string(),
            })?;

        Ok(Box::new(FakeConnection {
            device,
            services: self.services.clone(),
            statistics_payload: self.statistics_payload.clone(),
            failure: self.failure,
            closed: AtomicBool::new(false),
        }))
    }
}

#[derive(Debug)]
struct FakeConnection {
    device: DiscoveredDevice,
    services: Vec<ServiceInfo>,
    statistics_payload: Vec<u8>,
    failure: Option<FakeFailureStage>,
    closed: AtomicBool,
}

impl FakeConnection {
    fn ensure_usable(&self, stage: FakeFailureStage) -> Result<(), InteractionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(InteractionError::ConnectionClosed {
                address: self.device.address().to_string(),
            });
        }
        if self.failure == Some(stage) {
            return Err(InteractionError::InjectedFailure { stage });
        }
        Ok(())
    }

    fn ensure_known(&self, characteristic: &CharacteristicInfo) -> Result<(), InteractionError> {
        let known = self
            .services
            .iter()
            .flat_map(ServiceInfo::characteristics)
            .any(|candidate| candidate.uuid().eq_ignore_ascii_case(characteristic.uuid()));
        if known {
            Ok(())
        } else {
            Err(InteractionError::CharacteristicUnavailable {
                uuid: characteristic.uuid().to_string(),
            })
        }
    }
}

#[async_trait]
impl BleConnection for FakeConnection {
    fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    async fn enumerate_services(&self) -> Result<Vec<ServiceInfo>, InteractionError> {
        self.ensure_usable(FakeFailureStage::Services)?;
        Ok(self.services.clone())
    }

    #[instrument(skip(self, characteristic), level = "trace", fields(uuid = characteristic.uuid()))]
    async fn read_characteristic(
        &self,
        characteristic: &CharacteristicInfo,
    ) -> Result<Vec<u8>, InteractionError> {
        self.ensure_usable(FakeFailureStage::Read)?;
        self.ensure_known(characteristic)?;
        Ok(self.statistics_payload.clone())
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
        self.ensure_usable(FakeFailureStage::Write)?;
        self.ensure_known(characteristic)?;
        debug!(payload = %hex::encode(payload), "fake write accepted");
        Ok(())
    }

    async fn close(&self) -> Result<(), InteractionError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            debug!(address = self.device.address(), "fake connection closed");
        }
        Ok(())
    }
}

fn parse_scan_record(raw_record: &str) -> Result<DiscoveredDevice, FixtureError> {
    let fields: Vec<&str> = raw_record.split('|').map(str::trim).collect();
    let [adapter_name, address, local_name, rssi] = fields.as_slice() else {
        return Err(FixtureError::InvalidRecordFieldCount);
    };
    if [adapter_name, address, local_name, rssi]
        .iter()
        .any(|field| field.is_empty())
    {
        return Err(FixtureError::EmptyRecordField);
    }

    let local_name = (*local_name != "-").then(|| (*local_name).to_string());
    let rssi = if *rssi == "-" {
        None
    } else {
        Some(rssi.parse::<i16>()?)
    };

    Ok(DiscoveredDevice::new(
        (*adapter_name).to_string(),
        (*address).to_string(),
        local_name,
        rssi,
    ))
}

fn canonical_uuid(value: &str) -> Result<String, FixtureError> {
    value
        .parse::<CharacteristicUuid>()
        .map(|uuid| uuid.to_string())
        .map_err(|_error| FixtureError::InvalidUuid {
            value: value.to_string(),
        })
}

fn default_services() -> Vec<ServiceInfo> {
    let statistics = endpoint_metadata(EndpointId::StatisticsCharacteristic);
    let command = endpoint_metadata(EndpointId::CommandCharacteristic);

    vec![ServiceInfo::new(
        DEFAULT_SERVICE_UUID.to_string(),
        true,
        vec![
            CharacteristicInfo::new(
                statistics.default_uuid().to_string(),
                PropertySet::from_iter([CharacteristicProperty::Read]),
            ),
            CharacteristicInfo::new(
                command.default_uuid().to_string(),
                PropertySet::from_iter([
                    CharacteristicProperty::Write,
                    CharacteristicProperty::WriteWithoutResponse,
                ]),
            ),
        ],
    )]
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    fn adapter(failure: Option<FakeFailureStage>) -> FakeAdapter {
        FakeAdapter::new(
            FakeBackendConfig::builder()
                .scan_fixture(
                    "hci0|AA:BB|Machhar|-43;hci0|CC:DD|-|-"
                        .parse()
                        .expect("fixture should parse"),
                )
                .maybe_failure(failure)
                .build(),
        )
    }

    #[rstest]
    #[case("hci0|AA:BB|Machhar|-43", 1)]
    #[case("hci0|AA:BB|Machhar|-43;hci1|CC:DD|-|-", 2)]
    #[case("", 0)]
    #[case("   ", 0)]
    fn scan_fixture_parses_records(#[case] fixture: &str, #[case] expected_count: usize) {
        let fixture: ScanFixture = fixture.parse().expect("fixture should parse");
        let devices: Vec<DiscoveredDevice> = fixture.into();
        assert_eq!(expected_count, devices.len());
    }

    #[rstest]
    #[case("hci0|AA:BB|Machhar")]
    #[case("hci0|AA:BB|Machhar|-43|extra")]
    fn scan_fixture_rejects_invalid_field_count(#[case] fixture: &str) {
        assert_matches!(
            fixture.parse::<ScanFixture>(),
            Err(FixtureError::InvalidRecordFieldCount)
        );
    }

    #[test]
    fn scan_fixture_rejects_empty_fields() {
        assert_matches!(
            "hci0||Machhar|-43".parse::<ScanFixture>(),
            Err(FixtureError::EmptyRecordField)
        );
    }

    #[test]
    fn hex_payload_rejects_odd_length() {
        assert_matches!("A".parse::<HexPayload>(), Err(FixtureError::InvalidHex(_)));
    }

    #[test]
    fn hex_payload_ignores_whitespace() {
        let payload: Vec<u8> = "00 05 1e"
            .parse::<HexPayload>()
            .expect("payload should parse")
            .into();
        assert_eq!(vec![0x00, 0x05, 0x1E], payload);
    }

    #[test]
    fn gatt_fixture_groups_characteristics_by_service() {
        let fixture: GattFixture = "0000180A-0000-1000-8000-00805F9B34FB|00002a29-0000-1000-8000-00805f9b34fb|read;\
             00004000-1212-efde-1523-785feabcd123|00004003-1212-efde-1523-785feabcd123|write;\
             0000180a-0000-1000-8000-00805f9b34fb|00002a24-0000-1000-8000-00805f9b34fb|read"
            .parse()
            .expect("gatt fixture should parse");
        let services: Vec<ServiceInfo> = fixture.into();

        assert_eq!(2, services.len());
        assert_eq!("0000180a-0000-1000-8000-00805f9b34fb", services[0].uuid());
        assert_eq!(2, services[0].characteristics().len());
        assert_eq!(
            "write",
            services[1].characteristics()[0].properties().to_string()
        );
    }

    #[rstest]
    #[case("svc|char")]
    #[case("not-a-uuid|00004003-1212-efde-1523-785feabcd123|read")]
    fn gatt_fixture_rejects_malformed_records(#[case] fixture: &str) {
        assert!(fixture.parse::<GattFixture>().is_err());
    }

    #[tokio::test]
    async fn default_read_returns_known_capture() {
        let adapter = adapter(None);
        let connection = adapter
            .connect("aa:bb", Duration::from_secs(1))
            .await
            .expect("fixture device should connect");
        let services = connection
            .enumerate_services()
            .await
            .expect("services should enumerate");
        let statistics = &services[0].characteristics()[0];

        let payload = connection
            .read_characteristic(statistics)
            .await
            .expect("read should succeed");
        assert_eq!(DEFAULT_STATISTICS_PAYLOAD.to_vec(), payload);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_blocks_further_io() {
        let adapter = adapter(None);
        let connection = adapter
            .connect("AA:BB", Duration::from_secs(1))
            .await
            .expect("fixture device should connect");

        connection.close().await.expect("first close should succeed");
        connection.close().await.expect("second close should succeed");
        assert_matches!(
            connection.enumerate_services().await,
            Err(InteractionError::ConnectionClosed { .. })
        );
    }

    #[tokio::test]
    async fn unknown_address_is_rejected() {
        let result = adapter(None).connect("EE:FF", Duration::from_secs(1)).await;
        assert_matches!(result, Err(InteractionError::UnknownDevice { address }) if address == "EE:FF");
    }

    #[rstest]
    #[case(FakeFailureStage::Services)]
    #[case(FakeFailureStage::Read)]
    #[tokio::test]
    async fn injected_failures_surface_at_their_stage(#[case] stage: FakeFailureStage) {
        let connection = adapter(Some(stage))
            .connect("AA:BB", Duration::from_secs(1))
            .await
            .expect("fixture device should connect");
        let result = match stage {
            FakeFailureStage::Services => connection.enumerate_services().await.map(|_| ()),
            _ => {
                let services = default_services();
                connection
                    .read_characteristic(&services[0].characteristics()[0])
                    .await
                    .map(|_| ())
            }
        };
        assert_matches!(result, Err(InteractionError::InjectedFailure { stage: failed }) if failed == stage);
    }
}
