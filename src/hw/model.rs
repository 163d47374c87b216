use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::Serialize;
use serde_with::serde_as;
use strum_macros::{EnumIter, EnumString};

use crate::error::FixtureError;
use crate::handlers::StatisticsRecord;
use crate::protocol::{CharacteristicUuid, EndpointId};

use super::adapter::WriteMode;

/// A BLE peripheral observed during a scan.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct DiscoveredDevice {
    adapter_name: String,
    address: String,
    local_name: Option<String>,
    rssi: Option<i16>,
}

impl DiscoveredDevice {
    /// Creates a discovered-device record.
    #[must_use]
    pub fn new(
        adapter_name: String,
        address: String,
        local_name: Option<String>,
        rssi: Option<i16>,
    ) -> Self {
        Self {
            adapter_name,
            address,
            local_name,
            rssi,
        }
    }

    /// Returns the adapter name used to discover this device.
    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    /// Returns the platform address used to connect to this device.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the advertised local name, if present.
    #[must_use]
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Returns the advertised name, or `?` when the device did not advertise one.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.local_name.as_deref().unwrap_or("?")
    }

    /// Returns the latest observed RSSI value, if present.
    #[must_use]
    pub fn rssi(&self) -> Option<i16> {
        self.rssi
    }
}

/// A declared GATT characteristic property.
#[derive(
    Debug,
    Clone,
    Copy,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Serialize,
    EnumIter,
    EnumString,
    strum_macros::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum CharacteristicProperty {
    Broadcast,
    Read,
    #[strum(
        to_string = "write_without_response",
        serialize = "write-without-response"
    )]
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ExtendedProperties,
}

/// The set of properties a characteristic declares.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PropertySet(BTreeSet<CharacteristicProperty>);

impl PropertySet {
    /// Returns whether the set declares a property.
    #[must_use]
    pub fn contains(&self, property: CharacteristicProperty) -> bool {
        self.0.contains(&property)
    }

    /// Returns whether no properties are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the declared properties in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = CharacteristicProperty> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<CharacteristicProperty> for PropertySet {
    fn from_iter<T: IntoIterator<Item = CharacteristicProperty>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for PropertySet {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("none");
        }
        let labels = self
            .iter()
            .map(|property| property.to_string())
            .collect::<Vec<_>>();
        f.write_str(&labels.join(","))
    }
}

impl FromStr for PropertySet {
    type Err = FixtureError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty() && *label != "-")
            .map(|label| {
                label
                    .parse::<CharacteristicProperty>()
                    .map_err(|_error| FixtureError::UnknownProperty {
                        value: label.to_string(),
                    })
            })
            .collect()
    }
}

/// A characteristic discovered on a connected peripheral.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CharacteristicInfo {
    uuid: String,
    properties: PropertySet,
}

impl CharacteristicInfo {
    /// Creates a characteristic description.
    #[must_use]
    pub fn new(uuid: String, properties: PropertySet) -> Self {
        Self { uuid, properties }
    }

    /// Returns the characteristic UUID as reported by the backend.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns the declared properties.
    #[must_use]
    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }
}

/// A GATT service with its discovered characteristics.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct ServiceInfo {
    uuid: String,
    primary: bool,
    characteristics: Vec<CharacteristicInfo>,
}

impl ServiceInfo {
    /// Creates a service description.
    #[must_use]
    pub fn new(uuid: String, primary: bool, characteristics: Vec<CharacteristicInfo>) -> Self {
        Self {
            uuid,
            primary,
            characteristics,
        }
    }

    /// Returns the service UUID.
    #[must_use]
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Returns whether this is a primary service.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Returns all characteristics in this service.
    #[must_use]
    pub fn characteristics(&self) -> &[CharacteristicInfo] {
        &self.characteristics
    }
}

/// Whether one known endpoint was found on the connected device.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct EndpointStatus {
    endpoint: EndpointId,
    uuid: CharacteristicUuid,
    properties: Option<PropertySet>,
}

impl EndpointStatus {
    pub(crate) fn new(
        endpoint: EndpointId,
        uuid: CharacteristicUuid,
        properties: Option<PropertySet>,
    ) -> Self {
        Self {
            endpoint,
            uuid,
            properties,
        }
    }

    #[must_use]
    pub fn endpoint(&self) -> EndpointId {
        self.endpoint
    }

    #[must_use]
    pub fn uuid(&self) -> &CharacteristicUuid {
        &self.uuid
    }

    /// Returns the declared properties, or `None` when the endpoint is absent.
    #[must_use]
    pub fn properties(&self) -> Option<&PropertySet> {
        self.properties.as_ref()
    }

    #[must_use]
    pub fn is_present(&self) -> bool {
        self.properties.is_some()
    }
}

/// GATT database of a connected device plus endpoint presence.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct GattReport {
    device: DiscoveredDevice,
    endpoints: Vec<EndpointStatus>,
    services: Vec<ServiceInfo>,
}

impl GattReport {
    pub(crate) fn new(
        device: DiscoveredDevice,
        endpoints: Vec<EndpointStatus>,
        services: Vec<ServiceInfo>,
    ) -> Self {
        Self {
            device,
            endpoints,
            services,
        }
    }

    #[must_use]
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    #[must_use]
    pub fn endpoints(&self) -> &[EndpointStatus] {
        &self.endpoints
    }

    #[must_use]
    pub fn services(&self) -> &[ServiceInfo] {
        &self.services
    }
}

/// A decoded statistics read together with its raw payload.
#[serde_as]
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct StatisticsReport {
    device: DiscoveredDevice,
    characteristic_uuid: CharacteristicUuid,
    record: StatisticsRecord,
    #[serde_as(as = "serde_with::hex::Hex")]
    raw: Vec<u8>,
}

impl StatisticsReport {
    pub(crate) fn new(
        device: DiscoveredDevice,
        characteristic_uuid: CharacteristicUuid,
        record: StatisticsRecord,
        raw: Vec<u8>,
    ) -> Self {
        Self {
            device,
            characteristic_uuid,
            record,
            raw,
        }
    }

    #[must_use]
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> &CharacteristicUuid {
        &self.characteristic_uuid
    }

    #[must_use]
    pub fn record(&self) -> &StatisticsRecord {
        &self.record
    }

    /// Returns the raw characteristic value.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

/// Acknowledgement of a command write.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct CommandReceipt {
    device: DiscoveredDevice,
    characteristic_uuid: CharacteristicUuid,
    value: u8,
    write_mode: WriteMode,
}

impl CommandReceipt {
    pub(crate) fn new(
        device: DiscoveredDevice,
        characteristic_uuid: CharacteristicUuid,
        value: u8,
        write_mode: WriteMode,
    ) -> Self {
        Self {
            device,
            characteristic_uuid,
            value,
            write_mode,
        }
    }

    #[must_use]
    pub fn device(&self) -> &DiscoveredDevice {
        &self.device
    }

    #[must_use]
    pub fn characteristic_uuid(&self) -> &CharacteristicUuid {
        &self.characteristic_uuid
    }

    #[must_use]
    pub fn value(&self) -> u8 {
        self.value
    }

    #[must_use]
    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }
}
