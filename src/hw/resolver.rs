use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument};

use super::adapter::WriteMode;
use super::model::{CharacteristicInfo, CharacteristicProperty, EndpointStatus, PropertySet, ServiceInfo};
use crate::protocol::{CharacteristicUuid, EndpointId};

/// The operation a resolved characteristic must support.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum RequiredCapability {
    #[display("read")]
    Read,
    /// Satisfied by either write or write-without-response.
    #[display("write")]
    Write,
}

impl RequiredCapability {
    /// Returns whether a property set satisfies this capability.
    #[must_use]
    pub fn is_satisfied_by(self, properties: &PropertySet) -> bool {
        match self {
            Self::Read => properties.contains(CharacteristicProperty::Read),
            Self::Write => {
                properties.contains(CharacteristicProperty::Write)
                    || properties.contains(CharacteristicProperty::WriteWithoutResponse)
            }
        }
    }
}

/// Errors returned when locating a characteristic in a service tree.
#[derive(Debug, Error, Clone, Eq, PartialEq)]
pub enum ResolveError {
    #[error("characteristic `{uuid}` was not found on the connected device")]
    NotFound { uuid: CharacteristicUuid },
    #[error("characteristic `{uuid}` does not support {required} (declared properties: {actual})")]
    CapabilityMissing {
        uuid: CharacteristicUuid,
        required: RequiredCapability,
        actual: PropertySet,
    },
}

/// Locates `target` in the service tree and checks it supports `required`.
///
/// # Errors
///
/// Returns [`ResolveError::NotFound`] when no characteristic matches and
/// [`ResolveError::CapabilityMissing`] when it lacks the required property.
#[instrument(skip_all, level = "debug", fields(%target, %required))]
pub fn resolve_characteristic<'a>(
    services: &'a [ServiceInfo],
    target: &CharacteristicUuid,
    required: RequiredCapability,
) -> Result<&'a CharacteristicInfo, ResolveError> {
    log_service_tree(services);

    let characteristic =
        find_characteristic(services, target).ok_or_else(|| ResolveError::NotFound {
            uuid: target.clone(),
        })?;

    if !required.is_satisfied_by(characteristic.properties()) {
        return Err(ResolveError::CapabilityMissing {
            uuid: target.clone(),
            required,
            actual: characteristic.properties().clone(),
        });
    }

    Ok(characteristic)
}

/// Picks the write semantics for a resolved characteristic.
///
/// Acknowledged writes are preferred; write-without-response is used only
/// when it is the sole write property declared.
#[must_use]
pub fn preferred_write_mode(characteristic: &CharacteristicInfo) -> WriteMode {
    let properties = characteristic.properties();
    if !properties.contains(CharacteristicProperty::Write)
        && properties.contains(CharacteristicProperty::WriteWithoutResponse)
    {
        WriteMode::WithoutResponse
    } else {
        WriteMode::WithResponse
    }
}

pub(crate) fn find_characteristic<'a>(
    services: &'a [ServiceInfo],
    target: &CharacteristicUuid,
) -> Option<&'a CharacteristicInfo> {
    services
        .iter()
        .flat_map(ServiceInfo::characteristics)
        .find(|characteristic| target.matches(characteristic.uuid()))
}

/// Reports presence of each known endpoint under the configured UUIDs.
pub(crate) fn endpoint_statuses<F>(services: &[ServiceInfo], uuid_for: F) -> Vec<EndpointStatus>
where
    F: Fn(EndpointId) -> CharacteristicUuid,
{
    crate::protocol::known_endpoints()
        .map(|endpoint| {
            let uuid = uuid_for(endpoint);
            let properties =
                find_characteristic(services, &uuid).map(|found| found.properties().clone());
            EndpointStatus::new(endpoint, uuid, properties)
        })
        .collect()
}

fn log_service_tree(services: &[ServiceInfo]) {
    for service in services {
        debug!(service = service.uuid(), primary = service.is_primary(), "GATT service");
        for characteristic in service.characteristics() {
            debug!(
                service = service.uuid(),
                characteristic = characteristic.uuid(),
                properties = %characteristic.properties(),
                "GATT characteristic"
            );
        }
    }
}
