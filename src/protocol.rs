use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::Serialize;
use serde_with::SerializeDisplay;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

use crate::error::ConfigError;

/// Statistics characteristic UUID exposed by the spray firmware.
pub const STATISTICS_CHARACTERISTIC_UUID: &str = "00004003-1212-efde-1523-785feabcd123";

/// Remote-spray command characteristic UUID exposed by the spray firmware.
pub const COMMAND_CHARACTERISTIC_UUID: &str = "00004004-1212-efde-1523-785feabcd123";

/// Fixed length of the statistics characteristic value.
pub(crate) const STATISTICS_PAYLOAD_LEN: usize = 9;

/// Known endpoints of the statistics service.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, EnumIter, Display, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointId {
    /// Read-only characteristic carrying the packed statistics record.
    #[strum(to_string = "statistics_characteristic")]
    StatisticsCharacteristic,
    /// Write characteristic that triggers the spray/test action.
    #[strum(to_string = "command_characteristic")]
    CommandCharacteristic,
}

/// Descriptive metadata for one protocol endpoint.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) struct EndpointMetadata {
    name: &'static str,
    default_uuid: &'static str,
}

impl EndpointMetadata {
    /// Human-readable endpoint name.
    pub(crate) fn name(self) -> &'static str {
        self.name
    }

    /// Firmware default UUID.
    pub(crate) fn default_uuid(self) -> &'static str {
        self.default_uuid
    }
}

/// Returns all known endpoints in display order.
pub(crate) fn known_endpoints() -> impl Iterator<Item = EndpointId> {
    EndpointId::iter()
}

/// Returns metadata for one endpoint.
pub(crate) fn endpoint_metadata(endpoint: EndpointId) -> EndpointMetadata {
    match endpoint {
        EndpointId::StatisticsCharacteristic => EndpointMetadata {
            name: "statistics",
            default_uuid: STATISTICS_CHARACTERISTIC_UUID,
        },
        EndpointId::CommandCharacteristic => EndpointMetadata {
            name: "remote spray command",
            default_uuid: COMMAND_CHARACTERISTIC_UUID,
        },
    }
}

/// A validated characteristic UUID in lower-case hyphenated form.
///
/// ```
/// use spraystat::CharacteristicUuid;
///
/// let uuid: CharacteristicUuid = "00004003-1212-EFDE-1523-785FEABCD123".parse()?;
/// assert_eq!(spraystat::STATISTICS_CHARACTERISTIC_UUID, uuid.as_str());
/// # Ok::<(), spraystat::ConfigError>(())
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Hash, SerializeDisplay)]
pub struct CharacteristicUuid(String);

impl CharacteristicUuid {
    /// Returns the firmware's statistics characteristic UUID.
    #[must_use]
    pub fn statistics() -> Self {
        Self(STATISTICS_CHARACTERISTIC_UUID.to_string())
    }

    /// Returns the firmware's command characteristic UUID.
    #[must_use]
    pub fn command() -> Self {
        Self(COMMAND_CHARACTERISTIC_UUID.to_string())
    }

    /// Returns the default UUID for a known endpoint.
    #[must_use]
    pub fn for_endpoint(endpoint: EndpointId) -> Self {
        Self(endpoint_metadata(endpoint).default_uuid().to_string())
    }

    /// Returns the canonical string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compares against a UUID string reported by a backend, ignoring case.
    #[must_use]
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.eq_ignore_ascii_case(candidate)
    }
}

impl FromStr for CharacteristicUuid {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parsed = Uuid::parse_str(value.trim()).map_err(|_error| ConfigError::InvalidUuid {
            value: value.to_string(),
        })?;
        Ok(Self(parsed.hyphenated().to_string()))
    }
}

impl Display for CharacteristicUuid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn endpoint_metadata_carries_firmware_uuids() {
        let statistics = endpoint_metadata(EndpointId::StatisticsCharacteristic);
        assert_eq!("statistics", statistics.name());
        assert_eq!(STATISTICS_CHARACTERISTIC_UUID, statistics.default_uuid());

        let command = endpoint_metadata(EndpointId::CommandCharacteristic);
        assert_eq!(COMMAND_CHARACTERISTIC_UUID, command.default_uuid());
    }

    #[rstest]
    #[case("00004004-1212-efde-1523-785feabcd123")]
    #[case("00004004-1212-EFDE-1523-785FEABCD123")]
    #[case("000040041212efde1523785feabcd123")]
    #[case(" {00004004-1212-efde-1523-785feabcd123} ")]
    fn characteristic_uuid_normalises_accepted_forms(#[case] raw: &str) {
        let uuid: CharacteristicUuid = raw.parse().expect("uuid should parse");
        assert_eq!(CharacteristicUuid::command(), uuid);
    }

    #[test]
    fn characteristic_uuid_rejects_garbage() {
        let result = "not-a-uuid".parse::<CharacteristicUuid>();
        assert_matches!(result, Err(ConfigError::InvalidUuid { value }) if value == "not-a-uuid");
    }

    #[test]
    fn characteristic_uuid_matches_ignoring_case() {
        let uuid = CharacteristicUuid::statistics();
        assert!(uuid.matches("00004003-1212-EFDE-1523-785FEABCD123"));
        assert!(!uuid.matches(COMMAND_CHARACTERISTIC_UUID));
    }
}
