use std::time::Duration;

use thiserror::Error;

use crate::hw::FakeFailureStage;

/// Errors returned by BLE adapter and connection operations.
#[derive(Debug, Error)]
pub enum InteractionError {
    #[error("BLE operation failed")]
    Ble(#[from] btleplug::Error),
    #[error("no BLE adapters were found")]
    NoAdapters,
    #[error("device `{address}` was not seen during the last scan")]
    UnknownDevice { address: String },
    #[error("{operation} did not complete within {limit}", limit = humantime::format_duration(*timeout))]
    TimedOut {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("characteristic `{uuid}` was not discovered on the connected device")]
    CharacteristicUnavailable { uuid: String },
    #[error("the connection to `{address}` is already closed")]
    ConnectionClosed { address: String },
    #[error("fake backend injected a failure at the `{stage}` stage")]
    InjectedFailure { stage: FakeFailureStage },
}

/// Errors returned when parsing fake backend fixtures.
#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("scan fixture records must contain four pipe-delimited fields")]
    InvalidRecordFieldCount,
    #[error("fixture records cannot contain empty mandatory fields")]
    EmptyRecordField,
    #[error("failed to parse RSSI value")]
    InvalidRssi(#[from] std::num::ParseIntError),
    #[error("invalid hex payload")]
    InvalidHex(#[from] hex::FromHexError),
    #[error("GATT fixture records must contain three pipe-delimited fields")]
    InvalidGattRecordFieldCount,
    #[error("GATT fixture contains an invalid UUID `{value}`")]
    InvalidUuid { value: String },
    #[error("unknown characteristic property `{value}`")]
    UnknownProperty { value: String },
}

/// Errors returned when validating command-line configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("`{value}` is not a valid characteristic UUID")]
    InvalidUuid { value: String },
    #[error("missing fake scan fixture while fake mode is enabled")]
    MissingFakeScanFixture,
}

/// Errors returned by telemetry initialisation.
#[derive(Debug, Error)]
pub(crate) enum TelemetryError {
    #[error("failed to install tracing subscriber")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
}
