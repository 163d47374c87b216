mod app;
mod cli;
mod error;
mod handlers;
mod hw;
mod protocol;
mod telemetry;
mod terminal;
mod utils;

pub use app::{RunStatus, fake_adapter, real_adapter, run, run_with_clients};
pub use cli::{
    Args, Command, FakeArgs, LogLevel, OutputFormat, RunSettings, Selection, SprayArgs,
};
pub use error::{ConfigError, FixtureError, InteractionError};
pub use handlers::{
    CommandHandler, DecodeError, SPRAY_COMMAND, StatisticsHandler, StatisticsRecord,
    StatisticsTimestamp,
};
pub use hw::{
    AddressSelector, BleAdapter, BleConnection, CharacteristicInfo, CharacteristicProperty,
    CommandReceipt, DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_TIMEOUT, DeviceSelector,
    DiscoveredDevice, EndpointStatus, FailureKind, FakeFailureStage, FirstDeviceSelector,
    GattReport, PreferredNameSelector, PromptSelector, PropertySet, RequiredCapability,
    ResolveError, ServiceInfo, SessionConfig, SessionController, SessionFailure,
    SessionOperation, SessionOutcome, SessionState, SessionSuccess, StatisticsReport, WriteMode,
    preferred_write_mode, resolve_characteristic,
};
pub use protocol::{
    COMMAND_CHARACTERISTIC_UUID, CharacteristicUuid, EndpointId, STATISTICS_CHARACTERISTIC_UUID,
};
pub use terminal::{SystemTerminalClient, TerminalClient};
