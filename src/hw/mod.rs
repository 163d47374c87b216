mod adapter;
mod btleplug_backend;
mod fake_backend;
mod model;
mod resolver;
mod selector;
mod session;

pub use self::adapter::{BleAdapter, BleConnection, WriteMode};
pub(crate) use self::adapter::{fake_adapter, real_adapter};
pub use self::fake_backend::FakeFailureStage;
pub(crate) use self::fake_backend::{FakeBackendConfig, GattFixture, HexPayload, ScanFixture};
pub use self::model::{
    CharacteristicInfo, CharacteristicProperty, CommandReceipt, DiscoveredDevice, EndpointStatus,
    GattReport, PropertySet, ServiceInfo, StatisticsReport,
};
pub use self::resolver::{
    RequiredCapability, ResolveError, preferred_write_mode, resolve_characteristic,
};
pub use self::selector::{
    AddressSelector, DeviceSelector, FirstDeviceSelector, PreferredNameSelector, PromptSelector,
};
pub use self::session::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_SCAN_TIMEOUT, FailureKind, SessionConfig, SessionController,
    SessionFailure, SessionOperation, SessionOutcome, SessionState, SessionSuccess,
};
