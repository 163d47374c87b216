use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bon::Builder;
use serde::{Serialize, Serializer};
use strum_macros::Display;
use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{Span, debug, info, instrument, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use super::adapter::{BleAdapter, BleConnection};
use super::model::{CommandReceipt, DiscoveredDevice, GattReport, ServiceInfo, StatisticsReport};
use super::resolver::{
    RequiredCapability, ResolveError, endpoint_statuses, preferred_write_mode,
    resolve_characteristic,
};
use super::selector::DeviceSelector;
use crate::error::InteractionError;
use crate::handlers::{CommandHandler, DecodeError, StatisticsHandler};
use crate::protocol::{CharacteristicUuid, EndpointId};
use crate::utils::error_chain;

/// Default bound for one discovery pass.
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for establishing a link.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Extra time the controller allows an adapter scan before giving up on it.
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Extra time the controller allows an adapter to abandon a timed-out
/// connect, so the adapter's own link cleanup runs to completion.
const CONNECT_GRACE: Duration = Duration::from_secs(2);

/// Timeouts and endpoint UUIDs for a session.
#[derive(Debug, Clone, Builder)]
pub struct SessionConfig {
    #[builder(default = DEFAULT_SCAN_TIMEOUT)]
    scan_timeout: Duration,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    connect_timeout: Duration,
    #[builder(default = CharacteristicUuid::statistics())]
    statistics_uuid: CharacteristicUuid,
    #[builder(default = CharacteristicUuid::command())]
    command_uuid: CharacteristicUuid,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl SessionConfig {
    #[must_use]
    pub fn scan_timeout(&self) -> Duration {
        self.scan_timeout
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Returns the configured UUID for a known endpoint.
    #[must_use]
    pub fn endpoint_uuid(&self, endpoint: EndpointId) -> &CharacteristicUuid {
        match endpoint {
            EndpointId::StatisticsCharacteristic => &self.statistics_uuid,
            EndpointId::CommandCharacteristic => &self.command_uuid,
        }
    }

    /// Builds a statistics read against the configured UUID.
    #[must_use]
    pub fn read_statistics(&self) -> SessionOperation {
        SessionOperation::ReadStatistics {
            uuid: self.statistics_uuid.clone(),
        }
    }

    /// Builds a command write against the configured UUID.
    #[must_use]
    pub fn send_command(&self, value: u8) -> SessionOperation {
        SessionOperation::SendCommand {
            uuid: self.command_uuid.clone(),
            value,
        }
    }
}

/// The transaction a session performs once connected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SessionOperation {
    /// Read and decode the statistics characteristic.
    ReadStatistics { uuid: CharacteristicUuid },
    /// Write one command byte.
    SendCommand { uuid: CharacteristicUuid, value: u8 },
    /// Enumerate the GATT tree without reading or writing.
    Inspect,
}

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, derive_more::Display)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[display("idle")]
    Idle,
    #[display("scanning")]
    Scanning,
    #[display("selecting")]
    Selecting,
    #[display("connecting")]
    Connecting,
    #[display("connected")]
    Connected,
    #[display("resolving")]
    Resolving,
    #[display("transacting")]
    Transacting,
    #[display("disconnecting")]
    Disconnecting,
    #[display("succeeded")]
    Succeeded,
    #[display("failed")]
    Failed,
}

/// Classified failure kinds.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    NoDevicesFound,
    ScanFailed,
    ConnectionError,
    NoServicesAvailable,
    CharacteristicNotFound,
    CapabilityMissing,
    BadLength,
    TransactionError,
    Cancelled,
}

/// A classified session failure.
#[derive(Debug, Error)]
pub enum SessionFailure {
    #[error("no BLE devices were found")]
    NoDevicesFound,
    #[error("BLE scan failed")]
    ScanFailed { source: InteractionError },
    #[error("failed to connect to `{address}`")]
    ConnectionError {
        address: String,
        source: InteractionError,
    },
    #[error("no GATT services are available on `{address}`")]
    NoServicesAvailable { address: String },
    #[error("failed to enumerate GATT services on `{address}`")]
    ServiceEnumerationFailed {
        address: String,
        source: InteractionError,
    },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{capability} of characteristic `{uuid}` failed")]
    TransactionError {
        uuid: CharacteristicUuid,
        capability: RequiredCapability,
        source: InteractionError,
    },
    #[error("session cancelled while {stage}")]
    Cancelled { stage: SessionState },
}

impl SessionFailure {
    /// Returns the failure classification.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NoDevicesFound => FailureKind::NoDevicesFound,
            Self::ScanFailed { .. } => FailureKind::ScanFailed,
            Self::ConnectionError { .. } => FailureKind::ConnectionError,
            Self::NoServicesAvailable { .. } | Self::ServiceEnumerationFailed { .. } => {
                FailureKind::NoServicesAvailable
            }
            Self::Resolve(ResolveError::NotFound { .. }) => FailureKind::CharacteristicNotFound,
            Self::Resolve(ResolveError::CapabilityMissing { .. }) => FailureKind::CapabilityMissing,
            Self::Decode(DecodeError::BadLength { .. }) => FailureKind::BadLength,
            Self::TransactionError { .. } => FailureKind::TransactionError,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// A successful session result.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SessionSuccess {
    Statistics(StatisticsReport),
    CommandSent(CommandReceipt),
    Inspected(GattReport),
    /// The selector declined to pick a device.
    NoOp,
}

/// The single terminal result of one session.
#[derive(Debug)]
pub enum SessionOutcome {
    Succeeded(SessionSuccess),
    Failed(SessionFailure),
}

impl SessionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded(_))
    }

    #[must_use]
    pub fn success(&self) -> Option<&SessionSuccess> {
        match self {
            Self::Succeeded(success) => Some(success),
            Self::Failed(_) => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            Self::Succeeded(_) => None,
            Self::Failed(failure) => Some(failure),
        }
    }

    fn terminal_state(&self) -> SessionState {
        if self.is_success() {
            SessionState::Succeeded
        } else {
            SessionState::Failed
        }
    }
}

impl From<Result<SessionSuccess, SessionFailure>> for SessionOutcome {
    fn from(result: Result<SessionSuccess, SessionFailure>) -> Self {
        match result {
            Ok(success) => Self::Succeeded(success),
            Err(failure) => Self::Failed(failure),
        }
    }
}

#[derive(Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum OutcomeRepr<'a> {
    Succeeded {
        result: &'a SessionSuccess,
    },
    Failed {
        kind: FailureKind,
        message: String,
    },
}

impl Serialize for SessionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Succeeded(result) => OutcomeRepr::Succeeded { result },
            Self::Failed(failure) => OutcomeRepr::Failed {
                kind: failure.kind(),
                message: error_chain(failure),
            },
        }
        .serialize(serializer)
    }
}

/// Ordered record of the states a session passed through.
#[derive(Debug)]
pub(crate) struct StateTrace {
    states: Vec<SessionState>,
}

impl StateTrace {
    fn new() -> Self {
        Self {
            states: vec![SessionState::Idle],
        }
    }

    fn enter(&mut self, next: SessionState) {
        let previous = self.current();
        debug!(from = %previous, to = %next, "session state transition");
        self.states.push(next);
    }

    fn current(&self) -> SessionState {
        self.states.last().copied().unwrap_or(SessionState::Idle)
    }

    pub(crate) fn states(&self) -> &[SessionState] {
        &self.states
    }
}

/// Releases the connection exactly once, spawning the release when dropped
/// without an explicit [`ConnectionGuard::release`].
struct ConnectionGuard {
    connection: Arc<dyn BleConnection>,
    released: bool,
}

impl ConnectionGuard {
    fn new(connection: Box<dyn BleConnection>) -> Self {
        Self {
            connection: Arc::from(connection),
            released: false,
        }
    }

    fn connection(&self) -> &dyn BleConnection {
        self.connection.as_ref()
    }

    async fn release(mut self) {
        self.released = true;
        close_connection(Arc::clone(&self.connection)).await;
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        let connection = Arc::clone(&self.connection);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(close_connection(connection));
            }
            Err(_error) => {
                warn!(
                    address = connection.device().address(),
                    "no async runtime available to release an abandoned BLE connection"
                );
            }
        }
    }
}

async fn close_connection(connection: Arc<dyn BleConnection>) {
    let address = connection.device().address().to_string();
    match connection.close().await {
        Ok(()) => debug!(%address, "released BLE connection"),
        Err(error) => warn!(%address, error = %error_chain(&error), "failed to close BLE connection cleanly"),
    }
}

async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    stage: SessionState,
    future: F,
) -> Result<F::Output, SessionFailure> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            info!(%stage, "session cancelled");
            Err(SessionFailure::Cancelled { stage })
        }
        output = future => Ok(output),
    }
}

/// Drives one scan → select → connect → transact → disconnect session.
pub struct SessionController {
    adapter: Box<dyn BleAdapter>,
    selector: Box<dyn DeviceSelector>,
    config: SessionConfig,
}

impl SessionController {
    #[must_use]
    pub fn new(
        adapter: Box<dyn BleAdapter>,
        selector: Box<dyn DeviceSelector>,
        config: SessionConfig,
    ) -> Self {
        Self {
            adapter,
            selector,
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs one session and returns its classified outcome.
    pub async fn run(
        &self,
        operation: &SessionOperation,
        cancel: &CancellationToken,
    ) -> SessionOutcome {
        self.run_traced(operation, cancel).await.0
    }

    /// Runs one session, also returning the states it passed through.
    pub(crate) async fn run_traced(
        &self,
        operation: &SessionOperation,
        cancel: &CancellationToken,
    ) -> (SessionOutcome, StateTrace) {
        let mut trace = StateTrace::new();
        let outcome = SessionOutcome::from(self.drive(operation, cancel, &mut trace).await);
        trace.enter(outcome.terminal_state());
        debug!(states = ?trace.states(), "session trace");
        match &outcome {
            SessionOutcome::Succeeded(_) => info!("session succeeded"),
            SessionOutcome::Failed(failure) => {
                warn!(kind = %failure.kind(), error = %error_chain(failure), "session failed");
            }
        }
        (outcome, trace)
    }

    /// Runs only the bounded discovery pass.
    ///
    /// # Errors
    ///
    /// Returns [`SessionFailure::ScanFailed`] when the adapter errors or
    /// overruns, or [`SessionFailure::Cancelled`] when cancelled.
    pub async fn discover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>, SessionFailure> {
        self.scan(cancel).await
    }

    async fn drive(
        &self,
        operation: &SessionOperation,
        cancel: &CancellationToken,
        trace: &mut StateTrace,
    ) -> Result<SessionSuccess, SessionFailure> {
        trace.enter(SessionState::Scanning);
        let devices = self.scan(cancel).await?;
        if devices.is_empty() {
            return Err(SessionFailure::NoDevicesFound);
        }

        trace.enter(SessionState::Selecting);
        let Some(address) =
            until_cancelled(cancel, SessionState::Selecting, self.selector.select(&devices)).await?
        else {
            info!("no device selected");
            return Ok(SessionSuccess::NoOp);
        };

        trace.enter(SessionState::Connecting);
        let guard = ConnectionGuard::new(self.connect(&address, cancel).await?);

        trace.enter(SessionState::Connected);
        let result = self
            .transact(guard.connection(), operation, cancel, trace)
            .await;

        trace.enter(SessionState::Disconnecting);
        guard.release().await;
        result
    }

    #[instrument(
        skip_all,
        level = "info",
        fields(scan_timeout = %humantime::format_duration(self.config.scan_timeout))
    )]
    async fn scan(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<DiscoveredDevice>, SessionFailure> {
        Span::current().pb_set_message("Scanning for BLE devices");
        let limit = self.config.scan_timeout + SCAN_GRACE;
        let scan = timeout(limit, self.adapter.scan(self.config.scan_timeout));

        match until_cancelled(cancel, SessionState::Scanning, scan).await? {
            Ok(Ok(devices)) => {
                info!(device_count = devices.len(), "scan complete");
                Ok(devices)
            }
            Ok(Err(source)) => Err(SessionFailure::ScanFailed { source }),
            Err(_elapsed) => Err(SessionFailure::ScanFailed {
                source: InteractionError::TimedOut {
                    operation: "scan",
                    timeout: limit,
                },
            }),
        }
    }

    #[instrument(skip(self, cancel), level = "info")]
    async fn connect(
        &self,
        address: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn BleConnection>, SessionFailure> {
        Span::current().pb_set_message(&format!("Connecting to {address}"));
        let limit = self.config.connect_timeout + CONNECT_GRACE;
        let connect = timeout(
            limit,
            self.adapter.connect(address, self.config.connect_timeout),
        );

        match until_cancelled(cancel, SessionState::Connecting, connect).await? {
            Ok(Ok(connection)) => {
                info!("connected");
                Ok(connection)
            }
            Ok(Err(source)) => Err(SessionFailure::ConnectionError {
                address: address.to_string(),
                source,
            }),
            Err(_elapsed) => Err(SessionFailure::ConnectionError {
                address: address.to_string(),
                source: InteractionError::TimedOut {
                    operation: "connect",
                    timeout: limit,
                },
            }),
        }
    }

    async fn transact(
        &self,
        connection: &dyn BleConnection,
        operation: &SessionOperation,
        cancel: &CancellationToken,
        trace: &mut StateTrace,
    ) -> Result<SessionSuccess, SessionFailure> {
        let services = self.enumerate_services(connection, cancel).await?;

        trace.enter(SessionState::Resolving);
        match operation {
            SessionOperation::Inspect => {
                let endpoints = endpoint_statuses(&services, |endpoint| {
                    self.config.endpoint_uuid(endpoint).clone()
                });
                Ok(SessionSuccess::Inspected(GattReport::new(
                    connection.device().clone(),
                    endpoints,
                    services,
                )))
            }
            SessionOperation::ReadStatistics { uuid } => {
                self.read_statistics(connection, &services, uuid, cancel, trace)
                    .await
            }
            SessionOperation::SendCommand { uuid, value } => {
                self.send_command(connection, &services, uuid, *value, cancel, trace)
                    .await
            }
        }
    }

    #[instrument(skip_all, level = "debug")]
    async fn enumerate_services(
        &self,
        connection: &dyn BleConnection,
        cancel: &CancellationToken,
    ) -> Result<Vec<ServiceInfo>, SessionFailure> {
        let address = connection.device().address();
        let services = until_cancelled(
            cancel,
            SessionState::Connected,
            connection.enumerate_services(),
        )
        .await?
        .map_err(|source| SessionFailure::ServiceEnumerationFailed {
            address: address.to_string(),
            source,
        })?;

        if services.is_empty() {
            return Err(SessionFailure::NoServicesAvailable {
                address: address.to_string(),
            });
        }
        debug!(service_count = services.len(), "enumerated GATT services");
        Ok(services)
    }

    #[instrument(skip_all, level = "info", fields(%uuid))]
    async fn read_statistics(
        &self,
        connection: &dyn BleConnection,
        services: &[ServiceInfo],
        uuid: &CharacteristicUuid,
        cancel: &CancellationToken,
        trace: &mut StateTrace,
    ) -> Result<SessionSuccess, SessionFailure> {
        let characteristic = resolve_characteristic(services, uuid, RequiredCapability::Read)?;

        trace.enter(SessionState::Transacting);
        Span::current().pb_set_message("Reading statistics");
        let payload = until_cancelled(
            cancel,
            SessionState::Transacting,
            connection.read_characteristic(characteristic),
        )
        .await?
        .map_err(|source| SessionFailure::TransactionError {
            uuid: uuid.clone(),
            capability: RequiredCapability::Read,
            source,
        })?;
        debug!(payload = %hex::encode(&payload), "read statistics payload");

        let record = StatisticsHandler::decode(&payload)?;
        info!(count = record.count, state = record.state, "decoded statistics");
        Ok(SessionSuccess::Statistics(StatisticsReport::new(
            connection.device().clone(),
            uuid.clone(),
            record,
            payload,
        )))
    }

    #[instrument(skip_all, level = "info", fields(%uuid, value = value))]
    async fn send_command(
        &self,
        connection: &dyn BleConnection,
        services: &[ServiceInfo],
        uuid: &CharacteristicUuid,
        value: u8,
        cancel: &CancellationToken,
        trace: &mut StateTrace,
    ) -> Result<SessionSuccess, SessionFailure> {
        let characteristic = resolve_characteristic(services, uuid, RequiredCapability::Write)?;
        let mode = preferred_write_mode(characteristic);

        trace.enter(SessionState::Transacting);
        Span::current().pb_set_message("Sending command");
        let payload = CommandHandler::encode(value);
        until_cancelled(
            cancel,
            SessionState::Transacting,
            connection.write_characteristic(characteristic, &payload, mode),
        )
        .await?
        .map_err(|source| SessionFailure::TransactionError {
            uuid: uuid.clone(),
            capability: RequiredCapability::Write,
            source,
        })?;

        info!(%mode, "command written");
        Ok(SessionSuccess::CommandSent(CommandReceipt::new(
            connection.device().clone(),
            uuid.clone(),
            value,
            mode,
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;
    use crate::hw::model::CharacteristicInfo;
    use crate::hw::selector::{AddressSelector, FirstDeviceSelector};
    use crate::hw::WriteMode;

    const SCENARIO_A: [u8; 9] = [0x00, 0x05, 0x1E, 0x0A, 0x0D, 0x14, 0x03, 0x06, 0x19];

    #[derive(Debug, Default)]
    struct Calls {
        connects: AtomicUsize,
        reads: AtomicUsize,
        closes: AtomicUsize,
        abandoned_connects: AtomicUsize,
        writes: Mutex<Vec<(Vec<u8>, WriteMode)>>,
    }

    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    enum Stall {
        None,
        Scan,
        Connect,
        SlowConnect,
        Read,
    }

    #[derive(Debug, Clone)]
    struct MockAdapter {
        devices: Vec<DiscoveredDevice>,
        services: Vec<ServiceInfo>,
        read_result: Result<Vec<u8>, ()>,
        write_fails: bool,
        stall: Stall,
        calls: Arc<Calls>,
    }

    impl MockAdapter {
        fn new(calls: &Arc<Calls>) -> Self {
            Self {
                devices: vec![device()],
                services: vec![service("read", "write")],
                read_result: Ok(SCENARIO_A.to_vec()),
                write_fails: false,
                stall: Stall::None,
                calls: Arc::clone(calls),
            }
        }
    }

    #[async_trait]
    impl BleAdapter for MockAdapter {
        async fn scan(
            &self,
            _scan_timeout: Duration,
        ) -> Result<Vec<DiscoveredDevice>, InteractionError> {
            if self.stall == Stall::Scan {
                std::future::pending::<()>().await;
            }
            Ok(self.devices.clone())
        }

        async fn connect(
            &self,
            address: &str,
            connect_timeout: Duration,
        ) -> Result<Box<dyn BleConnection>, InteractionError> {
            self.calls.connects.fetch_add(1, Ordering::SeqCst);
            match self.stall {
                Stall::Connect => std::future::pending::<()>().await,
                Stall::SlowConnect => {
                    tokio::time::sleep(connect_timeout).await;
                    // Abandoning the half-open link takes a moment of its own.
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    self.calls.abandoned_connects.fetch_add(1, Ordering::SeqCst);
                    return Err(InteractionError::TimedOut {
                        operation: "connect",
                        timeout: connect_timeout,
                    });
                }
                Stall::None | Stall::Scan | Stall::Read => {}
            }
            let device = self
                .devices
                .iter()
                .find(|device| device.address() == address)
                .cloned()
                .ok_or_else(|| InteractionError::UnknownDevice {
                    address: address.to_string(),
                })?;
            Ok(Box::new(MockConnection {
                device,
                adapter: self.clone(),
            }))
        }
    }

    struct MockConnection {
        device: DiscoveredDevice,
        adapter: MockAdapter,
    }

    #[async_trait]
    impl BleConnection for MockConnection {
        fn device(&self) -> &DiscoveredDevice {
            &self.device
        }

        async fn enumerate_services(&self) -> Result<Vec<ServiceInfo>, InteractionError> {
            Ok(self.adapter.services.clone())
        }

        async fn read_characteristic(
            &self,
            characteristic: &CharacteristicInfo,
        ) -> Result<Vec<u8>, InteractionError> {
            self.adapter.calls.reads.fetch_add(1, Ordering::SeqCst);
            if self.adapter.stall == Stall::Read {
                std::future::pending::<()>().await;
            }
            self.adapter
                .read_result
                .clone()
                .map_err(|()| InteractionError::CharacteristicUnavailable {
                    uuid: characteristic.uuid().to_string(),
                })
        }

        async fn write_characteristic(
            &self,
            characteristic: &CharacteristicInfo,
            payload: &[u8],
            mode: WriteMode,
        ) -> Result<(), InteractionError> {
            self.adapter
                .calls
                .writes
                .lock()
                .expect("writes lock should not be poisoned")
                .push((payload.to_vec(), mode));
            if self.adapter.write_fails {
                return Err(InteractionError::CharacteristicUnavailable {
                    uuid: characteristic.uuid().to_string(),
                });
            }
            Ok(())
        }

        async fn close(&self) -> Result<(), InteractionError> {
            self.adapter.calls.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn device() -> DiscoveredDevice {
        DiscoveredDevice::new(
            "hci0".to_string(),
            "AA:BB:CC:DD:EE:FF".to_string(),
            Some("Machhar".to_string()),
            Some(-51),
        )
    }

    fn service(statistics_properties: &str, command_properties: &str) -> ServiceInfo {
        ServiceInfo::new(
            "00004000-1212-efde-1523-785feabcd123".to_string(),
            true,
            vec![
                CharacteristicInfo::new(
                    CharacteristicUuid::statistics().to_string(),
                    statistics_properties.parse().expect("properties should parse"),
                ),
                CharacteristicInfo::new(
                    CharacteristicUuid::command().to_string(),
                    command_properties.parse().expect("properties should parse"),
                ),
            ],
        )
    }

    fn controller(adapter: MockAdapter) -> SessionController {
        SessionController::new(
            Box::new(adapter),
            Box::new(FirstDeviceSelector),
            SessionConfig::default(),
        )
    }

    fn closes(calls: &Calls) -> usize {
        calls.closes.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn read_walks_every_state_and_decodes() {
        let calls = Arc::new(Calls::default());
        let controller = controller(MockAdapter::new(&calls));

        let (outcome, trace) = controller
            .run_traced(
                &controller.config().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let report = assert_matches!(
            outcome,
            SessionOutcome::Succeeded(SessionSuccess::Statistics(report)) => report
        );
        assert_eq!(5, report.record().count);
        assert_eq!(SCENARIO_A.as_slice(), report.raw());
        assert_eq!(
            vec![
                SessionState::Idle,
                SessionState::Scanning,
                SessionState::Selecting,
                SessionState::Connecting,
                SessionState::Connected,
                SessionState::Resolving,
                SessionState::Transacting,
                SessionState::Disconnecting,
                SessionState::Succeeded,
            ],
            trace.states()
        );
        assert_eq!(1, closes(&calls));
    }

    #[tokio::test]
    async fn empty_scan_fails_without_connecting() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            devices: Vec::new(),
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(
                &SessionConfig::default().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        assert_matches!(outcome, SessionOutcome::Failed(SessionFailure::NoDevicesFound));
        assert_eq!(0, calls.connects.load(Ordering::SeqCst));
        assert_eq!(0, closes(&calls));
    }

    #[tokio::test]
    async fn missing_read_property_fails_and_closes_once() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            services: vec![service("write", "write")],
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(
                &SessionConfig::default().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(FailureKind::CapabilityMissing, failure.kind());
        assert_eq!(0, calls.reads.load(Ordering::SeqCst));
        assert_eq!(1, closes(&calls));
    }

    #[rstest]
    #[case::short_payload(Ok(vec![0x00, 0x05]), FailureKind::BadLength)]
    #[case::read_error(Err(()), FailureKind::TransactionError)]
    #[tokio::test]
    async fn failed_read_still_closes_once(
        #[case] read_result: Result<Vec<u8>, ()>,
        #[case] expected: FailureKind,
    ) {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            read_result,
            ..MockAdapter::new(&calls)
        };

        let (outcome, trace) = controller(adapter)
            .run_traced(
                &SessionConfig::default().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(expected, failure.kind());
        assert_eq!(1, closes(&calls));
        assert_eq!(
            Some(&SessionState::Disconnecting),
            trace.states().iter().rev().nth(1)
        );
    }

    #[tokio::test]
    async fn unknown_characteristic_is_not_found() {
        let calls = Arc::new(Calls::default());
        let config = SessionConfig::builder()
            .statistics_uuid(
                "abcdef01-1234-5678-1234-1234567890ab"
                    .parse()
                    .expect("uuid should parse"),
            )
            .build();
        let controller = SessionController::new(
            Box::new(MockAdapter::new(&calls)),
            Box::new(FirstDeviceSelector),
            config,
        );

        let outcome = controller
            .run(
                &controller.config().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(FailureKind::CharacteristicNotFound, failure.kind());
        assert_eq!(1, closes(&calls));
    }

    #[tokio::test]
    async fn empty_service_tree_is_reported() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            services: Vec::new(),
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(&SessionOperation::Inspect, &CancellationToken::new())
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(FailureKind::NoServicesAvailable, failure.kind());
        assert_eq!(1, closes(&calls));
    }

    #[tokio::test]
    async fn declined_selection_is_a_no_op() {
        let calls = Arc::new(Calls::default());
        let controller = SessionController::new(
            Box::new(MockAdapter::new(&calls)),
            Box::new(AddressSelector::new("11:22:33:44:55:66")),
            SessionConfig::default(),
        );

        let (outcome, trace) = controller
            .run_traced(
                &controller.config().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        assert_matches!(outcome, SessionOutcome::Succeeded(SessionSuccess::NoOp));
        assert_eq!(Some(&SessionState::Succeeded), trace.states().last());
        assert_eq!(0, calls.connects.load(Ordering::SeqCst));
    }

    #[rstest]
    #[case::acknowledged("write,write_without_response", WriteMode::WithResponse)]
    #[case::command_only("write_without_response", WriteMode::WithoutResponse)]
    #[tokio::test]
    async fn command_write_uses_preferred_mode(
        #[case] properties: &str,
        #[case] expected: WriteMode,
    ) {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            services: vec![service("read", properties)],
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(
                &SessionConfig::default().send_command(1),
                &CancellationToken::new(),
            )
            .await;

        let receipt = assert_matches!(
            outcome,
            SessionOutcome::Succeeded(SessionSuccess::CommandSent(receipt)) => receipt
        );
        assert_eq!(expected, receipt.write_mode());
        let writes = calls
            .writes
            .lock()
            .expect("writes lock should not be poisoned")
            .clone();
        assert_eq!(vec![(vec![0x01], expected)], writes);
        assert_eq!(1, closes(&calls));
    }

    #[tokio::test]
    async fn failed_write_still_closes_once() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            write_fails: true,
            ..MockAdapter::new(&calls)
        };

        let (outcome, trace) = controller(adapter)
            .run_traced(
                &SessionConfig::default().send_command(1),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(FailureKind::TransactionError, failure.kind());
        assert_matches!(
            failure,
            SessionFailure::TransactionError {
                capability: RequiredCapability::Write,
                ..
            }
        );
        assert_eq!(
            1,
            calls
                .writes
                .lock()
                .expect("writes lock should not be poisoned")
                .len()
        );
        assert_eq!(1, closes(&calls));
        assert_eq!(
            Some(&SessionState::Disconnecting),
            trace.states().iter().rev().nth(1)
        );
    }

    #[tokio::test]
    async fn inspect_reports_endpoint_presence() {
        let calls = Arc::new(Calls::default());
        let outcome = controller(MockAdapter::new(&calls))
            .run(&SessionOperation::Inspect, &CancellationToken::new())
            .await;

        let report = assert_matches!(
            outcome,
            SessionOutcome::Succeeded(SessionSuccess::Inspected(report)) => report
        );
        assert!(report.endpoints().iter().all(|status| status.is_present()));
        assert_eq!(0, calls.reads.load(Ordering::SeqCst));
        assert_eq!(1, closes(&calls));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_scan_times_out_after_grace() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            stall: Stall::Scan,
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(
                &SessionConfig::default().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(FailureKind::ScanFailed, failure.kind());
        assert_eq!(0, calls.connects.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_connect_is_a_connection_error() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            stall: Stall::Connect,
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(
                &SessionConfig::default().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_eq!(FailureKind::ConnectionError, failure.kind());
        assert_eq!(0, closes(&calls));
    }

    #[tokio::test(start_paused = true)]
    async fn adapter_connect_timeout_finishes_its_cleanup() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            stall: Stall::SlowConnect,
            ..MockAdapter::new(&calls)
        };

        let outcome = controller(adapter)
            .run(
                &SessionConfig::default().read_statistics(),
                &CancellationToken::new(),
            )
            .await;

        let failure = assert_matches!(outcome, SessionOutcome::Failed(failure) => failure);
        assert_matches!(
            failure,
            SessionFailure::ConnectionError {
                source: InteractionError::TimedOut { timeout: elapsed, .. },
                ..
            } if elapsed == DEFAULT_CONNECT_TIMEOUT
        );
        assert_eq!(1, calls.abandoned_connects.load(Ordering::SeqCst));
        assert_eq!(0, closes(&calls));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_read_still_closes() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            stall: Stall::Read,
            ..MockAdapter::new(&calls)
        };
        let controller = controller(adapter);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let outcome = controller
            .run(&SessionConfig::default().read_statistics(), &cancel)
            .await;

        assert_matches!(
            outcome,
            SessionOutcome::Failed(SessionFailure::Cancelled {
                stage: SessionState::Transacting
            })
        );
        assert_eq!(1, closes(&calls));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_session_releases_connection() {
        let calls = Arc::new(Calls::default());
        let adapter = MockAdapter {
            stall: Stall::Read,
            ..MockAdapter::new(&calls)
        };
        let controller = controller(adapter);
        let operation = SessionConfig::default().read_statistics();
        let cancel = CancellationToken::new();

        let result = timeout(Duration::from_secs(1), controller.run(&operation, &cancel)).await;
        assert!(result.is_err());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(1, closes(&calls));
    }

    #[test]
    fn failure_outcome_serialises_kind_and_message() {
        let outcome = SessionOutcome::Failed(SessionFailure::ConnectionError {
            address: "AA:BB".to_string(),
            source: InteractionError::UnknownDevice {
                address: "AA:BB".to_string(),
            },
        });

        let json = serde_json::to_value(&outcome).expect("outcome should serialise");
        assert_eq!(
            serde_json::json!({
                "status": "failed",
                "kind": "connection_error",
                "message": "failed to connect to `AA:BB`: device `AA:BB` was not seen during the last scan",
            }),
            json
        );
    }
}
