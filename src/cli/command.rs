use std::time::Duration;

use bon::Builder;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::level_filters::LevelFilter;

use crate::error::{ConfigError, FixtureError};
use crate::handlers::SPRAY_COMMAND;
use crate::hw::{
    AddressSelector, DeviceSelector, FakeBackendConfig, FakeFailureStage, FirstDeviceSelector,
    GattFixture, HexPayload, PreferredNameSelector, PromptSelector, ScanFixture, SessionConfig,
};
use crate::protocol::CharacteristicUuid;

/// Command-line options for the spray dispenser statistics tool.
#[derive(Debug, Parser)]
#[command(
    name = "spraystat",
    about = "Read usage statistics from a BLE spray dispenser and trigger test sprays."
)]
pub struct Args {
    /// Log verbosity for this tool; `RUST_LOG` applies when omitted.
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,
    /// Output format; pretty on a terminal, JSON otherwise.
    #[arg(long, global = true, value_enum)]
    output: Option<OutputFormat>,
    /// Discovery window (e.g. `5s`, `1500ms`).
    #[arg(long, global = true, value_parser = parse_duration)]
    scan_timeout: Option<Duration>,
    /// Link establishment bound (e.g. `10s`).
    #[arg(long, global = true, value_parser = parse_duration)]
    connect_timeout: Option<Duration>,
    /// Auto-select the first device advertising exactly this name.
    #[arg(long, global = true, conflicts_with = "address")]
    name: Option<String>,
    /// Select the device with this address.
    #[arg(long, global = true, conflicts_with = "first")]
    address: Option<String>,
    /// Select the first discovered device instead of prompting.
    #[arg(long, global = true)]
    first: bool,
    /// Statistics characteristic UUID override.
    #[arg(long, global = true)]
    statistics_uuid: Option<CharacteristicUuid>,
    /// Command characteristic UUID override.
    #[arg(long, global = true)]
    command_uuid: Option<CharacteristicUuid>,
    /// Uses the fake BLE backend with fixture-driven discovery and payloads.
    #[arg(long, global = true)]
    fake: bool,
    /// Fake scan fixtures in the form `adapter|address|local_name|rssi;...`.
    #[arg(long, global = true, requires = "fake", required_if_eq("fake", "true"))]
    fake_scan: Option<ScanFixture>,
    /// Fake statistics payload as hexadecimal bytes.
    #[arg(long, global = true, requires = "fake")]
    fake_read: Option<HexPayload>,
    /// Fake GATT tree in the form `service|characteristic|prop,prop;...`.
    #[arg(long, global = true, requires = "fake")]
    fake_gatt: Option<GattFixture>,
    /// Injects a fake backend failure at one stage.
    #[arg(long, global = true, requires = "fake", value_enum)]
    fake_fail: Option<FakeFailureStage>,
    /// Artificial fake scan delay (e.g. `250ms`, `2s`).
    #[arg(long, global = true, requires = "fake", value_parser = parse_duration)]
    fake_discovery_delay: Option<Duration>,
    #[command(subcommand)]
    command: Command,
}

impl Args {
    /// Splits parsed arguments into run settings and optional fake-backend settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingFakeScanFixture`] when fake mode is
    /// enabled without a scan fixture.
    pub fn into_settings_and_fake_args(
        self,
    ) -> Result<(RunSettings, Option<FakeArgs>), ConfigError> {
        let Args {
            log_level,
            output,
            scan_timeout,
            connect_timeout,
            name,
            address,
            first,
            statistics_uuid,
            command_uuid,
            fake,
            fake_scan,
            fake_read,
            fake_gatt,
            fake_fail,
            fake_discovery_delay,
            command,
        } = self;

        let fake_args = if fake {
            let Some(scan_fixture) = fake_scan else {
                return Err(ConfigError::MissingFakeScanFixture);
            };
            Some(FakeArgs {
                scan_fixture,
                statistics_payload: fake_read,
                gatt: fake_gatt,
                failure: fake_fail,
                discovery_delay: fake_discovery_delay.unwrap_or(Duration::ZERO),
            })
        } else {
            None
        };

        let selection = match (address, name) {
            (Some(address), _) => Selection::Address(address),
            (None, Some(name)) => Selection::PreferredName {
                name,
                fallback_first: first,
            },
            (None, None) if first => Selection::First,
            (None, None) => Selection::Prompt,
        };

        let session = SessionConfig::builder()
            .maybe_scan_timeout(scan_timeout)
            .maybe_connect_timeout(connect_timeout)
            .maybe_statistics_uuid(statistics_uuid)
            .maybe_command_uuid(command_uuid)
            .build();

        let settings = RunSettings::builder()
            .command(command)
            .session(session)
            .selection(selection)
            .maybe_output_format(output)
            .maybe_log_level(log_level)
            .build();

        Ok((settings, fake_args))
    }
}

/// Everything one CLI run needs apart from the BLE adapter.
#[derive(Debug, Builder)]
pub struct RunSettings {
    command: Command,
    #[builder(default)]
    session: SessionConfig,
    #[builder(default = Selection::Prompt)]
    selection: Selection,
    output_format: Option<OutputFormat>,
    log_level: Option<LogLevel>,
}

impl RunSettings {
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    #[must_use]
    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    #[must_use]
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    #[must_use]
    pub fn output_format(&self) -> Option<OutputFormat> {
        self.output_format
    }

    #[must_use]
    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    pub(crate) fn into_parts(self) -> (Command, SessionConfig, Selection) {
        (self.command, self.session, self.selection)
    }
}

/// How the device to connect to is chosen from a scan.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Selection {
    /// The device with this address.
    Address(String),
    /// The first device advertising this exact name, otherwise the first
    /// device or an interactive prompt.
    PreferredName { name: String, fallback_first: bool },
    /// The first device discovered.
    First,
    /// Ask on the terminal.
    Prompt,
}

impl Selection {
    pub(crate) fn into_selector(self) -> Box<dyn DeviceSelector> {
        match self {
            Self::Address(address) => Box::new(AddressSelector::new(address)),
            Self::PreferredName {
                name,
                fallback_first,
            } => {
                let fallback: Box<dyn DeviceSelector> = if fallback_first {
                    Box::new(FirstDeviceSelector)
                } else {
                    Box::new(PromptSelector::stdio())
                };
                Box::new(PreferredNameSelector::new(name, fallback))
            }
            Self::First => Box::new(FirstDeviceSelector),
            Self::Prompt => Box::new(PromptSelector::stdio()),
        }
    }
}

/// Fake backend arguments for programmatic runs.
#[derive(Debug, Builder)]
pub struct FakeArgs {
    #[builder(with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    scan_fixture: ScanFixture,
    #[builder(with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    statistics_payload: Option<HexPayload>,
    #[builder(with = |value: &str| -> Result<_, FixtureError> { value.parse() })]
    gatt: Option<GattFixture>,
    failure: Option<FakeFailureStage>,
    #[builder(default)]
    discovery_delay: Duration,
}

impl FakeArgs {
    pub(crate) fn into_backend_config(self) -> FakeBackendConfig {
        let Self {
            scan_fixture,
            statistics_payload,
            gatt,
            failure,
            discovery_delay,
        } = self;

        FakeBackendConfig::builder()
            .scan_fixture(scan_fixture)
            .maybe_statistics_payload(statistics_payload)
            .maybe_gatt(gatt)
            .maybe_failure(failure)
            .discovery_delay(discovery_delay)
            .build()
    }
}

/// Supported CLI commands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Scan once and list every device seen.
    Scan,
    /// Connect to a device and print its GATT tree and endpoint presence.
    Inspect,
    /// Connect to a device, read its statistics characteristic and decode it.
    Read,
    /// Connect to a device and write the spray command.
    Spray(SprayArgs),
}

impl Command {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Inspect => "inspect",
            Self::Read => "read",
            Self::Spray(_args) => "spray",
        }
    }
}

/// Options for the `spray` command.
#[derive(Debug, Clone, Copy, Eq, PartialEq, clap::Args)]
pub struct SprayArgs {
    /// Command byte to write.
    #[arg(long, default_value_t = SPRAY_COMMAND)]
    value: u8,
}

impl SprayArgs {
    #[must_use]
    pub fn new(value: u8) -> Self {
        Self { value }
    }

    #[must_use]
    pub fn value(self) -> u8 {
        self.value
    }
}

/// Output rendering for command results.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    /// Styled tables.
    Pretty,
    /// Pretty-printed JSON.
    Json,
}

/// Log verbosity accepted by `--log-level`.
#[derive(Debug, Clone, Copy, Eq, PartialEq, ValueEnum)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub(crate) fn as_level_filter(self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::TRACE,
        }
    }
}

fn parse_duration(value: &str) -> Result<Duration, String> {
    humantime::parse_duration(value).map_err(|error| error.to_string())
}
