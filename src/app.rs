use std::io;
use std::process::ExitCode;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cli::{Command, FakeArgs, LogLevel, OutputFormat, RunSettings};
use crate::hw::{
    BleAdapter, SessionController, SessionOperation, fake_adapter as build_fake_adapter,
    real_adapter as build_real_adapter,
};
use crate::telemetry;
use crate::terminal::{SystemTerminalClient, TerminalClient};

/// Creates an adapter backed by the platform BLE stack.
#[must_use]
pub fn real_adapter() -> Box<dyn BleAdapter> {
    build_real_adapter()
}

/// Creates an adapter backed by fake BLE fixtures.
#[must_use]
pub fn fake_adapter(fake_args: FakeArgs) -> Box<dyn BleAdapter> {
    build_fake_adapter(fake_args.into_backend_config())
}

/// How a CLI run ended.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RunStatus {
    /// The command succeeded or the operator declined to select a device.
    Completed,
    /// The session ended in a classified failure, already reported on output.
    Failed,
}

impl RunStatus {
    #[must_use]
    pub fn exit_code(self) -> ExitCode {
        match self {
            Self::Completed => ExitCode::SUCCESS,
            Self::Failed => ExitCode::from(1),
        }
    }
}

/// Runs one CLI command against the given adapter.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// let args = spraystat::Args::try_parse_from([
///     "spraystat",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:BB:CC:DD:EE:FF|Machhar|-43",
///     "--first",
///     "read",
/// ])?;
/// let (settings, maybe_fake_args) = args.into_settings_and_fake_args()?;
/// let adapter = match maybe_fake_args {
///     Some(fake_args) => spraystat::fake_adapter(fake_args),
///     None => spraystat::real_adapter(),
/// };
/// let mut out = Vec::new();
/// let status = spraystat::run(settings, &mut out, adapter).await?;
/// assert_eq!(spraystat::RunStatus::Completed, status);
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation or output writing fails.
/// Session failures are reported on `out` and surface as
/// [`RunStatus::Failed`].
pub async fn run<W>(settings: RunSettings, out: &mut W, adapter: Box<dyn BleAdapter>) -> Result<RunStatus>
where
    W: io::Write,
{
    run_with_clients(settings, out, &SystemTerminalClient, adapter).await
}

/// Runs one CLI command with an injected terminal client.
///
/// ```
/// # async fn run() -> anyhow::Result<()> {
/// use clap::Parser;
///
/// struct FakeTerminal;
/// impl spraystat::TerminalClient for FakeTerminal {
///     fn stdout_is_terminal(&self) -> bool { false }
///     fn stderr_is_terminal(&self) -> bool { false }
/// }
///
/// let args = spraystat::Args::try_parse_from([
///     "spraystat",
///     "--fake",
///     "--fake-scan",
///     "hci0|AA:BB:CC:DD:EE:FF|Machhar|-43",
///     "scan",
/// ])?;
/// let (settings, maybe_fake_args) = args.into_settings_and_fake_args()?;
/// let adapter = match maybe_fake_args {
///     Some(fake_args) => spraystat::fake_adapter(fake_args),
///     None => spraystat::real_adapter(),
/// };
/// let mut out = Vec::new();
/// spraystat::run_with_clients(settings, &mut out, &FakeTerminal, adapter).await?;
/// assert!(String::from_utf8(out)?.contains("\"devices\""));
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns an error if tracing initialisation or output writing fails.
#[instrument(
    skip_all,
    level = "debug",
    fields(command = settings.command().name(), log_level = ?settings.log_level())
)]
pub async fn run_with_clients<W>(
    settings: RunSettings,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    adapter: Box<dyn BleAdapter>,
) -> Result<RunStatus>
where
    W: io::Write,
{
    telemetry::initialise_tracing(
        "spraystat",
        terminal_client.stderr_is_terminal(),
        settings.log_level().map(LogLevel::as_level_filter),
    )?;

    let output_format = settings.output_format().unwrap_or(if terminal_client.stdout_is_terminal() {
        OutputFormat::Pretty
    } else {
        OutputFormat::Json
    });
    let (command, session_config, selection) = settings.into_parts();
    let controller = SessionController::new(adapter, selection.into_selector(), session_config);

    let cancel = CancellationToken::new();
    let interrupt = spawn_interrupt_handler(cancel.clone());

    let operation = match command {
        Command::Scan => None,
        Command::Inspect => Some(SessionOperation::Inspect),
        Command::Read => Some(controller.config().read_statistics()),
        Command::Spray(args) => Some(controller.config().send_command(args.value())),
    };
    let result = match operation {
        None => {
            crate::cli::scan::run(&controller, &cancel, out, terminal_client, output_format).await
        }
        Some(operation) => {
            crate::cli::session::run(
                &controller,
                &operation,
                &cancel,
                out,
                terminal_client,
                output_format,
            )
            .await
        }
    };

    interrupt.abort();
    result
}

fn spawn_interrupt_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, cancelling session");
                cancel.cancel();
            }
            Err(error) => debug!(?error, "failed to listen for interrupts"),
        }
    })
}
