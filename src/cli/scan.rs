use std::io;

use anyhow::Result;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::app::RunStatus;
use crate::cli::OutputFormat;
use crate::hw::{DiscoveredDevice, SessionController, SessionOutcome};
use crate::terminal::TerminalClient;

use super::session::write_outcome;
use super::ui::{DeviceListView, Painter};

#[derive(Debug, Serialize)]
struct ScanReport<'a> {
    devices: &'a [DiscoveredDevice],
}

/// Executes the `scan` command.
#[instrument(skip_all, level = "debug", fields(?output_format))]
pub(crate) async fn run<W>(
    controller: &SessionController,
    cancel: &CancellationToken,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<RunStatus>
where
    W: io::Write,
{
    let devices = match controller.discover(cancel).await {
        Ok(devices) => devices,
        Err(failure) => {
            return write_outcome(
                out,
                &SessionOutcome::Failed(failure),
                terminal_client,
                output_format,
            );
        }
    };

    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", DeviceListView::new(&devices, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, &ScanReport { devices: &devices })?;
            writeln!(out)?;
        }
    }

    Ok(RunStatus::Completed)
}
