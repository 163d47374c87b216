use std::io;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::app::RunStatus;
use crate::cli::OutputFormat;
use crate::hw::{SessionController, SessionOperation, SessionOutcome};
use crate::terminal::TerminalClient;

use super::ui::{OutcomeView, Painter};

/// Executes `inspect`, `read` or `spray` as one session.
#[instrument(skip_all, level = "debug", fields(?operation, ?output_format))]
pub(crate) async fn run<W>(
    controller: &SessionController,
    operation: &SessionOperation,
    cancel: &CancellationToken,
    out: &mut W,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<RunStatus>
where
    W: io::Write,
{
    let outcome = controller.run(operation, cancel).await;
    write_outcome(out, &outcome, terminal_client, output_format)
}

/// Writes an outcome and maps it to a run status.
pub(crate) fn write_outcome<W>(
    out: &mut W,
    outcome: &SessionOutcome,
    terminal_client: &dyn TerminalClient,
    output_format: OutputFormat,
) -> Result<RunStatus>
where
    W: io::Write,
{
    match output_format {
        OutputFormat::Pretty => {
            let painter = Painter::new(terminal_client.stdout_is_terminal());
            writeln!(out, "{}", OutcomeView::new(outcome, &painter))?;
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, outcome)?;
            writeln!(out)?;
        }
    }

    Ok(if outcome.is_success() {
        RunStatus::Completed
    } else {
        RunStatus::Failed
    })
}
