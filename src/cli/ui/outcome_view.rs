use std::fmt::{self, Display, Formatter};

use crate::hw::{SessionOutcome, SessionSuccess};
use crate::utils::error_chain;

use super::gatt_view::GattReportView;
use super::painter::Painter;
use super::statistics_view::{CommandReceiptView, StatisticsReportView};
use super::table::Table;

/// Renders any session outcome.
pub(crate) struct OutcomeView<'a> {
    outcome: &'a SessionOutcome,
    painter: &'a Painter,
}

impl<'a> OutcomeView<'a> {
    pub(crate) fn new(outcome: &'a SessionOutcome, painter: &'a Painter) -> Self {
        Self { outcome, painter }
    }
}

impl Display for OutcomeView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.outcome {
            SessionOutcome::Succeeded(SessionSuccess::Statistics(report)) => {
                write!(f, "{}", StatisticsReportView::new(report, self.painter))
            }
            SessionOutcome::Succeeded(SessionSuccess::CommandSent(receipt)) => {
                write!(f, "{}", CommandReceiptView::new(receipt, self.painter))
            }
            SessionOutcome::Succeeded(SessionSuccess::Inspected(report)) => {
                write!(f, "{}", GattReportView::new(report, self.painter))
            }
            SessionOutcome::Succeeded(SessionSuccess::NoOp) => write!(
                f,
                "{}",
                self.painter.muted("No device selected; nothing was done.")
            ),
            SessionOutcome::Failed(failure) => {
                let table = Table::key_value(
                    self.painter,
                    [
                        ("kind", self.painter.value(failure.kind().to_string())),
                        ("error", self.painter.value(error_chain(failure))),
                    ],
                );
                write!(f, "{}", self.painter.failure("Session failed:"))?;
                write!(f, "\n{table}")
            }
        }
    }
}
