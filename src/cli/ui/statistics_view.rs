use std::fmt::{self, Display, Formatter};

use crate::hw::{CommandReceipt, StatisticsReport};
use crate::utils::format_hex;

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

/// Renders a decoded statistics read.
pub(crate) struct StatisticsReportView<'a> {
    report: &'a StatisticsReport,
    painter: &'a Painter,
}

impl<'a> StatisticsReportView<'a> {
    pub(crate) fn new(report: &'a StatisticsReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }

    fn timestamp(&self) -> String {
        let timestamp = self.report.record().timestamp;
        if timestamp.to_datetime().is_some() {
            self.painter.value(timestamp.to_string())
        } else {
            self.painter.warning(format!("{timestamp} (not a valid date)"))
        }
    }
}

impl Display for StatisticsReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let record = self.report.record();
        let table = Table::key_value(
            self.painter,
            [
                (
                    "characteristic",
                    self.painter
                        .muted(self.report.characteristic_uuid().as_str()),
                ),
                ("count", self.painter.value(record.count.to_string())),
                ("state", self.painter.value(record.state.to_string())),
                ("timestamp", self.timestamp()),
                (
                    "weekday",
                    self.painter.value(record.timestamp.weekday.to_string()),
                ),
                ("raw", self.painter.muted(format_hex(self.report.raw()))),
            ],
        );

        write!(f, "{}", self.painter.heading("Connected device:"))?;
        write!(f, "\n{}", DeviceView::new(self.report.device(), self.painter))?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Statistics:"))?;
        write!(f, "\n{table}")
    }
}

/// Renders the acknowledgement of a command write.
pub(crate) struct CommandReceiptView<'a> {
    receipt: &'a CommandReceipt,
    painter: &'a Painter,
}

impl<'a> CommandReceiptView<'a> {
    pub(crate) fn new(receipt: &'a CommandReceipt, painter: &'a Painter) -> Self {
        Self { receipt, painter }
    }
}

impl Display for CommandReceiptView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            [
                ("address", self.painter.value(self.receipt.device().address())),
                (
                    "characteristic",
                    self.painter
                        .muted(self.receipt.characteristic_uuid().as_str()),
                ),
                ("value", self.painter.value(self.receipt.value().to_string())),
                (
                    "write_mode",
                    self.painter.value(self.receipt.write_mode().to_string()),
                ),
            ],
        );
        write!(f, "{}", self.painter.success("Command sent."))?;
        write!(f, "\n{table}")
    }
}
