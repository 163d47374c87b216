use std::fmt::{self, Display, Formatter};

use crate::hw::GattReport;
use crate::protocol;

use super::device_view::DeviceView;
use super::painter::Painter;
use super::table::Table;

/// Renders an inspect report: device, known endpoints and the service tree.
pub(crate) struct GattReportView<'a> {
    report: &'a GattReport,
    painter: &'a Painter,
}

impl<'a> GattReportView<'a> {
    pub(crate) fn new(report: &'a GattReport, painter: &'a Painter) -> Self {
        Self { report, painter }
    }

    fn endpoints_table(&self) -> Table {
        let rows = self
            .report
            .endpoints()
            .iter()
            .map(|status| {
                let metadata = protocol::endpoint_metadata(status.endpoint());
                vec![
                    self.painter.value(metadata.name()),
                    self.painter.value(status.uuid().as_str()),
                    self.painter.presence(status.is_present()),
                    status.properties().map_or_else(
                        || self.painter.muted("-"),
                        |properties| self.painter.value(properties.to_string()),
                    ),
                ]
            })
            .collect();
        Table::grid(["endpoint", "uuid", "status", "properties"], rows)
    }

    fn services_table(&self) -> Table {
        let mut rows = Vec::new();
        for service in self.report.services() {
            let primary = if service.is_primary() {
                self.painter.success("yes")
            } else {
                self.painter.muted("no")
            };

            if service.characteristics().is_empty() {
                rows.push(vec![
                    self.painter.value(service.uuid()),
                    primary,
                    self.painter.warning("<none>"),
                    self.painter.warning("<none>"),
                ]);
                continue;
            }

            for characteristic in service.characteristics() {
                rows.push(vec![
                    self.painter.value(service.uuid()),
                    primary.clone(),
                    self.painter.value(characteristic.uuid()),
                    self.painter.value(characteristic.properties().to_string()),
                ]);
            }
        }
        Table::grid(
            [
                "service_uuid",
                "primary",
                "characteristic_uuid",
                "properties",
            ],
            rows,
        )
    }
}

impl Display for GattReportView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.painter.heading("Connected device:"))?;
        write!(f, "\n{}", DeviceView::new(self.report.device(), self.painter))?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Known endpoints:"))?;
        write!(f, "\n{}", self.endpoints_table())?;
        writeln!(f)?;
        write!(f, "\n{}", self.painter.heading("Discovered GATT services:"))?;
        write!(f, "\n{}", self.services_table())
    }
}
