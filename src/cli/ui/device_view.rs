use std::fmt::{self, Display, Formatter};

use crate::hw::DiscoveredDevice;
use crate::utils::format_rssi;

use super::painter::Painter;
use super::table::Table;

/// Renders one device as a key-value table.
pub(crate) struct DeviceView<'a> {
    device: &'a DiscoveredDevice,
    painter: &'a Painter,
}

impl<'a> DeviceView<'a> {
    pub(crate) fn new(device: &'a DiscoveredDevice, painter: &'a Painter) -> Self {
        Self { device, painter }
    }
}

impl Display for DeviceView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let table = Table::key_value(
            self.painter,
            [
                ("adapter", self.painter.value(self.device.adapter_name())),
                ("address", self.painter.value(self.device.address())),
                ("name", self.painter.value(self.device.display_name())),
                ("rssi", self.painter.value(format_rssi(self.device.rssi()))),
            ],
        );
        write!(f, "{table}")
    }
}

/// Renders a scan result as an indexed table.
pub(crate) struct DeviceListView<'a> {
    devices: &'a [DiscoveredDevice],
    painter: &'a Painter,
}

impl<'a> DeviceListView<'a> {
    pub(crate) fn new(devices: &'a [DiscoveredDevice], painter: &'a Painter) -> Self {
        Self { devices, painter }
    }
}

impl Display for DeviceListView<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.devices.is_empty() {
            return write!(f, "{}", self.painter.warning("No BLE devices found."));
        }

        let rows = self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                vec![
                    self.painter.muted(index.to_string()),
                    self.painter.value(device.display_name()),
                    self.painter.value(device.address()),
                    format_rssi(device.rssi()),
                    self.painter.muted(device.adapter_name()),
                ]
            })
            .collect();

        write!(f, "{}", self.painter.heading("Discovered devices:"))?;
        write!(
            f,
            "\n{}",
            Table::grid(["index", "name", "address", "rssi", "adapter"], rows)
        )
    }
}
