mod device_view;
mod gatt_view;
mod outcome_view;
mod painter;
mod statistics_view;
mod table;

pub(crate) use self::device_view::DeviceListView;
pub(crate) use self::outcome_view::OutcomeView;
pub(crate) use self::painter::Painter;
