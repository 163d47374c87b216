mod command;
mod statistics;

pub use self::command::{CommandHandler, SPRAY_COMMAND};
pub use self::statistics::{DecodeError, StatisticsHandler, StatisticsRecord, StatisticsTimestamp};
