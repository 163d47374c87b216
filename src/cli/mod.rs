pub(crate) mod command;
pub(crate) mod scan;
pub(crate) mod session;
pub(crate) mod ui;

pub use self::command::{
    Args, Command, FakeArgs, LogLevel, OutputFormat, RunSettings, Selection, SprayArgs,
};
