use std::io::{self, IsTerminal};

/// Reports whether the process streams are attached to a terminal.
pub trait TerminalClient: Send + Sync {
    /// Returns whether standard output is a terminal.
    fn stdout_is_terminal(&self) -> bool;

    /// Returns whether standard error is a terminal.
    fn stderr_is_terminal(&self) -> bool;
}

/// [`TerminalClient`] that checks the real process streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTerminalClient;

impl TerminalClient for SystemTerminalClient {
    fn stdout_is_terminal(&self) -> bool {
        io::stdout().is_terminal()
    }

    fn stderr_is_terminal(&self) -> bool {
        io::stderr().is_terminal()
    }
}
