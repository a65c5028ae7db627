// src/display/mod.rs
//! Local display of the surveyor state

pub mod terminal;

pub use terminal::TerminalDisplay;

/// Whether stdout is an interactive terminal worth drawing on
pub fn stdout_is_terminal() -> bool {
    use std::io::IsTerminal;
    std::io::stdout().is_terminal()
}
