//! Side-effecting helpers: clock, config, child processes and ledger files.

pub mod clock;
pub mod command;
pub mod config;
pub mod ledger_store;
pub mod process;
