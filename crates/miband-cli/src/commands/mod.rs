//! Command implementations for the CLI.

mod find;
mod history;
mod keys;
mod monitor;

pub use find::cmd_find;
pub use history::{HistoryArgs, cmd_history};
pub use keys::cmd_keys;
pub use monitor::{MonitorArgs, cmd_monitor};
