//! Command-line interface for Mi Band heart-rate monitoring.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `keys` | List the device keys found in the key folder |
//! | `find` | Resolve a band, preferring ones already connected |
//! | `monitor` | Stream heart rate into the local database |
//! | `history` | Show recorded samples |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! An optional `config.toml` in `~/.config/miband/` (or platform equivalent)
//! may set `key_dir`, `database`, `scan_timeout` and `buffer_size`.
//!
//! # Environment Variables
//!
//! - `MIBAND_KEY_DIR`: key folder (overridden by `--dir`)
//! - `MIBAND_DEVICE` / `MIBAND_KEY`: explicit band credentials for `monitor`
//! - `NO_COLOR`: disable colored output
//!
//! # Examples
//!
//! ```bash
//! miband keys --dir ~/Downloads
//! miband monitor --dir ~/Downloads
//! miband history --since 2024-03-01 --format csv --output hr.csv
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod format;
pub mod reporter;
pub mod sink;
pub mod util;

pub use miband_core;
pub use miband_store;
pub use miband_types;
