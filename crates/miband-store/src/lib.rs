//! Local persistence for Mi Band heart-rate samples.
//!
//! SQLite-backed storage for the samples a monitoring session produces,
//! with queries for reviewing and exporting them.
//!
//! # Features
//!
//! - Append samples with microsecond capture timestamps
//! - Track which bands have produced data
//! - Query by band and time range, with pagination
//! - CSV export
//!
//! # Example
//!
//! ```no_run
//! use miband_store::{Store, SampleQuery};
//!
//! let store = Store::open_default()?;
//!
//! let query = SampleQuery::new()
//!     .device("AA:BB:CC:DD:EE:FF")
//!     .limit(10);
//! for sample in store.query_samples(&query)? {
//!     println!("{} {} bpm", sample.captured_at, sample.bpm);
//! }
//! # Ok::<(), miband_store::Error>(())
//! ```

mod error;
mod models;
mod queries;
mod schema;
mod store;

pub use error::{Error, Result};
pub use models::{StoredDevice, StoredSample};
pub use queries::SampleQuery;
pub use store::Store;

/// Default database path following platform conventions.
///
/// - Linux: `~/.local/share/miband/data.db`
/// - macOS: `~/Library/Application Support/miband/data.db`
/// - Windows: `C:\Users\<user>\AppData\Local\miband\data.db`
pub fn default_db_path() -> std::path::PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| std::path::PathBuf::from("."))
        .join("miband")
        .join("data.db")
}
