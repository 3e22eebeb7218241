//! Device binding and realtime heart-rate streaming for Mi Band wearables.
//!
//! This crate takes a folder of exported key files, finds one of the bands
//! they describe, opens an authenticated connection and streams heart-rate
//! notifications into a persistence sink until the session is cancelled or
//! the link drops.
//!
//! # Features
//!
//! - **Key extraction**: parse `miband<HEX12>.txt` exports into an address → key index
//! - **Device resolution**: prefer bands already connected to the host, else scan
//! - **Streaming**: bounded producer/consumer pipeline with ordered, exactly-once writes
//! - **Lifecycle**: one session at a time, cancellable, with a fixed teardown order
//! - **BLE backend**: `btleplug` implementation including the band's authentication
//!
//! # Architecture
//!
//! [`SessionManager`] drives everything through capability traits
//! ([`BandLink`], [`BandSession`], [`HeartRateSink`], [`LifecycleReporter`]).
//! [`BleLink`] is the hardware implementation; the [`mock`] module provides
//! in-memory ones for tests.
//!
//! # Platform Differences
//!
//! Bands are matched by MAC address. macOS hides peripheral addresses behind
//! CoreBluetooth UUIDs, so discovery there never matches a key file.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use miband_core::{BleLink, KeyExtractor, MonitorRequest, SessionManager};
//! use miband_core::mock::{MockSink, RecordingReporter};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let keys = KeyExtractor::scan_dir("./keys")?;
//!     let request = MonitorRequest::from_index(keys)?;
//!
//!     let manager = SessionManager::new(Arc::new(BleLink::new().await?));
//!     let mut sink = MockSink::new();
//!     let reporter = RecordingReporter::new();
//!
//!     let report = manager.monitor(&request, &mut sink, &reporter).await?;
//!     println!("{} samples from {}", report.samples_persisted, report.device);
//!     Ok(())
//! }
//! ```

pub mod commands;
pub mod device;
pub mod error;
pub mod guard;
pub mod keys;
pub mod mock;
pub mod scan;
pub mod session;
pub mod streaming;
pub mod traits;
pub mod util;

pub use miband_types::types;
pub use miband_types::uuid;

pub use device::{BleLink, BleSession, ConnectionConfig};
pub use error::{
    ConnectionFailureReason, DeviceNotFoundReason, Error, PermissionDeniedReason, Result,
};
pub use guard::ScanGuard;
pub use keys::{KeyExtractor, KeyIndex, ScanFilterSet, is_key_file_name, parse_key_record};
pub use scan::{DeviceScanner, ResolvedDevice, ResolvedVia, ScanOptions};
pub use session::{MonitorOptions, MonitorRequest, SessionManager, SessionReport};
pub use streaming::{PipelineEnd, PipelineOptions, PipelineOutcome, StreamingPipeline};
pub use traits::{BandLink, BandSession, HeartRateSink, HeartRateStream, LifecycleReporter};
pub use util::{create_identifier, format_peripheral_id};

pub use miband_types::uuid as uuids;
pub use miband_types::{
    AuthKey, BpmSample, DeviceHandle, DeviceKeyRecord, LiveStatus, MacAddress, SessionState,
};
