//! Capability traits the session core drives.
//!
//! The core never talks to a radio, a database or a UI directly. It is handed
//! implementations of these traits at construction time:
//!
//! - [`BandLink`]: discovery and connection (backed by [`crate::device::BleLink`]
//!   on real hardware, [`crate::mock::MockLink`] in tests).
//! - [`BandSession`]: one authenticated, exclusive connection.
//! - [`HeartRateSink`]: durable storage for samples.
//! - [`LifecycleReporter`]: user-facing status and the cancellation signal.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use miband_types::{AuthKey, BpmSample, DeviceHandle, LiveStatus};

use crate::error::Result;
use crate::keys::ScanFilterSet;

/// Stream of raw heart-rate values from an authenticated session.
///
/// The stream is live and cannot be restarted. An `Err` item or the end of
/// the stream both mean the link is gone.
pub type HeartRateStream = BoxStream<'static, Result<u16>>;

/// Discovery and connection capability for bands.
#[async_trait]
pub trait BandLink: Send + Sync {
    /// The session type produced by [`connect`](Self::connect).
    type Session: BandSession;

    /// Bands the host already holds a low-energy connection to.
    async fn connected_devices(&self) -> Result<Vec<DeviceHandle>>;

    /// Scan until one band whose address is in `filters` answers.
    ///
    /// Each address is an independent match; the first match ends the scan.
    /// Implementations must fail with [`crate::Error::PermissionDenied`]
    /// before listening if the radio cannot scan, and with
    /// [`crate::Error::DeviceNotFound`] once `window` elapses.
    async fn scan(&self, filters: &ScanFilterSet, window: Duration) -> Result<DeviceHandle>;

    /// Open and authenticate an exclusive connection to `device`.
    async fn connect(&self, device: DeviceHandle, key: &AuthKey) -> Result<Self::Session>;
}

/// One authenticated, exclusive connection to a band.
#[async_trait]
pub trait BandSession: Send + Sync + 'static {
    /// The band this session is connected to.
    fn device(&self) -> &DeviceHandle;

    /// Start realtime heart-rate measurement and return the value stream.
    async fn heart_rate_stream(&self) -> Result<HeartRateStream>;

    /// Release the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Durable destination for samples.
///
/// Failures end the session; the pipeline never retries a write.
#[async_trait]
pub trait HeartRateSink: Send {
    /// Persist one sample for `device`.
    async fn insert(
        &mut self,
        device: &DeviceHandle,
        sample: &BpmSample,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// User-facing status sink and cancellation source for a session.
pub trait LifecycleReporter: Send + Sync {
    /// Called when the session starts and on every sample.
    fn report_status(&self, status: LiveStatus);

    /// Token the reporter's environment cancels to stop the session.
    fn cancellation(&self) -> CancellationToken;
}
