//! Scan guard for stopping discovery on drop.
//!
//! A discovery scan keeps the radio busy until it is stopped explicitly.
//! `BandLink::scan` futures can be dropped mid-scan (session cancelled while
//! resolving, or the scanner's outer timeout firing), so the stop is tied to
//! a guard rather than to the end of the scan body.

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::warn;

type StopFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Stops a running discovery scan when dropped.
///
/// Call [`stop`](Self::stop) on the normal path to stop inline; on drop the
/// stop is spawned onto the current runtime.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use miband_core::ScanGuard;
///
/// #[tokio::main]
/// async fn main() {
///     let stopped = Arc::new(AtomicBool::new(false));
///     let flag = Arc::clone(&stopped);
///     let guard = ScanGuard::new(move || async move { flag.store(true, Ordering::SeqCst) });
///
///     guard.stop().await;
///     assert!(stopped.load(Ordering::SeqCst));
/// }
/// ```
pub struct ScanGuard {
    stop: Option<StopFn>,
}

impl ScanGuard {
    /// Guard a scan that `stop` ends.
    pub fn new<F, Fut>(stop: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            stop: Some(Box::new(move || Box::pin(stop()))),
        }
    }

    /// Stop the scan now.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop().await;
        }
    }
}

impl std::fmt::Debug for ScanGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanGuard")
            .field("armed", &self.stop.is_some())
            .finish()
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            if let Ok(handle) = Handle::try_current() {
                handle.spawn(stop());
            } else {
                warn!("No tokio runtime available to stop scan in guard drop");
            }
        }
    }
}
