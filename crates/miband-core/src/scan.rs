//! Device resolution.
//!
//! [`DeviceScanner::resolve`] turns a set of candidate addresses into one
//! concrete band:
//!
//! 1. Bands the host is already connected to are checked first. A match
//!    returns immediately, without touching the radio's scanner.
//! 2. Otherwise a filtered discovery scan runs, one address filter per
//!    candidate, and the first band to answer wins.
//!
//! The scan is bounded by [`ScanOptions::window`]; running out of time is
//! [`Error::DeviceNotFound`], never an indefinite wait.
//!
//! Whatever band the scan reports is returned as-is. A band with no key in
//! the request is the session's [`Error::MissingKey`] to report.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use miband_types::DeviceHandle;

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::keys::ScanFilterSet;
use crate::traits::BandLink;

/// Slack given to a backend past its own window before the scanner gives up.
const SCAN_GRACE: Duration = Duration::from_secs(2);

/// Options for discovery.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// How long a discovery scan may run before failing with `NotFound`.
    pub window: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(10),
        }
    }
}

impl ScanOptions {
    /// Create new scan options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the scan window.
    #[must_use]
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Set the scan window in seconds.
    #[must_use]
    pub fn window_secs(mut self, secs: u64) -> Self {
        self.window = Duration::from_secs(secs);
        self
    }
}

/// How a device was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedVia {
    /// Already connected to the host.
    Connected,
    /// Answered a discovery scan.
    Discovered,
}

/// A resolved device and the path that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub device: DeviceHandle,
    pub via: ResolvedVia,
}

/// Resolves a band from a candidate set.
pub struct DeviceScanner<L> {
    link: Arc<L>,
    options: ScanOptions,
}

impl<L> std::fmt::Debug for DeviceScanner<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceScanner")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<L: BandLink> DeviceScanner<L> {
    /// Scanner with default options.
    pub fn new(link: Arc<L>) -> Self {
        Self::with_options(link, ScanOptions::default())
    }

    pub fn with_options(link: Arc<L>, options: ScanOptions) -> Self {
        Self { link, options }
    }

    pub fn options(&self) -> &ScanOptions {
        &self.options
    }

    /// Resolve one band from `candidates`.
    pub async fn resolve(&self, candidates: &ScanFilterSet) -> Result<DeviceHandle> {
        self.resolve_detailed(candidates).await.map(|r| r.device)
    }

    /// Resolve one band and report whether it came from the connected fast path.
    #[tracing::instrument(level = "info", skip_all, fields(candidates = candidates.len()))]
    pub async fn resolve_detailed(&self, candidates: &ScanFilterSet) -> Result<ResolvedDevice> {
        if candidates.is_empty() {
            return Err(Error::DeviceNotFound(DeviceNotFoundReason::NoCandidates));
        }

        let connected = self.link.connected_devices().await?;
        if let Some(device) = connected
            .into_iter()
            .find(|d| candidates.contains(&d.address))
        {
            info!("Using already-connected device {}", device);
            return Ok(ResolvedDevice {
                device,
                via: ResolvedVia::Connected,
            });
        }

        debug!("No connected candidate, scanning for {:?}", self.options.window);
        for address in candidates.iter() {
            debug!("Filter added for {}", address);
        }

        let window = self.options.window;
        let device = match timeout(window + SCAN_GRACE, self.link.scan(candidates, window)).await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Scan did not complete within {:?}", window);
                return Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                    duration: window,
                }));
            }
        };

        info!("Found {}", device);
        Ok(ResolvedDevice {
            device,
            via: ResolvedVia::Discovered,
        })
    }
}
