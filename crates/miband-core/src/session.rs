//! Session lifecycle: resolve, connect, stream, tear down.
//!
//! [`SessionManager::monitor`] runs one full monitoring cycle and owns the
//! [`SessionState`] machine:
//!
//! ```text
//! Idle -> Resolving -> Connecting -> Streaming -> Terminating -> Idle
//!   any state -> Failed
//! ```
//!
//! Teardown always runs in the same order, whatever ended the session:
//! the producer stops, the channel closes, then the connection is released.
//! Cancellation is a normal end and returns a [`SessionReport`]; a dropped
//! link or a sink failure ends in [`SessionState::Failed`] and an error.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use miband_types::{
    AuthKey, BpmSample, DeviceHandle, DeviceKeyRecord, LiveStatus, MacAddress, SessionState,
};

use crate::error::{Error, Result};
use crate::keys::{KeyIndex, ScanFilterSet};
use crate::scan::{DeviceScanner, ScanOptions};
use crate::streaming::{PipelineEnd, PipelineOptions, StreamingPipeline};
use crate::traits::{BandLink, BandSession, HeartRateSink, LifecycleReporter};

/// Upper bound on releasing a connection during teardown.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What to monitor: candidate addresses and their keys.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    keys: Arc<KeyIndex>,
}

impl MonitorRequest {
    /// Request for a single band given its address and raw key bytes.
    ///
    /// Both parts are required; either missing or malformed is
    /// [`Error::InvalidConfig`].
    pub fn for_device(address: Option<&str>, key: Option<&[u8]>) -> Result<Self> {
        let address = address.ok_or_else(|| Error::invalid_config("missing device-address"))?;
        let key = key.ok_or_else(|| Error::invalid_config("missing device-key"))?;

        let address = MacAddress::parse(address)
            .map_err(|e| Error::invalid_config(format!("device-address: {}", e)))?;
        let key =
            AuthKey::from_slice(key).map_err(|e| Error::invalid_config(format!("device-key: {}", e)))?;

        let keys = KeyIndex::from_records([DeviceKeyRecord { address, key }]);
        Ok(Self {
            keys: Arc::new(keys),
        })
    }

    /// Request covering every band in `keys`.
    pub fn from_index(keys: impl Into<Arc<KeyIndex>>) -> Result<Self> {
        let keys = keys.into();
        if keys.is_empty() {
            return Err(Error::NoKeys);
        }
        Ok(Self { keys })
    }

    /// Candidate addresses to resolve.
    pub fn filters(&self) -> ScanFilterSet {
        self.keys.filters()
    }

    pub fn key_for(&self, address: &MacAddress) -> Option<AuthKey> {
        self.keys.get(address).map(|record| record.key)
    }

    pub fn keys(&self) -> &KeyIndex {
        &self.keys
    }
}

/// Options for a monitoring session.
#[derive(Debug, Clone, Default)]
pub struct MonitorOptions {
    pub scan: ScanOptions,
    pub pipeline: PipelineOptions,
}

impl MonitorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scan(mut self, scan: ScanOptions) -> Self {
        self.scan = scan;
        self
    }

    #[must_use]
    pub fn pipeline(mut self, pipeline: PipelineOptions) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// Check that the options can be used.
    pub fn validate(&self) -> Result<()> {
        if self.scan.window.is_zero() {
            return Err(Error::invalid_config("scan window must be > 0"));
        }
        self.pipeline.validate()
    }
}

/// Summary of a session that ended by cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    /// The band that was monitored.
    pub device: DeviceHandle,
    /// Samples handed to the sink.
    pub samples_persisted: u64,
    /// The last sample handed to the sink.
    pub last_sample: Option<BpmSample>,
}

/// Releases the single-session slot on drop.
struct ActiveSlot<'a>(&'a AtomicBool);

impl<'a> ActiveSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SessionBusy)?;
        Ok(Self(flag))
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives monitoring sessions over a [`BandLink`].
///
/// At most one session runs at a time per manager; a concurrent
/// [`monitor`](Self::monitor) call fails with [`Error::SessionBusy`].
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use miband_core::{BleLink, KeyExtractor, MonitorRequest, SessionManager};
/// # use miband_core::mock::{MockSink, RecordingReporter};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let keys = KeyExtractor::scan_dir("/sdcard/keys")?;
///     let request = MonitorRequest::from_index(keys)?;
///     let manager = SessionManager::new(Arc::new(BleLink::new().await?));
///
///     let mut sink = MockSink::new();
///     let reporter = RecordingReporter::new();
///     let report = manager.monitor(&request, &mut sink, &reporter).await?;
///     println!("{} samples", report.samples_persisted);
///     Ok(())
/// }
/// ```
pub struct SessionManager<L: BandLink> {
    link: Arc<L>,
    scanner: DeviceScanner<L>,
    pipeline: StreamingPipeline,
    state: watch::Sender<SessionState>,
    live: watch::Sender<LiveStatus>,
    active: AtomicBool,
}

impl<L: BandLink> std::fmt::Debug for SessionManager<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &*self.state.borrow())
            .field("live", &*self.live.borrow())
            .field("scanner", &self.scanner)
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl<L: BandLink> SessionManager<L> {
    /// Manager with default options.
    pub fn new(link: Arc<L>) -> Self {
        Self::with_options(link, MonitorOptions::default())
    }

    pub fn with_options(link: Arc<L>, options: MonitorOptions) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        let (live, _) = watch::channel(LiveStatus::Connecting);
        Self {
            scanner: DeviceScanner::with_options(Arc::clone(&link), options.scan),
            pipeline: StreamingPipeline::new(options.pipeline),
            link,
            state,
            live,
            active: AtomicBool::new(false),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Watch the user-facing status; always the most recently persisted value.
    pub fn live_status(&self) -> watch::Receiver<LiveStatus> {
        self.live.subscribe()
    }

    /// Whether a session is currently running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run one monitoring session until it is cancelled or fails.
    ///
    /// Cancellation comes from `reporter`'s token. Returns
    /// [`Error::Cancelled`] if that happens before streaming starts.
    #[tracing::instrument(level = "info", skip_all, fields(candidates = request.keys().len()))]
    pub async fn monitor<K, R>(
        &self,
        request: &MonitorRequest,
        sink: &mut K,
        reporter: &R,
    ) -> Result<SessionReport>
    where
        K: HeartRateSink + ?Sized,
        R: LifecycleReporter + ?Sized,
    {
        let _slot = ActiveSlot::acquire(&self.active)?;
        let cancel = reporter.cancellation();

        self.transition(SessionState::Idle);
        self.live.send_replace(LiveStatus::Connecting);
        reporter.report_status(LiveStatus::Connecting);

        self.transition(SessionState::Resolving);
        let filters = request.filters();
        let resolved = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Cancelled while resolving");
                self.transition(SessionState::Idle);
                return Err(Error::Cancelled);
            }
            resolved = self.scanner.resolve(&filters) => resolved,
        };
        let device = resolved.map_err(|e| self.fail(e))?;

        self.transition(SessionState::Connecting);
        let Some(key) = request.key_for(&device.address) else {
            error!("Missing key for {}", device.address);
            return Err(self.fail(Error::MissingKey {
                address: device.address,
            }));
        };
        let session = self
            .link
            .connect(device, &key)
            .await
            .map(Arc::new)
            .map_err(|e| self.fail(e))?;

        if cancel.is_cancelled() {
            info!("Cancelled while connecting");
            self.transition(SessionState::Terminating);
            self.release(session.as_ref()).await;
            self.transition(SessionState::Idle);
            return Err(Error::Cancelled);
        }

        self.transition(SessionState::Streaming);
        let result = self
            .pipeline
            .run(Arc::clone(&session), sink, reporter, &self.live, &cancel)
            .await;

        self.transition(SessionState::Terminating);
        self.release(session.as_ref()).await;

        let outcome = result.map_err(|e| self.fail(e))?;
        let report = SessionReport {
            device: session.device().clone(),
            samples_persisted: outcome.samples_persisted,
            last_sample: outcome.last_sample,
        };

        match outcome.end {
            PipelineEnd::LinkClosed { reason } if !cancel.is_cancelled() => {
                Err(self.fail(Error::LinkFailure {
                    samples_persisted: outcome.samples_persisted,
                    reason,
                }))
            }
            _ => {
                info!(
                    "Session with {} ended after {} sample(s)",
                    report.device, report.samples_persisted
                );
                self.transition(SessionState::Idle);
                Ok(report)
            }
        }
    }

    fn transition(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session state {} -> {}", previous, next);
        }
    }

    fn fail(&self, err: Error) -> Error {
        match &err {
            Error::DeviceNotFound(_) | Error::PermissionDenied(_) => warn!("{}", err),
            _ => error!("Session failed: {}", err),
        }
        self.transition(SessionState::Failed);
        err
    }

    async fn release(&self, session: &L::Session) {
        match timeout(DISCONNECT_TIMEOUT, session.disconnect()).await {
            Ok(Ok(())) => debug!("Released {}", session.device()),
            Ok(Err(e)) => warn!("Failed to release {}: {}", session.device(), e),
            Err(_) => warn!(
                "Releasing {} did not finish within {:?}",
                session.device(),
                DISCONNECT_TIMEOUT
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DeviceNotFoundReason, PermissionDeniedReason};
    use crate::mock::{ConnectFailure, EventLog, MockLink, MockSink, RecordingReporter, StreamEnd};

    const ADDR: &str = "AA:BB:CC:DD:EE:FF";
    const KEY: &str = "0123456789abcdef0123456789abcdef";

    fn band() -> DeviceHandle {
        DeviceHandle::new(ADDR.parse().unwrap(), Some("Mi Smart Band 4".into()))
    }

    fn request() -> MonitorRequest {
        let key = AuthKey::from_hex(KEY).unwrap();
        MonitorRequest::for_device(Some(ADDR), Some(key.as_bytes())).unwrap()
    }

    fn manager(link: MockLink) -> SessionManager<MockLink> {
        SessionManager::new(Arc::new(link))
    }

    #[test]
    fn test_request_requires_both_parts() {
        let key = [0u8; 16];
        assert!(matches!(
            MonitorRequest::for_device(None, Some(&key)),
            Err(Error::InvalidConfig(ref m)) if m.contains("device-address")
        ));
        assert!(matches!(
            MonitorRequest::for_device(Some(ADDR), None),
            Err(Error::InvalidConfig(ref m)) if m.contains("device-key")
        ));
        assert!(matches!(
            MonitorRequest::for_device(Some(ADDR), Some(&key[..4])),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            MonitorRequest::for_device(Some("not-a-mac"), Some(&key)),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_request_from_empty_index() {
        let err = MonitorRequest::from_index(KeyIndex::default()).unwrap_err();
        assert!(matches!(err, Error::NoKeys));
    }

    #[test]
    fn test_monitor_options_validate() {
        assert!(MonitorOptions::default().validate().is_ok());
        assert!(
            MonitorOptions::new()
                .scan(ScanOptions::new().window(Duration::ZERO))
                .validate()
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_link_failure_after_samples() {
        let events = EventLog::new();
        let link = MockLink::builder()
            .connected(band())
            .samples([72, 75, 74, 80, 81])
            .stream_end(StreamEnd::Fail("link lost".into()))
            .events(events.clone())
            .build();
        let manager = manager(link);
        let mut sink = MockSink::new().with_events(events.clone());
        let reporter = RecordingReporter::new();

        let err = manager
            .monitor(&request(), &mut sink, &reporter)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LinkFailure { samples_persisted: 5, .. }));
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(sink.bpms(), vec![72, 75, 74, 80, 81]);
        assert_eq!(*manager.live_status().borrow(), LiveStatus::Bpm(81));

        let disconnect = events.position("disconnect").unwrap();
        assert!(events.last_position("insert 81").unwrap() < disconnect);
        assert!(events.position("stream released").unwrap() < disconnect);
        assert_eq!(manager.link.last_session().unwrap().disconnects(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_is_clean() {
        let events = EventLog::new();
        let link = MockLink::builder()
            .connected(band())
            .samples([60, 61, 62])
            .events(events.clone())
            .build();
        let manager = manager(link);
        let mut sink = MockSink::new().with_events(events.clone());
        let reporter = RecordingReporter::new().cancel_after_samples(3);

        let report = manager
            .monitor(&request(), &mut sink, &reporter)
            .await
            .unwrap();

        assert_eq!(report.samples_persisted, 3);
        assert_eq!(report.device, band());
        assert_eq!(manager.state(), SessionState::Idle);
        assert!(!manager.is_active());
        assert_eq!(
            reporter.statuses(),
            vec![
                LiveStatus::Connecting,
                LiveStatus::Bpm(60),
                LiveStatus::Bpm(61),
                LiveStatus::Bpm(62)
            ]
        );
        assert!(events.position("stream released").unwrap() < events.position("disconnect").unwrap());
    }

    #[tokio::test]
    async fn test_key_for_resolved_device_is_used() {
        let other: MacAddress = "11:22:33:44:55:66".parse().unwrap();
        let index = KeyIndex::from_records([
            DeviceKeyRecord {
                address: ADDR.parse().unwrap(),
                key: AuthKey::new([1u8; 16]),
            },
            DeviceKeyRecord {
                address: other.clone(),
                key: AuthKey::new([2u8; 16]),
            },
        ]);
        let link = MockLink::builder()
            .discoverable(
                DeviceHandle::new(other.clone(), None),
                Duration::from_millis(5),
            )
            .stream_end(StreamEnd::Close)
            .build();
        let manager = manager(link);
        let mut sink = MockSink::new();
        let reporter = RecordingReporter::new();

        let request = MonitorRequest::from_index(index).unwrap();
        let _ = manager.monitor(&request, &mut sink, &reporter).await;
        assert_eq!(
            manager.link.keys_used(),
            vec![(other, AuthKey::new([2u8; 16]))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_fails_session() {
        let link = MockLink::builder().build();
        let manager = SessionManager::with_options(
            Arc::new(link),
            MonitorOptions::new().scan(ScanOptions::new().window(Duration::from_secs(1))),
        );
        let mut sink = MockSink::new();
        let reporter = RecordingReporter::new();

        let err = manager
            .monitor(&request(), &mut sink, &reporter)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout { .. })
        ));
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(manager.link.connect_count(), 0);
        assert!(sink.samples().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied() {
        let link = MockLink::builder().radio_available(false).build();
        let manager = manager(link);
        let err = manager
            .monitor(&request(), &mut MockSink::new(), &RecordingReporter::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::PermissionDenied(PermissionDeniedReason::ScanRefused(_))
        ));
        assert_eq!(manager.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_auth_rejected() {
        let link = MockLink::builder()
            .connected(band())
            .connect_failure(ConnectFailure::AuthRejected)
            .build();
        let manager = manager(link);
        let err = manager
            .monitor(&request(), &mut MockSink::new(), &RecordingReporter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
        assert_eq!(manager.state(), SessionState::Failed);
        assert!(manager.link.last_session().is_none());
    }

    #[tokio::test]
    async fn test_sink_failure_fails_session() {
        let link = MockLink::builder()
            .connected(band())
            .samples([70, 71, 72])
            .build();
        let manager = manager(link);
        let mut sink = MockSink::new().fail_after(2);

        let err = manager
            .monitor(&request(), &mut sink, &RecordingReporter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(sink.bpms(), vec![70, 71]);
        assert_eq!(manager.link.last_session().unwrap().disconnects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_resolving() {
        let link = MockLink::builder().build();
        let manager = manager(link);
        let reporter = RecordingReporter::new();
        let token = reporter.cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let err = manager
            .monitor(&request(), &mut MockSink::new(), &reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(manager.state(), SessionState::Idle);
        assert_eq!(manager.link.connect_count(), 0);

        // The interrupted scan is stopped once the guard's cleanup runs.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.link.scan_count(), 1);
        assert_eq!(manager.link.scan_stops(), 1);
    }

    #[tokio::test]
    async fn test_scanned_band_without_key_is_missing_key() {
        let stray = DeviceHandle::new("11:22:33:44:55:66".parse().unwrap(), None);
        let link = MockLink::builder().stray_scan_result(stray.clone()).build();
        let manager = manager(link);
        let reporter = RecordingReporter::new();

        let err = manager
            .monitor(&request(), &mut MockSink::new(), &reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingKey { ref address } if *address == stray.address));
        assert_eq!(manager.state(), SessionState::Failed);
        assert_eq!(manager.link.connect_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_connecting_releases_link() {
        let link = MockLink::builder()
            .connected(band())
            .connect_latency(Duration::from_secs(1))
            .build();
        let manager = manager(link);
        let reporter = RecordingReporter::new();
        let token = reporter.cancellation();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let err = manager
            .monitor(&request(), &mut MockSink::new(), &reporter)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(manager.state(), SessionState::Idle);
        let tracker = manager.link.last_session().unwrap();
        assert_eq!(tracker.disconnects(), 1);
        assert_eq!(tracker.streams_opened(), 0);
    }

    #[tokio::test]
    async fn test_second_session_is_busy() {
        let link = MockLink::builder().connected(band()).samples([70]).build();
        let manager = Arc::new(manager(link));
        let reporter = Arc::new(RecordingReporter::new());
        let mut live = manager.live_status();

        let first = {
            let manager = Arc::clone(&manager);
            let reporter = Arc::clone(&reporter);
            tokio::spawn(async move {
                let mut sink = MockSink::new();
                manager.monitor(&request(), &mut sink, reporter.as_ref()).await
            })
        };

        live.wait_for(|s| *s == LiveStatus::Bpm(70)).await.unwrap();
        assert_eq!(manager.state(), SessionState::Streaming);

        let err = manager
            .monitor(&request(), &mut MockSink::new(), &RecordingReporter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionBusy));

        reporter.cancel();
        let report = first.await.unwrap().unwrap();
        assert_eq!(report.samples_persisted, 1);
        assert!(!manager.is_active());
    }
}
