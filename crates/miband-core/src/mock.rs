//! In-memory implementations of the capability traits for testing.
//!
//! Nothing here touches a radio or a database:
//!
//! - [`MockLink`] / [`MockSession`]: scripted discovery, connection and
//!   heart-rate streams. Scans count their stops, including scans whose
//!   future was dropped.
//! - [`MockSink`]: records every sample, optionally failing after N writes.
//! - [`RecordingReporter`]: records status updates and owns a cancellation
//!   token that tests can fire directly or after N samples.
//!
//! [`EventLog`] can be shared between the pieces to assert the order of
//! teardown steps across them.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use miband_core::mock::MockLink;
//! use miband_core::{DeviceScanner, ScanFilterSet};
//! use miband_types::DeviceHandle;
//!
//! #[tokio::main]
//! async fn main() {
//!     let band = DeviceHandle::new("AA:BB:CC:DD:EE:FF".parse().unwrap(), None);
//!     let link = Arc::new(
//!         MockLink::builder()
//!             .discoverable(band.clone(), Duration::from_millis(5))
//!             .build(),
//!     );
//!     let scanner = DeviceScanner::new(link);
//!     let found = scanner
//!         .resolve(&ScanFilterSet::new([band.address.clone()]))
//!         .await
//!         .unwrap();
//!     assert_eq!(found, band);
//! }
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use miband_types::{AuthKey, BpmSample, DeviceHandle, LiveStatus, MacAddress};

use crate::error::{
    ConnectionFailureReason, DeviceNotFoundReason, Error, PermissionDeniedReason, Result,
};
use crate::guard::ScanGuard;
use crate::keys::ScanFilterSet;
use crate::traits::{BandLink, BandSession, HeartRateSink, HeartRateStream, LifecycleReporter};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered log of events shared between mocks.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: impl Into<String>) {
        lock(&self.entries).push(event.into());
    }

    /// Copy of all events so far.
    pub fn snapshot(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    /// Index of the first event equal to `event`.
    pub fn position(&self, event: &str) -> Option<usize> {
        lock(&self.entries).iter().position(|e| e == event)
    }

    /// Index of the last event equal to `event`.
    pub fn last_position(&self, event: &str) -> Option<usize> {
        lock(&self.entries).iter().rposition(|e| e == event)
    }
}

/// How a scripted heart-rate stream ends once its samples are used up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StreamEnd {
    /// The stream finishes.
    Close,
    /// The stream yields an error, as a dropped link would.
    Fail(String),
    /// The stream never yields again.
    #[default]
    Hang,
    /// Polling the stream panics.
    Panic,
}

/// What a session did, observable after the session is gone.
#[derive(Debug, Default)]
pub struct SessionTracker {
    streams_opened: AtomicU32,
    stream_released: AtomicBool,
    disconnects: AtomicU32,
    events: EventLog,
}

impl SessionTracker {
    fn with_events(events: EventLog) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    pub fn streams_opened(&self) -> u32 {
        self.streams_opened.load(Ordering::SeqCst)
    }

    /// Whether the heart-rate stream has been dropped by its consumer.
    pub fn stream_released(&self) -> bool {
        self.stream_released.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }
}

struct StreamGuard(Arc<SessionTracker>);

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.0.stream_released.store(true, Ordering::SeqCst);
        self.0.events.record("stream released");
    }
}

struct ScriptState {
    samples: VecDeque<u16>,
    interval: Duration,
    end: StreamEnd,
    _guard: StreamGuard,
}

/// A scripted, already-authenticated session.
pub struct MockSession {
    device: DeviceHandle,
    samples: Vec<u16>,
    interval: Duration,
    end: StreamEnd,
    stream_error: Option<String>,
    tracker: Arc<SessionTracker>,
}

impl std::fmt::Debug for MockSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSession")
            .field("device", &self.device)
            .field("samples", &self.samples.len())
            .field("end", &self.end)
            .finish()
    }
}

impl MockSession {
    pub fn new(device: DeviceHandle) -> Self {
        Self {
            device,
            samples: Vec::new(),
            interval: Duration::ZERO,
            end: StreamEnd::default(),
            stream_error: None,
            tracker: Arc::new(SessionTracker::default()),
        }
    }

    /// Values the stream yields, in order.
    #[must_use]
    pub fn with_samples(mut self, samples: impl IntoIterator<Item = u16>) -> Self {
        self.samples = samples.into_iter().collect();
        self
    }

    /// Delay before each value.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn ending_with(mut self, end: StreamEnd) -> Self {
        self.end = end;
        self
    }

    /// Make [`BandSession::heart_rate_stream`] itself fail.
    #[must_use]
    pub fn failing_to_stream(mut self, message: impl Into<String>) -> Self {
        self.stream_error = Some(message.into());
        self
    }

    /// Share `events` with this session.
    #[must_use]
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.tracker = Arc::new(SessionTracker::with_events(events));
        self
    }

    pub fn tracker(&self) -> Arc<SessionTracker> {
        Arc::clone(&self.tracker)
    }
}

#[async_trait]
impl BandSession for MockSession {
    fn device(&self) -> &DeviceHandle {
        &self.device
    }

    async fn heart_rate_stream(&self) -> Result<HeartRateStream> {
        if let Some(message) = &self.stream_error {
            return Err(Error::connection_failed(
                Some(self.device.address.to_string()),
                ConnectionFailureReason::BleError(message.clone()),
            ));
        }
        self.tracker.streams_opened.fetch_add(1, Ordering::SeqCst);
        self.tracker.events.record("stream opened");

        let state = ScriptState {
            samples: self.samples.iter().copied().collect(),
            interval: self.interval,
            end: self.end.clone(),
            _guard: StreamGuard(Arc::clone(&self.tracker)),
        };
        let address = self.device.address.to_string();

        let stream = futures::stream::unfold(Some(state), move |state| {
            let address = address.clone();
            async move {
                let mut state = state?;
                if let Some(bpm) = state.samples.pop_front() {
                    if !state.interval.is_zero() {
                        tokio::time::sleep(state.interval).await;
                    }
                    return Some((Ok(bpm), Some(state)));
                }
                match state.end.clone() {
                    StreamEnd::Close => None,
                    StreamEnd::Fail(message) => Some((
                        Err(Error::connection_failed(
                            Some(address),
                            ConnectionFailureReason::BleError(message),
                        )),
                        None,
                    )),
                    StreamEnd::Hang => {
                        futures::future::pending::<()>().await;
                        None
                    }
                    StreamEnd::Panic => panic!("scripted producer fault"),
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn disconnect(&self) -> Result<()> {
        self.tracker.disconnects.fetch_add(1, Ordering::SeqCst);
        self.tracker.events.record("disconnect");
        Ok(())
    }
}

/// Scripted connection failure for [`MockLink::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// The band is unreachable.
    Unreachable,
    /// The band rejected the key.
    AuthRejected,
}

/// A scripted radio.
pub struct MockLink {
    connected: Vec<DeviceHandle>,
    discoverable: Vec<(DeviceHandle, Duration)>,
    stray: Option<DeviceHandle>,
    radio_available: bool,
    respect_window: bool,
    connect_latency: Duration,
    connect_failure: Option<ConnectFailure>,
    samples: Vec<u16>,
    interval: Duration,
    end: StreamEnd,
    events: EventLog,
    scan_count: AtomicU32,
    scan_stops: Arc<AtomicU32>,
    connect_count: AtomicU32,
    keys_used: Mutex<Vec<(MacAddress, AuthKey)>>,
    trackers: Mutex<Vec<Arc<SessionTracker>>>,
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLink")
            .field("connected", &self.connected.len())
            .field("discoverable", &self.discoverable.len())
            .field("radio_available", &self.radio_available)
            .finish_non_exhaustive()
    }
}

impl MockLink {
    pub fn builder() -> MockLinkBuilder {
        MockLinkBuilder::default()
    }

    /// Number of discovery scans started.
    pub fn scan_count(&self) -> u32 {
        self.scan_count.load(Ordering::SeqCst)
    }

    /// Number of discovery scans stopped, whether they finished or were dropped.
    pub fn scan_stops(&self) -> u32 {
        self.scan_stops.load(Ordering::SeqCst)
    }

    /// Number of connection attempts.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Address and key of every connection attempt.
    pub fn keys_used(&self) -> Vec<(MacAddress, AuthKey)> {
        lock(&self.keys_used).clone()
    }

    /// Tracker of the most recently opened session.
    pub fn last_session(&self) -> Option<Arc<SessionTracker>> {
        lock(&self.trackers).last().cloned()
    }

    /// A handle with a random address, for tests that don't care which.
    pub fn random_handle(name: &str) -> DeviceHandle {
        let bytes: [u8; 6] = rand::random();
        let address = bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":");
        match MacAddress::parse(&address) {
            Ok(address) => DeviceHandle::new(address, Some(name.to_string())),
            Err(_) => unreachable!("formatted address is always valid"),
        }
    }
}

#[async_trait]
impl BandLink for MockLink {
    type Session = MockSession;

    async fn connected_devices(&self) -> Result<Vec<DeviceHandle>> {
        Ok(self.connected.clone())
    }

    async fn scan(&self, filters: &ScanFilterSet, window: Duration) -> Result<DeviceHandle> {
        if !self.radio_available {
            return Err(Error::PermissionDenied(PermissionDeniedReason::ScanRefused(
                "mock radio is off".to_string(),
            )));
        }
        self.scan_count.fetch_add(1, Ordering::SeqCst);
        let stops = Arc::clone(&self.scan_stops);
        let events = self.events.clone();
        let guard = ScanGuard::new(move || async move {
            stops.fetch_add(1, Ordering::SeqCst);
            events.record("scan stopped");
        });

        if let Some(device) = &self.stray {
            guard.stop().await;
            return Ok(device.clone());
        }

        let first = self
            .discoverable
            .iter()
            .filter(|(device, _)| filters.contains(&device.address))
            .min_by_key(|(_, delay)| *delay);

        let result = match first {
            Some((device, delay)) if !self.respect_window || *delay <= window => {
                tokio::time::sleep(*delay).await;
                Ok(device.clone())
            }
            _ => {
                tokio::time::sleep(window).await;
                Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                    duration: window,
                }))
            }
        };
        guard.stop().await;
        result
    }

    async fn connect(&self, device: DeviceHandle, key: &AuthKey) -> Result<MockSession> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.keys_used).push((device.address.clone(), *key));
        if !self.connect_latency.is_zero() {
            tokio::time::sleep(self.connect_latency).await;
        }

        match self.connect_failure {
            Some(ConnectFailure::Unreachable) => {
                return Err(Error::connection_failed(
                    Some(device.address.to_string()),
                    ConnectionFailureReason::Timeout,
                ));
            }
            Some(ConnectFailure::AuthRejected) => {
                return Err(Error::AuthenticationFailed(
                    "band rejected the encrypted challenge".to_string(),
                ));
            }
            None => {}
        }

        let session = MockSession::new(device)
            .with_events(self.events.clone())
            .with_samples(self.samples.iter().copied())
            .with_interval(self.interval)
            .ending_with(self.end.clone());
        lock(&self.trackers).push(session.tracker());
        Ok(session)
    }
}

/// Builder for [`MockLink`].
#[derive(Debug)]
pub struct MockLinkBuilder {
    connected: Vec<DeviceHandle>,
    discoverable: Vec<(DeviceHandle, Duration)>,
    stray: Option<DeviceHandle>,
    radio_available: bool,
    respect_window: bool,
    connect_latency: Duration,
    connect_failure: Option<ConnectFailure>,
    samples: Vec<u16>,
    interval: Duration,
    end: StreamEnd,
    events: EventLog,
}

impl Default for MockLinkBuilder {
    fn default() -> Self {
        Self {
            connected: Vec::new(),
            discoverable: Vec::new(),
            stray: None,
            radio_available: true,
            respect_window: true,
            connect_latency: Duration::ZERO,
            connect_failure: None,
            samples: Vec::new(),
            interval: Duration::ZERO,
            end: StreamEnd::default(),
            events: EventLog::default(),
        }
    }
}

impl MockLinkBuilder {
    /// A band the host is already connected to.
    #[must_use]
    pub fn connected(mut self, device: DeviceHandle) -> Self {
        self.connected.push(device);
        self
    }

    /// A band that answers a scan after `delay`.
    #[must_use]
    pub fn discoverable(mut self, device: DeviceHandle, delay: Duration) -> Self {
        self.discoverable.push((device, delay));
        self
    }

    /// Make every scan return `device` at once, whether or not it was asked for.
    #[must_use]
    pub fn stray_scan_result(mut self, device: DeviceHandle) -> Self {
        self.stray = Some(device);
        self
    }

    #[must_use]
    pub fn radio_available(mut self, available: bool) -> Self {
        self.radio_available = available;
        self
    }

    /// Let a scan overrun the window it is given.
    #[must_use]
    pub fn ignore_scan_window(mut self) -> Self {
        self.respect_window = false;
        self
    }

    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    #[must_use]
    pub fn connect_failure(mut self, failure: ConnectFailure) -> Self {
        self.connect_failure = Some(failure);
        self
    }

    /// Values every session streams.
    #[must_use]
    pub fn samples(mut self, samples: impl IntoIterator<Item = u16>) -> Self {
        self.samples = samples.into_iter().collect();
        self
    }

    #[must_use]
    pub fn sample_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    #[must_use]
    pub fn stream_end(mut self, end: StreamEnd) -> Self {
        self.end = end;
        self
    }

    #[must_use]
    pub fn events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> MockLink {
        MockLink {
            connected: self.connected,
            discoverable: self.discoverable,
            stray: self.stray,
            radio_available: self.radio_available,
            respect_window: self.respect_window,
            connect_latency: self.connect_latency,
            connect_failure: self.connect_failure,
            samples: self.samples,
            interval: self.interval,
            end: self.end,
            events: self.events,
            scan_count: AtomicU32::new(0),
            scan_stops: Arc::new(AtomicU32::new(0)),
            connect_count: AtomicU32::new(0),
            keys_used: Mutex::new(Vec::new()),
            trackers: Mutex::new(Vec::new()),
        }
    }
}

/// A sink that keeps samples in memory.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    samples: Arc<Mutex<Vec<(MacAddress, BpmSample)>>>,
    fail_after: Option<usize>,
    latency: Duration,
    events: EventLog,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` writes, then fail every write after that.
    #[must_use]
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Delay every write.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = events;
        self
    }

    /// Everything written so far.
    pub fn samples(&self) -> Vec<(MacAddress, BpmSample)> {
        lock(&self.samples).clone()
    }

    /// Heart-rate values written so far, in order.
    pub fn bpms(&self) -> Vec<u16> {
        lock(&self.samples).iter().map(|(_, s)| s.bpm).collect()
    }
}

#[async_trait]
impl HeartRateSink for MockSink {
    async fn insert(
        &mut self,
        device: &DeviceHandle,
        sample: &BpmSample,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut samples = lock(&self.samples);
        if self.fail_after.is_some_and(|n| samples.len() >= n) {
            return Err("mock sink is full".into());
        }
        samples.push((device.address.clone(), *sample));
        self.events.record(format!("insert {}", sample.bpm));
        Ok(())
    }
}

/// A reporter that remembers every status it was given.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<LiveStatus>>,
    token: CancellationToken,
    cancel_after: Option<usize>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the cancellation token once `n` samples have been reported.
    #[must_use]
    pub fn cancel_after_samples(mut self, n: usize) -> Self {
        self.cancel_after = Some(n);
        self
    }

    /// Fire the cancellation token now.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn statuses(&self) -> Vec<LiveStatus> {
        lock(&self.statuses).clone()
    }
}

impl LifecycleReporter for RecordingReporter {
    fn report_status(&self, status: LiveStatus) {
        let mut statuses = lock(&self.statuses);
        statuses.push(status);
        let reported = statuses
            .iter()
            .filter(|s| matches!(s, LiveStatus::Bpm(_)))
            .count();
        if self.cancel_after.is_some_and(|n| reported >= n) {
            self.token.cancel();
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}
