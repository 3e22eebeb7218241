//! BLE backend on `btleplug`.
//!
//! [`BleLink`] implements [`BandLink`] over the host's first Bluetooth
//! adapter. [`BleSession`] is one connected, authenticated band.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::{StreamExt, future};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use miband_types::{AuthKey, DeviceHandle, MacAddress, parse_heart_rate_measurement};

use crate::commands::{
    AUTH_REQUEST_CHALLENGE, AuthResponse, HR_PING, HR_START_CONTINUOUS, HR_STOP_CONTINUOUS,
    HR_STOP_MANUAL, parse_auth_response, send_encrypted_command,
};
use crate::error::{
    ConnectionFailureReason, DeviceNotFoundReason, Error, PermissionDeniedReason, Result,
};
use crate::guard::ScanGuard;
use crate::keys::ScanFilterSet;
use crate::traits::{BandLink, BandSession, HeartRateStream};
use crate::util::{create_identifier, format_peripheral_id};
use crate::uuid::{HEART_RATE_CONTROL_POINT, HEART_RATE_MEASUREMENT, MIBAND_AUTH};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);
/// The band stops continuous measurement after ~15 s without a ping.
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(12);

/// Timeouts and keepalive period for BLE connections.
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use miband_core::device::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(30))
///     .keepalive_interval(Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
    /// Timeout for each characteristic write.
    pub write_timeout: Duration,
    /// Timeout for the whole authentication exchange.
    pub auth_timeout: Duration,
    /// Period of the heart-rate keepalive ping.
    pub keepalive_interval: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

impl ConnectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    #[must_use]
    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.auth_timeout = timeout;
        self
    }

    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

/// Get the first available Bluetooth adapter.
///
/// A host without an adapter cannot scan, which is reported as
/// [`Error::PermissionDenied`].
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters
        .into_iter()
        .next()
        .ok_or(Error::PermissionDenied(PermissionDeniedReason::NoAdapter))
}

/// Address of a peripheral, if it reports a usable one.
async fn peripheral_address(peripheral: &Peripheral) -> Option<(MacAddress, Option<String>)> {
    let props = peripheral.properties().await.ok().flatten()?;
    let identifier = create_identifier(&props.address.to_string(), &peripheral.id());
    match MacAddress::parse(&identifier) {
        Ok(address) => Some((address, props.local_name)),
        Err(_) => {
            debug!("Skipping peripheral without a MAC address: {}", identifier);
            None
        }
    }
}

/// Build a handle for `peripheral` if its address is one of `filters`.
async fn match_candidate(peripheral: &Peripheral, filters: &ScanFilterSet) -> Option<DeviceHandle> {
    let (address, name) = peripheral_address(peripheral).await?;
    filters
        .contains(&address)
        .then(|| DeviceHandle::new(address, name))
}

/// [`BandLink`] over a `btleplug` adapter.
pub struct BleLink {
    adapter: Adapter,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BleLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleLink")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BleLink {
    /// Link on the first adapter with default timeouts.
    pub async fn new() -> Result<Self> {
        Self::with_config(ConnectionConfig::default()).await
    }

    pub async fn with_config(config: ConnectionConfig) -> Result<Self> {
        let adapter = get_adapter().await?;
        Ok(Self::from_adapter(adapter, config))
    }

    pub fn from_adapter(adapter: Adapter, config: ConnectionConfig) -> Self {
        Self { adapter, config }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    async fn find_peripheral(&self, address: &MacAddress) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            if let Some((found, _)) = peripheral_address(&peripheral).await
                && &found == address
            {
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }

    async fn first_known_candidate(&self, filters: &ScanFilterSet) -> Result<Option<DeviceHandle>> {
        for peripheral in self.adapter.peripherals().await? {
            if let Some(handle) = match_candidate(&peripheral, filters).await {
                return Ok(Some(handle));
            }
        }
        Ok(None)
    }

    async fn wait_for_candidate(&self, filters: &ScanFilterSet) -> Result<DeviceHandle> {
        let mut events = self.adapter.events().await?;

        if let Some(handle) = self.first_known_candidate(filters).await? {
            return Ok(handle);
        }

        while let Some(event) = events.next().await {
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let peripheral = match self.adapter.peripheral(&id).await {
                Ok(p) => p,
                Err(e) => {
                    debug!("Discovered peripheral vanished: {}", e);
                    continue;
                }
            };
            if let Some(handle) = match_candidate(&peripheral, filters).await {
                return Ok(handle);
            }
        }

        Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanEnded))
    }
}

#[async_trait]
impl BandLink for BleLink {
    type Session = BleSession;

    async fn connected_devices(&self) -> Result<Vec<DeviceHandle>> {
        let mut connected = Vec::new();
        for peripheral in self.adapter.peripherals().await? {
            if !peripheral.is_connected().await.unwrap_or(false) {
                continue;
            }
            if let Some((address, name)) = peripheral_address(&peripheral).await {
                debug!("Host is connected to {}", address);
                connected.push(DeviceHandle::new(address, name));
            }
        }
        Ok(connected)
    }

    #[tracing::instrument(level = "info", skip_all, fields(candidates = filters.len(), window = ?window))]
    async fn scan(&self, filters: &ScanFilterSet, window: Duration) -> Result<DeviceHandle> {
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| Error::PermissionDenied(PermissionDeniedReason::ScanRefused(e.to_string())))?;

        let adapter = self.adapter.clone();
        let guard = ScanGuard::new(move || async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });

        let result = timeout(window, self.wait_for_candidate(filters)).await;
        guard.stop().await;

        result.unwrap_or(Err(Error::DeviceNotFound(
            DeviceNotFoundReason::ScanTimeout { duration: window },
        )))
    }

    #[tracing::instrument(level = "info", skip_all, fields(device = %device.address))]
    async fn connect(&self, device: DeviceHandle, key: &AuthKey) -> Result<BleSession> {
        let device_id = Some(device.address.to_string());
        let peripheral = self.find_peripheral(&device.address).await?.ok_or_else(|| {
            Error::connection_failed(device_id.clone(), ConnectionFailureReason::UnknownDevice)
        })?;

        if !peripheral.is_connected().await.unwrap_or(false) {
            info!("Connecting to device...");
            timeout(self.config.connection_timeout, peripheral.connect())
                .await
                .map_err(|_| {
                    Error::connection_failed(device_id.clone(), ConnectionFailureReason::Timeout)
                })?
                .map_err(|e| {
                    Error::connection_failed(
                        device_id.clone(),
                        ConnectionFailureReason::BleError(e.to_string()),
                    )
                })?;
            info!("Connected!");
        }

        let session = match BleSession::open(
            self.adapter.clone(),
            device,
            peripheral.clone(),
            self.config.clone(),
        )
        .await
        {
            Ok(session) => session,
            Err(e) => {
                if let Err(release) = peripheral.disconnect().await {
                    debug!("Disconnect after failed discovery: {}", release);
                }
                return Err(e);
            }
        };
        if let Err(e) = session.authenticate(key).await {
            warn!("Authentication failed, releasing connection");
            if let Err(release) = session.disconnect().await {
                debug!("Disconnect after failed authentication: {}", release);
            }
            return Err(e);
        }
        Ok(session)
    }
}

/// One connected, authenticated band.
///
/// Call [`BandSession::disconnect`] before dropping; a session dropped while
/// still connected disconnects on a background task.
pub struct BleSession {
    /// Kept for disconnect events; the peripheral may also depend on it.
    adapter: Adapter,
    device: DeviceHandle,
    peripheral: Peripheral,
    characteristics: HashMap<Uuid, Characteristic>,
    keepalive: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    disconnected: AtomicBool,
    config: ConnectionConfig,
}

impl std::fmt::Debug for BleSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BleSession")
            .field("device", &self.device)
            .field("characteristics", &self.characteristics.len())
            .field("disconnected", &self.disconnected.load(Ordering::Relaxed))
            .finish()
    }
}

impl BleSession {
    async fn open(
        adapter: Adapter,
        device: DeviceHandle,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        info!("Discovering services...");
        timeout(config.discovery_timeout, peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", config.discovery_timeout))??;

        let services = peripheral.services();
        debug!("Found {} services", services.len());
        let characteristics = services
            .iter()
            .flat_map(|service| service.characteristics.iter())
            .map(|c| (c.uuid, c.clone()))
            .collect::<HashMap<_, _>>();

        Ok(Self {
            adapter,
            device,
            peripheral,
            characteristics,
            keepalive: tokio::sync::Mutex::new(None),
            disconnected: AtomicBool::new(false),
            config,
        })
    }

    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.characteristics.get(&uuid).cloned().ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8], kind: WriteType) -> Result<()> {
        timeout(
            self.config.write_timeout,
            self.peripheral.write(characteristic, data, kind),
        )
        .await
        .map_err(|_| {
            Error::timeout(
                format!("write characteristic {}", characteristic.uuid),
                self.config.write_timeout,
            )
        })??;
        Ok(())
    }

    #[tracing::instrument(level = "info", skip_all, fields(device = %self.device.address, key = %key.masked()))]
    async fn authenticate(&self, key: &AuthKey) -> Result<()> {
        let auth = self.find_characteristic(MIBAND_AUTH)?;
        self.peripheral.subscribe(&auth).await?;
        let mut notifications = self.peripheral.notifications().await?;

        self.write(&auth, &AUTH_REQUEST_CHALLENGE, WriteType::WithoutResponse)
            .await?;

        let exchange = async {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != MIBAND_AUTH {
                    continue;
                }
                match parse_auth_response(&notification.value) {
                    AuthResponse::Challenge(challenge) => {
                        debug!("Received challenge, answering");
                        let answer = send_encrypted_command(key, &challenge);
                        self.write(&auth, &answer, WriteType::WithoutResponse)
                            .await?;
                    }
                    AuthResponse::Accepted => return Ok(()),
                    AuthResponse::Rejected { opcode, status } => {
                        return Err(Error::AuthenticationFailed(format!(
                            "band answered {:#04x} with status {:#04x}",
                            opcode, status
                        )));
                    }
                    AuthResponse::Unexpected(bytes) => {
                        debug!("Ignoring auth notification {:02x?}", bytes);
                    }
                }
            }
            Err(Error::NotConnected)
        };

        let result = timeout(self.config.auth_timeout, exchange)
            .await
            .map_err(|_| Error::timeout("authenticate", self.config.auth_timeout))?;

        if let Err(e) = self.peripheral.unsubscribe(&auth).await {
            debug!("Unsubscribing from auth notifications failed: {}", e);
        }
        if result.is_ok() {
            info!("Authenticated");
        }
        result
    }

    /// Resolves when the adapter reports this peripheral as disconnected.
    async fn disconnected_signal(&self) -> Result<future::BoxFuture<'static, ()>> {
        let mut events = self.adapter.events().await?;
        let id: PeripheralId = self.peripheral.id();
        Ok(Box::pin(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event
                    && gone == id
                {
                    return;
                }
            }
        }))
    }

    async fn start_keepalive(&self, control: Characteristic) {
        let peripheral = self.peripheral.clone();
        let interval = self.config.keepalive_interval;
        let address = self.device.address.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                if let Err(e) = peripheral
                    .write(&control, &HR_PING, WriteType::WithResponse)
                    .await
                {
                    warn!("Keepalive to {} failed: {}", address, e);
                    break;
                }
                debug!("Keepalive sent to {}", address);
            }
        });
        if let Some(previous) = self.keepalive.lock().await.replace(handle) {
            previous.abort();
        }
    }
}

#[async_trait]
impl BandSession for BleSession {
    fn device(&self) -> &DeviceHandle {
        &self.device
    }

    #[tracing::instrument(level = "info", skip_all, fields(device = %self.device.address))]
    async fn heart_rate_stream(&self) -> Result<HeartRateStream> {
        let control = self.find_characteristic(HEART_RATE_CONTROL_POINT)?;
        let measurement = self.find_characteristic(HEART_RATE_MEASUREMENT)?;

        self.write(&control, &HR_STOP_MANUAL, WriteType::WithResponse)
            .await?;
        self.write(&control, &HR_STOP_CONTINUOUS, WriteType::WithResponse)
            .await?;

        self.peripheral.subscribe(&measurement).await?;
        let notifications = self.peripheral.notifications().await?;
        let disconnected = self.disconnected_signal().await?;

        self.write(&control, &HR_START_CONTINUOUS, WriteType::WithResponse)
            .await?;
        self.start_keepalive(control).await;
        info!("Continuous heart-rate measurement started");

        let address = self.device.address.clone();
        let values = notifications
            .filter(|n| future::ready(n.uuid == HEART_RATE_MEASUREMENT))
            .filter_map(move |n| {
                let parsed = parse_heart_rate_measurement(&n.value);
                if let Err(e) = &parsed {
                    warn!("Dropping malformed measurement from {}: {}", address, e);
                }
                future::ready(parsed.ok().map(Ok))
            })
            .take_until(disconnected)
            .chain(futures::stream::once(future::ready(Err(Error::NotConnected))));

        Ok(Box::pin(values))
    }

    #[tracing::instrument(level = "info", skip_all, fields(device = %self.device.address))]
    async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device...");
        self.disconnected.store(true, Ordering::SeqCst);

        if let Some(handle) = self.keepalive.lock().await.take() {
            handle.abort();
        }

        if let Ok(measurement) = self.find_characteristic(HEART_RATE_MEASUREMENT)
            && let Err(e) = self.peripheral.unsubscribe(&measurement).await
        {
            debug!("Unsubscribe failed: {}", e);
        }

        self.peripheral.disconnect().await?;
        Ok(())
    }
}

impl Drop for BleSession {
    fn drop(&mut self) {
        if self.disconnected.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(
            device_address = %self.device.address,
            "Session dropped without calling disconnect() - performing best-effort cleanup"
        );

        if let Ok(mut keepalive) = self.keepalive.try_lock()
            && let Some(handle) = keepalive.take()
        {
            handle.abort();
        }

        let peripheral = self.peripheral.clone();
        let id = format_peripheral_id(&peripheral.id());
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(peripheral = %id, error = %e, "Best-effort disconnect failed");
                } else {
                    debug!(peripheral = %id, "Best-effort disconnect completed");
                }
            });
        }
    }
}
