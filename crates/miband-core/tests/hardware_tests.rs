//! Hardware integration tests for miband-core
//!
//! These tests require a Bluetooth adapter and a paired band:
//! ```
//! cargo test --package miband-core --test hardware_tests -- --ignored --nocapture
//! ```
//!
//! Configure the band via environment variables:
//! - `MIBAND_DEVICE`: the band's MAC address
//! - `MIBAND_KEY`: its 32-digit hex authentication key

use std::env;
use std::sync::Arc;
use std::time::Duration;

use miband_core::mock::{MockSink, RecordingReporter};
use miband_core::{
    AuthKey, BandLink, BandSession, BleLink, DeviceScanner, MonitorRequest, ScanFilterSet,
    SessionManager,
};
use tokio::time::timeout;

/// Default timeout for BLE operations
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn band() -> Option<(String, AuthKey)> {
    let address = env::var("MIBAND_DEVICE").ok()?;
    let key = AuthKey::from_hex(&env::var("MIBAND_KEY").ok()?).ok()?;
    Some((address, key))
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_resolve_band() {
    let Some((address, _)) = band() else {
        eprintln!("MIBAND_DEVICE not set, skipping");
        return;
    };
    let link = Arc::new(BleLink::new().await.expect("adapter"));
    let scanner = DeviceScanner::new(link);
    let filters = ScanFilterSet::new([address.parse().unwrap()]);

    let device = timeout(BLE_TIMEOUT, scanner.resolve(&filters))
        .await
        .expect("resolve timed out")
        .expect("resolve failed");
    println!("Resolved {}", device);
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_authenticate_and_read_heart_rate() {
    use futures::StreamExt;

    let Some((address, key)) = band() else {
        eprintln!("MIBAND_DEVICE / MIBAND_KEY not set, skipping");
        return;
    };
    let link = Arc::new(BleLink::new().await.expect("adapter"));
    let device = DeviceScanner::new(Arc::clone(&link))
        .resolve(&ScanFilterSet::new([address.parse().unwrap()]))
        .await
        .expect("resolve failed");

    let session = timeout(BLE_TIMEOUT, link.connect(device, &key))
        .await
        .expect("connect timed out")
        .expect("connect failed");

    let mut stream = session.heart_rate_stream().await.expect("stream");
    let bpm = timeout(Duration::from_secs(60), stream.next())
        .await
        .expect("no heart-rate notification within 60s");
    println!("Heart rate: {:?}", bpm);
    drop(stream);

    session.disconnect().await.expect("disconnect");
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_monitor_for_a_few_samples() {
    let Some((address, key)) = band() else {
        eprintln!("MIBAND_DEVICE / MIBAND_KEY not set, skipping");
        return;
    };
    let request =
        MonitorRequest::for_device(Some(&address), Some(key.as_bytes())).expect("request");
    let manager = SessionManager::new(Arc::new(BleLink::new().await.expect("adapter")));
    let mut sink = MockSink::new();
    let reporter = RecordingReporter::new().cancel_after_samples(3);

    let report = timeout(Duration::from_secs(120), manager.monitor(&request, &mut sink, &reporter))
        .await
        .expect("monitor timed out")
        .expect("monitor failed");
    assert_eq!(report.samples_persisted, 3);
    println!("Samples: {:?}", sink.bpms());
}
