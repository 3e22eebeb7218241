//! Example: Streaming Heart Rate
//!
//! Connects to a band and prints each heart-rate value until Ctrl+C.
//!
//! Run with:
//! `MIBAND_DEVICE=AA:BB:CC:DD:EE:FF MIBAND_KEY=<32 hex digits> cargo run --example stream_heart_rate`

use std::sync::Arc;

use async_trait::async_trait;
use miband_core::{
    AuthKey, BleLink, BpmSample, DeviceHandle, HeartRateSink, LifecycleReporter, LiveStatus,
    MonitorRequest, SessionManager,
};
use tokio_util::sync::CancellationToken;

/// Prints samples instead of storing them.
struct PrintSink;

#[async_trait]
impl HeartRateSink for PrintSink {
    async fn insert(
        &mut self,
        device: &DeviceHandle,
        sample: &BpmSample,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        println!("{}  {}  {} bpm", sample.timestamp, device.address, sample.bpm);
        Ok(())
    }
}

struct CtrlC(CancellationToken);

impl LifecycleReporter for CtrlC {
    fn report_status(&self, status: LiveStatus) {
        if status == LiveStatus::Connecting {
            println!("Connecting...");
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.0.clone()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let address = std::env::var("MIBAND_DEVICE")?;
    let key = AuthKey::from_hex(&std::env::var("MIBAND_KEY")?)?;
    let request = MonitorRequest::for_device(Some(&address), Some(key.as_bytes()))?;

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let manager = SessionManager::new(Arc::new(BleLink::new().await?));
    let report = manager
        .monitor(&request, &mut PrintSink, &CtrlC(token))
        .await?;
    println!(
        "Stopped after {} sample(s) from {}",
        report.samples_persisted, report.device
    );
    Ok(())
}
