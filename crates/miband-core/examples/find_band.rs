//! Example: Finding a Band From a Key Folder
//!
//! Reads every `miband<HEX12>.txt` export in a folder and resolves one of
//! the bands they describe, preferring one already connected to this host.
//!
//! Run with: `cargo run --example find_band -- <key-folder>`

use std::sync::Arc;

use miband_core::{BleLink, DeviceScanner, KeyExtractor, ResolvedVia, ScanOptions};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let folder = std::env::args().nth(1).unwrap_or_else(|| ".".to_string());
    let keys = KeyExtractor::scan_dir(&folder)?;
    if keys.is_empty() {
        println!("No key files found in {}", folder);
        return Ok(());
    }

    println!("Known bands:");
    for record in keys.iter() {
        println!("  {} (key {})", record.address, record.key.masked());
    }
    println!();

    let link = Arc::new(BleLink::new().await?);
    let scanner = DeviceScanner::with_options(link, ScanOptions::new().window_secs(10));

    match scanner.resolve_detailed(&keys.filters()).await {
        Ok(resolved) => {
            let via = match resolved.via {
                ResolvedVia::Connected => "already connected",
                ResolvedVia::Discovered => "discovered",
            };
            println!("Found {} ({})", resolved.device, via);
        }
        Err(e) if e.is_not_found() => {
            println!("No band found.");
            println!();
            println!("Make sure:");
            println!("  - The band is charged and near this computer");
            println!("  - Bluetooth is enabled");
            println!("  - The band is not connected to a phone");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
