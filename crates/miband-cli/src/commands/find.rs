//! Find command implementation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use miband_core::{BleLink, DeviceScanner, ScanOptions};

use crate::format::{FormatOptions, format_resolved_text};
use crate::util::{load_keys, write_output};

pub async fn cmd_find(
    dir: &Path,
    timeout: Option<u64>,
    output: Option<&PathBuf>,
    quiet: bool,
    opts: &FormatOptions,
) -> Result<()> {
    let index = load_keys(dir)?;
    if index.is_empty() {
        write_output(output, "No key found\n")?;
        return Ok(());
    }

    let mut scan = ScanOptions::new();
    if let Some(secs) = timeout {
        scan = scan.window_secs(secs);
    }
    if !quiet {
        eprintln!(
            "Looking for {} band(s) (timeout: {}s)...",
            index.len(),
            scan.window.as_secs()
        );
    }

    let link = BleLink::new()
        .await
        .context("Failed to open the Bluetooth adapter")?;
    let scanner = DeviceScanner::with_options(Arc::new(link), scan);
    let resolved = scanner
        .resolve_detailed(&index.filters())
        .await
        .context("Failed to find a band")?;

    write_output(output, &format_resolved_text(&resolved, opts))
}
