//! Utility functions for CLI operations.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use miband_core::{AuthKey, KeyExtractor, KeyIndex, MonitorRequest};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Parse a date/time string in RFC3339 or YYYY-MM-DD format.
pub fn parse_datetime(s: &str) -> Result<OffsetDateTime> {
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return Ok(dt);
    }

    // YYYY-MM-DD is taken as the start of that day in UTC
    let format = time::format_description::parse("[year]-[month]-[day]")?;
    if let Ok(date) = time::Date::parse(s, &format) {
        return Ok(date.midnight().assume_utc());
    }

    bail!(
        "Invalid date format '{}'. Use RFC3339 (e.g., 2024-01-15T10:30:00Z) or YYYY-MM-DD",
        s
    )
}

/// Build the key index for a folder.
pub fn load_keys(dir: &Path) -> Result<KeyIndex> {
    KeyExtractor::scan_dir(dir)
        .with_context(|| format!("Key extraction failed for {}", dir.display()))
}

/// Build a monitoring request from explicit credentials or a key folder.
///
/// Explicit `--device`/`--key` win; a partial pair is rejected by the core
/// with a configuration error naming the missing part.
pub fn build_request(
    device: Option<&str>,
    key: Option<&str>,
    key_dir: &Path,
) -> Result<MonitorRequest> {
    if device.is_none() && key.is_none() {
        return Ok(MonitorRequest::from_index(load_keys(key_dir)?)?);
    }

    let key = key
        .map(AuthKey::from_hex)
        .transpose()
        .context("Invalid --key")?;
    Ok(MonitorRequest::for_device(
        device,
        key.as_ref().map(|k| k.as_bytes().as_slice()),
    )?)
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}
