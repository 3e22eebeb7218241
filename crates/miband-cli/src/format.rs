//! Output formatting utilities for text, JSON, and CSV output.

use anyhow::Result;
use miband_core::{DeviceKeyRecord, ResolvedDevice, ResolvedVia};
use miband_store::StoredSample;
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Formatting options for output.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatOptions {
    /// Disable colored output.
    pub no_color: bool,
    /// Use compact JSON output (no pretty-printing).
    pub compact: bool,
    /// Print key material in full.
    pub show_keys: bool,
}

impl FormatOptions {
    pub fn new(no_color: bool) -> Self {
        Self {
            no_color,
            ..Self::default()
        }
    }

    pub fn with_compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }

    pub fn with_show_keys(mut self, show_keys: bool) -> Self {
        self.show_keys = show_keys;
        self
    }

    /// Serialize to JSON honoring the compact flag.
    pub fn as_json<T: Serialize>(&self, value: &T) -> Result<String> {
        let mut json = if self.compact {
            serde_json::to_string(value)?
        } else {
            serde_json::to_string_pretty(value)?
        };
        json.push('\n');
        Ok(json)
    }

    fn key_text(&self, record: &DeviceKeyRecord) -> String {
        if self.show_keys {
            record.key.to_hex()
        } else {
            record.key.masked()
        }
    }
}

/// Heart-rate zone used for coloring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Resting,
    Elevated,
    High,
}

impl Zone {
    pub fn of(bpm: u16) -> Self {
        match bpm {
            0..100 => Zone::Resting,
            100..140 => Zone::Elevated,
            _ => Zone::High,
        }
    }
}

/// Format a bpm value, colored by zone.
pub fn format_bpm(bpm: u16, no_color: bool) -> String {
    let text = format!("{} bpm", bpm);
    if no_color {
        return text;
    }
    match Zone::of(bpm) {
        Zone::Resting => text.green().to_string(),
        Zone::Elevated => text.yellow().to_string(),
        Zone::High => text.red().bold().to_string(),
    }
}

fn format_timestamp(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

// ---------------------------------------------------------------------------
// keys
// ---------------------------------------------------------------------------

pub fn format_keys_text(records: &[DeviceKeyRecord], opts: &FormatOptions) -> String {
    if records.is_empty() {
        return "No key found\n".to_string();
    }
    let mut output = format!("Found {} key(s):\n\n", records.len());
    for record in records {
        let address = if opts.no_color {
            record.address.to_string()
        } else {
            record.address.cyan().to_string()
        };
        output.push_str(&format!("  {}  {}\n", address, opts.key_text(record)));
    }
    output
}

pub fn format_keys_json(records: &[DeviceKeyRecord], opts: &FormatOptions) -> Result<String> {
    #[derive(Serialize)]
    struct KeyJson {
        address: String,
        key: String,
    }

    let keys: Vec<KeyJson> = records
        .iter()
        .map(|r| KeyJson {
            address: r.address.to_string(),
            key: opts.key_text(r),
        })
        .collect();
    opts.as_json(&keys)
}

#[must_use]
pub fn format_keys_csv(records: &[DeviceKeyRecord], opts: &FormatOptions) -> String {
    let mut output = String::from("address,key\n");
    for record in records {
        output.push_str(&format!("{},{}\n", record.address, opts.key_text(record)));
    }
    output
}

// ---------------------------------------------------------------------------
// find
// ---------------------------------------------------------------------------

pub fn format_resolved_text(resolved: &ResolvedDevice, opts: &FormatOptions) -> String {
    let name = resolved.device.name.as_deref().unwrap_or("Unknown");
    let via = match resolved.via {
        ResolvedVia::Connected => "already connected",
        ResolvedVia::Discovered => "discovered by scan",
    };
    if opts.no_color {
        format!("{} ({}) - {}\n", name, resolved.device.address, via)
    } else {
        format!(
            "{} ({}) - {}\n",
            name.green(),
            resolved.device.address.cyan(),
            via.dimmed()
        )
    }
}

// ---------------------------------------------------------------------------
// history
// ---------------------------------------------------------------------------

pub fn format_samples_text(samples: &[StoredSample], opts: &FormatOptions) -> String {
    if samples.is_empty() {
        return "No samples found.\n".to_string();
    }

    let mut output = format!("History ({} samples):\n\n", samples.len());
    output.push_str(&format!(
        "{:<32}  {:<17}  {}\n",
        "Timestamp", "Device", "Heart rate"
    ));
    for sample in samples {
        output.push_str(&format!(
            "{:<32}  {:<17}  {}\n",
            format_timestamp(sample.captured_at),
            sample.device_id,
            format_bpm(sample.bpm, opts.no_color)
        ));
    }

    let total: u64 = samples.iter().map(|s| u64::from(s.bpm)).sum();
    let min = samples.iter().map(|s| s.bpm).min().unwrap_or_default();
    let max = samples.iter().map(|s| s.bpm).max().unwrap_or_default();
    output.push_str(&format!(
        "\nmin {} / avg {} / max {} bpm\n",
        min,
        total / samples.len() as u64,
        max
    ));
    output
}

pub fn format_samples_json(samples: &[StoredSample], opts: &FormatOptions) -> Result<String> {
    opts.as_json(&samples)
}
