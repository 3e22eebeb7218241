//! Keys command implementation.

use std::path::{Path, PathBuf};

use anyhow::Result;
use miband_core::DeviceKeyRecord;

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_keys_csv, format_keys_json, format_keys_text};
use crate::util::{load_keys, write_output};

pub fn cmd_keys(
    dir: &Path,
    format: OutputFormat,
    output: Option<&PathBuf>,
    opts: &FormatOptions,
) -> Result<()> {
    let index = load_keys(dir)?;
    tracing::debug!("{} key record(s) in {}", index.len(), dir.display());

    let records: Vec<DeviceKeyRecord> = index.iter().cloned().collect();
    let content = match format {
        OutputFormat::Text => format_keys_text(&records, opts),
        OutputFormat::Json => format_keys_json(&records, opts)?,
        OutputFormat::Csv => format_keys_csv(&records, opts),
    };
    write_output(output, &content)
}
