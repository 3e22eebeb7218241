//! History command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use miband_core::MacAddress;
use miband_store::{SampleQuery, Store};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_samples_json, format_samples_text};
use crate::util::{parse_datetime, write_output};

/// Arguments for the history command.
pub struct HistoryArgs<'a> {
    pub device: Option<String>,
    pub since: Option<String>,
    pub limit: u32,
    pub db: PathBuf,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
    pub opts: &'a FormatOptions,
}

impl HistoryArgs<'_> {
    /// Build the store query, failing fast on malformed filters.
    fn query(&self) -> Result<SampleQuery> {
        let mut query = SampleQuery::new();
        if let Some(device) = &self.device {
            let address = MacAddress::parse(device)
                .with_context(|| format!("Invalid device address '{}'", device))?;
            query = query.device(address.as_str());
        }
        if let Some(since) = &self.since {
            query = query.since(parse_datetime(since)?);
        }
        if self.limit > 0 {
            query = query.limit(self.limit);
        }
        Ok(query)
    }
}

pub fn cmd_history(args: HistoryArgs<'_>) -> Result<()> {
    let query = args.query()?;
    let store = Store::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;

    let content = match args.format {
        OutputFormat::Csv => {
            let mut buffer = Vec::new();
            let rows = store
                .export_csv(&query, &mut buffer)
                .context("Failed to export samples")?;
            tracing::debug!("Exported {} sample(s)", rows);
            String::from_utf8(buffer).context("CSV export was not UTF-8")?
        }
        format => {
            let samples = store
                .query_samples(&query)
                .context("Failed to query samples")?;
            if !args.quiet && format == OutputFormat::Text {
                eprintln!("Read {} sample(s) from {}", samples.len(), args.db.display());
            }
            match format {
                OutputFormat::Json => format_samples_json(&samples, args.opts)?,
                _ => format_samples_text(&samples, args.opts),
            }
        }
    };

    write_output(args.output, &content)
}
