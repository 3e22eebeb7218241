//! Monitor command implementation.
//!
//! Runs one session: resolve a band from the key folder (or the explicit
//! `--device`/`--key` pair), authenticate, and append every heart-rate
//! sample to the local database until Ctrl+C or the link drops.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use miband_core::{BleLink, Error, MonitorOptions, PipelineOptions, ScanOptions, SessionManager};
use miband_store::Store;
use owo_colors::OwoColorize;

use crate::reporter::ConsoleReporter;
use crate::sink::StoreSink;
use crate::util::build_request;

/// Arguments for the monitor command.
pub struct MonitorArgs {
    pub device: Option<String>,
    pub key: Option<String>,
    pub key_dir: PathBuf,
    pub timeout: Option<u64>,
    pub db: PathBuf,
    pub buffer: Option<usize>,
    pub quiet: bool,
    pub no_color: bool,
}

impl MonitorArgs {
    fn options(&self) -> MonitorOptions {
        let mut scan = ScanOptions::new();
        if let Some(secs) = self.timeout {
            scan = scan.window_secs(secs);
        }
        let mut pipeline = PipelineOptions::new();
        if let Some(size) = self.buffer {
            pipeline = pipeline.buffer_size(size);
        }
        MonitorOptions::new().scan(scan).pipeline(pipeline)
    }
}

pub async fn cmd_monitor(args: MonitorArgs) -> Result<()> {
    // Credentials are checked before the radio or the database is touched.
    let request = match build_request(args.device.as_deref(), args.key.as_deref(), &args.key_dir)
    {
        Ok(request) => request,
        Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::NoKeys)) => {
            eprintln!("No key found in {}", args.key_dir.display());
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let options = args.options();
    options.validate()?;

    let store = Store::open(&args.db)
        .with_context(|| format!("Failed to open database {}", args.db.display()))?;
    let link = BleLink::new()
        .await
        .context("Failed to open the Bluetooth adapter")?;

    let manager = SessionManager::with_options(Arc::new(link), options);
    let reporter = ConsoleReporter::new(args.quiet, args.no_color).cancel_on_ctrl_c();
    let mut sink = StoreSink::new(store);

    match manager.monitor(&request, &mut sink, &reporter).await {
        Ok(report) => {
            if !args.quiet {
                let device = if args.no_color {
                    report.device.to_string()
                } else {
                    report.device.to_string().cyan().to_string()
                };
                eprintln!(
                    "Stopped. {} sample(s) from {} saved to {}",
                    report.samples_persisted,
                    device,
                    args.db.display()
                );
            }
            Ok(())
        }
        Err(Error::Cancelled) => {
            if !args.quiet {
                eprintln!("Cancelled before streaming started.");
            }
            Ok(())
        }
        Err(e @ Error::LinkFailure { .. }) => {
            Err(e).with_context(|| format!("Session ended; samples kept in {}", args.db.display()))
        }
        Err(e) => Err(e).context("Monitoring failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> MonitorArgs {
        MonitorArgs {
            device: None,
            key: None,
            key_dir: PathBuf::from("."),
            timeout: None,
            db: PathBuf::from("data.db"),
            buffer: None,
            quiet: true,
            no_color: true,
        }
    }

    #[test]
    fn test_default_options() {
        let options = args().options();
        assert_eq!(options.scan.window.as_secs(), 10);
        assert_eq!(options.pipeline.buffer_size, 16);
    }

    #[test]
    fn test_options_from_flags() {
        let options = MonitorArgs {
            timeout: Some(3),
            buffer: Some(2),
            ..args()
        }
        .options();
        assert_eq!(options.scan.window.as_secs(), 3);
        assert_eq!(options.pipeline.buffer_size, 2);
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        let options = MonitorArgs {
            buffer: Some(0),
            ..args()
        }
        .options();
        assert!(options.validate().is_err());
    }

    #[tokio::test]
    async fn test_partial_credentials_fail_before_bluetooth() {
        let dir = tempfile::tempdir().unwrap();
        let err = cmd_monitor(MonitorArgs {
            device: Some("AA:BB:CC:DD:EE:FF".into()),
            db: dir.path().join("data.db"),
            ..args()
        })
        .await
        .unwrap_err();

        assert!(err.to_string().contains("missing device-key"));
        assert!(!dir.path().join("data.db").exists());
    }

    #[tokio::test]
    async fn test_empty_key_folder_is_informational() {
        let dir = tempfile::tempdir().unwrap();
        let result = cmd_monitor(MonitorArgs {
            key_dir: dir.path().to_path_buf(),
            db: dir.path().join("data.db"),
            ..args()
        })
        .await;

        assert!(result.is_ok());
        assert!(!dir.path().join("data.db").exists());
    }
}
