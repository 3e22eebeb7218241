//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Csv,
}

/// Where to read key files from
#[derive(Debug, Clone, Args)]
pub struct KeyDirArgs {
    /// Folder holding exported `miband<ADDRESS>.txt` key files
    #[arg(long, env = "MIBAND_KEY_DIR")]
    pub dir: Option<PathBuf>,
}

/// Scan window arguments
#[derive(Debug, Clone, Args)]
pub struct ScanArgs {
    /// Scan timeout in seconds (defaults to the config file, then 10)
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,
}

#[derive(Parser)]
#[command(name = "miband")]
#[command(author, version, about = "Record realtime heart rate from a Mi Band", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output compact JSON (no pretty-printing)
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(
        long,
        global = true,
        env = "NO_COLOR",
        value_parser = clap::builder::FalseyValueParser::new()
    )]
    pub no_color: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the device keys found in the key folder
    Keys {
        #[command(flatten)]
        keys: KeyDirArgs,

        /// Print full key material instead of a masked form
        #[arg(long)]
        show_keys: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Find a band that has a key, preferring ones already connected
    Find {
        #[command(flatten)]
        keys: KeyDirArgs,

        #[command(flatten)]
        scan: ScanArgs,
    },

    /// Stream heart rate from a band into the local database
    Monitor {
        #[command(flatten)]
        keys: KeyDirArgs,

        /// Band MAC address (skips the key folder, requires --key)
        #[arg(short, long, env = "MIBAND_DEVICE", conflicts_with = "dir")]
        device: Option<String>,

        /// Authentication key as 32 hex digits (requires --device)
        #[arg(short, long, env = "MIBAND_KEY", hide_env_values = true)]
        key: Option<String>,

        #[command(flatten)]
        scan: ScanArgs,

        /// Database path (defaults to the platform data directory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Samples buffered between the band and the database
        #[arg(long)]
        buffer: Option<usize>,
    },

    /// Show recorded heart-rate samples
    History {
        /// Only samples from this band
        #[arg(short, long)]
        device: Option<String>,

        /// Only samples since this date/time (RFC3339 or YYYY-MM-DD)
        #[arg(long)]
        since: Option<String>,

        /// Maximum number of samples (0 for all)
        #[arg(short = 'n', long, default_value = "0")]
        limit: u32,

        /// Database path (defaults to the platform data directory)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_color_flag() {
        let cli = Cli::try_parse_from(["miband", "keys", "--no-color"]).unwrap();
        assert!(cli.no_color);
    }

    #[test]
    fn test_monitor_args() {
        let cli = Cli::try_parse_from([
            "miband",
            "monitor",
            "--device",
            "AA:BB:CC:DD:EE:FF",
            "--key",
            "0123456789abcdef0123456789abcdef",
            "-T",
            "5",
            "--buffer",
            "4",
        ])
        .unwrap();
        match cli.command {
            Commands::Monitor {
                device,
                key,
                scan,
                buffer,
                ..
            } => {
                assert_eq!(device.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
                assert!(key.is_some());
                assert_eq!(scan.timeout, Some(5));
                assert_eq!(buffer, Some(4));
            }
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_device_conflicts_with_dir() {
        let result = Cli::try_parse_from([
            "miband",
            "monitor",
            "--dir",
            "/tmp",
            "--device",
            "AA:BB:CC:DD:EE:FF",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_history_defaults() {
        let cli = Cli::try_parse_from(["miband", "history"]).unwrap();
        match cli.command {
            Commands::History { limit, format, .. } => {
                assert_eq!(limit, 0);
                assert_eq!(format, OutputFormat::Text);
            }
            _ => panic!("expected history"),
        }
    }
}
