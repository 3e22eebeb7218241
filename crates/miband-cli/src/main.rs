use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use miband_cli::cli::{Cli, Commands};
use miband_cli::commands::{
    HistoryArgs, MonitorArgs, cmd_find, cmd_history, cmd_keys, cmd_monitor,
};
use miband_cli::config::Config;
use miband_cli::format::FormatOptions;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "miband", &mut io::stdout());
        return Ok(());
    }

    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let opts = FormatOptions::new(cli.no_color).with_compact(cli.compact);
    let output = cli.output.as_ref();

    match cli.command {
        Commands::Keys {
            keys,
            show_keys,
            format,
        } => {
            let dir = config.resolve_key_dir(keys.dir);
            cmd_keys(&dir, format, output, &opts.with_show_keys(show_keys))?;
        }
        Commands::Find { keys, scan } => {
            let dir = config.resolve_key_dir(keys.dir);
            let timeout = config.resolve_scan_timeout(scan.timeout);
            cmd_find(&dir, timeout, output, cli.quiet, &opts).await?;
        }
        Commands::Monitor {
            keys,
            device,
            key,
            scan,
            db,
            buffer,
        } => {
            cmd_monitor(MonitorArgs {
                device,
                key,
                key_dir: config.resolve_key_dir(keys.dir),
                timeout: config.resolve_scan_timeout(scan.timeout),
                db: config.resolve_database(db),
                buffer: config.resolve_buffer_size(buffer),
                quiet: cli.quiet,
                no_color: cli.no_color,
            })
            .await?;
        }
        Commands::History {
            device,
            since,
            limit,
            db,
            format,
        } => {
            cmd_history(HistoryArgs {
                device,
                since,
                limit,
                db: config.resolve_database(db),
                format,
                output,
                quiet: cli.quiet,
                opts: &opts,
            })?;
        }
        Commands::Completions { .. } => unreachable!("handled above"),
    }

    Ok(())
}
