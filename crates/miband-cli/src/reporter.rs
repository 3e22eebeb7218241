//! Console lifecycle reporter.

use std::io::{self, Write};

use miband_core::{LifecycleReporter, LiveStatus};
use tokio_util::sync::CancellationToken;

use crate::format::format_bpm;

/// Prints session status and cancels on Ctrl+C.
///
/// `Connecting…` goes to stderr unless quiet; each sample prints
/// `<bpm> bpm` on stdout.
#[derive(Debug, Clone)]
pub struct ConsoleReporter {
    token: CancellationToken,
    quiet: bool,
    no_color: bool,
}

impl ConsoleReporter {
    pub fn new(quiet: bool, no_color: bool) -> Self {
        Self {
            token: CancellationToken::new(),
            quiet,
            no_color,
        }
    }

    /// Cancel the session when the process receives Ctrl+C.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn cancel_on_ctrl_c(self) -> Self {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if result.is_ok() {
                        eprintln!("\nShutting down...");
                        token.cancel();
                    }
                }
                _ = token.cancelled() => {}
            }
        });
        self
    }

    /// Line printed for a status update, if any.
    pub fn render(&self, status: LiveStatus) -> Option<String> {
        match status {
            LiveStatus::Connecting if self.quiet => None,
            LiveStatus::Connecting => Some("Connecting…".to_string()),
            LiveStatus::Bpm(bpm) => Some(format_bpm(bpm, self.no_color)),
        }
    }
}

impl LifecycleReporter for ConsoleReporter {
    fn report_status(&self, status: LiveStatus) {
        let Some(line) = self.render(status) else {
            return;
        };
        match status {
            LiveStatus::Connecting => eprintln!("{}", line),
            LiveStatus::Bpm(_) => {
                let mut stdout = io::stdout().lock();
                // A closed stdout must not end the session.
                let _ = writeln!(stdout, "{}", line).and_then(|_| stdout.flush());
            }
        }
    }

    fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }
}
