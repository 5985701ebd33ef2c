//! Starting-soon pipe filter
//!
//! Reads JSON event snapshots from stdin, one per line, and writes each
//! snapshot back to stdout at the moment it is about to start. Meant to sit
//! at the end of a pipeline fed by a websocket reader; anything downstream
//! only sees events that are starting.

use clap::Parser;
use meetings_core::{SchedulerConfig, StartingSoonScheduler};
use meetings_domain::EventSnapshot;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "meetings-filter",
    about = "Emit calendar events when they are about to start"
)]
struct Args {
    /// Seconds before an event's start to emit it
    #[arg(short = 'b', long, default_value_t = 30)]
    lead_time_secs: u64,

    /// Drop events that have already started instead of emitting them
    /// immediately
    #[arg(short = 'k', long, default_value_t = false)]
    skip_started: bool,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Diagnostics go to stderr; stdout carries only firings.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let scheduler = StartingSoonScheduler::new(SchedulerConfig {
        lead_time: std::time::Duration::from_secs(args.lead_time_secs),
        skip_in_progress: args.skip_started,
        output_capacity: 16,
    });

    let (events_tx, events_rx) = mpsc::channel(16);
    let mut firings = scheduler.run(events_rx, CancellationToken::new());

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventSnapshot>(line) {
                        Ok(event) => {
                            if events_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping undecodable event"),
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "error reading stdin");
                    break;
                }
            }
        }
    });

    let mut stdout = tokio::io::stdout();
    while let Some(event) = firings.recv().await {
        match serde_json::to_string(&event) {
            Ok(mut line) => {
                line.push('\n');
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                let _ = stdout.flush().await;
            }
            Err(e) => warn!(error = %e, "could not encode firing"),
        }
    }

    reader.await.ok();
    Ok(())
}
