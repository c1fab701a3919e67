//! Specstream CLI - adapter entry point
//!
//! Reads newline-delimited JSON runner events on stdin, drives the run
//! controller, and writes service-message lines to stdout. Diagnostics go
//! to stderr via tracing; the protocol stream stays clean.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use specstream_common::RunnerEvent;
use specstream_reporter::{MessageSink, ReporterConfig, RunController};

/// Specstream - streaming test-run reporter emitting IDE service messages
#[derive(Parser, Debug)]
#[command(name = "specstream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Runner configuration file; its basename labels the run scope and its
    /// full path becomes the root navigation hint
    #[arg(long)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// Line sink over stdout, flushed per line so the consumer sees each
/// message as soon as it is emitted.
struct StdoutSink(std::io::Stdout);

impl MessageSink for StdoutSink {
    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        let mut out = self.0.lock();
        out.write_all(line.as_bytes())?;
        out.write_all(b"\n")?;
        out.flush()
    }
}

fn dispatch(controller: &mut RunController, event: RunnerEvent) -> specstream_common::Result<()> {
    match event {
        RunnerEvent::RunStart { browsers } => controller.on_run_start(&browsers),
        RunnerEvent::BrowserError { browser, error } => {
            controller.on_browser_error(&browser, &error)
        }
        RunnerEvent::BrowserLog { log, .. } => controller.on_browser_log(&log),
        RunnerEvent::BrowsersChange { browsers } => controller.browsers_changed(&browsers),
        RunnerEvent::SpecComplete { browser, result } => {
            controller.on_spec_complete(&browser, &result)
        }
        RunnerEvent::RunComplete => controller.on_run_complete(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config_name = args
        .config
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| args.config.display().to_string());
    let config = ReporterConfig {
        config_name,
        config_path: Some(args.config.display().to_string()),
    };

    let mut controller = RunController::new(config, Box::new(StdoutSink(std::io::stdout())));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading runner events")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        // Malformed JSON is transport noise, not tree corruption: skip it.
        // Structural errors mean the tree can no longer be trusted: stop.
        let event: RunnerEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping malformed event line");
                continue;
            }
        };
        dispatch(&mut controller, event).context("reporting failed")?;
    }

    // Runner went away mid-run: leave a well-formed stream behind.
    controller.abort().context("finalizing interrupted run")?;
    Ok(())
}
