//! ledcdev daemon.
//!
//! Brings up the LED device per the configuration and serves a line console
//! on stdin/stdout until interrupted or stdin closes. Everything acquired is
//! released on the way out, leaving the LED off.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{self, SignalKind};
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing_subscriber::filter::LevelFilter;

use ledcdev::config::{Config, GpioBackend};
use ledcdev::console::Console;
use ledcdev::gpio::LineSpec;
use ledcdev::host::Registry;
use ledcdev::service::{self, Service};
use ledcdev::tracing::{self, prelude::*};

#[derive(Parser)]
#[command(name = "ledcdevd", about = "GPIO LED character device daemon")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Find the LED line by name
    #[arg(long, conflicts_with = "line")]
    label: Option<String>,

    /// Use this LED line number
    #[arg(long)]
    line: Option<u32>,

    /// Drive a real GPIO chip, e.g. /dev/gpiochip0
    #[arg(long)]
    chip: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(name) = &self.label {
            config.line = LineSpec::Label { name: name.clone() };
        }
        if let Some(line) = self.line {
            config.line = LineSpec::Number { line };
        }
        if let Some(chip) = &self.chip {
            config.gpio = GpioBackend::Cdev { chip: chip.clone() };
        }
    }
}

/// Forward stdin lines to the console.
///
/// Blocking stdin reads cannot be cancelled, so they run on a plain thread
/// the runtime never waits for. The channel closes at EOF.
fn spawn_stdin_reader() -> mpsc::Receiver<std::io::Result<String>> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

/// Serve console commands until input ends or cancellation.
async fn console_task(
    mut console: Console,
    mut input: mpsc::Receiver<std::io::Result<String>>,
    running: CancellationToken,
) {
    trace!("Console started.");

    loop {
        let line = tokio::select! {
            _ = running.cancelled() => break,
            line = input.recv() => line,
        };
        match line {
            Some(Ok(line)) => {
                if let Some(reply) = console.handle_line(&line) {
                    println!("{reply}");
                }
            }
            None => {
                debug!("Console input closed.");
                running.cancel();
                break;
            }
            Some(Err(e)) => {
                error!("Error {e} reading console input.");
                running.cancel();
                break;
            }
        }
    }

    trace!("Console stopped.");
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing::init_journald_or_stdout(LevelFilter::INFO);
    let args = Args::parse();

    let mut config = Config::read(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    let registry = Arc::new(Registry::new());
    let gpio = service::gpio_controller(&config.gpio)?;
    let service = Service::start(&config, registry.clone(), gpio)?;

    let running = CancellationToken::new();
    let tracker = TaskTracker::new();
    tracker.spawn(console_task(
        Console::new(registry.clone()),
        spawn_stdin_reader(),
        running.clone(),
    ));
    tracker.close();
    info!(devices = service.device_count(), "Started.");

    let mut sigint = unix::signal(SignalKind::interrupt())?;
    let mut sigterm = unix::signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
        _ = running.cancelled() => {},
    }

    trace!("Shutting down.");
    running.cancel();
    tracker.wait().await;

    service.stop();
    info!("Exiting.");
    Ok(())
}
