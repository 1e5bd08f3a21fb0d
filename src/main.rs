#![deny(
    clippy::all,
    clippy::cargo,
    clippy::nursery,
    clippy::must_use_candidate
)]
// now allow a few rules which are denied by the above's statement
#![allow(clippy::multiple_crate_versions)]
#![deny(missing_debug_implementations)]
#![deny(rustdoc::all)]

//! usb-monitor: a supervisor that power-cycles USB devices on programmable
//! hubs when they stop responding.

mod backend;
mod cli;
mod config;
mod constants;
mod event_loop;
mod hub;
mod lock;
mod port;
#[cfg(test)]
mod proptests;
mod signals;
mod supervisor;
mod topology;
mod usb;

use std::fs::File;
use std::io;
use std::io::Write as _;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use futures::StreamExt;
use nusb::MaybeFuture;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Where the log sink writes to: standard error, or a truncated file when
/// `-o` is given.
#[derive(Debug, Clone)]
enum LogSink {
    Stderr,
    File(Arc<File>),
}

impl io::Write for LogSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Stderr => io::stderr().write(buf),
            Self::File(file) => (&**file).write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Stderr => io::stderr().flush(),
            Self::File(file) => (&**file).flush(),
        }
    }
}

fn init_logging(args: &Cli) -> Result<()> {
    let sink = match &args.output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create log file {}", path.display()))?;
            LogSink::File(Arc::new(file))
        }
        None => LogSink::Stderr,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .with_writer(move || sink.clone())
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;

    // Log messages from the log crate as well.
    tracing_log::LogTracer::init()?;
    Ok(())
}

fn daemonize_if_requested(args: &Cli) -> Result<()> {
    if !args.daemonize {
        return Ok(());
    }
    daemonize::Daemonize::new()
        .start()
        .context("failed to daemonize")?;
    Ok(())
}

async fn run(args: Cli) -> Result<()> {
    let config = config::Config::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    let mut loop_state = event_loop::EventLoop::new(Instant::now());
    loop_state.onboard_configured_hubs(&config);
    loop_state.enumerate_present_devices(Instant::now());

    let (signal_tx, mut signal_rx) = tokio::sync::mpsc::unbounded_channel();
    let _signal_task = signals::spawn_listener(signal_tx).context("failed to install SIGUSR1 handler")?;

    let watch = nusb::watch_devices()
        .wait()
        .context("failed to start USB hotplug watch")?;
    let mut usb_events = watch.map(usb::UsbEvent::from);

    info!("usb-monitor is up");

    loop {
        loop_state.tick(&mut signal_rx, &mut usb_events).await;
    }
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_logging(&args)?;
    daemonize_if_requested(&args)?;

    let _lock = lock::SingletonLock::acquire(&args.lock_file)
        .with_context(|| format!("failed to acquire singleton lock at {}", args.lock_file.display()))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(args))
}
