//! RayOS Gaze - console consumer
//!
//! Brings the eye tracker up, prints state changes and gaze points, and takes
//! `retry`, `resolve` and `quit` on stdin. Every raw sample lands in the CSV
//! sample log.

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::Receiver;
use log::LevelFilter;
use rayos_gaze::device::{
    DeviceFactory, SimulatedDeviceFactory, StaticConfigurationProvider, UdpDeviceFactory,
};
use rayos_gaze::{Backend, EyeTrackingEngine, GazeConfig, GazePoint, SampleLogger, StateChange};
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

#[derive(Parser)]
#[command(name = "rayos-gaze")]
#[command(about = "RayOS Gaze - eye tracking console", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CSV file receiving raw samples (overrides the config file)
    #[arg(long, value_name = "FILE")]
    sample_log: Option<PathBuf>,

    /// Sample source
    #[arg(short, long, value_enum)]
    backend: Option<Backend>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

enum Command {
    Retry,
    Resolve,
    Quit,
}

enum Event {
    State(StateChange),
    Gaze(GazePoint),
    Command(Command),
    StdinClosed,
    Shutdown,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose { LevelFilter::Debug } else { LevelFilter::Info })
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            log::info!("Loading config from: {}", path.display());
            GazeConfig::load(path)?
        }
        None => GazeConfig::default(),
    };
    config.apply_env();
    if let Some(backend) = cli.backend {
        if backend != config.backend {
            config.backend = backend;
            config.device_url = None;
        }
    }
    if let Some(path) = cli.sample_log {
        config.sample_log = path;
    }

    let provider = Arc::new(StaticConfigurationProvider::from_config(&config));
    let factory: Arc<dyn DeviceFactory> = match config.backend {
        Backend::Simulated => Arc::new(SimulatedDeviceFactory::new(config.simulated.clone())),
        Backend::Udp => Arc::new(UdpDeviceFactory::new()),
    };
    let sample_log = SampleLogger::create(&config.sample_log)?;

    log::info!("RayOS Gaze: {} backend, device {}", config.backend, config.device_url());

    let engine = EyeTrackingEngine::new(provider, factory, Some(sample_log));
    let states = engine.state_channel();
    let gaze = engine.gaze_channel();

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal...");
        let _ = shutdown_tx.try_send(());
    })?;
    let mut commands = spawn_stdin_reader()?;

    log::info!("Type 'retry', 'resolve' or 'quit'. Press Ctrl+C to exit");
    engine.initialize()?;

    loop {
        let event = crossbeam_channel::select! {
            recv(states) -> change => change.map_or(Event::Shutdown, Event::State),
            recv(gaze) -> point => point.map_or(Event::Shutdown, Event::Gaze),
            recv(commands) -> command => command.map_or(Event::StdinClosed, Event::Command),
            recv(shutdown_rx) -> _ => Event::Shutdown,
        };

        match event {
            Event::State(change) => report_state(&change),
            Event::Gaze(point) => println!("gaze {:>6} {:>6}", point.x, point.y),
            Event::Command(Command::Retry) => {
                if let Err(e) = engine.retry() {
                    log::warn!("Retry rejected: {e}");
                }
            }
            Event::Command(Command::Resolve) => {
                if let Err(e) = engine.resolve_error() {
                    log::warn!("Resolve rejected: {e}");
                }
            }
            Event::Command(Command::Quit) | Event::Shutdown => break,
            // stdin closed; keep tracking until Ctrl+C
            Event::StdinClosed => commands = crossbeam_channel::never(),
        }
    }

    log::info!("Shutting down gaze tracking...");
    engine.dispose();
    log::info!("Gaze shutdown complete");
    Ok(())
}

fn report_state(change: &StateChange) {
    if change.state.is_error() {
        let mut hints = Vec::new();
        if change.can_retry {
            hints.push("retry");
        }
        if change.can_resolve {
            hints.push("resolve");
        }
        println!("state {}: {} [{}]", change.state, change.error_message, hints.join(", "));
    } else {
        println!("state {}", change.state);
    }
}

fn spawn_stdin_reader() -> Result<Receiver<Command>> {
    let (tx, rx) = crossbeam_channel::unbounded();

    thread::Builder::new()
        .name("gaze-stdin".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let command = match line.trim() {
                    "" => continue,
                    "r" | "retry" => Command::Retry,
                    "s" | "resolve" => Command::Resolve,
                    "q" | "quit" | "exit" => Command::Quit,
                    other => {
                        log::warn!("Unknown command '{other}' (retry, resolve, quit)");
                        continue;
                    }
                };
                if tx.send(command).is_err() {
                    break;
                }
            }
        })
        .context("spawn stdin reader")?;

    Ok(rx)
}
