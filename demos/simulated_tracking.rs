//! Example: tracking with a simulated eye tracker for a few seconds

use anyhow::Result;
use rayos_gaze::device::{SimScript, SimulatedDeviceFactory, StaticConfigurationProvider};
use rayos_gaze::{DeviceUrl, EyeTrackingEngine, SampleLogger, ScreenBounds, TrackedEye};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn main() -> Result<()> {
    env_logger::init();

    let provider = Arc::new(StaticConfigurationProvider::new(
        DeviceUrl::new("sim://default"),
        ScreenBounds::default(),
        "default",
        TrackedEye::Both,
    ));
    let factory = Arc::new(SimulatedDeviceFactory::new(SimScript {
        sample_rate_hz: 30.0,
        ..SimScript::default()
    }));
    let sample_log = SampleLogger::create("simulated_tracking.log")?;

    let engine = EyeTrackingEngine::new(provider, factory, Some(sample_log));
    engine.on_state_changed(|change| println!("State: {}", change.state));
    let gaze = engine.gaze_channel();

    engine.initialize()?;

    let deadline = Instant::now() + Duration::from_secs(3);
    while let Ok(point) = gaze.recv_deadline(deadline) {
        println!("Gaze at ({}, {})", point.x, point.y);
    }

    engine.dispose();
    println!("Samples written to simulated_tracking.log");
    Ok(())
}
