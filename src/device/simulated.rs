//! Simulated eye tracker
//!
//! Runs a real blocking event loop that emits samples along a slow Lissajous
//! path, so the engine, logger and consumers can be exercised without
//! hardware. Every step can be scripted to fail.

use super::{complete_later, Completion, DeviceEvents, DeviceFactory, DeviceHandle};
use crate::error::DeviceException;
use crate::types::{DeviceUrl, ErrorCode, EyeSample, GazeSample, Point2D, Point3D, TrackingStatus};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Device timestamps start here rather than at zero
const DEVICE_EPOCH_US: i64 = 1_000_000;

/// Scripted behaviour of simulated devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimScript {
    pub sample_rate_hz: f64,
    /// Make `open` fail with this message
    pub open_error: Option<String>,
    pub connect_result: ErrorCode,
    pub start_result: ErrorCode,
    /// Make the event loop fail after emitting this many samples
    pub fail_after_samples: Option<u64>,
    pub tracking_status: TrackingStatus,
}

impl Default for SimScript {
    fn default() -> Self {
        Self {
            sample_rate_hz: 60.0,
            open_error: None,
            connect_result: ErrorCode::Success,
            start_result: ErrorCode::Success,
            fail_after_samples: None,
            tracking_status: TrackingStatus::BothEyesTracked,
        }
    }
}

pub struct SimulatedDeviceFactory {
    script: SimScript,
    opened: AtomicUsize,
}

impl SimulatedDeviceFactory {
    pub fn new(script: SimScript) -> Self {
        Self {
            script,
            opened: AtomicUsize::new(0),
        }
    }

    /// Number of handles constructed so far
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl DeviceFactory for SimulatedDeviceFactory {
    fn open(&self, url: &DeviceUrl) -> Result<Arc<dyn DeviceHandle>, DeviceException> {
        if url.scheme() != Some("sim") {
            return Err(DeviceException::new(format!("not a simulated device: {url}")));
        }
        if let Some(message) = &self.script.open_error {
            return Err(DeviceException::new(message.clone()));
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        log::info!("Opened simulated eye tracker {url}");
        Ok(Arc::new(SimulatedDevice::new(url.clone(), self.script.clone())))
    }
}

pub struct SimulatedDevice {
    url: DeviceUrl,
    script: SimScript,
    events: Mutex<Option<Arc<dyn DeviceEvents>>>,
    tracking: AtomicBool,
    disposed: AtomicBool,
    break_tx: Sender<()>,
    break_rx: Receiver<()>,
    clock: Instant,
}

impl SimulatedDevice {
    pub fn new(url: DeviceUrl, script: SimScript) -> Self {
        let (break_tx, break_rx) = crossbeam_channel::bounded(1);
        Self {
            url,
            script,
            events: Mutex::new(None),
            tracking: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            break_tx,
            break_rx,
            clock: Instant::now(),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Sample the simulated path `elapsed` after the device came up
    pub fn sample_at(elapsed: Duration, tracking_status: TrackingStatus) -> GazeSample {
        let t = elapsed.as_secs_f64();
        let x = 0.5 + 0.2 * (t * 0.5).sin();
        let y = 0.5 + 0.15 * (t * 0.3).cos();

        let eye = |side: f64| {
            let gaze = Point2D::new((x + side * 0.005).clamp(0.0, 1.0), y);
            EyeSample {
                eye_position_mm: Point3D::new(side * 31.0, 2.0, 620.0),
                eye_position_track_box: Point3D::new(0.5 + side * 0.05, 0.5, 0.45),
                // 24" panel, 520 x 290 mm, tracker at the bottom centre
                gaze_point_mm: Point3D::new((gaze.x - 0.5) * 520.0, (1.0 - gaze.y) * 290.0, 0.0),
                gaze_point_on_display: gaze,
            }
        };

        GazeSample {
            timestamp: DEVICE_EPOCH_US + elapsed.as_micros() as i64,
            tracking_status,
            left: eye(-1.0),
            right: eye(1.0),
        }
    }

    fn period(&self) -> Duration {
        let rate = if self.script.sample_rate_hz > 0.0 {
            self.script.sample_rate_hz
        } else {
            SimScript::default().sample_rate_hz
        };
        Duration::from_secs_f64(1.0 / rate)
    }
}

impl DeviceHandle for SimulatedDevice {
    fn subscribe(&self, events: Arc<dyn DeviceEvents>) {
        *self.events.lock() = Some(events);
    }

    fn unsubscribe(&self) {
        *self.events.lock() = None;
    }

    fn connect_async(&self, done: Completion) {
        log::debug!("Connecting to {}", self.url);
        complete_later("connect", done, self.script.connect_result);
    }

    fn start_tracking_async(&self, done: Completion) {
        let result = self.script.start_result;
        if result.is_success() {
            self.tracking.store(true, Ordering::SeqCst);
        }
        complete_later("start-tracking", done, result);
    }

    fn run_event_loop(&self) -> Result<(), DeviceException> {
        let period = self.period();
        let mut emitted = 0u64;

        loop {
            match self.break_rx.recv_timeout(period) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(()),
                Err(RecvTimeoutError::Timeout) => {}
            }

            if !self.tracking.load(Ordering::SeqCst) {
                continue;
            }
            if self.script.fail_after_samples.is_some_and(|limit| emitted >= limit) {
                return Err(DeviceException::new(format!(
                    "simulated fault on {} after {emitted} samples",
                    self.url
                )));
            }

            let sample = Self::sample_at(self.clock.elapsed(), self.script.tracking_status);
            let events = self.events.lock().clone();
            if let Some(events) = events {
                events.on_sample(&sample);
            }
            emitted += 1;
        }
    }

    fn break_event_loop(&self) {
        // A pending break is as good as a new one.
        let _ = self.break_tx.try_send(());
    }

    fn dispose(&self) {
        self.tracking.store(false, Ordering::SeqCst);
        self.events.lock().take();
        if !self.disposed.swap(true, Ordering::SeqCst) {
            log::info!("Disposed simulated eye tracker {}", self.url);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    struct Collect(Mutex<Vec<GazeSample>>);

    impl DeviceEvents for Collect {
        fn on_error(&self, _code: ErrorCode) {}
        fn on_sample(&self, sample: &GazeSample) {
            self.0.lock().push(*sample);
        }
    }

    fn fast_script() -> SimScript {
        SimScript {
            sample_rate_hz: 500.0,
            ..SimScript::default()
        }
    }

    #[test]
    fn path_stays_on_screen() {
        for ms in (0..60_000).step_by(250) {
            let s = SimulatedDevice::sample_at(
                Duration::from_millis(ms),
                TrackingStatus::BothEyesTracked,
            );
            for p in [s.left.gaze_point_on_display, s.right.gaze_point_on_display] {
                assert!((0.0..=1.0).contains(&p.x) && (0.0..=1.0).contains(&p.y));
            }
        }
    }

    #[test]
    fn factory_rejects_foreign_urls_and_scripted_failures() {
        let factory = SimulatedDeviceFactory::new(SimScript::default());
        assert!(factory.open(&DeviceUrl::new("udp://127.0.0.1:9")).is_err());
        assert!(factory.open(&DeviceUrl::new("sim://default")).is_ok());
        assert_eq!(factory.opened(), 1);

        let failing = SimulatedDeviceFactory::new(SimScript {
            open_error: Some("no such device".to_string()),
            ..SimScript::default()
        });
        let err = failing.open(&DeviceUrl::new("sim://default")).err().expect("open fails");
        assert_eq!(err.message(), "no such device");
    }

    #[test]
    fn event_loop_emits_once_tracking_and_stops_on_break() {
        let device = Arc::new(SimulatedDevice::new(DeviceUrl::new("sim://default"), fast_script()));
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        device.subscribe(sink.clone());

        let (tx, rx) = crossbeam_channel::bounded(1);
        device.start_tracking_async(Box::new(move |code| {
            let _ = tx.send(code);
        }));
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)), Ok(ErrorCode::Success));

        let runner = Arc::clone(&device);
        let handle = thread::spawn(move || runner.run_event_loop());

        let deadline = Instant::now() + Duration::from_secs(2);
        while sink.0.lock().len() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        device.break_event_loop();
        device.break_event_loop();

        let result = handle.join().expect("event loop thread");
        assert!(result.is_ok());

        let samples = sink.0.lock();
        assert!(samples.len() >= 3);
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn break_before_run_returns_immediately() {
        let device = SimulatedDevice::new(DeviceUrl::new("sim://default"), SimScript::default());
        device.break_event_loop();
        assert!(device.run_event_loop().is_ok());
    }

    #[test]
    fn scripted_fault_ends_the_loop_with_an_error() {
        let device = SimulatedDevice::new(
            DeviceUrl::new("sim://default"),
            SimScript {
                fail_after_samples: Some(2),
                ..fast_script()
            },
        );
        device.start_tracking_async(Box::new(|_| {}));
        assert!(device.run_event_loop().is_err());
    }
}
