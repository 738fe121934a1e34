//! Scriptable collaborators shared by the integration tests
#![allow(dead_code)]

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rayos_gaze::device::{
    Completion, ConfigurationProvider, DeviceEvents, DeviceFactory, DeviceHandle,
};
use rayos_gaze::{
    DeviceException, DeviceUrl, ErrorCode, EyeSample, EyeTrackingEngine, GazeSample, Point2D,
    SampleLogger, ScreenBounds, StateChange, TrackedEye, TrackingState, TrackingStatus,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub struct MockProvider {
    pub validation: Mutex<ErrorCode>,
    pub fail_screen_bounds: AtomicBool,
    pub tracked_eye: Mutex<TrackedEye>,
    pub prepare_result: Mutex<ErrorCode>,
    pub panel_fails: AtomicBool,
    pub panel_launches: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl MockProvider {
    pub fn screen() -> ScreenBounds {
        ScreenBounds {
            x: 0.0,
            y: 0.0,
            width: 1000.0,
            height: 800.0,
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            validation: Mutex::new(ErrorCode::Success),
            fail_screen_bounds: AtomicBool::new(false),
            tracked_eye: Mutex::new(TrackedEye::Both),
            prepare_result: Mutex::new(ErrorCode::Success),
            panel_fails: AtomicBool::new(false),
            panel_launches: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl ConfigurationProvider for MockProvider {
    fn validate(&self) -> ErrorCode {
        *self.validation.lock()
    }

    fn default_device_url(&self) -> Result<DeviceUrl, DeviceException> {
        Ok(DeviceUrl::new("mock://tracker"))
    }

    fn screen_bounds(&self, _url: &DeviceUrl) -> Result<ScreenBounds, DeviceException> {
        if self.fail_screen_bounds.load(Ordering::SeqCst) {
            return Err(DeviceException::new("display area lookup failed"));
        }
        Ok(Self::screen())
    }

    fn current_user_profile(&self) -> Result<String, DeviceException> {
        Ok("tester".to_string())
    }

    fn tracked_eye(&self, _profile: &str) -> Result<TrackedEye, DeviceException> {
        Ok(*self.tracked_eye.lock())
    }

    fn launch_control_panel(&self) -> Result<(), DeviceException> {
        self.panel_launches.fetch_add(1, Ordering::SeqCst);
        if self.panel_fails.load(Ordering::SeqCst) {
            return Err(DeviceException::new("control panel not installed"));
        }
        Ok(())
    }

    fn prepare_device_async(
        &self,
        _url: &DeviceUrl,
        _profile: &str,
        _device: &Arc<dyn DeviceHandle>,
        done: Completion,
    ) {
        let code = *self.prepare_result.lock();
        done(code);
    }

    fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

enum LoopEvent {
    Sample(GazeSample),
    Error(ErrorCode),
    Fail(String),
    Break,
}

/// Device whose event loop replays whatever the test pushes into it.
///
/// Connect and start-tracking complete inline with the scripted code, or are
/// parked until the test fires them when `park` is set.
pub struct MockDevice {
    connect: ErrorCode,
    start: ErrorCode,
    park: bool,
    events: Mutex<Option<Arc<dyn DeviceEvents>>>,
    pending: Mutex<Vec<Completion>>,
    tx: Sender<LoopEvent>,
    rx: Receiver<LoopEvent>,
    pub disposed: AtomicBool,
    pub unsubscribed: AtomicBool,
    pub loop_exited: AtomicBool,
}

impl MockDevice {
    pub fn push_sample(&self, sample: GazeSample) {
        let _ = self.tx.send(LoopEvent::Sample(sample));
    }

    pub fn raise_error(&self, code: ErrorCode) {
        let _ = self.tx.send(LoopEvent::Error(code));
    }

    pub fn fail_loop(&self, message: &str) {
        let _ = self.tx.send(LoopEvent::Fail(message.to_string()));
    }

    /// Take the oldest parked completion
    pub fn take_pending(&self) -> Option<Completion> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl DeviceHandle for MockDevice {
    fn subscribe(&self, events: Arc<dyn DeviceEvents>) {
        *self.events.lock() = Some(events);
    }

    fn unsubscribe(&self) {
        self.unsubscribed.store(true, Ordering::SeqCst);
        *self.events.lock() = None;
    }

    fn connect_async(&self, done: Completion) {
        if self.park {
            self.pending.lock().push(done);
        } else {
            done(self.connect);
        }
    }

    fn start_tracking_async(&self, done: Completion) {
        if self.park {
            self.pending.lock().push(done);
        } else {
            done(self.start);
        }
    }

    fn run_event_loop(&self) -> Result<(), DeviceException> {
        let result = loop {
            match self.rx.recv() {
                Ok(LoopEvent::Sample(sample)) => {
                    let events = self.events.lock().clone();
                    if let Some(events) = events {
                        events.on_sample(&sample);
                    }
                }
                Ok(LoopEvent::Error(code)) => {
                    let events = self.events.lock().clone();
                    if let Some(events) = events {
                        events.on_error(code);
                    }
                }
                Ok(LoopEvent::Fail(message)) => break Err(DeviceException::new(message)),
                Ok(LoopEvent::Break) | Err(_) => break Ok(()),
            }
        };
        self.loop_exited.store(true, Ordering::SeqCst);
        result
    }

    fn break_event_loop(&self) {
        let _ = self.tx.send(LoopEvent::Break);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct MockFactory {
    pub fail_open: AtomicBool,
    pub connect: Mutex<ErrorCode>,
    pub start: Mutex<ErrorCode>,
    pub park: AtomicBool,
    devices: Mutex<Vec<Arc<MockDevice>>>,
}

impl MockFactory {
    pub fn opened(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn device(&self, index: usize) -> Arc<MockDevice> {
        Arc::clone(&self.devices.lock()[index])
    }

    pub fn last(&self) -> Arc<MockDevice> {
        let devices = self.devices.lock();
        Arc::clone(devices.last().expect("no device opened"))
    }
}

impl DeviceFactory for MockFactory {
    fn open(&self, _url: &DeviceUrl) -> Result<Arc<dyn DeviceHandle>, DeviceException> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(DeviceException::new("no eye tracker at mock://tracker"));
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        let device = Arc::new(MockDevice {
            connect: *self.connect.lock(),
            start: *self.start.lock(),
            park: self.park.load(Ordering::SeqCst),
            events: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            tx,
            rx,
            disposed: AtomicBool::new(false),
            unsubscribed: AtomicBool::new(false),
            loop_exited: AtomicBool::new(false),
        });
        self.devices.lock().push(Arc::clone(&device));
        Ok(device)
    }
}

pub struct Harness {
    pub engine: EyeTrackingEngine,
    pub provider: Arc<MockProvider>,
    pub factory: Arc<MockFactory>,
    pub states: Receiver<StateChange>,
}

pub fn harness() -> Harness {
    build(None)
}

pub fn harness_with_log(sample_log: SampleLogger) -> Harness {
    build(Some(sample_log))
}

fn build(sample_log: Option<SampleLogger>) -> Harness {
    let provider = Arc::new(MockProvider::default());
    let factory = Arc::new(MockFactory::default());
    let engine = EyeTrackingEngine::new(provider.clone(), factory.clone(), sample_log);
    let states = engine.state_channel();
    Harness {
        engine,
        provider,
        factory,
        states,
    }
}

/// Every state notified so far
pub fn drain(states: &Receiver<StateChange>) -> Vec<TrackingState> {
    states.try_iter().map(|change| change.state).collect()
}

/// Collect notified states until `target` shows up
pub fn wait_for(states: &Receiver<StateChange>, target: TrackingState) -> Vec<TrackingState> {
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while let Ok(change) = states.recv_deadline(deadline) {
        seen.push(change.state);
        if change.state == target {
            return seen;
        }
    }
    panic!("never reached {target}; saw {seen:?}");
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub const BRING_UP: [TrackingState; 6] = [
    TrackingState::TobiiInitialized,
    TrackingState::ConfigurationInitialized,
    TrackingState::DeviceInitialized,
    TrackingState::DeviceConnected,
    TrackingState::TrackingPrepared,
    TrackingState::Tracking,
];

pub fn sample(
    timestamp: i64,
    status: TrackingStatus,
    left: (f64, f64),
    right: (f64, f64),
) -> GazeSample {
    GazeSample {
        timestamp,
        tracking_status: status,
        left: EyeSample {
            gaze_point_on_display: Point2D::new(left.0, left.1),
            ..EyeSample::default()
        },
        right: EyeSample {
            gaze_point_on_display: Point2D::new(right.0, right.1),
            ..EyeSample::default()
        },
    }
}
