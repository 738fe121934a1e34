//! The eye tracking engine - brings a device up step by step and relays gaze
//!
//! Bring-up is a fixed chain:
//!
//! ```text
//! NotInitialized -> TobiiInitialized -> ConfigurationInitialized -> DeviceInitialized
//!     -> DeviceConnected -> TrackingPrepared -> Tracking
//! ```
//!
//! Every state change is announced to state listeners before the entry step of
//! the new state runs. Steps that finish synchronously chain straight into the
//! next state; connect/prepare/start-tracking park the engine until their
//! completion callback arrives, on whatever thread the collaborator uses.
//!
//! Each device handle gets a generation id. Sample, error and completion
//! callbacks carry the id they were issued under and are dropped once that
//! handle has been torn down, so a late callback never reaches a disposed
//! device.

use crate::aggregator::GazeAggregator;
use crate::device::{Completion, ConfigurationProvider, DeviceEvents, DeviceFactory, DeviceHandle};
use crate::dispatch::{ListenerId, Listeners};
use crate::error::{DeviceException, EngineError};
use crate::sample_log::SampleLogger;
use crate::state::EntryStep;
use crate::types::{
    DeviceConfiguration, ErrorCode, GazePoint, GazeSample, ScreenBounds, StateChange, TrackingState,
};
use crossbeam_channel::Receiver;
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

const CALLBACK_LOCK_POLL: Duration = Duration::from_millis(20);

/// Drives an eye tracker from `NotInitialized` to `Tracking` and publishes
/// gaze points while it is there.
///
/// Notifications fire on whichever thread produced the transition: the caller
/// of `initialize`/`retry`/`resolve_error`, a collaborator's completion thread,
/// or the device's event-loop thread. Consumers that own UI state must marshal
/// onto their own thread, e.g. through [`state_channel`](Self::state_channel).
pub struct EyeTrackingEngine {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn ConfigurationProvider>,
    factory: Arc<dyn DeviceFactory>,
    sample_log: Option<SampleLogger>,
    /// Serialises transitions. Reentrant so a listener may call back into the
    /// engine from inside a notification.
    transitions: ReentrantMutex<()>,
    core: Mutex<Core>,
    state_listeners: Listeners<StateChange>,
    gaze_listeners: Listeners<GazePoint>,
}

struct Core {
    state: TrackingState,
    configuration: Option<DeviceConfiguration>,
    device: Option<Arc<dyn DeviceHandle>>,
    /// Generation of `device`, `None` while no handle is live
    generation: Option<u64>,
    next_generation: u64,
    /// Bumped on every committed transition
    epoch: u64,
    event_loop: Option<JoinHandle<()>>,
    aggregator: GazeAggregator,
    disposed: bool,
}

impl EyeTrackingEngine {
    pub fn new(
        provider: Arc<dyn ConfigurationProvider>,
        factory: Arc<dyn DeviceFactory>,
        sample_log: Option<SampleLogger>,
    ) -> Self {
        let ids = Arc::new(AtomicU64::new(1));
        Self {
            inner: Arc::new(Inner {
                provider,
                factory,
                sample_log,
                transitions: ReentrantMutex::new(()),
                core: Mutex::new(Core {
                    state: TrackingState::NotInitialized,
                    configuration: None,
                    device: None,
                    generation: None,
                    next_generation: 1,
                    epoch: 0,
                    event_loop: None,
                    aggregator: GazeAggregator::new(),
                    disposed: false,
                }),
                state_listeners: Listeners::with_id_source(Arc::clone(&ids)),
                gaze_listeners: Listeners::with_id_source(ids),
            }),
        }
    }

    pub fn state(&self) -> TrackingState {
        self.inner.core.lock().state
    }

    /// Configuration fetched during the last successful configuration step
    pub fn configuration(&self) -> Option<DeviceConfiguration> {
        self.inner.core.lock().configuration.clone()
    }

    /// Screen area gaze points are mapped onto, once known
    pub fn screen_bounds(&self) -> Option<ScreenBounds> {
        self.inner
            .core
            .lock()
            .configuration
            .as_ref()
            .map(|c| c.screen_bounds)
    }

    /// Start bring-up. Only valid once, from `NotInitialized`.
    pub fn initialize(&self) -> Result<(), EngineError> {
        let _guard = self.inner.transitions.lock();
        {
            let core = self.inner.core.lock();
            if core.disposed {
                return Err(EngineError::Disposed);
            }
            if core.state != TrackingState::NotInitialized {
                return Err(EngineError::InvalidLifecycleTransition {
                    operation: "initialize",
                    state: core.state,
                });
            }
        }

        log::info!("Initializing eye tracking engine...");
        self.inner.bootstrap()
    }

    /// Tear the device down and restart bring-up from `TobiiInitialized`.
    ///
    /// Only accepted from an error state. Callers should check `can_retry` on
    /// the last state change first; the engine does not second-guess them.
    pub fn retry(&self) -> Result<(), EngineError> {
        {
            let _guard = self.inner.transitions.lock();
            let core = self.inner.core.lock();
            if core.disposed {
                return Err(EngineError::Disposed);
            }
            if !core.state.is_error() {
                return Err(EngineError::InvalidLifecycleTransition {
                    operation: "retry",
                    state: core.state,
                });
            }
        }

        log::info!("Retrying eye tracker bring-up");
        self.inner.reset();

        // The vendor subsystem is already up; start at the configuration step.
        self.inner.drive(TrackingState::TobiiInitialized)
    }

    /// Launch the provider's configuration tool. The consumer calls
    /// [`retry`](Self::retry) once the user is done with it.
    pub fn resolve_error(&self) -> Result<(), EngineError> {
        if self.inner.core.lock().disposed {
            return Err(EngineError::Disposed);
        }

        log::info!("Launching eye tracker control panel");
        match self.inner.provider.launch_control_panel() {
            Ok(()) => Ok(()),
            Err(e) => {
                log::warn!("Control panel launch failed: {e}");
                self.inner.drive(TrackingState::TrackingUnavailable)
            }
        }
    }

    /// Release the device, stop the event loop, close the sample log and shut
    /// the provider down. Safe to call repeatedly and from any state.
    pub fn dispose(&self) {
        {
            let _guard = self.inner.transitions.lock();
            let mut core = self.inner.core.lock();
            if core.disposed {
                return;
            }
            core.disposed = true;
        }

        log::info!("Disposing eye tracking engine...");
        self.inner.reset();

        if let Some(sample_log) = &self.inner.sample_log {
            if let Err(e) = sample_log.close() {
                log::warn!("Failed to close sample log {}: {e}", sample_log.path().display());
            }
        }
        self.inner.provider.shutdown();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.core.lock().disposed
    }

    pub fn on_state_changed<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        self.inner.state_listeners.subscribe(listener)
    }

    pub fn on_gaze_point<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&GazePoint) + Send + Sync + 'static,
    {
        self.inner.gaze_listeners.subscribe(listener)
    }

    /// Remove a state or gaze listener
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.inner.state_listeners.unsubscribe(id) || self.inner.gaze_listeners.unsubscribe(id)
    }

    /// State changes as a channel, for consumers that drain on their own thread
    pub fn state_channel(&self) -> Receiver<StateChange> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.on_state_changed(move |change| {
            let _ = tx.send(change.clone());
        });
        rx
    }

    /// Gaze points as a channel, for consumers that drain on their own thread
    pub fn gaze_channel(&self) -> Receiver<GazePoint> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.on_gaze_point(move |point| {
            let _ = tx.send(*point);
        });
        rx
    }
}

impl Drop for EyeTrackingEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl Inner {
    /// Bring up the vendor subsystem. Nothing to do beyond moving on; the
    /// provider is ready once constructed.
    fn bootstrap(self: &Arc<Self>) -> Result<(), EngineError> {
        self.drive(TrackingState::TobiiInitialized)
    }

    /// Commit `next`, notify, and keep running entry steps until one parks on
    /// a callback or the engine reaches a state with nothing to do.
    fn drive(self: &Arc<Self>, mut next: TrackingState) -> Result<(), EngineError> {
        let _guard = self.transitions.lock();

        loop {
            let (prev, epoch) = {
                let mut core = self.core.lock();
                if core.disposed || core.state == next {
                    return Ok(());
                }
                if !next.accepts_from(core.state) {
                    return Err(EngineError::IllegalTransition {
                        from: core.state,
                        to: next,
                    });
                }
                core.epoch += 1;
                (std::mem::replace(&mut core.state, next), core.epoch)
            };

            if next.is_error() {
                log::warn!("Eye tracking state: {prev} -> {next} ({})", next.error_message());
            } else {
                log::info!("Eye tracking state: {prev} -> {next}");
            }
            self.state_listeners.emit(&StateChange::for_state(next));

            {
                // A listener may have moved the engine on already.
                let core = self.core.lock();
                if core.disposed || core.epoch != epoch {
                    return Ok(());
                }
            }

            match self.enter(next)? {
                Some(following) => next = following,
                None => return Ok(()),
            }
        }
    }

    /// Run the entry step for `state`. Returns the next state when the step
    /// finished synchronously.
    fn enter(self: &Arc<Self>, state: TrackingState) -> Result<Option<TrackingState>, EngineError> {
        match state.entry_step() {
            EntryStep::Bootstrap => Ok(Some(TrackingState::TobiiInitialized)),
            EntryStep::Configure => Ok(Some(self.configure())),
            EntryStep::OpenDevice => self.open_device(),
            EntryStep::Connect => {
                self.issue(state, TrackingState::DeviceConnected, |device, done| {
                    device.connect_async(done)
                });
                Ok(None)
            }
            EntryStep::Prepare => {
                self.prepare();
                Ok(None)
            }
            EntryStep::StartTracking => {
                self.issue(state, TrackingState::Tracking, |device, done| {
                    device.start_tracking_async(done)
                });
                Ok(None)
            }
            EntryStep::Idle => Ok(None),
        }
    }

    fn configure(&self) -> TrackingState {
        self.core.lock().configuration = None;

        if let Some(failed) = TrackingState::from_validation(self.provider.validate()) {
            return failed;
        }

        match self.fetch_configuration() {
            Ok(configuration) => {
                log::info!(
                    "Eye tracker {} for profile '{}' ({:?}), screen {}x{} at ({}, {})",
                    configuration.url,
                    configuration.user_profile,
                    configuration.tracked_eye,
                    configuration.screen_bounds.width,
                    configuration.screen_bounds.height,
                    configuration.screen_bounds.x,
                    configuration.screen_bounds.y,
                );
                self.core.lock().configuration = Some(configuration);
                TrackingState::ConfigurationInitialized
            }
            Err(e) => {
                log::warn!("Failed to read eye tracker configuration: {e}");
                TrackingState::InvalidConfiguration
            }
        }
    }

    fn fetch_configuration(&self) -> Result<DeviceConfiguration, DeviceException> {
        let url = self.provider.default_device_url()?;
        let screen_bounds = self.provider.screen_bounds(&url)?;
        let user_profile = self.provider.current_user_profile()?;
        let tracked_eye = self.provider.tracked_eye(&user_profile)?;
        Ok(DeviceConfiguration {
            url,
            screen_bounds,
            user_profile,
            tracked_eye,
        })
    }

    fn open_device(self: &Arc<Self>) -> Result<Option<TrackingState>, EngineError> {
        let url = {
            let core = self.core.lock();
            if core.device.is_some() {
                log::debug!("Device handle already exists, skipping construction");
                return Ok(None);
            }
            if core.event_loop.is_some() {
                return Err(EngineError::EventLoopAlreadyRunning);
            }
            match &core.configuration {
                Some(configuration) => configuration.url.clone(),
                None => return Ok(Some(TrackingState::InvalidConfiguration)),
            }
        };

        let device = match self.factory.open(&url) {
            Ok(device) => device,
            Err(e) => {
                log::warn!("Failed to open eye tracker {url}: {e}");
                return Ok(Some(TrackingState::ConnectionFailed));
            }
        };

        let generation = {
            let mut core = self.core.lock();
            if core.event_loop.is_some() {
                None
            } else {
                let generation = core.next_generation;
                core.next_generation += 1;
                core.device = Some(Arc::clone(&device));
                core.generation = Some(generation);
                Some(generation)
            }
        };
        let Some(generation) = generation else {
            device.dispose();
            return Err(EngineError::EventLoopAlreadyRunning);
        };

        device.subscribe(Arc::new(DeviceSink {
            engine: Arc::downgrade(self),
            generation,
        }));

        match self.spawn_event_loop(Arc::clone(&device), generation) {
            Ok(handle) => {
                self.core.lock().event_loop = Some(handle);
                Ok(Some(TrackingState::DeviceInitialized))
            }
            Err(e) => {
                log::warn!("Failed to start eye tracker event loop: {e}");
                {
                    let mut core = self.core.lock();
                    core.device = None;
                    core.generation = None;
                }
                device.unsubscribe();
                device.dispose();
                Ok(Some(TrackingState::ConnectionFailed))
            }
        }
    }

    fn spawn_event_loop(
        self: &Arc<Self>,
        device: Arc<dyn DeviceHandle>,
        generation: u64,
    ) -> std::io::Result<JoinHandle<()>> {
        let engine = Arc::downgrade(self);
        thread::Builder::new()
            .name("gaze-event-loop".to_string())
            .spawn(move || {
                log::debug!("Event loop started (generation {generation})");
                match device.run_event_loop() {
                    Ok(()) => log::debug!("Event loop returned (generation {generation})"),
                    Err(e) => {
                        log::error!("Eye tracker event loop failed: {e}");
                        if let Some(inner) = engine.upgrade() {
                            inner.device_failed(generation, TrackingState::DeviceError);
                        }
                    }
                }
            })
    }

    fn prepare(self: &Arc<Self>) {
        let (device, url, profile, done) = {
            let core = self.core.lock();
            let (Some(device), Some(generation), Some(configuration)) =
                (&core.device, core.generation, &core.configuration)
            else {
                log::debug!("No live device to prepare");
                return;
            };
            (
                Arc::clone(device),
                configuration.url.clone(),
                configuration.user_profile.clone(),
                self.completion(
                    generation,
                    TrackingState::DeviceConnected,
                    TrackingState::TrackingPrepared,
                ),
            )
        };

        self.provider.prepare_device_async(&url, &profile, &device, done);
    }

    /// Issue an asynchronous call on the live device handle
    fn issue<F>(self: &Arc<Self>, issued_in: TrackingState, on_success: TrackingState, call: F)
    where
        F: FnOnce(&Arc<dyn DeviceHandle>, Completion),
    {
        let (device, done) = {
            let core = self.core.lock();
            let (Some(device), Some(generation)) = (&core.device, core.generation) else {
                log::debug!("No live device in {issued_in}");
                return;
            };
            (Arc::clone(device), self.completion(generation, issued_in, on_success))
        };

        call(&device, done);
    }

    fn completion(
        self: &Arc<Self>,
        generation: u64,
        issued_in: TrackingState,
        on_success: TrackingState,
    ) -> Completion {
        let engine = Arc::downgrade(self);
        Box::new(move |code| {
            if let Some(inner) = engine.upgrade() {
                inner.complete(generation, issued_in, code, on_success);
            }
        })
    }

    fn complete(
        self: &Arc<Self>,
        generation: u64,
        issued_in: TrackingState,
        code: ErrorCode,
        on_success: TrackingState,
    ) {
        let Some(_guard) = self.lock_for_generation(generation) else {
            log::debug!("Ignoring completion from torn-down device (generation {generation})");
            return;
        };
        {
            let core = self.core.lock();
            if core.state != issued_in {
                log::debug!(
                    "Ignoring late completion for {issued_in}, engine is in {}",
                    core.state
                );
                return;
            }
        }

        let next = if code.is_success() {
            on_success
        } else {
            log::warn!("Eye tracker call issued in {issued_in} failed: {code}");
            TrackingState::ConnectionFailed
        };

        if let Err(e) = self.drive(next) {
            log::error!("Completion for {issued_in} rejected: {e}");
        }
    }

    fn device_failed(self: &Arc<Self>, generation: u64, next: TrackingState) {
        let Some(_guard) = self.lock_for_generation(generation) else {
            log::debug!("Ignoring error from torn-down device (generation {generation})");
            return;
        };
        if let Err(e) = self.drive(next) {
            log::error!("Device failure transition rejected: {e}");
        }
    }

    /// Take the transition lock on behalf of a callback from `generation`.
    /// Returns `None` once that generation is torn down.
    ///
    /// Polls instead of blocking: the thread tearing the device down may hold
    /// the lock while it joins the event loop this callback runs on.
    fn lock_for_generation(&self, generation: u64) -> Option<ReentrantMutexGuard<'_, ()>> {
        loop {
            let guard = self.transitions.try_lock_for(CALLBACK_LOCK_POLL);
            if self.core.lock().generation != Some(generation) {
                return None;
            }
            if guard.is_some() {
                return guard;
            }
        }
    }

    fn handle_sample(&self, generation: u64, sample: &GazeSample) {
        let (offset, point) = {
            let mut core = self.core.lock();
            if core.generation != Some(generation) {
                return;
            }
            let offset = core.aggregator.observe(sample);
            let point = core.aggregator.publishable(sample, core.configuration.as_ref());
            (offset, point)
        };

        if let Some(sample_log) = &self.sample_log {
            if let Err(e) = sample_log.log(sample, offset) {
                log::warn!("Failed to log gaze sample: {e}");
            }
        }

        if let Some(point) = point {
            log::trace!("Gaze: ({}, {}) at +{offset}us", point.x, point.y);
            self.gaze_listeners.emit(&point);
        }
    }

    /// Detach the live device and tear it down: break its event loop, join
    /// the loop thread, unsubscribe, dispose. No-op without a device.
    fn reset(&self) {
        let (device, event_loop) = {
            let _guard = self.transitions.lock();
            let mut core = self.core.lock();
            core.generation = None;
            (core.device.take(), core.event_loop.take())
        };

        let Some(device) = device else {
            return;
        };

        log::info!("Tearing down eye tracker...");
        device.break_event_loop();

        if let Some(handle) = event_loop {
            if handle.thread().id() == thread::current().id() {
                // Called from a listener on the loop thread itself; it will
                // return once this call unwinds.
                log::warn!("Eye tracker reset from its own event loop thread, not joining");
            } else if handle.join().is_err() {
                log::error!("Eye tracker event loop thread panicked");
            }
        }

        device.unsubscribe();
        device.dispose();
    }
}

/// Event receiver handed to the device, bound to one handle generation
struct DeviceSink {
    engine: Weak<Inner>,
    generation: u64,
}

impl DeviceEvents for DeviceSink {
    fn on_error(&self, code: ErrorCode) {
        if code.is_success() {
            return;
        }
        if let Some(inner) = self.engine.upgrade() {
            log::warn!("Eye tracker reported {code}");
            inner.device_failed(self.generation, TrackingState::ConnectionFailed);
        }
    }

    fn on_sample(&self, sample: &GazeSample) {
        if let Some(inner) = self.engine.upgrade() {
            inner.handle_sample(self.generation, sample);
        }
    }
}
