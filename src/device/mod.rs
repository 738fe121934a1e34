//! Device-side collaborators - configuration provider and eye tracker handle
//!
//! The engine only talks to hardware through the traits in this module. Each
//! backend supplies a [`DeviceFactory`] that turns a [`DeviceUrl`] into a
//! [`DeviceHandle`], plus a [`ConfigurationProvider`] describing the setup.

use crate::error::DeviceException;
use crate::types::{DeviceUrl, ErrorCode, GazeSample, ScreenBounds, TrackedEye};
use std::sync::Arc;

mod provider;
mod simulated;
mod udp;

pub use provider::StaticConfigurationProvider;
pub use simulated::{SimScript, SimulatedDevice, SimulatedDeviceFactory};
pub use udp::{parse_gaze_message, udp_gaze_addr_from_env, UdpDeviceFactory, UdpGazeDevice};

/// Completion callback for asynchronous device operations.
///
/// May be invoked on any thread, at most once.
pub type Completion = Box<dyn FnOnce(ErrorCode) + Send + 'static>;

/// Validates and describes the eye tracker setup
pub trait ConfigurationProvider: Send + Sync {
    fn validate(&self) -> ErrorCode;

    fn default_device_url(&self) -> Result<DeviceUrl, DeviceException>;

    fn screen_bounds(&self, url: &DeviceUrl) -> Result<ScreenBounds, DeviceException>;

    fn current_user_profile(&self) -> Result<String, DeviceException>;

    fn tracked_eye(&self, profile: &str) -> Result<TrackedEye, DeviceException>;

    /// Open the external configuration/calibration tool
    fn launch_control_panel(&self) -> Result<(), DeviceException>;

    /// Apply the profile's calibration and display area to `device`
    fn prepare_device_async(
        &self,
        url: &DeviceUrl,
        profile: &str,
        device: &Arc<dyn DeviceHandle>,
        done: Completion,
    );

    /// Release provider resources. Called once when the engine is disposed.
    fn shutdown(&self) {}
}

/// Receiver for events raised from a device's event loop
pub trait DeviceEvents: Send + Sync {
    fn on_error(&self, code: ErrorCode);
    fn on_sample(&self, sample: &GazeSample);
}

/// A connected (or connectable) eye tracker
pub trait DeviceHandle: Send + Sync {
    /// Route error and sample events to `events`, replacing any previous receiver
    fn subscribe(&self, events: Arc<dyn DeviceEvents>);

    fn unsubscribe(&self);

    fn connect_async(&self, done: Completion);

    fn start_tracking_async(&self, done: Completion);

    /// Block the calling thread running the device's event loop until
    /// [`break_event_loop`](Self::break_event_loop) is called
    fn run_event_loop(&self) -> Result<(), DeviceException>;

    /// Make a running [`run_event_loop`](Self::run_event_loop) return.
    /// Must not block.
    fn break_event_loop(&self);

    fn dispose(&self);
}

/// Constructs device handles from URLs
pub trait DeviceFactory: Send + Sync {
    fn open(&self, url: &DeviceUrl) -> Result<Arc<dyn DeviceHandle>, DeviceException>;
}

/// Run `done(code)` on a fresh helper thread, the way vendor SDKs complete
/// their asynchronous calls off the caller's thread.
pub(crate) fn complete_later(name: &str, done: Completion, code: ErrorCode) {
    let spawned = std::thread::Builder::new()
        .name(format!("gaze-{name}"))
        .spawn(move || done(code));
    if let Err(e) = spawned {
        log::warn!("Failed to spawn completion thread for {name}: {e}");
    }
}
