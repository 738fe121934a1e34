//! Configuration provider backed by the gaze config file

use super::{complete_later, Completion, ConfigurationProvider, DeviceHandle};
use crate::config::GazeConfig;
use crate::error::DeviceException;
use crate::types::{DeviceUrl, ErrorCode, ScreenBounds, TrackedEye};
use std::io;
use std::process::{Child, Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Serves a fixed setup: one device URL, one screen, one profile.
///
/// Preparation applies nothing to the device and completes on a helper thread
/// with the configured code. The control panel is an external command, if any.
pub struct StaticConfigurationProvider {
    url: DeviceUrl,
    screen: ScreenBounds,
    profile: String,
    tracked_eye: TrackedEye,
    validation: ErrorCode,
    prepare_result: ErrorCode,
    control_panel: Vec<String>,
    shut_down: AtomicBool,
}

impl StaticConfigurationProvider {
    pub fn new(
        url: DeviceUrl,
        screen: ScreenBounds,
        profile: impl Into<String>,
        tracked_eye: TrackedEye,
    ) -> Self {
        Self {
            url,
            screen,
            profile: profile.into(),
            tracked_eye,
            validation: ErrorCode::Success,
            prepare_result: ErrorCode::Success,
            control_panel: Vec::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &GazeConfig) -> Self {
        Self::new(
            config.device_url(),
            config.screen,
            config.user_profile.clone(),
            config.tracked_eye,
        )
        .with_validation(config.validation)
        .with_prepare_result(config.prepare_result)
        .with_control_panel(config.control_panel.clone())
    }

    /// Code returned by [`validate`](ConfigurationProvider::validate)
    pub fn with_validation(mut self, code: ErrorCode) -> Self {
        self.validation = code;
        self
    }

    pub fn with_prepare_result(mut self, code: ErrorCode) -> Self {
        self.prepare_result = code;
        self
    }

    /// Program and arguments launched as the control panel
    pub fn with_control_panel(mut self, command: Vec<String>) -> Self {
        self.control_panel = command;
        self
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl ConfigurationProvider for StaticConfigurationProvider {
    fn validate(&self) -> ErrorCode {
        self.validation
    }

    fn default_device_url(&self) -> Result<DeviceUrl, DeviceException> {
        Ok(self.url.clone())
    }

    fn screen_bounds(&self, url: &DeviceUrl) -> Result<ScreenBounds, DeviceException> {
        if *url != self.url {
            return Err(DeviceException::new(format!("no display area configured for {url}")));
        }
        if self.screen.width <= 0.0 || self.screen.height <= 0.0 {
            return Err(DeviceException::new(format!(
                "display area for {url} is empty ({}x{})",
                self.screen.width, self.screen.height
            )));
        }
        Ok(self.screen)
    }

    fn current_user_profile(&self) -> Result<String, DeviceException> {
        Ok(self.profile.clone())
    }

    fn tracked_eye(&self, profile: &str) -> Result<TrackedEye, DeviceException> {
        if profile != self.profile {
            return Err(DeviceException::new(format!("unknown user profile '{profile}'")));
        }
        Ok(self.tracked_eye)
    }

    fn launch_control_panel(&self) -> Result<(), DeviceException> {
        let Some((program, args)) = self.control_panel.split_first() else {
            return Err(DeviceException::new("no control panel configured"));
        };
        let child = Command::new(program).args(args).spawn()?;
        log::info!("Control panel '{program}' started (pid {})", child.id());
        if let Err(e) = reap(program.clone(), child) {
            log::warn!("Failed to watch control panel '{program}': {e}");
        }
        Ok(())
    }

    fn prepare_device_async(
        &self,
        url: &DeviceUrl,
        profile: &str,
        _device: &Arc<dyn DeviceHandle>,
        done: Completion,
    ) {
        log::debug!("Preparing {url} for profile '{profile}'");
        complete_later("prepare", done, self.prepare_result);
    }

    fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            log::debug!("Configuration provider shut down");
        }
    }
}

/// Wait on the control panel in the background so it is reaped on exit
fn reap(program: String, mut child: Child) -> io::Result<JoinHandle<io::Result<ExitStatus>>> {
    thread::Builder::new()
        .name("gaze-control-panel".to_string())
        .spawn(move || {
            let status = child.wait();
            match &status {
                Ok(status) => log::debug!("Control panel '{program}' exited ({status})"),
                Err(e) => log::warn!("Failed to wait on control panel '{program}': {e}"),
            }
            status
        })
}
