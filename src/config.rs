//! Gaze configuration file
//!
//! ```toml
//! sample_log = "output.log"
//! backend = "simulated"
//! user_profile = "default"
//! tracked_eye = "both"
//!
//! [screen]
//! x = 0.0
//! y = 0.0
//! width = 1920.0
//! height = 1080.0
//!
//! [simulated]
//! sample_rate_hz = 60.0
//! ```

use crate::device::{udp_gaze_addr_from_env, SimScript};
use crate::types::{DeviceUrl, ErrorCode, ScreenBounds, TrackedEye};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

pub const DEFAULT_UDP_ADDR: &str = "127.0.0.1:5555";

/// Where gaze samples come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Simulated,
    Udp,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simulated => f.write_str("simulated"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GazeConfig {
    /// CSV file receiving every raw sample
    pub sample_log: PathBuf,
    pub backend: Backend,
    /// Explicit device URL; derived from `backend` when unset
    pub device_url: Option<String>,
    pub screen: ScreenBounds,
    pub user_profile: String,
    pub tracked_eye: TrackedEye,
    /// Code the provider reports from `validate`
    pub validation: ErrorCode,
    /// Code the provider reports when preparing the device
    pub prepare_result: ErrorCode,
    /// Control panel program followed by its arguments
    pub control_panel: Vec<String>,
    pub simulated: SimScript,
}

impl Default for GazeConfig {
    fn default() -> Self {
        Self {
            sample_log: PathBuf::from("output.log"),
            backend: Backend::Simulated,
            device_url: None,
            screen: ScreenBounds::default(),
            user_profile: "default".to_string(),
            tracked_eye: TrackedEye::Both,
            validation: ErrorCode::Success,
            prepare_result: ErrorCode::Success,
            control_panel: Vec::new(),
            simulated: SimScript::default(),
        }
    }
}

impl GazeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `RAYOS_GAZE_UDP_ADDR`, if set
    pub fn apply_env(&mut self) {
        if let Some(addr) = udp_gaze_addr_from_env() {
            self.use_udp(addr);
        }
    }

    /// Switch to the UDP backend listening on `addr`
    pub fn use_udp(&mut self, addr: SocketAddr) {
        self.backend = Backend::Udp;
        self.device_url = Some(format!("udp://{addr}"));
    }

    pub fn device_url(&self) -> DeviceUrl {
        match (&self.device_url, self.backend) {
            (Some(url), _) => DeviceUrl::new(url.clone()),
            (None, Backend::Simulated) => DeviceUrl::new("sim://default"),
            (None, Backend::Udp) => DeviceUrl::new(format!("udp://{DEFAULT_UDP_ADDR}")),
        }
    }
}
