//! Core data types for the gaze engine

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of the eye tracking engine.
///
/// The first seven variants form the bring-up chain, in order. The remaining
/// six are error states that stay put until the consumer calls `retry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    NotInitialized,
    TobiiInitialized,
    ConfigurationInitialized,
    DeviceInitialized,
    DeviceConnected,
    TrackingPrepared,
    Tracking,

    // Error states
    TrackingUnavailable,
    TrackingIncompatible,
    IncompleteConfiguration,
    InvalidConfiguration,
    ConnectionFailed,
    DeviceError,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which eye(s) the user profile is calibrated for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedEye {
    #[default]
    Both,
    LeftOnly,
    RightOnly,
}

/// Which eye(s) the device actually tracked for a given sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackingStatus {
    NoEyesTracked,
    BothEyesTracked,
    OnlyLeftEyeTracked,
    OneEyeTrackedProbablyLeft,
    OneEyeTrackedUnknownWhich,
    OneEyeTrackedProbablyRight,
    OnlyRightEyeTracked,
}

impl TrackingStatus {
    /// Whether the left eye's data is usable for this status
    pub fn has_left(self) -> bool {
        matches!(
            self,
            Self::BothEyesTracked
                | Self::OnlyLeftEyeTracked
                | Self::OneEyeTrackedProbablyLeft
                | Self::OneEyeTrackedUnknownWhich
        )
    }

    /// Whether the right eye's data is usable for this status
    pub fn has_right(self) -> bool {
        matches!(
            self,
            Self::BothEyesTracked
                | Self::OnlyRightEyeTracked
                | Self::OneEyeTrackedProbablyRight
                | Self::OneEyeTrackedUnknownWhich
        )
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result code reported by the configuration provider and by device callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    Success,
    TrackingUnavailable,
    TrackingIncompatible,
    ConfigIncomplete,
    ConfigInvalid,
    ConnectionFailed,
    /// Vendor code with no dedicated variant
    Other(u32),
}

impl ErrorCode {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "vendor error {code:#x}"),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2D {
    pub x: f64,
    pub y: f64,
}

impl Point2D {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Per-axis arithmetic mean of two points
    pub fn midpoint(self, other: Point2D) -> Point2D {
        Point2D {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3D {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

impl From<[f64; 3]> for Point3D {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self { x, y, z }
    }
}

/// Per-eye part of a gaze sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeSample {
    /// Eye position relative to the tracker, in millimetres
    pub eye_position_mm: Point3D,
    /// Eye position inside the tracking volume (0.0-1.0 per axis)
    pub eye_position_track_box: Point3D,
    /// Gaze point relative to the tracker, in millimetres
    pub gaze_point_mm: Point3D,
    /// Gaze point on the display (0.0-1.0 per axis)
    pub gaze_point_on_display: Point2D,
}

/// One raw sample as delivered by the device's event loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeSample {
    /// Device timestamp in microseconds since an arbitrary device epoch
    pub timestamp: i64,
    pub tracking_status: TrackingStatus,
    pub left: EyeSample,
    pub right: EyeSample,
}

/// Screen rectangle in absolute pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Default for ScreenBounds {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 1920.0,
            height: 1080.0,
        }
    }
}

/// Address of an eye tracker, e.g. `sim://default` or `udp://127.0.0.1:5555`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceUrl(String);

impl DeviceUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> Option<&str> {
        self.0.split_once("://").map(|(scheme, _)| scheme)
    }

    /// Everything after `scheme://`
    pub fn address(&self) -> &str {
        self.0.split_once("://").map_or(self.0.as_str(), |(_, rest)| rest)
    }
}

impl fmt::Display for DeviceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration fetched from the provider while entering `ConfigurationInitialized`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfiguration {
    pub url: DeviceUrl,
    pub screen_bounds: ScreenBounds,
    pub user_profile: String,
    pub tracked_eye: TrackedEye,
}

/// State-changed notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateChange {
    pub state: TrackingState,
    /// Empty unless `state` is an error state
    pub error_message: String,
    pub can_resolve: bool,
    pub can_retry: bool,
}

/// Gaze point notification, in absolute screen pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: i32,
    pub y: i32,
}
