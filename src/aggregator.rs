//! Gaze aggregation - turns raw two-eye samples into one screen point

use crate::types::{
    DeviceConfiguration, GazePoint, GazeSample, Point2D, ScreenBounds, TrackedEye, TrackingStatus,
};

/// Per-session aggregation state
#[derive(Debug, Default)]
pub struct GazeAggregator {
    start_time: Option<i64>,
}

impl GazeAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timestamp of the first sample ever observed
    pub fn start_time(&self) -> Option<i64> {
        self.start_time
    }

    /// Record `sample` and return its offset from the session start.
    /// The first sample fixes the start, so its offset is zero. Offsets
    /// saturate at the `i64` bounds.
    pub fn observe(&mut self, sample: &GazeSample) -> i64 {
        let start = *self.start_time.get_or_insert(sample.timestamp);
        sample.timestamp.saturating_sub(start)
    }

    /// Pixel position to publish for `sample`, if any
    pub fn publishable(
        &self,
        sample: &GazeSample,
        configuration: Option<&DeviceConfiguration>,
    ) -> Option<GazePoint> {
        let configuration = configuration?;
        let point = select_point(configuration.tracked_eye, sample)?;
        Some(configuration.screen_bounds.to_pixels(point))
    }
}

/// Pick the normalized on-display point for `sample` under the profile's eye policy
pub fn select_point(tracked_eye: TrackedEye, sample: &GazeSample) -> Option<Point2D> {
    let left = sample.left.gaze_point_on_display;
    let right = sample.right.gaze_point_on_display;
    let status = sample.tracking_status;

    match tracked_eye {
        TrackedEye::Both => match status {
            TrackingStatus::BothEyesTracked | TrackingStatus::OneEyeTrackedUnknownWhich => {
                Some(left.midpoint(right))
            }
            TrackingStatus::OnlyLeftEyeTracked | TrackingStatus::OneEyeTrackedProbablyLeft => {
                Some(left)
            }
            TrackingStatus::OnlyRightEyeTracked | TrackingStatus::OneEyeTrackedProbablyRight => {
                Some(right)
            }
            TrackingStatus::NoEyesTracked => None,
        },
        TrackedEye::LeftOnly => status.has_left().then_some(left),
        TrackedEye::RightOnly => status.has_right().then_some(right),
    }
}

impl ScreenBounds {
    /// Map a normalized point onto this rectangle, rounding each axis to the
    /// nearest pixel (ties to even)
    pub fn to_pixels(&self, point: Point2D) -> GazePoint {
        GazePoint {
            x: (self.x + point.x * self.width).round_ties_even() as i32,
            y: (self.y + point.y * self.height).round_ties_even() as i32,
        }
    }
}
