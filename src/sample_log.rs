//! CSV sink for raw gaze samples

use crate::types::{EyeSample, GazeSample};
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Column names, in row order. Kept verbatim so existing analysis scripts
/// keep working.
pub const CSV_HEADER: [&str; 25] = [
    "Timestamp",
    "TimestampOffset",
    "Tracking Status",
    "LeftEyePositionFromEyeTrackerMMX",
    "LeftEyePositionFromEyeTrackerMMY",
    "LeftEyePositionFromEyeTrackerMMZ",
    "LeftEyePostitionInTrackBoxNormalizedX",
    "LeftEyePostitionInTrackBoxNormalizedY",
    "LeftEyePostitionInTrackBoxNormalizedZ",
    "LeftGazePointFromEyeTrackerMMX",
    "LeftGazePointFromEyeTrackerMMY",
    "LeftGazePointFromEyeTrackerMMZ",
    "LeftGazePointOnDisplayNormalizedX",
    "LeftGazePointOnDisplayNormalizedY",
    "RightEyePositionFromEyeTrackerMMX",
    "RightEyePositionFromEyeTrackerMMY",
    "RightEyePositionFromEyeTrackerMMZ",
    "RightEyePostitionInTrackBoxNormalizedX",
    "RightEyePostitionInTrackBoxNormalizedY",
    "RightEyePostitionInTrackBoxNormalizedZ",
    "RightGazePointFromEyeTrackerMMX",
    "RightGazePointFromEyeTrackerMMY",
    "RightGazePointFromEyeTrackerMMZ",
    "RightGazePointOnDisplayNormalizedX",
    "RightGazePointOnDisplayNormalizedY",
];

/// Append-only CSV log, one row per sample.
///
/// Rows may arrive from the device's event-loop thread, so every write goes
/// through one mutex.
pub struct SampleLogger {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
}

impl SampleLogger {
    /// Create (or truncate) `path` and write the header row
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)
            .with_context(|| format!("create sample log: {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "{}", CSV_HEADER.join(","))
            .with_context(|| format!("write sample log header: {}", path.display()))?;

        log::info!("Logging gaze samples to {}", path.display());

        Ok(Self {
            path,
            writer: Mutex::new(Some(writer)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one row. No-op once the log is closed.
    pub fn log(&self, sample: &GazeSample, offset: i64) -> io::Result<()> {
        let row = format_row(sample, offset);
        match self.writer.lock().as_mut() {
            Some(writer) => writeln!(writer, "{row}"),
            None => Ok(()),
        }
    }

    /// Flush and close the file. Only the first call does anything.
    pub fn close(&self) -> io::Result<()> {
        match self.writer.lock().take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.lock().is_none()
    }
}

impl Drop for SampleLogger {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to flush sample log {}: {e}", self.path.display());
        }
    }
}

fn format_row(sample: &GazeSample, offset: i64) -> String {
    let mut row = format!("{},{},{}", sample.timestamp, offset, sample.tracking_status);
    push_eye(&mut row, &sample.left);
    push_eye(&mut row, &sample.right);
    row
}

fn push_eye(row: &mut String, eye: &EyeSample) {
    let values = [
        eye.eye_position_mm.x,
        eye.eye_position_mm.y,
        eye.eye_position_mm.z,
        eye.eye_position_track_box.x,
        eye.eye_position_track_box.y,
        eye.eye_position_track_box.z,
        eye.gaze_point_mm.x,
        eye.gaze_point_mm.y,
        eye.gaze_point_mm.z,
        eye.gaze_point_on_display.x,
        eye.gaze_point_on_display.y,
    ];
    for v in values {
        // Writing into a String cannot fail.
        let _ = write!(row, ",{v}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Point2D, Point3D, TrackingStatus};

    fn sample(timestamp: i64) -> GazeSample {
        let eye = |side: f64, display_x: f64| EyeSample {
            eye_position_mm: Point3D::new(side * 30.0, 12.5, 600.0),
            eye_position_track_box: Point3D::new(0.5, 0.5, 0.4),
            gaze_point_mm: Point3D::new(side * 5.0, 150.0, 0.0),
            gaze_point_on_display: Point2D::new(display_x, 0.25),
        };
        GazeSample {
            timestamp,
            tracking_status: TrackingStatus::BothEyesTracked,
            left: eye(-1.0, 0.49),
            right: eye(1.0, 0.51),
        }
    }

    fn read_rows(path: &Path) -> Vec<Vec<String>> {
        std::fs::read_to_string(path)
            .expect("read log")
            .lines()
            .map(|line| line.split(',').map(str::to_string).collect())
            .collect()
    }

    #[test]
    fn header_is_written_on_create() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.log");

        let logger = SampleLogger::create(&path).expect("create");
        logger.close().expect("close");

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], CSV_HEADER);
    }

    #[test]
    fn rows_have_25_fields_left_eye_first() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.log");

        let logger = SampleLogger::create(&path).expect("create");
        logger.log(&sample(5_000), 0).expect("log");
        logger.log(&sample(21_667), 16_667).expect("log");
        logger.close().expect("close");

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 3);
        for row in &rows {
            assert_eq!(row.len(), 25);
        }

        let first = &rows[1];
        assert_eq!(first[0], "5000");
        assert_eq!(first[1], "0");
        assert_eq!(first[2], "BothEyesTracked");
        assert_eq!(first[3], "-30");
        assert_eq!(first[4], "12.5");
        assert_eq!(first[14], "30");
        assert_eq!(first[23], "0.51");
        assert_eq!(first[24], "0.25");

        assert_eq!(rows[2][1], "16667");
    }

    #[test]
    fn create_truncates_existing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.log");
        std::fs::write(&path, "stale\nstale\nstale\n").expect("seed");

        let logger = SampleLogger::create(&path).expect("create");
        logger.close().expect("close");

        assert_eq!(read_rows(&path).len(), 1);
    }

    #[test]
    fn close_is_idempotent_and_stops_logging() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("output.log");

        let logger = SampleLogger::create(&path).expect("create");
        logger.log(&sample(1), 0).expect("log");
        logger.close().expect("close");
        assert!(logger.is_closed());
        logger.close().expect("second close");
        logger.log(&sample(2), 1).expect("log after close");

        assert_eq!(read_rows(&path).len(), 2);
    }
}
