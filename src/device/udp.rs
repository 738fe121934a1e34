//! UDP gaze bridge
//!
//! Accepts samples from an external tracker process (or a test harness) over
//! UDP. Two datagram formats are understood:
//!
//! JSON:
//! `{"ts":123,"status":"both","left":{"gaze":[0.4,0.5]},"right":{"gaze":[0.6,0.5]}}`
//!
//! k=v tokens:
//! `ts=123 status=both lx=0.4 ly=0.5 rx=0.6 ry=0.5`
//!
//! A single `x`/`y` pair is taken as both eyes looking at the same point.

use super::{complete_later, Completion, DeviceEvents, DeviceFactory, DeviceHandle};
use crate::error::DeviceException;
use crate::types::{
    DeviceUrl, ErrorCode, EyeSample, GazeSample, Point2D, Point3D, TrackingStatus,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked receive wakes up to look for a break request
const RECV_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Default, Deserialize)]
struct JsonEye {
    gaze: Option<[f64; 2]>,
    #[serde(default)]
    eye_mm: [f64; 3],
    #[serde(default)]
    track_box: [f64; 3],
    #[serde(default)]
    gaze_mm: [f64; 3],
}

#[derive(Debug, Deserialize)]
struct JsonGazeMsg {
    #[serde(default, alias = "timestamp")]
    ts: Option<i64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    left: Option<JsonEye>,
    #[serde(default)]
    right: Option<JsonEye>,
    #[serde(default)]
    x: Option<f64>,
    #[serde(default)]
    y: Option<f64>,
}

pub fn udp_gaze_addr_from_env() -> Option<SocketAddr> {
    let raw = std::env::var("RAYOS_GAZE_UDP_ADDR").ok()?;
    raw.parse::<SocketAddr>().ok()
}

pub fn parse_gaze_message(msg: &str) -> Option<GazeSample> {
    let msg = msg.trim();
    if msg.is_empty() {
        return None;
    }

    if msg.starts_with('{') {
        let j = serde_json::from_str::<JsonGazeMsg>(msg).ok()?;
        let shared = j.x.zip(j.y);
        let left = j.left.unwrap_or_default();
        let right = j.right.unwrap_or_default();

        let left_gaze = left.gaze.map(|[x, y]| (x, y)).or(shared);
        let right_gaze = right.gaze.map(|[x, y]| (x, y)).or(shared);
        let status = match j.status.as_deref() {
            Some(s) => parse_status(s)?,
            None => infer_status(left_gaze.is_some(), right_gaze.is_some()),
        };

        let eye = |e: &JsonEye, gaze: Option<(f64, f64)>| EyeSample {
            eye_position_mm: Point3D::from(e.eye_mm),
            eye_position_track_box: Point3D::from(e.track_box),
            gaze_point_mm: Point3D::from(e.gaze_mm),
            gaze_point_on_display: display_point(gaze),
        };

        return Some(GazeSample {
            timestamp: j.ts.unwrap_or_else(now_us),
            tracking_status: status,
            left: eye(&left, left_gaze),
            right: eye(&right, right_gaze),
        });
    }

    let mut x = None;
    let mut y = None;
    let mut lx = None;
    let mut ly = None;
    let mut rx = None;
    let mut ry = None;
    let mut status = None;
    let mut timestamp = None;

    for tok in msg.split_whitespace() {
        let (k, v) = tok.split_once('=')?;
        match k {
            "x" => x = v.parse::<f64>().ok(),
            "y" => y = v.parse::<f64>().ok(),
            "lx" => lx = v.parse::<f64>().ok(),
            "ly" => ly = v.parse::<f64>().ok(),
            "rx" => rx = v.parse::<f64>().ok(),
            "ry" => ry = v.parse::<f64>().ok(),
            "status" => status = Some(parse_status(v)?),
            "ts" | "timestamp" => timestamp = v.parse::<i64>().ok(),
            _ => {}
        }
    }

    let shared = x.zip(y);
    let left_gaze = lx.zip(ly).or(shared);
    let right_gaze = rx.zip(ry).or(shared);
    if left_gaze.is_none() && right_gaze.is_none() && status.is_none() {
        return None;
    }

    let eye = |gaze: Option<(f64, f64)>| EyeSample {
        gaze_point_on_display: display_point(gaze),
        ..EyeSample::default()
    };

    Some(GazeSample {
        timestamp: timestamp.unwrap_or_else(now_us),
        tracking_status: status
            .unwrap_or_else(|| infer_status(left_gaze.is_some(), right_gaze.is_some())),
        left: eye(left_gaze),
        right: eye(right_gaze),
    })
}

fn parse_status(raw: &str) -> Option<TrackingStatus> {
    let status = match raw {
        "none" | "NoEyesTracked" => TrackingStatus::NoEyesTracked,
        "both" | "BothEyesTracked" => TrackingStatus::BothEyesTracked,
        "left" | "OnlyLeftEyeTracked" => TrackingStatus::OnlyLeftEyeTracked,
        "probably_left" | "OneEyeTrackedProbablyLeft" => TrackingStatus::OneEyeTrackedProbablyLeft,
        "unknown" | "OneEyeTrackedUnknownWhich" => TrackingStatus::OneEyeTrackedUnknownWhich,
        "probably_right" | "OneEyeTrackedProbablyRight" => {
            TrackingStatus::OneEyeTrackedProbablyRight
        }
        "right" | "OnlyRightEyeTracked" => TrackingStatus::OnlyRightEyeTracked,
        _ => return None,
    };
    Some(status)
}

/// Read timeouts and signals, the loop just polls again
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

fn infer_status(left: bool, right: bool) -> TrackingStatus {
    match (left, right) {
        (true, true) => TrackingStatus::BothEyesTracked,
        (true, false) => TrackingStatus::OnlyLeftEyeTracked,
        (false, true) => TrackingStatus::OnlyRightEyeTracked,
        (false, false) => TrackingStatus::NoEyesTracked,
    }
}

fn display_point(gaze: Option<(f64, f64)>) -> Point2D {
    gaze.map_or_else(Point2D::default, |(x, y)| {
        Point2D::new(x.clamp(0.0, 1.0), y.clamp(0.0, 1.0))
    })
}

/// Opens `udp://host:port` URLs by binding a listening socket
#[derive(Debug, Default)]
pub struct UdpDeviceFactory;

impl UdpDeviceFactory {
    pub fn new() -> Self {
        Self
    }
}

impl DeviceFactory for UdpDeviceFactory {
    fn open(&self, url: &DeviceUrl) -> Result<Arc<dyn DeviceHandle>, DeviceException> {
        if url.scheme() != Some("udp") {
            return Err(DeviceException::new(format!("not a UDP gaze source: {url}")));
        }
        let addr: SocketAddr = url
            .address()
            .parse()
            .map_err(|e| DeviceException::new(format!("bad UDP address in {url}: {e}")))?;

        Ok(Arc::new(UdpGazeDevice::bind(url.clone(), addr)?))
    }
}

pub struct UdpGazeDevice {
    url: DeviceUrl,
    socket: UdpSocket,
    events: Mutex<Option<Arc<dyn DeviceEvents>>>,
    tracking: AtomicBool,
    stop: AtomicBool,
}

impl UdpGazeDevice {
    pub fn bind(url: DeviceUrl, addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(RECV_POLL))?;
        log::info!("UDP gaze listener bound on {}", socket.local_addr()?);

        Ok(Self {
            url,
            socket,
            events: Mutex::new(None),
            tracking: AtomicBool::new(false),
            stop: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl DeviceHandle for UdpGazeDevice {
    fn subscribe(&self, events: Arc<dyn DeviceEvents>) {
        *self.events.lock() = Some(events);
    }

    fn unsubscribe(&self) {
        *self.events.lock() = None;
    }

    fn connect_async(&self, done: Completion) {
        // The socket is bound in `open`; there is no handshake.
        complete_later("connect", done, ErrorCode::Success);
    }

    fn start_tracking_async(&self, done: Completion) {
        self.tracking.store(true, Ordering::SeqCst);
        complete_later("start-tracking", done, ErrorCode::Success);
    }

    fn run_event_loop(&self) -> Result<(), DeviceException> {
        let mut buf = [0u8; 2048];

        while !self.stop.load(Ordering::SeqCst) {
            let len = match self.socket.recv_from(&mut buf) {
                Ok((len, _src)) => len,
                Err(e) if is_transient(&e) => continue,
                Err(e) => {
                    return Err(DeviceException::new(format!("UDP gaze recv on {}: {e}", self.url)))
                }
            };

            if !self.tracking.load(Ordering::SeqCst) {
                continue;
            }
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                log::debug!("Dropping non-UTF-8 gaze datagram ({len} bytes)");
                continue;
            };
            match parse_gaze_message(text) {
                Some(sample) => {
                    let events = self.events.lock().clone();
                    if let Some(events) = events {
                        events.on_sample(&sample);
                    }
                }
                None => log::debug!("Unparseable gaze datagram: {text:?}"),
            }
        }
        Ok(())
    }

    fn break_event_loop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn dispose(&self) {
        self.tracking.store(false, Ordering::SeqCst);
        self.events.lock().take();
    }
}

fn now_us() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
