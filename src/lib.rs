//! # RayOS Gaze - eye tracking engine
//!
//! Drives an eye tracker from first contact to live tracking, turns raw
//! two-eye samples into screen pixel positions, and records every sample to a
//! CSV log.
//!
//! The [`EyeTrackingEngine`] is a state machine. Consumers subscribe to state
//! changes and gaze points, and call [`retry`](EyeTrackingEngine::retry) or
//! [`resolve_error`](EyeTrackingEngine::resolve_error) when it lands in an
//! error state. Hardware sits behind the traits in [`device`].

pub mod aggregator;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod sample_log;
pub mod state;
pub mod types;

pub use config::{Backend, GazeConfig};
pub use dispatch::ListenerId;
pub use engine::EyeTrackingEngine;
pub use error::{DeviceException, EngineError};
pub use sample_log::SampleLogger;
pub use types::*;
