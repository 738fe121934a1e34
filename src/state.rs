//! Transition tables for [`TrackingState`]
//!
//! Everything the engine needs to know about a state without touching the
//! device lives here: which partition it belongs to, what the consumer may do
//! about it, which predecessor it may be entered from, and which step runs on
//! entry.

use crate::types::{ErrorCode, StateChange, TrackingState};

/// Action the engine performs right after entering a state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStep {
    /// Bring up the vendor subsystem
    Bootstrap,
    /// Validate and fetch the device configuration
    Configure,
    /// Construct the device handle and start its event loop
    OpenDevice,
    /// Issue the asynchronous connect
    Connect,
    /// Issue the asynchronous calibration/display-area preparation
    Prepare,
    /// Issue the asynchronous start-tracking
    StartTracking,
    /// Nothing to do until the consumer acts
    Idle,
}

impl TrackingState {
    pub const PROGRESS: [TrackingState; 7] = [
        TrackingState::NotInitialized,
        TrackingState::TobiiInitialized,
        TrackingState::ConfigurationInitialized,
        TrackingState::DeviceInitialized,
        TrackingState::DeviceConnected,
        TrackingState::TrackingPrepared,
        TrackingState::Tracking,
    ];

    pub const ERRORS: [TrackingState; 6] = [
        TrackingState::TrackingUnavailable,
        TrackingState::TrackingIncompatible,
        TrackingState::IncompleteConfiguration,
        TrackingState::InvalidConfiguration,
        TrackingState::ConnectionFailed,
        TrackingState::DeviceError,
    ];

    pub fn is_error(self) -> bool {
        Self::ERRORS.contains(&self)
    }

    /// Whether a plain `retry` can be expected to help
    pub fn can_retry(self) -> bool {
        matches!(
            self,
            Self::IncompleteConfiguration
                | Self::InvalidConfiguration
                | Self::ConnectionFailed
                | Self::DeviceError
        )
    }

    /// Whether the external configuration tool can fix this state
    pub fn can_resolve(self) -> bool {
        !matches!(self, Self::TrackingUnavailable | Self::TrackingIncompatible)
    }

    /// User-facing message for error states, empty otherwise
    pub fn error_message(self) -> &'static str {
        match self {
            Self::TrackingUnavailable => "Tobii Eye Tracking is not installed on this computer.",
            Self::TrackingIncompatible => {
                "This program cannot be used with the installed version of Tobii Eye Tracking."
            }
            Self::IncompleteConfiguration => "Tobii Eye Tracking has not been set up for use.",
            Self::InvalidConfiguration => {
                "The system has changed so that the Tobii Eye Tracking setup is not valid anymore."
            }
            Self::DeviceError => "The eye tracker reported an error.",
            Self::ConnectionFailed => "The connection to the eye tracker failed.",
            _ => "",
        }
    }

    /// The single progress state this one follows in the bring-up chain
    pub fn predecessor(self) -> Option<TrackingState> {
        match self {
            Self::TobiiInitialized => Some(Self::NotInitialized),
            Self::ConfigurationInitialized => Some(Self::TobiiInitialized),
            Self::DeviceInitialized => Some(Self::ConfigurationInitialized),
            Self::DeviceConnected => Some(Self::DeviceInitialized),
            Self::TrackingPrepared => Some(Self::DeviceConnected),
            Self::Tracking => Some(Self::TrackingPrepared),
            _ => None,
        }
    }

    /// Whether the engine may move from `from` into `self`.
    ///
    /// Error states can be entered from anywhere. `TobiiInitialized` is also
    /// the re-entry point after a retry, so it accepts every error state.
    pub fn accepts_from(self, from: TrackingState) -> bool {
        if self.is_error() {
            return true;
        }
        if self == Self::TobiiInitialized && from.is_error() {
            return true;
        }
        self.predecessor() == Some(from)
    }

    pub fn entry_step(self) -> EntryStep {
        match self {
            Self::NotInitialized => EntryStep::Bootstrap,
            Self::TobiiInitialized => EntryStep::Configure,
            Self::ConfigurationInitialized => EntryStep::OpenDevice,
            Self::DeviceInitialized => EntryStep::Connect,
            Self::DeviceConnected => EntryStep::Prepare,
            Self::TrackingPrepared => EntryStep::StartTracking,
            _ => EntryStep::Idle,
        }
    }

    /// Error state for a failed configuration validation, `None` on success.
    /// Codes without a dedicated mapping count as an invalid configuration.
    pub fn from_validation(code: ErrorCode) -> Option<TrackingState> {
        match code {
            ErrorCode::Success => None,
            ErrorCode::TrackingUnavailable => Some(Self::TrackingUnavailable),
            ErrorCode::TrackingIncompatible => Some(Self::TrackingIncompatible),
            ErrorCode::ConfigIncomplete => Some(Self::IncompleteConfiguration),
            _ => Some(Self::InvalidConfiguration),
        }
    }
}

impl StateChange {
    pub fn for_state(state: TrackingState) -> Self {
        Self {
            state,
            error_message: state.error_message().to_string(),
            can_resolve: state.can_resolve(),
            can_retry: state.can_retry(),
        }
    }
}
