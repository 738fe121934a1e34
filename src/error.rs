use crate::types::TrackingState;

/// Contract violations raised by the engine's public operations.
///
/// Device and configuration failures are not errors at this level; they are
/// reported as error states through the state-changed notification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{operation} is not valid in state {state}")]
    InvalidLifecycleTransition {
        operation: &'static str,
        state: TrackingState,
    },

    #[error("illegal state transition {from} -> {to}")]
    IllegalTransition {
        from: TrackingState,
        to: TrackingState,
    },

    #[error("event loop thread is already running")]
    EventLoopAlreadyRunning,

    #[error("eye tracking engine has been disposed")]
    Disposed,
}

/// Failure reported synchronously by a collaborator (provider or device)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct DeviceException(String);

impl DeviceException {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<std::io::Error> for DeviceException {
    fn from(e: std::io::Error) -> Self {
        Self(e.to_string())
    }
}
