//! Error taxonomy for microphone acquisition and detection lifecycle.
//! Every failure leaves the detector in a well-defined `Stopped` state and is
//! surfaced to the caller; nothing is swallowed.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DetectorError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    /// The user (or platform policy) declined microphone access. Terminal for
    /// this `start` call; no automatic retry.
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No capture device exists or the device refused the requested stream.
    #[error("no usable capture device: {0}")]
    DeviceUnavailable(String),

    /// The capture stream ended mid-session (device unplugged, backend died).
    #[error("capture device lost mid-session: {0}")]
    DeviceLost(String),

    /// A session is already live on this detector instance. The prior session
    /// is left untouched; the caller must stop it first.
    #[error("detector already running")]
    AlreadyRunning,

    /// `stop()` won a race against an in-flight `start()`; the freshly granted
    /// stream was released without entering `Listening`.
    #[error("start cancelled by concurrent stop")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Audio backend failure that maps to none of the above.
    #[error("audio backend error: {0}")]
    Backend(String),
}

impl DetectorError {
    /// Map a cpal stream-build failure onto the taxonomy. Permission denials
    /// surface as backend-specific errors on every cpal host, so we match on
    /// the description.
    pub(crate) fn from_build_stream(err: cpal::BuildStreamError) -> Self {
        match err {
            cpal::BuildStreamError::DeviceNotAvailable => {
                DetectorError::DeviceUnavailable("device not available".into())
            }
            cpal::BuildStreamError::StreamConfigNotSupported => {
                DetectorError::DeviceUnavailable("stream config not supported".into())
            }
            cpal::BuildStreamError::BackendSpecific { err } => {
                let description = err.description;
                if is_permission_denial(&description) {
                    DetectorError::PermissionDenied(description)
                } else {
                    DetectorError::Backend(description)
                }
            }
            other => DetectorError::Backend(other.to_string()),
        }
    }

    pub(crate) fn from_play_stream(err: cpal::PlayStreamError) -> Self {
        match err {
            cpal::PlayStreamError::DeviceNotAvailable => {
                DetectorError::DeviceUnavailable("device not available".into())
            }
            cpal::PlayStreamError::BackendSpecific { err } => {
                let description = err.description;
                if is_permission_denial(&description) {
                    DetectorError::PermissionDenied(description)
                } else {
                    DetectorError::Backend(description)
                }
            }
        }
    }
}

fn is_permission_denial(description: &str) -> bool {
    let lower = description.to_ascii_lowercase();
    lower.contains("permission") || lower.contains("access denied") || lower.contains("not permitted")
}
