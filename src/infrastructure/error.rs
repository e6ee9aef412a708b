use crate::domain::models::CharacteristicRole;
use crate::domain::session::FailureReason;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BringUpError {
    #[error("no Bluetooth adapter available")]
    AdapterUnavailable,
    #[error("Bluetooth permission denied")]
    Unauthorized,
    #[error("camera {0} not found")]
    CameraNotFound(String),
    #[error("connection timed out after {0} s")]
    ConnectTimeout(u64),
    #[error("camera disconnected")]
    Disconnected,
    #[error("camera service {0} not found")]
    ServiceNotFound(String),
    #[error("characteristic {0} not available")]
    MissingCharacteristic(CharacteristicRole),
    #[error("please connect to the camera WiFi manually")]
    ManualJoinRequired,
    #[error("could not join {ssid}: {reason}")]
    JoinFailed { ssid: String, reason: String },
    #[error("no camera endpoint answered")]
    EndpointUnreachable,
    #[error("session cancelled")]
    Cancelled,
    #[error(transparent)]
    Ble(#[from] btleplug::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl BringUpError {
    /// State the session should end in after this error
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::AdapterUnavailable => FailureReason::AdapterUnavailable,
            Self::Unauthorized | Self::Ble(btleplug::Error::PermissionDenied) => {
                FailureReason::Unauthorized
            }
            Self::ConnectTimeout(_) | Self::Ble(btleplug::Error::TimedOut(_)) => {
                FailureReason::ConnectTimeout
            }
            Self::CameraNotFound(_)
            | Self::ServiceNotFound(_)
            | Self::MissingCharacteristic(_) => FailureReason::ServiceDiscovery,
            Self::ManualJoinRequired | Self::JoinFailed { .. } => {
                FailureReason::ManualJoinRequired
            }
            Self::EndpointUnreachable | Self::Io(_) | Self::Json(_) => {
                FailureReason::EndpointUnreachable
            }
            Self::Disconnected | Self::Cancelled | Self::Ble(_) => {
                FailureReason::PeripheralDisconnected
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum GeotagError {
    #[error("exiftool is not installed (try 'brew install exiftool' or your package manager)")]
    ToolNotFound,
    #[error("GPX file not found: {0}")]
    GpxNotFound(PathBuf),
    #[error("target directory not found: {0}")]
    TargetNotFound(PathBuf),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
