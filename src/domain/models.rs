use crate::domain::geotag::GeotagStatus;
use crate::domain::session::ConnectionState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A BLE peripheral seen during a scan session
#[derive(Debug, Clone)]
pub struct DiscoveredCamera {
    /// Platform peripheral identifier (address on Linux/Windows, UUID on macOS)
    pub id: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub discovered_at: DateTime<Utc>,
    /// True when the advertisement matched the camera heuristics
    pub is_camera: bool,
}

/// Advertisement fields used to decide whether a peripheral is a camera
#[derive(Debug, Clone, Default)]
pub struct AdvertisementInfo {
    pub name: Option<String>,
    pub local_name: Option<String>,
    pub service_uuids: Vec<uuid::Uuid>,
    pub manufacturer_ids: Vec<u16>,
}

/// GATT characteristic roles on the camera service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    WifiControl,
    CameraControl,
    Status,
    Notify,
}

impl fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::WifiControl => "wifi-control",
            Self::CameraControl => "camera-control",
            Self::Status => "status",
            Self::Notify => "notify",
        };
        f.write_str(name)
    }
}

/// One write of a command table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub label: String,
    pub payload: Vec<u8>,
    /// Time to listen for a response after the write, in milliseconds
    pub delay_ms: u64,
}

impl CommandEntry {
    pub fn new(label: &str, payload: &[u8], delay_ms: u64) -> Self {
        Self {
            label: label.to_string(),
            payload: payload.to_vec(),
            delay_ms,
        }
    }
}

/// A host/port pair reachable over the camera WiFi
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// A location fix relayed to the camera with a capture command
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    CameraFound(DiscoveredCamera),
    ScanFinished { found: usize },
    ConnectionState(ConnectionState),
    LogMessage(StatusMessage),
    CameraResponse(String),
    PhotoCaptured { count: u32 },
    GeotagLog(String),
    GeotagProgress(f64),
    GeotagFinished(GeotagStatus),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
