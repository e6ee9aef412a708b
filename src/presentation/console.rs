//! Plain-text rendering of application events

use crate::domain::geotag::{timezone_region, TimezoneHint};
use crate::domain::models::{AppEvent, DiscoveredCamera, MessageSeverity};

fn severity_marker(severity: MessageSeverity) -> &'static str {
    match severity {
        MessageSeverity::Info => "ℹ",
        MessageSeverity::Success => "✅",
        MessageSeverity::Warning => "⚠",
        MessageSeverity::Error => "❌",
    }
}

pub fn render_camera(camera: &DiscoveredCamera) -> String {
    let rssi = camera
        .rssi
        .map(|r| format!("{} dBm", r))
        .unwrap_or_else(|| "N/A".to_string());
    let marker = if camera.is_camera { " [CAMERA]" } else { "" };
    format!("  {} ({}) RSSI: {}{}", camera.name, camera.id, rssi, marker)
}

pub fn render_event(event: &AppEvent) -> String {
    match event {
        AppEvent::CameraFound(camera) => render_camera(camera),
        AppEvent::ScanFinished { found } => format!("Scan finished, {} devices seen", found),
        AppEvent::ConnectionState(state) => format!("[{}]", state),
        AppEvent::LogMessage(msg) => format!("{} {}", severity_marker(msg.severity), msg.message),
        AppEvent::CameraResponse(text) => format!("<< {}", text),
        AppEvent::PhotoCaptured { count } => format!("📸 Photo {} captured", count),
        AppEvent::GeotagLog(line) => format!("   {}", line),
        AppEvent::GeotagProgress(progress) => format!("[{:>3.0}%]", progress * 100.0),
        AppEvent::GeotagFinished(status) => format!("Geotagging {}", status),
    }
}

pub fn render_timezone(hint: &TimezoneHint) -> String {
    match hint {
        TimezoneHint::Offset { offset, hours } => match timezone_region(*hours) {
            Some(region) => format!("GPX time zone: UTC{} ({})", offset, region),
            None => format!("GPX time zone: UTC{}", offset),
        },
        TimezoneHint::Utc => {
            "GPX timestamps are UTC; pass --tz-offset with the camera clock's offset".to_string()
        }
        TimezoneHint::Unknown => "No time zone information found in GPX".to_string(),
    }
}
