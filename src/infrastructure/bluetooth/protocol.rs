//! Camera BLE Protocol
//!
//! UUIDs, command tables and response patterns of the camera's wireless
//! control service. The service is undocumented; everything here was
//! recovered by observation of one firmware revision.

use crate::domain::models::{AdvertisementInfo, CommandEntry};
use anyhow::Result;
use uuid::Uuid;

/// Bluetooth SIG base UUID (0000xxxx-0000-1000-8000-00805F9B34FB)
const BLUETOOTH_BASE_UUID: u128 = 0x00000000_0000_1000_8000_00805f9b34fb;

/// Expand a 16-bit assigned number into a full UUID
pub const fn short_uuid(short: u16) -> Uuid {
    Uuid::from_u128(BLUETOOTH_BASE_UUID | ((short as u128) << 96))
}

/// Camera control service
pub const CAMERA_SERVICE_UUID: Uuid = short_uuid(0xFFF0);

/// WiFi control characteristic - command writes and WiFi status reads
pub const WIFI_CONTROL_UUID: Uuid = short_uuid(0xFFF3);

/// Camera control characteristic - carries WiFi info (SSID) responses
pub const CAMERA_CONTROL_UUID: Uuid = short_uuid(0xFFF4);

/// Camera status characteristic
pub const STATUS_UUID: Uuid = short_uuid(0xFFF5);

/// Notify characteristic
pub const NOTIFY_UUID: Uuid = short_uuid(0xFFF7);

/// Company identifier found in the camera's manufacturer data (bytes `aa 08`)
pub const CAMERA_MANUFACTURER_ID: u16 = 0x08AA;

/// Switches the radio to access-point mode
pub const AP_MODE_ON: [u8; 3] = [0x04, 0x01, 0x00];

/// Written before the bring-up table when FFF3 returns its placeholder value
const RESET_TABLE: &[(&str, [u8; 3])] = &[
    ("Clear", [0x00, 0x00, 0x00]),
    ("Reset", [0xFF, 0xFF, 0xFF]),
    ("Init", [0x00, 0x00, 0x01]),
];
const RESET_DELAY_MS: u64 = 500;

const FULL_BRING_UP_TABLE: &[(&str, [u8; 3])] = &[
    // Base initialisation
    ("WiFi Module Init", [0x00, 0x01, 0x00]),
    ("WiFi Power ON", [0x01, 0x01, 0x00]),
    ("WiFi Enable", [0x02, 0x01, 0x00]),
    // Access point
    ("AP Mode", AP_MODE_ON),
    ("Channel 6", [0x05, 0x06, 0x00]),
    ("Max Clients", [0x06, 0x05, 0x00]),
    ("SSID Enable", [0x07, 0x01, 0x00]),
    ("No Security", [0x08, 0x00, 0x00]),
    // Network services
    ("DHCP Server", [0x09, 0x01, 0x00]),
    ("Remote Control", [0x0A, 0x01, 0x00]),
    ("Broadcast ON", [0x0B, 0x01, 0x00]),
    ("Server Start", [0x0C, 0x01, 0x00]),
    ("SSID Visible", [0x0D, 0x01, 0x00]),
    ("Accept Connections", [0x0E, 0x01, 0x00]),
    // Phocus compatibility
    ("Phocus Mode", [0x0F, 0x01, 0x00]),
    ("Protocol V2", [0x10, 0x02, 0x00]),
    ("Activate", [0xFF, 0x01, 0x00]),
];
const BRING_UP_DELAY_MS: u64 = 200;

/// Follow-up once the camera reports AP or client mode
const AP_BROADCAST_TABLE: &[(&str, [u8; 3])] = &[
    ("Set Channel 6", [0x05, 0x06, 0x00]),
    ("SSID Broadcast Enable", [0x0D, 0x01, 0x00]),
    ("Broadcast ON", [0x0B, 0x01, 0x00]),
    ("Server Start", [0x0C, 0x01, 0x00]),
    ("Accept Connections", [0x0E, 0x01, 0x00]),
    ("Remote Control ON", [0x0A, 0x01, 0x00]),
    ("DHCP Server ON", [0x09, 0x01, 0x00]),
    ("Final Activate", [0xFF, 0x01, 0x00]),
];
const AP_BROADCAST_DELAY_MS: u64 = 300;

const WIFI_INFO_TABLE: &[(&str, [u8; 3])] = &[
    ("Get WiFi Info", [0x03, 0x00, 0x01]),
    ("Get SSID", [0x07, 0x00, 0x00]),
    ("Get Password", [0x08, 0x00, 0x00]),
];
const WIFI_INFO_DELAY_MS: u64 = 500;

fn build_table(entries: &[(&str, [u8; 3])], delay_ms: u64) -> Vec<CommandEntry> {
    entries
        .iter()
        .map(|(label, payload)| CommandEntry::new(label, payload, delay_ms))
        .collect()
}

pub fn reset_table() -> Vec<CommandEntry> {
    build_table(RESET_TABLE, RESET_DELAY_MS)
}

pub fn full_bring_up_table() -> Vec<CommandEntry> {
    build_table(FULL_BRING_UP_TABLE, BRING_UP_DELAY_MS)
}

pub fn ap_broadcast_table() -> Vec<CommandEntry> {
    build_table(AP_BROADCAST_TABLE, AP_BROADCAST_DELAY_MS)
}

pub fn wifi_info_table() -> Vec<CommandEntry> {
    build_table(WIFI_INFO_TABLE, WIFI_INFO_DELAY_MS)
}

/// Value read from (or notified by) the WiFi control characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiStatus {
    /// `11 22 33 44`, the characteristic has not been initialised
    Placeholder,
    /// `01 00`, WiFi on in client mode; needs switching to AP mode
    ClientMode,
    /// `04 01 00`, access point is up
    ApModeActive,
    /// `0a 00 01`
    RemoteControlOn,
    /// `08 00 00`, reply to a WiFi info request
    WifiInfoPending,
    /// `02 00 01`, echo of the enable command
    CommandEcho,
    Unknown(Vec<u8>),
}

pub fn classify_wifi_status(data: &[u8]) -> WifiStatus {
    match data {
        [0x11, 0x22, 0x33, 0x44] => WifiStatus::Placeholder,
        [0x01, 0x00] => WifiStatus::ClientMode,
        [0x04, 0x01, 0x00] => WifiStatus::ApModeActive,
        [0x0a, 0x00, 0x01] => WifiStatus::RemoteControlOn,
        [0x08, 0x00, 0x00] => WifiStatus::WifiInfoPending,
        [0x02, 0x00, 0x01] => WifiStatus::CommandEcho,
        other => WifiStatus::Unknown(other.to_vec()),
    }
}

/// Value pushed on the notify characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyEvent {
    WifiReady,
    ApModeActive,
    Other(Vec<u8>),
}

pub fn classify_notify(data: &[u8]) -> NotifyEvent {
    if data.first() == Some(&0x01) {
        NotifyEvent::WifiReady
    } else if data == AP_MODE_ON {
        NotifyEvent::ApModeActive
    } else {
        NotifyEvent::Other(data.to_vec())
    }
}

/// Status value meaning the camera switched to WiFi mode
pub fn is_wifi_mode_status(data: &[u8]) -> bool {
    data == [0x02, 0x00, 0x01]
}

/// Decode the SSID carried by a camera control read.
///
/// Plain UTF-8 is taken as-is; longer binary payloads may carry a 2-byte
/// header before the name.
pub fn decode_ssid_hint(data: &[u8]) -> Option<String> {
    let text = match std::str::from_utf8(data) {
        Ok(text) => Some(text),
        Err(_) if data.len() > 4 => std::str::from_utf8(&data[2..]).ok(),
        Err(_) => None,
    }?;
    let text = text.trim_matches(char::from(0)).trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Heuristics deciding whether an advertisement belongs to a camera
#[derive(Debug, Clone)]
pub struct CameraMatcher {
    pub name_patterns: Vec<String>,
    pub service_uuid: Uuid,
    pub manufacturer_id: u16,
}

impl Default for CameraMatcher {
    fn default() -> Self {
        Self {
            name_patterns: vec!["X2D".to_string(), "100C".to_string()],
            service_uuid: CAMERA_SERVICE_UUID,
            manufacturer_id: CAMERA_MANUFACTURER_ID,
        }
    }
}

impl CameraMatcher {
    pub fn matches(&self, adv: &AdvertisementInfo) -> bool {
        let name_matches = |name: &Option<String>| {
            name.as_deref()
                .map(|n| self.name_patterns.iter().any(|p| n.contains(p.as_str())))
                .unwrap_or(false)
        };

        name_matches(&adv.name)
            || name_matches(&adv.local_name)
            || adv.service_uuids.contains(&self.service_uuid)
            || adv.manufacturer_ids.contains(&self.manufacturer_id)
    }
}

/// True if `ssid` looks like one of the camera's own networks
pub fn is_camera_network(ssid: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| ssid.contains(p.as_str()))
}

/// Parse a UUID given either as a 16-bit short form ("FFF3") or in full
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    let trimmed = uuid_str.trim();
    if trimmed.len() == 4 {
        let short = u16::from_str_radix(trimmed, 16)?;
        return Ok(short_uuid(short));
    }
    Ok(Uuid::parse_str(trimmed)?)
}

/// Lower-case hex without separators, as the debug log shows payloads
pub fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid() {
        assert_eq!(
            WIFI_CONTROL_UUID.to_string(),
            "0000fff3-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(parse_uuid("FFF7").unwrap(), NOTIFY_UUID);
        assert_eq!(
            parse_uuid("0000FFF0-0000-1000-8000-00805F9B34FB").unwrap(),
            CAMERA_SERVICE_UUID
        );
        assert!(parse_uuid("XYZW").is_err());
    }

    #[test]
    fn test_tables() {
        let full = full_bring_up_table();
        assert_eq!(full.len(), 17);
        assert_eq!(full[0].payload, vec![0x00, 0x01, 0x00]);
        assert_eq!(full[3].payload, AP_MODE_ON.to_vec());
        assert_eq!(full[16].label, "Activate");
        assert!(full.iter().all(|e| e.delay_ms == 200));

        let reset = reset_table();
        assert_eq!(reset.len(), 3);
        assert_eq!(reset[1].payload, vec![0xFF, 0xFF, 0xFF]);

        assert_eq!(ap_broadcast_table().len(), 8);
        assert_eq!(wifi_info_table()[0].payload, vec![0x03, 0x00, 0x01]);
    }

    #[test]
    fn test_classify_wifi_status() {
        assert_eq!(classify_wifi_status(&[0x11, 0x22, 0x33, 0x44]), WifiStatus::Placeholder);
        assert_eq!(classify_wifi_status(&[0x01, 0x00]), WifiStatus::ClientMode);
        assert_eq!(classify_wifi_status(&[0x04, 0x01, 0x00]), WifiStatus::ApModeActive);
        assert_eq!(classify_wifi_status(&[0x0a, 0x00, 0x01]), WifiStatus::RemoteControlOn);
        assert_eq!(
            classify_wifi_status(&[0x04, 0x01]),
            WifiStatus::Unknown(vec![0x04, 0x01])
        );
    }

    #[test]
    fn test_classify_notify() {
        assert_eq!(classify_notify(&[0x01, 0x05]), NotifyEvent::WifiReady);
        assert_eq!(classify_notify(&[0x04, 0x01, 0x00]), NotifyEvent::ApModeActive);
        assert_eq!(classify_notify(&[]), NotifyEvent::Other(vec![]));
    }

    #[test]
    fn test_decode_ssid_hint() {
        assert_eq!(
            decode_ssid_hint(b"X2D II 100C 003635").as_deref(),
            Some("X2D II 100C 003635")
        );
        let mut framed = vec![0xC3, 0x28];
        framed.extend_from_slice(b"X2D-1");
        assert_eq!(decode_ssid_hint(&framed).as_deref(), Some("X2D-1"));
        assert_eq!(decode_ssid_hint(&[0xC3, 0x28]), None);
        assert_eq!(decode_ssid_hint(&[0x00, 0x00]), None);
    }

    #[test]
    fn test_camera_matcher() {
        let matcher = CameraMatcher::default();
        let by_name = AdvertisementInfo {
            name: Some("X2D II 100C 003635".to_string()),
            ..Default::default()
        };
        let by_local_name = AdvertisementInfo {
            local_name: Some("Cam X2D".to_string()),
            ..Default::default()
        };
        let by_service = AdvertisementInfo {
            service_uuids: vec![CAMERA_SERVICE_UUID],
            ..Default::default()
        };
        let by_vendor = AdvertisementInfo {
            manufacturer_ids: vec![0x08AA],
            ..Default::default()
        };
        let other = AdvertisementInfo {
            name: Some("Headphones".to_string()),
            manufacturer_ids: vec![0x004C],
            ..Default::default()
        };
        assert!(matcher.matches(&by_name));
        assert!(matcher.matches(&by_local_name));
        assert!(matcher.matches(&by_service));
        assert!(matcher.matches(&by_vendor));
        assert!(!matcher.matches(&other));
    }

    #[test]
    fn test_camera_network() {
        let patterns = vec!["X2D".to_string(), "Hasselblad".to_string()];
        assert!(is_camera_network("X2D II 100C 003635", &patterns));
        assert!(!is_camera_network("HomeWifi", &patterns));
        assert_eq!(hex(&[0x04, 0x01, 0xab]), "0401ab");
    }
}
