use crate::domain::geotag::{GeotagBackend, GeotagMode};
use crate::domain::models::CommandEntry;
use crate::infrastructure::bluetooth::protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// How often the log file rolls over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

/// Diagnostic logging. Camera events are printed to stdout regardless.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `tracing` filter directive, e.g. `info` or `photopin=debug`
    pub level: String,
    /// Log records on stderr
    pub console: bool,
    /// Source file and line on every record
    pub source_locations: bool,
    /// Rolling log file; off unless configured
    pub file: Option<LogFileSettings>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            source_locations: false,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFileSettings {
    /// Relative paths live under the per-user data directory
    pub dir: String,
    pub prefix: String,
    pub rotation: LogRotation,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self {
            dir: "logs".to_string(),
            prefix: "photopin".to_string(),
            rotation: LogRotation::default(),
        }
    }
}

/// Everything known about one camera model's wireless interface.
///
/// These values were recovered by observing an X2D II 100C and have never
/// been confirmed against vendor documentation; `profile_revision` names the
/// firmware the tables were captured from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraProfile {
    #[serde(default = "default_profile_revision")]
    pub profile_revision: String,

    // Discovery
    #[serde(default = "default_name_patterns")]
    pub name_patterns: Vec<String>,
    #[serde(default = "default_manufacturer_id")]
    pub manufacturer_id: u16,
    #[serde(default = "default_scan_window_secs")]
    pub scan_window_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    // GATT layout (short or full UUIDs)
    #[serde(default = "default_service_uuid")]
    pub service_uuid: String,
    #[serde(default = "default_wifi_control_uuid")]
    pub wifi_control_uuid: String,
    #[serde(default = "default_camera_control_uuid")]
    pub camera_control_uuid: String,
    #[serde(default = "default_status_uuid")]
    pub status_uuid: String,
    #[serde(default = "default_notify_uuid")]
    pub notify_uuid: String,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    // Command tables
    #[serde(default = "protocol::reset_table")]
    pub reset_table: Vec<CommandEntry>,
    #[serde(default = "protocol::full_bring_up_table")]
    pub bring_up_table: Vec<CommandEntry>,
    #[serde(default = "protocol::ap_broadcast_table")]
    pub ap_broadcast_table: Vec<CommandEntry>,
    #[serde(default = "protocol::wifi_info_table")]
    pub wifi_info_table: Vec<CommandEntry>,

    // WiFi
    #[serde(default = "default_ssid_candidates")]
    pub ssid_candidates: Vec<String>,
    #[serde(default = "default_network_patterns")]
    pub network_patterns: Vec<String>,
    #[serde(default = "default_wifi_interface")]
    pub wifi_interface: String,
    #[serde(default = "default_rescan_offsets_secs")]
    pub rescan_offsets_secs: Vec<u64>,

    // Reachability probe
    #[serde(default = "default_hosts")]
    pub hosts: Vec<String>,
    #[serde(default = "default_primary_port")]
    pub primary_port: u16,
    #[serde(default = "default_alternative_ports")]
    pub alternative_ports: Vec<u16>,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

impl Default for CameraProfile {
    fn default() -> Self {
        Self {
            profile_revision: default_profile_revision(),
            name_patterns: default_name_patterns(),
            manufacturer_id: default_manufacturer_id(),
            scan_window_secs: default_scan_window_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            service_uuid: default_service_uuid(),
            wifi_control_uuid: default_wifi_control_uuid(),
            camera_control_uuid: default_camera_control_uuid(),
            status_uuid: default_status_uuid(),
            notify_uuid: default_notify_uuid(),
            settle_delay_ms: default_settle_delay_ms(),
            reset_table: protocol::reset_table(),
            bring_up_table: protocol::full_bring_up_table(),
            ap_broadcast_table: protocol::ap_broadcast_table(),
            wifi_info_table: protocol::wifi_info_table(),
            ssid_candidates: default_ssid_candidates(),
            network_patterns: default_network_patterns(),
            wifi_interface: default_wifi_interface(),
            rescan_offsets_secs: default_rescan_offsets_secs(),
            hosts: default_hosts(),
            primary_port: default_primary_port(),
            alternative_ports: default_alternative_ports(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

fn default_profile_revision() -> String {
    "x2d-ii-100c/reverse-engineered-2024".to_string()
}
fn default_name_patterns() -> Vec<String> {
    vec!["X2D".to_string(), "100C".to_string()]
}
fn default_manufacturer_id() -> u16 {
    protocol::CAMERA_MANUFACTURER_ID
}
fn default_scan_window_secs() -> u64 {
    20
}
fn default_connect_timeout_secs() -> u64 {
    30
}
fn default_service_uuid() -> String {
    "FFF0".to_string()
}
fn default_wifi_control_uuid() -> String {
    "FFF3".to_string()
}
fn default_camera_control_uuid() -> String {
    "FFF4".to_string()
}
fn default_status_uuid() -> String {
    "FFF5".to_string()
}
fn default_notify_uuid() -> String {
    "FFF7".to_string()
}
fn default_settle_delay_ms() -> u64 {
    2000
}
fn default_ssid_candidates() -> Vec<String> {
    [
        "X2D II 100C 003635",
        "X2D-II-100C-003635",
        "X2D_II_100C_003635",
        "X2D",
        "Hasselblad",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_network_patterns() -> Vec<String> {
    ["X2D-II-100C", "X2D II 100C", "Hasselblad", "X2D"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_wifi_interface() -> String {
    if cfg!(target_os = "macos") {
        "en0".to_string()
    } else {
        "wlan0".to_string()
    }
}
fn default_rescan_offsets_secs() -> Vec<u64> {
    vec![3, 6, 10, 15]
}
fn default_hosts() -> Vec<String> {
    [
        "192.168.2.1",
        "192.168.1.1",
        "192.168.0.1",
        "192.168.4.1",
        "10.0.0.1",
        "172.20.10.1",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}
fn default_primary_port() -> u16 {
    80
}
fn default_alternative_ports() -> Vec<u16> {
    vec![8080, 8888, 5000, 3000]
}
fn default_probe_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeotagSettings {
    #[serde(default)]
    pub backend: GeotagBackend,
    #[serde(default = "default_script_path")]
    pub script_path: String,
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default)]
    pub mode: GeotagMode,
    #[serde(default = "default_tz_offset")]
    pub timezone_offset: String,
    #[serde(default = "default_max_interpolation")]
    pub max_interpolation_secs: u32,
    #[serde(default = "default_max_extrapolation")]
    pub max_extrapolation_secs: u32,
}

impl Default for GeotagSettings {
    fn default() -> Self {
        Self {
            backend: GeotagBackend::default(),
            script_path: default_script_path(),
            python: default_python(),
            mode: GeotagMode::default(),
            timezone_offset: default_tz_offset(),
            max_interpolation_secs: default_max_interpolation(),
            max_extrapolation_secs: default_max_extrapolation(),
        }
    }
}

fn default_script_path() -> String {
    "geotag.py".to_string()
}
fn default_python() -> String {
    "python3".to_string()
}
fn default_tz_offset() -> String {
    "+09:00".to_string()
}
fn default_max_interpolation() -> u32 {
    1800
}
fn default_max_extrapolation() -> u32 {
    18000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    // Camera
    #[serde(default)]
    pub camera: CameraProfile,
    #[serde(default)]
    pub known_cameras: Vec<String>,
    #[serde(default)]
    pub last_connected_camera: Option<String>,

    // Geotagging
    #[serde(default)]
    pub geotag: GeotagSettings,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Load settings from an explicit file, falling back to defaults
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PhotoPin");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &PathBuf) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &PathBuf {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_camera(&mut self, id: &str) -> anyhow::Result<()> {
        if !self.settings.known_cameras.iter().any(|known| known == id) {
            self.settings.known_cameras.push(id.to_string());
        }
        self.settings.last_connected_camera = Some(id.to_string());
        self.save()
    }
}
