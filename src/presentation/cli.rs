use crate::domain::geotag::GeotagMode;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "photopin")]
#[command(about = "Camera WiFi bring-up over BLE and GPX geotagging")]
pub struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the settings file
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for nearby Bluetooth devices, cameras first
    Scan {
        /// Scan duration in seconds
        #[arg(short, long)]
        duration: Option<u64>,
    },
    /// Connect to a camera, bring its WiFi up and open the data channel
    Connect {
        /// Device name or address; the first camera found when omitted
        #[arg(short, long)]
        device: Option<String>,
        /// Ask the camera for its WiFi details once connected
        #[arg(long)]
        wifi_info: bool,
        /// Number of photos to capture once the camera is reachable
        #[arg(long, default_value = "0")]
        capture: u32,
        /// Latitude sent with capture commands
        #[arg(long, requires = "lon", allow_hyphen_values = true)]
        lat: Option<f64>,
        /// Longitude sent with capture commands
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lon: Option<f64>,
        /// Altitude in meters sent with capture commands
        #[arg(long, default_value = "0", allow_hyphen_values = true)]
        alt: f64,
    },
    /// Request the camera's WiFi details over BLE
    WifiInfo {
        /// Device name or address
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Join a network with explicit credentials and open the data channel
    Join {
        /// Network SSID
        ssid: String,
        /// WPA passphrase
        #[arg(short, long)]
        passphrase: String,
    },
    /// Write GPS positions from a GPX track into photos
    Geotag {
        /// GPX track file
        gpx: PathBuf,
        /// Directory with photos, searched recursively
        target_dir: PathBuf,
        /// auto, sidecar or embed
        #[arg(short, long)]
        mode: Option<GeotagMode>,
        /// Camera clock offset from UTC, e.g. +09:00; detected from the GPX when omitted
        #[arg(long, allow_hyphen_values = true)]
        tz_offset: Option<String>,
        /// Run this Python geotag script instead of exiftool
        #[arg(long)]
        script: Option<PathBuf>,
        /// Maximum interpolation gap in seconds
        #[arg(long)]
        max_int: Option<u32>,
        /// Maximum extrapolation in seconds
        #[arg(long)]
        max_ext: Option<u32>,
    },
    /// Report the time zone recorded in a GPX file
    DetectTz {
        /// GPX track file
        gpx: PathBuf,
    },
    /// Count supported photos in a directory tree
    Count {
        /// Directory to search
        dir: PathBuf,
    },
}
