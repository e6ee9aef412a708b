//! Geotagging job model
//!
//! Argument construction for the external geotagging tools, progress
//! estimation from their text output, and GPX inspection helpers.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// RAW formats that get an XMP sidecar in auto mode
pub const RAW_EXTENSIONS: &[&str] = &[
    "3fr", "fff", // Hasselblad
    "dng", // Adobe DNG
    "arw", "sr2", "srf", // Sony
    "cr2", "cr3", "crw", // Canon
    "nef", "nrw", // Nikon
    "raf", // Fujifilm
    "orf", // Olympus
    "rw2", // Panasonic
    "pef", "ptx", // Pentax
    "srw", // Samsung
    "x3f", // Sigma
    "iiq", // Phase One
    "rwl", "raw", // Leica
    "gpr", // GoPro
    "ari", // ARRI
    "bay", "cap", "erf", "k25", "kdc", "mef", "mos", "mrw", "pxn",
];

/// Formats whose metadata can be written in place
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "webp", "heic", "heif", "avif", "jxl", "tiff", "tif",
];

/// How GPS tags are written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeotagMode {
    /// RAW files get sidecars, everything else is embedded
    #[default]
    Auto,
    /// Always write `<name>.xmp` next to the original
    Sidecar,
    /// Always modify the original file
    Embed,
}

impl GeotagMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Sidecar => "sidecar",
            Self::Embed => "embed",
        }
    }
}

impl FromStr for GeotagMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "sidecar" => Ok(Self::Sidecar),
            "embed" => Ok(Self::Embed),
            other => Err(format!("unknown geotag mode: {}", other)),
        }
    }
}

/// Which external tool performs the tagging
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeotagBackend {
    #[default]
    Exiftool,
    PythonScript,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeotagRequest {
    pub gpx: PathBuf,
    pub target_dir: PathBuf,
    pub mode: GeotagMode,
    /// `+HH:MM` offset applied to DateTimeOriginal; empty when already UTC
    pub timezone_offset: String,
    pub max_interpolation_secs: u32,
    pub max_extrapolation_secs: u32,
}

/// One invocation of exiftool
#[derive(Debug, Clone, PartialEq)]
pub struct ExiftoolPass {
    pub label: &'static str,
    pub args: Vec<String>,
}

impl GeotagRequest {
    /// exiftool runs needed for this request; auto mode needs two
    pub fn exiftool_passes(&self) -> Vec<ExiftoolPass> {
        match self.mode {
            GeotagMode::Auto => vec![
                ExiftoolPass {
                    label: "RAW files (XMP sidecar)",
                    args: self.exiftool_args(RAW_EXTENSIONS, true),
                },
                ExiftoolPass {
                    label: "images (embedded)",
                    args: self.exiftool_args(IMAGE_EXTENSIONS, false),
                },
            ],
            GeotagMode::Sidecar | GeotagMode::Embed => {
                let all: Vec<&str> = RAW_EXTENSIONS
                    .iter()
                    .chain(IMAGE_EXTENSIONS.iter())
                    .copied()
                    .collect();
                let label = if self.mode == GeotagMode::Sidecar {
                    "XMP sidecar"
                } else {
                    "embedded"
                };
                vec![ExiftoolPass {
                    label,
                    args: self.exiftool_args(&all, self.mode == GeotagMode::Sidecar),
                }]
            }
        }
    }

    pub fn exiftool_args(&self, extensions: &[&str], use_xmp: bool) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            format!("-geotag={}", self.gpx.display()),
            "-api".to_string(),
            format!("GeoMaxIntSecs={}", self.max_interpolation_secs),
            "-api".to_string(),
            format!("GeoMaxExtSecs={}", self.max_extrapolation_secs),
        ];

        if !self.timezone_offset.is_empty() && self.timezone_offset != "+00:00" {
            args.push(format!("-geotime<${{DateTimeOriginal}}{}", self.timezone_offset));
        }

        if use_xmp {
            args.push("-o".to_string());
            args.push("%d%f.xmp".to_string());
        } else {
            args.push("-overwrite_original_in_place".to_string());
        }

        for ext in extensions {
            args.push("-ext".to_string());
            args.push(ext.to_string());
        }

        args.push(self.target_dir.display().to_string());
        args
    }

    /// Arguments for `python3 <script> ...`
    pub fn script_args(&self, script: &Path) -> Vec<String> {
        vec![
            script.display().to_string(),
            "--gpx".to_string(),
            self.gpx.display().to_string(),
            "--target-dir".to_string(),
            self.target_dir.display().to_string(),
            "--mode".to_string(),
            self.mode.as_str().to_string(),
            "--tz-offset".to_string(),
            self.timezone_offset.clone(),
            "--max-int".to_string(),
            self.max_interpolation_secs.to_string(),
            "--max-ext".to_string(),
            self.max_extrapolation_secs.to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeotagStatus {
    Idle,
    Running,
    Complete,
    /// Nonzero exit code, or a description when the tool never ran
    Error(String),
    Cancelled,
}

impl fmt::Display for GeotagStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("ready"),
            Self::Running => f.write_str("processing"),
            Self::Complete => f.write_str("complete"),
            Self::Error(detail) => write!(f, "error ({})", detail),
            Self::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Progress estimate derived from tool output.
///
/// The value only ever increases and is clamped to 1.0.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressTracker {
    value: f64,
}

impl ProgressTracker {
    pub fn value(&self) -> f64 {
        self.value
    }

    /// Advance according to one output line; returns true if it moved
    pub fn observe(&mut self, line: &str) -> bool {
        let target = if line.contains("Processing") || line.contains("처리") {
            (self.value + 0.1).min(0.9)
        } else if line.contains("directories scanned") {
            0.3
        } else if line.contains("image files") {
            0.7
        } else if line.contains('✅') || line.to_lowercase().contains("done") {
            1.0
        } else {
            return false;
        };
        self.advance_to(target)
    }

    pub fn complete(&mut self) {
        self.advance_to(1.0);
    }

    fn advance_to(&mut self, target: f64) -> bool {
        let target = target.clamp(0.0, 1.0);
        if target > self.value {
            self.value = target;
            true
        } else {
            false
        }
    }
}

/// What a GPX file says about its time zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimezoneHint {
    /// A `<!-- TZ: <seconds> -->` comment was found
    Offset { offset: String, hours: i32 },
    /// Timestamps end in `Z`
    Utc,
    Unknown,
}

pub fn detect_timezone(gpx_content: &str) -> TimezoneHint {
    let pattern = Regex::new(r"<!-- TZ: ([+-]?\d+) -->").expect("static regex");
    if let Some(captures) = pattern.captures(gpx_content) {
        if let Ok(seconds) = captures[1].parse::<i32>() {
            let hours = seconds / 3600;
            let minutes = (seconds % 3600).abs() / 60;
            let sign = if seconds >= 0 { '+' } else { '-' };
            return TimezoneHint::Offset {
                offset: format!("{}{:02}:{:02}", sign, hours.abs(), minutes),
                hours,
            };
        }
    }

    if gpx_content.contains("<time>") && gpx_content.contains("Z</time>") {
        TimezoneHint::Utc
    } else {
        TimezoneHint::Unknown
    }
}

/// Human name for a whole-hour UTC offset, if it is a common one
pub fn timezone_region(hours: i32) -> Option<&'static str> {
    let name = match hours {
        -11 => "Hawaii",
        -8 => "US Pacific (PST)",
        -7 => "US Mountain (MST)",
        -6 => "US Central (CST)",
        -5 => "US Eastern (EST)",
        -3 => "Brazil",
        0 => "United Kingdom (GMT/UTC)",
        1 => "Central Europe (Paris, Berlin)",
        2 => "Eastern Europe (Athens)",
        3 => "Moscow",
        4 => "United Arab Emirates",
        5 => "Pakistan/India",
        7 => "Vietnam, Thailand",
        8 => "China, Hong Kong, Singapore",
        9 => "Korea, Japan",
        10 => "Eastern Australia",
        12 => "New Zealand",
        _ => return None,
    };
    Some(name)
}

pub fn is_supported_photo(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_lowercase();
            RAW_EXTENSIONS.contains(&ext.as_str()) || IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Recursively count photos the tools would touch
pub fn count_photos(dir: &Path) -> std::io::Result<usize> {
    let mut count = 0;
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if is_supported_photo(&path) {
                count += 1;
            }
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(mode: GeotagMode, tz: &str) -> GeotagRequest {
        GeotagRequest {
            gpx: PathBuf::from("/tracks/day1.gpx"),
            target_dir: PathBuf::from("/photos/day1"),
            mode,
            timezone_offset: tz.to_string(),
            max_interpolation_secs: 1800,
            max_extrapolation_secs: 18000,
        }
    }

    #[test]
    fn sidecar_args() {
        let args = request(GeotagMode::Sidecar, "+09:00").exiftool_passes();
        assert_eq!(args.len(), 1);
        let args = &args[0].args;
        assert_eq!(args[0], "-r");
        assert_eq!(args[1], "-geotag=/tracks/day1.gpx");
        assert_eq!(&args[2..6], ["-api", "GeoMaxIntSecs=1800", "-api", "GeoMaxExtSecs=18000"]);
        assert_eq!(args[6], "-geotime<${DateTimeOriginal}+09:00");
        assert_eq!(&args[7..9], ["-o", "%d%f.xmp"]);
        assert_eq!(args.last().unwrap(), "/photos/day1");
        assert!(args.windows(2).any(|w| w == ["-ext", "3fr"]));
        assert!(args.windows(2).any(|w| w == ["-ext", "jpg"]));
    }

    #[test]
    fn utc_offset_is_omitted() {
        for tz in ["", "+00:00"] {
            let passes = request(GeotagMode::Embed, tz).exiftool_passes();
            let args = &passes[0].args;
            assert!(!args.iter().any(|a| a.starts_with("-geotime")));
            assert!(args.contains(&"-overwrite_original_in_place".to_string()));
        }
    }

    #[test]
    fn auto_mode_splits_raw_and_images() {
        let passes = request(GeotagMode::Auto, "+09:00").exiftool_passes();
        assert_eq!(passes.len(), 2);
        assert!(passes[0].args.contains(&"%d%f.xmp".to_string()));
        assert!(passes[0].args.windows(2).any(|w| w == ["-ext", "fff"]));
        assert!(!passes[0].args.windows(2).any(|w| w == ["-ext", "jpg"]));
        assert!(passes[1].args.contains(&"-overwrite_original_in_place".to_string()));
        assert!(passes[1].args.windows(2).any(|w| w == ["-ext", "heic"]));
    }

    #[test]
    fn script_args_follow_cli() {
        let args = request(GeotagMode::Auto, "-07:00").script_args(Path::new("geotag.py"));
        assert_eq!(
            args,
            vec![
                "geotag.py", "--gpx", "/tracks/day1.gpx", "--target-dir", "/photos/day1",
                "--mode", "auto", "--tz-offset", "-07:00", "--max-int", "1800", "--max-ext",
                "18000",
            ]
        );
    }

    #[test]
    fn progress_is_monotonic_and_capped() {
        let mut progress = ProgressTracker::default();
        let mut last = 0.0;
        for line in [
            "Processing a.3fr",
            "Processing b.3fr",
            "    5 directories scanned",
            "Processing c.jpg",
            "   12 image files updated",
            "    5 directories scanned",
            "Processing d.jpg",
            "Processing e.jpg",
            "Processing f.jpg",
            "✅ Geotagging done.",
            "Processing g.jpg",
        ] {
            progress.observe(line);
            assert!(progress.value() >= last);
            assert!(progress.value() <= 1.0);
            last = progress.value();
        }
        assert_eq!(progress.value(), 1.0);
    }

    #[test]
    fn processing_lines_stop_at_ninety_percent() {
        let mut progress = ProgressTracker::default();
        for _ in 0..20 {
            progress.observe("Processing file");
        }
        assert!((progress.value() - 0.9).abs() < 1e-9);
        assert!(!progress.observe("unrelated chatter"));
    }

    #[test]
    fn detects_tz_comment() {
        let gpx = "<gpx><!-- TZ: 32400 --><trk></trk></gpx>";
        assert_eq!(
            detect_timezone(gpx),
            TimezoneHint::Offset {
                offset: "+09:00".to_string(),
                hours: 9
            }
        );
        let gpx = "<gpx><!-- TZ: -25200 --></gpx>";
        assert_eq!(
            detect_timezone(gpx),
            TimezoneHint::Offset {
                offset: "-07:00".to_string(),
                hours: -7
            }
        );
        let gpx = "<gpx><!-- TZ: 19800 --></gpx>";
        match detect_timezone(gpx) {
            TimezoneHint::Offset { offset, .. } => assert_eq!(offset, "+05:30"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn detects_utc_tracks() {
        let gpx = "<trkpt><time>2024-05-01T10:00:00Z</time></trkpt>";
        assert_eq!(detect_timezone(gpx), TimezoneHint::Utc);
        assert_eq!(detect_timezone("<gpx/>"), TimezoneHint::Unknown);
        assert_eq!(timezone_region(9), Some("Korea, Japan"));
        assert_eq!(timezone_region(6), None);
    }

    #[test]
    fn counts_photos_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.JPG"), b"").unwrap();
        std::fs::write(dir.path().join("b.3fr"), b"").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("c.dng"), b"").unwrap();
        assert_eq!(count_photos(dir.path()).unwrap(), 3);
    }

    #[test]
    fn parses_mode() {
        assert_eq!("Sidecar".parse::<GeotagMode>(), Ok(GeotagMode::Sidecar));
        assert!("bogus".parse::<GeotagMode>().is_err());
    }
}
