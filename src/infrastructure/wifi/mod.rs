//! WiFi Module
//!
//! Getting from "the camera's access point is up" to "a TCP connection to
//! the camera is open".
//!
//! - [`join`] - SSID candidates and the platform join seam
//! - [`probe`] - host/port reachability probing

pub mod join;
pub mod probe;

pub use join::{CommandLineJoiner, JoinOutcome, WifiJoiner};
pub use probe::{EndpointProber, TcpProber};
