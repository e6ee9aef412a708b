//! Bluetooth Module
//!
//! BLE access to the camera's wireless control service.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                     CameraService                        │
//! │  (Main coordinator - public API for the application)     │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┬──────────────┐
//!         │             │             │              │
//!         ▼             ▼             ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │  │   Link   │
//! │           │  │            │  │          │  │          │
//! │ - BLE     │  │ - Connect  │  │ - UUIDs  │  │ - Role   │
//! │ discovery │  │ - GATT     │  │ - Tables │  │  handles │
//! │ - Camera  │  │   binding  │  │ - Status │  │ - Seam   │
//! │   match   │  │            │  │   codes  │  │   trait  │
//! └───────────┘  └────────────┘  └──────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, command tables and response classification
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - Connection, service discovery and characteristic binding
//! - [`link`] - The [`link::CameraLink`] seam the bring-up sequencer drives
//! - [`service`] - Main service coordinator

pub mod connection;
pub mod link;
pub mod protocol;
pub mod scanner;
pub mod service;

// Re-export main service for convenience
pub use service::CameraService;
