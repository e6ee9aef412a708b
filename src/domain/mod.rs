//! Domain Module
//!
//! Camera session lifecycle, settings, and geotag job model.
//! Nothing here touches hardware or spawns processes.

pub mod geotag;
pub mod log_buffer;
pub mod models;
pub mod session;
pub mod settings;
