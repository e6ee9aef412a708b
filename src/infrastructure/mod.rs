pub mod bluetooth;
pub mod bring_up;
pub mod camera_channel;
pub mod error;
pub mod geotag_runner;
pub mod logging;
pub mod wifi;
