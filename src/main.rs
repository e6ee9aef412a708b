mod domain;
mod infrastructure;
mod presentation;

use clap::Parser;
use domain::settings::SettingsService;
use infrastructure::logging::init_logger;
use presentation::app::PhotoPinApp;
use presentation::cli::Cli;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => SettingsService::from_path(path.clone()),
        None => SettingsService::new()
            .unwrap_or_else(|_| SettingsService::from_path(PathBuf::from("settings.json"))),
    };

    // Keep the guard alive for the whole run so file logs are flushed
    let _log_guard = match init_logger(&settings.get().log_settings, cli.log_level.as_deref()) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logger: {}", e);
            None
        }
    };
    info!("Starting PhotoPin");
    info!("Settings file: {}", settings.path().display());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let app = PhotoPinApp::new(settings);
    match runtime.block_on(app.run(cli.command)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
