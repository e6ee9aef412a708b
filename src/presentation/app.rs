use crate::domain::geotag::{self, GeotagBackend, GeotagRequest, GeotagStatus, TimezoneHint};
use crate::domain::models::{AppEvent, DiscoveredCamera, GpsFix, MessageSeverity, StatusMessage};
use crate::domain::session::ConnectionState;
use crate::domain::settings::SettingsService;
use crate::infrastructure::bluetooth::CameraService;
use crate::infrastructure::geotag_runner::{GeotagJob, GeotagRunner};
use crate::presentation::cli::Commands;
use crate::presentation::console;
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

/// Resolves on Ctrl-C; never resolves if the handler cannot be installed
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

pub struct PhotoPinApp {
    // Services
    settings: Arc<Mutex<SettingsService>>,

    // Events
    event_tx: mpsc::UnboundedSender<AppEvent>,
    event_rx: mpsc::UnboundedReceiver<AppEvent>,

    // State
    connection_state: ConnectionState,
    status_message: Option<StatusMessage>,
    scanned_devices: Vec<DiscoveredCamera>,
    photo_count: u32,
}

impl PhotoPinApp {
    pub fn new(settings: SettingsService) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            settings: Arc::new(Mutex::new(settings)),
            event_tx,
            event_rx,
            connection_state: ConnectionState::Disconnected,
            status_message: None,
            scanned_devices: Vec::new(),
            photo_count: 0,
        }
    }

    fn camera_service(&self) -> CameraService {
        CameraService::new(self.event_tx.clone(), self.settings.clone())
    }

    fn process_event(&mut self, event: AppEvent) {
        println!("{}", console::render_event(&event));
        match event {
            AppEvent::CameraFound(device) => {
                if let Some(existing) = self.scanned_devices.iter_mut().find(|d| d.id == device.id) {
                    existing.rssi = device.rssi;
                } else {
                    self.scanned_devices.push(device);
                }
            }
            AppEvent::ConnectionState(state) => self.connection_state = state,
            AppEvent::LogMessage(msg) => self.status_message = Some(msg),
            AppEvent::PhotoCaptured { count } => self.photo_count = count,
            AppEvent::ScanFinished { .. }
            | AppEvent::CameraResponse(_)
            | AppEvent::GeotagLog(_)
            | AppEvent::GeotagProgress(_)
            | AppEvent::GeotagFinished(_) => {}
        }
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.event_rx.try_recv() {
            self.process_event(event);
        }
    }

    /// Await `work` while printing events as they arrive
    async fn pump<F: Future>(&mut self, work: F) -> F::Output {
        tokio::pin!(work);
        loop {
            tokio::select! {
                output = &mut work => {
                    self.drain_events();
                    return output;
                }
                Some(event) = self.event_rx.recv() => self.process_event(event),
            }
        }
    }

    /// Process events until `done` holds; `None` when interrupted first
    async fn wait_for_state(
        &mut self,
        done: impl Fn(&ConnectionState) -> bool,
    ) -> Option<ConnectionState> {
        loop {
            if done(&self.connection_state) {
                return Some(self.connection_state);
            }
            tokio::select! {
                Some(event) = self.event_rx.recv() => self.process_event(event),
                _ = interrupted() => return None,
            }
        }
    }

    pub async fn run(mut self, command: Commands) -> Result<()> {
        match command {
            Commands::Scan { duration } => self.scan(duration).await,
            Commands::Connect {
                device,
                wifi_info,
                capture,
                lat,
                lon,
                alt,
            } => {
                let fix = lat.zip(lon).map(|(latitude, longitude)| GpsFix {
                    latitude,
                    longitude,
                    altitude: alt,
                    timestamp: Utc::now(),
                });
                let mut service = self.camera_service();
                let outcome = self
                    .connect(&mut service, device.as_deref(), wifi_info, capture, fix)
                    .await;
                self.pump(service.disconnect()).await;
                outcome
            }
            Commands::WifiInfo { device } => {
                let mut service = self.camera_service();
                let outcome = self.wifi_info(&mut service, device.as_deref()).await;
                self.pump(service.disconnect()).await;
                outcome
            }
            Commands::Join { ssid, passphrase } => {
                let mut service = self.camera_service();
                let outcome = self.join(&mut service, &ssid, &passphrase).await;
                self.pump(service.disconnect()).await;
                outcome
            }
            Commands::Geotag {
                gpx,
                target_dir,
                mode,
                tz_offset,
                script,
                max_int,
                max_ext,
            } => {
                let mut settings = self
                    .settings
                    .lock()
                    .map_err(|_| anyhow::anyhow!("Lock error"))?
                    .get()
                    .geotag
                    .clone();
                if let Some(script) = script {
                    settings.backend = GeotagBackend::PythonScript;
                    settings.script_path = script.display().to_string();
                }

                let timezone_offset = match tz_offset {
                    Some(offset) => offset,
                    None => self.offset_from_gpx(&gpx, &settings.timezone_offset),
                };
                let request = GeotagRequest {
                    gpx,
                    target_dir,
                    mode: mode.unwrap_or(settings.mode),
                    timezone_offset,
                    max_interpolation_secs: max_int.unwrap_or(settings.max_interpolation_secs),
                    max_extrapolation_secs: max_ext.unwrap_or(settings.max_extrapolation_secs),
                };
                self.geotag(GeotagJob::new(&settings, request)).await
            }
            Commands::DetectTz { gpx } => {
                let content = std::fs::read_to_string(&gpx)
                    .with_context(|| format!("Failed to read {}", gpx.display()))?;
                println!("{}", console::render_timezone(&geotag::detect_timezone(&content)));
                Ok(())
            }
            Commands::Count { dir } => {
                let count = geotag::count_photos(&dir)
                    .with_context(|| format!("Failed to read {}", dir.display()))?;
                println!("{} photos in {}", count, dir.display());
                Ok(())
            }
        }
    }

    async fn scan(&mut self, duration: Option<u64>) -> Result<()> {
        if let Some(duration) = duration {
            if let Ok(mut settings) = self.settings.lock() {
                settings.get_mut().camera.scan_window_secs = duration;
            }
        }
        let mut service = self.camera_service();
        let devices = self.pump(service.scan()).await?;

        let cameras: Vec<_> = devices.iter().filter(|d| d.is_camera).collect();
        println!(
            "\n{} of {} devices look like cameras:",
            cameras.len(),
            self.scanned_devices.len().max(devices.len())
        );
        for camera in cameras {
            println!("{}", console::render_camera(camera));
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        service: &mut CameraService,
        device: Option<&str>,
        wifi_info: bool,
        captures: u32,
        fix: Option<GpsFix>,
    ) -> Result<()> {
        self.pump(service.connect(device)).await?;

        let Some(state) = self
            .wait_for_state(|s| s.is_wifi_connected() || matches!(s, ConnectionState::Error(_)))
            .await
        else {
            return Ok(());
        };

        if wifi_info {
            self.pump(service.request_wifi_info()).await?;
        }
        if let ConnectionState::Error(reason) = state {
            bail!("Camera session failed: {}", reason);
        }

        for _ in 0..captures {
            self.pump(service.capture(fix)).await?;
        }

        self.hold_session(service).await
    }

    async fn wifi_info(&mut self, service: &mut CameraService, device: Option<&str>) -> Result<()> {
        self.pump(service.connect(device)).await?;

        let reached = self
            .wait_for_state(|s| {
                matches!(
                    s,
                    ConnectionState::WifiJoining | ConnectionState::Ready | ConnectionState::Error(_)
                )
            })
            .await;
        if reached.is_none() {
            return Ok(());
        }

        match self.pump(service.request_wifi_info()).await? {
            Some(ssid) => println!("Camera WiFi SSID: {}", ssid),
            None => println!("The camera did not report an SSID"),
        }
        Ok(())
    }

    async fn join(&mut self, service: &mut CameraService, ssid: &str, passphrase: &str) -> Result<()> {
        self.pump(service.set_wifi_credentials(ssid, passphrase))
            .await?;
        self.hold_session(service).await
    }

    /// Keep the session open until Ctrl-C or until the camera drops
    async fn hold_session(&mut self, service: &CameraService) -> Result<()> {
        let snapshot = service.snapshot();
        if let (Some(ssid), Some(endpoint)) = (&snapshot.ssid, &snapshot.endpoint) {
            println!("Camera ready on {} at {}. Press Ctrl-C to disconnect.", ssid, endpoint);
        }

        let state = self.wait_for_state(|s| !s.is_wifi_connected()).await;
        info!(
            "Session ended with {} photos captured",
            self.photo_count
        );
        if let Some(last) = &self.status_message {
            info!("Last status: {}", last.message);
        }
        match state {
            Some(ConnectionState::Error(reason)) => bail!("Camera session ended: {}", reason),
            _ => Ok(()),
        }
    }

    fn offset_from_gpx(&self, gpx: &Path, fallback: &str) -> String {
        let hint = std::fs::read_to_string(gpx)
            .map(|content| geotag::detect_timezone(&content))
            .unwrap_or(TimezoneHint::Unknown);
        println!("{}", console::render_timezone(&hint));
        match hint {
            TimezoneHint::Offset { offset, .. } => offset,
            TimezoneHint::Utc | TimezoneHint::Unknown => fallback.to_string(),
        }
    }

    async fn geotag(&mut self, job: GeotagJob) -> Result<()> {
        match geotag::count_photos(&job.request.target_dir) {
            Ok(count) => println!("{} photos in {}", count, job.request.target_dir.display()),
            Err(e) => println!("Could not count photos: {}", e),
        }

        let mut runner = GeotagRunner::new(self.event_tx.clone());
        let status = self.pump(runner.run(&job, interrupted())).await;
        info!(
            "Geotagging ended at {:.0}% with {} log lines",
            runner.progress() * 100.0,
            runner.log().len()
        );
        match status {
            GeotagStatus::Complete => Ok(()),
            GeotagStatus::Cancelled => {
                self.status_message = Some(StatusMessage::new(
                    "Geotagging cancelled",
                    MessageSeverity::Warning,
                ));
                Ok(())
            }
            other => match runner.log().last() {
                Some(line) => bail!("Geotagging {}: {}", other, line),
                None => bail!("Geotagging {}", other),
            },
        }
    }
}
