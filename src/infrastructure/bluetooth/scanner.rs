//! BLE Scanner Module
//!
//! Unfiltered discovery of BLE peripherals, flagging the ones that look like
//! cameras.

use crate::domain::models::{
    AdvertisementInfo, AppEvent, DiscoveredCamera, MessageSeverity, StatusMessage,
};
use crate::infrastructure::bluetooth::protocol::CameraMatcher;
use crate::infrastructure::error::BringUpError;
use btleplug::api::{Central, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use chrono::Utc;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Get the first Bluetooth adapter
pub async fn get_adapter() -> Result<Adapter, BringUpError> {
    let manager = Manager::new().await.map_err(map_adapter_error)?;
    let adapters = manager.adapters().await.map_err(map_adapter_error)?;
    adapters
        .into_iter()
        .next()
        .ok_or(BringUpError::AdapterUnavailable)
}

fn map_adapter_error(e: btleplug::Error) -> BringUpError {
    match e {
        btleplug::Error::PermissionDenied => BringUpError::Unauthorized,
        btleplug::Error::NotSupported(_) => BringUpError::AdapterUnavailable,
        other => BringUpError::Ble(other),
    }
}

/// Advertisement data of a peripheral, if the platform has any
pub async fn advertisement_of(peripheral: &Peripheral) -> Option<AdvertisementInfo> {
    let props = peripheral.properties().await.ok().flatten()?;
    Some(AdvertisementInfo {
        // btleplug folds the GAP name and the advertised local name together
        name: props.local_name.clone(),
        local_name: props.local_name,
        service_uuids: props.services,
        manufacturer_ids: props.manufacturer_data.keys().copied().collect(),
    })
}

/// BLE Scanner for discovering cameras
pub struct BleScanner {
    adapter: Adapter,
    matcher: CameraMatcher,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl BleScanner {
    pub fn new(
        adapter: Adapter,
        matcher: CameraMatcher,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            adapter,
            matcher,
            event_sender,
        }
    }

    /// Scan for `window`, returning every peripheral seen with cameras first.
    ///
    /// No service filter is used: the camera does not put its service UUID in
    /// the primary advertisement.
    pub async fn scan(&self, window: Duration) -> Result<Vec<DiscoveredCamera>, BringUpError> {
        info!("Starting unfiltered BLE scan for {:?}", window);
        self.send_log("Scanning for all Bluetooth devices...", MessageSeverity::Info);

        self.adapter.start_scan(ScanFilter::default()).await?;
        let mut found = stop_after(self.collect(window), self.stop()).await?;

        sort_cameras_first(&mut found);
        let _ = self
            .event_sender
            .send(AppEvent::ScanFinished { found: found.len() });
        if found.is_empty() {
            self.send_log("No devices found", MessageSeverity::Warning);
        } else {
            self.send_log(format!("{} devices found", found.len()), MessageSeverity::Info);
        }

        Ok(found)
    }

    /// Poll the adapter's peripheral list until `window` has passed
    async fn collect(&self, window: Duration) -> Result<Vec<DiscoveredCamera>, BringUpError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let deadline = tokio::time::Instant::now() + window;

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;

            for peripheral in self.adapter.peripherals().await? {
                let id = peripheral.id().to_string();
                if seen.contains(&id) {
                    continue;
                }
                let Some(adv) = advertisement_of(&peripheral).await else {
                    continue;
                };
                seen.insert(id.clone());

                let is_camera = self.matcher.matches(&adv);
                let device = DiscoveredCamera {
                    id,
                    name: adv.name.clone().unwrap_or_else(|| "Unknown".to_string()),
                    rssi: peripheral.properties().await.ok().flatten().and_then(|p| p.rssi),
                    discovered_at: Utc::now(),
                    is_camera,
                };

                if is_camera {
                    info!("Camera candidate found: {} ({})", device.name, device.id);
                    self.send_log(
                        format!("Camera {} found!", device.name),
                        MessageSeverity::Success,
                    );
                } else {
                    debug!("Ignoring peripheral {} ({})", device.name, device.id);
                }

                let _ = self.event_sender.send(AppEvent::CameraFound(device.clone()));
                found.push(device);
            }
        }

        Ok(found)
    }

    /// Find a peripheral by id or name substring; without a target the first
    /// camera candidate wins
    pub async fn find(
        &self,
        target: Option<&str>,
        window: Duration,
    ) -> Result<Peripheral, BringUpError> {
        let devices = self.scan(window).await?;

        let wanted = devices.iter().find(|d| match target {
            Some(t) => d.id.contains(t) || d.name.contains(t),
            None => d.is_camera,
        });

        let Some(wanted) = wanted else {
            return Err(BringUpError::CameraNotFound(
                target.unwrap_or("camera").to_string(),
            ));
        };

        for peripheral in self.adapter.peripherals().await? {
            if peripheral.id().to_string() == wanted.id {
                return Ok(peripheral);
            }
        }
        Err(BringUpError::CameraNotFound(wanted.id.clone()))
    }

    /// Stop scanning
    pub async fn stop(&self) -> Result<(), BringUpError> {
        info!("Stopping BLE scan...");
        self.adapter.stop_scan().await?;
        Ok(())
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

/// Cameras first, then by signal strength
/// Await `work`, then `stop` regardless of how `work` ended
async fn stop_after<T, W, S>(work: W, stop: S) -> Result<T, BringUpError>
where
    W: Future<Output = Result<T, BringUpError>>,
    S: Future<Output = Result<(), BringUpError>>,
{
    let result = work.await;
    let stopped = stop.await;
    let value = result?;
    stopped?;
    Ok(value)
}

pub fn sort_cameras_first(devices: &mut [DiscoveredCamera]) {
    devices.sort_by(|a, b| {
        b.is_camera
            .cmp(&a.is_camera)
            .then_with(|| b.rssi.unwrap_or(i16::MIN).cmp(&a.rssi.unwrap_or(i16::MIN)))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn device(name: &str, rssi: Option<i16>, is_camera: bool) -> DiscoveredCamera {
        DiscoveredCamera {
            id: name.to_string(),
            name: name.to_string(),
            rssi,
            discovered_at: Utc::now(),
            is_camera,
        }
    }

    #[test]
    fn cameras_sort_before_stronger_devices() {
        let mut devices = vec![
            device("speaker", Some(-40), false),
            device("X2D far", Some(-90), true),
            device("X2D near", Some(-50), true),
            device("unknown", None, false),
        ];
        sort_cameras_first(&mut devices);
        let names: Vec<_> = devices.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["X2D near", "X2D far", "speaker", "unknown"]);
    }

    #[tokio::test]
    async fn scan_is_stopped_when_polling_fails() {
        let stopped = AtomicBool::new(false);
        let result = stop_after(
            async { Err::<Vec<DiscoveredCamera>, _>(BringUpError::AdapterUnavailable) },
            async {
                stopped.store(true, Ordering::SeqCst);
                Ok::<(), BringUpError>(())
            },
        )
        .await;

        assert!(matches!(result, Err(BringUpError::AdapterUnavailable)));
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stop_failure_is_reported_after_a_good_scan() {
        let result = stop_after(
            async { Ok::<_, BringUpError>(vec![device("X2D", None, true)]) },
            async { Err::<(), _>(BringUpError::AdapterUnavailable) },
        )
        .await;
        assert!(matches!(result, Err(BringUpError::AdapterUnavailable)));
    }
}
