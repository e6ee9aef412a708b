//! Camera Service Module
//!
//! Main service that coordinates scanning, connection, WiFi bring-up and
//! the camera data channel.

use crate::domain::models::{AppEvent, CharacteristicRole, DiscoveredCamera, GpsFix, MessageSeverity};
use crate::domain::session::{ConnectionState, FailureReason, Session, SessionHandle, SessionSnapshot};
use crate::domain::settings::{CameraProfile, SettingsService};
use crate::infrastructure::bluetooth::{
    connection::{BleConnection, BtleLink, ConnectionConfig},
    link::CameraLink,
    protocol::{self, CameraMatcher},
    scanner::{self, BleScanner},
};
use crate::infrastructure::bring_up::{self, BringUpSequencer, CameraNetwork};
use crate::infrastructure::camera_channel::CameraChannel;
use crate::infrastructure::error::BringUpError;
use crate::infrastructure::wifi::{CommandLineJoiner, EndpointProber, TcpProber, WifiJoiner};
use anyhow::{anyhow, bail, Result};
use btleplug::api::{Central, CentralEvent, Peripheral as _};
use btleplug::platform::{Adapter, Peripheral, PeripheralId};
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{error, info, warn};

type Slot<T> = Arc<AsyncMutex<Option<T>>>;
type LinkSlot = Slot<BtleLink>;
type ChannelSlot = Slot<CameraChannel<TcpStream>>;
type Sequencer = BringUpSequencer<CommandLineJoiner, TcpProber>;

/// Main service coordinating all camera operations
pub struct CameraService {
    adapter: Option<Adapter>,
    session: Session,
    /// Peripheral of the current session, tracked from before the connect
    peripheral: Option<Peripheral>,
    link: LinkSlot,
    channel: ChannelSlot,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    settings: Arc<Mutex<SettingsService>>,
}

impl CameraService {
    pub fn new(
        event_sender: mpsc::UnboundedSender<AppEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> Self {
        Self {
            adapter: None,
            session: Session::new(event_sender.clone()),
            peripheral: None,
            link: Arc::default(),
            channel: Arc::default(),
            event_sender,
            settings,
        }
    }

    fn profile(&self) -> Result<Arc<CameraProfile>> {
        let settings = self
            .settings
            .lock()
            .map_err(|_| anyhow!("Lock error"))?;
        Ok(Arc::new(settings.get().camera.clone()))
    }

    /// The adapter is looked up on first use
    async fn adapter(&mut self) -> Result<Adapter, BringUpError> {
        if let Some(adapter) = &self.adapter {
            return Ok(adapter.clone());
        }
        let adapter = scanner::get_adapter().await?;
        self.adapter = Some(adapter.clone());
        Ok(adapter)
    }

    fn scanner(&self, adapter: Adapter, profile: &CameraProfile) -> Result<BleScanner> {
        let matcher = CameraMatcher {
            name_patterns: profile.name_patterns.clone(),
            service_uuid: protocol::parse_uuid(&profile.service_uuid)?,
            manufacturer_id: profile.manufacturer_id,
        };
        Ok(BleScanner::new(adapter, matcher, self.event_sender.clone()))
    }

    fn sequencer(handle: &SessionHandle, profile: &Arc<CameraProfile>) -> Sequencer {
        BringUpSequencer::new(
            handle.clone(),
            profile.clone(),
            Arc::new(CommandLineJoiner::new(profile.wifi_interface.clone())),
            Arc::new(TcpProber::new(
                Duration::from_secs(profile.probe_timeout_secs),
                profile.wifi_interface.clone(),
            )),
        )
    }

    /// Scan for the configured window
    pub async fn scan(&mut self) -> Result<Vec<DiscoveredCamera>> {
        let profile = self.profile()?;
        let adapter = self.adapter().await?;
        let scanner = self.scanner(adapter, &profile)?;
        Ok(scanner
            .scan(Duration::from_secs(profile.scan_window_secs))
            .await?)
    }

    /// Find a camera and start a session for it.
    ///
    /// Returns once the session task is running; progress is reported
    /// through [`AppEvent`]s.
    pub async fn connect(&mut self, target: Option<&str>) -> Result<()> {
        let profile = self.profile()?;
        let config = ConnectionConfig::from_profile(&profile)?;
        self.release_resources().await;
        let handle = self.session.begin();

        let found = match self.adapter().await {
            Ok(adapter) => {
                let scanner = self.scanner(adapter.clone(), &profile)?;
                let window = Duration::from_secs(profile.scan_window_secs);
                match scanner.find(target, window).await {
                    Ok(peripheral) => adapter
                        .events()
                        .await
                        .map(|events| (peripheral, events))
                        .map_err(BringUpError::from),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        let (peripheral, central_events) = match found {
            Ok(found) => found,
            Err(e) => {
                fail(&handle, &e);
                return Err(e.into());
            }
        };

        let id = peripheral.id().to_string();
        if let Ok(mut settings) = self.settings.lock() {
            if let Err(e) = settings.remember_camera(&id) {
                warn!("Failed to save settings: {}", e);
            }
        }

        self.peripheral = Some(peripheral.clone());
        info!("Starting session {} for {}", handle.epoch(), id);
        let task = tokio::spawn(drive_session(
            handle,
            profile,
            config,
            peripheral,
            central_events,
            self.link.clone(),
            self.channel.clone(),
        ));
        self.session.attach(task);
        Ok(())
    }

    /// Ask the camera for its WiFi details over BLE.
    ///
    /// Returns the SSID it reported, if any.
    pub async fn request_wifi_info(&self) -> Result<Option<String>> {
        let profile = self.profile()?;
        let handle = self.session.handle();
        let mut guard = self.link.lock().await;
        let link = guard
            .as_mut()
            .ok_or_else(|| anyhow!("camera is not connected over Bluetooth"))?;

        handle.status("Requesting WiFi info...", MessageSeverity::Info);
        bring_up::run_table(link, &handle, "WiFi info", &profile.wifi_info_table).await?;

        if !link.has_role(CharacteristicRole::CameraControl) {
            return Ok(None);
        }
        let data = link.read(CharacteristicRole::CameraControl).await?;
        let ssid = protocol::decode_ssid_hint(&data);
        match &ssid {
            Some(ssid) => handle.status(format!("Camera WiFi SSID: {}", ssid), MessageSeverity::Info),
            None => handle.status(
                format!("WiFi info response: {}", protocol::hex(&data)),
                MessageSeverity::Info,
            ),
        };
        Ok(ssid)
    }

    /// Join a user-supplied network and open the data channel on it
    pub async fn set_wifi_credentials(&mut self, ssid: &str, passphrase: &str) -> Result<()> {
        let handle = self.session.handle();
        if self.session.is_running() && handle.state().is_bringing_up() {
            bail!("automatic WiFi bring-up still in progress");
        }

        let profile = self.profile()?;
        let sequencer = Self::sequencer(&handle, &profile);
        self.channel.lock().await.take();

        match sequencer.join_with_credentials(ssid, passphrase).await {
            Ok(network) => {
                open_channel(&handle, network, &self.channel).await?;
                Ok(())
            }
            Err(e) => {
                fail(&handle, &e);
                Err(e.into())
            }
        }
    }

    /// Send a capture command over the data channel; returns the photo count
    pub async fn capture(&self, fix: Option<GpsFix>) -> Result<u32> {
        let mut guard = self.channel.lock().await;
        let channel = guard
            .as_mut()
            .ok_or_else(|| anyhow!("camera is not connected over WiFi"))?;
        Ok(channel.capture(fix.as_ref()).await?)
    }

    /// Tear the session down; nothing from it is published afterwards
    pub async fn disconnect(&mut self) {
        self.session
            .teardown("Disconnected", MessageSeverity::Info);
        self.release_resources().await;
        info!("Disconnected from camera");
    }

    async fn release_resources(&mut self) {
        release(&self.link, &self.channel).await;
        // Covers a teardown that lands before the link was bound
        if let Some(peripheral) = self.peripheral.take() {
            if peripheral.is_connected().await.unwrap_or(false) {
                if let Err(e) = peripheral.disconnect().await {
                    warn!("BLE disconnect failed: {}", e);
                }
            }
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }
}

/// Publish a failure and move the session to its error state
fn fail(handle: &SessionHandle, error: &BringUpError) {
    error!("Camera session failed: {}", error);
    handle.status(error.to_string(), MessageSeverity::Error);
    handle.transition(ConnectionState::Error(error.failure_reason()));
}

async fn wait_for_disconnect(
    mut events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    id: PeripheralId,
) {
    while let Some(event) = events.next().await {
        if let CentralEvent::DeviceDisconnected(gone) = event {
            if gone == id {
                return;
            }
        }
    }
    // Without adapter events a disconnect can no longer be observed
    std::future::pending::<()>().await
}

/// Drop the data channel and disconnect the BLE link
async fn release<L: CameraLink, S>(link_slot: &Slot<L>, channel_slot: &Slot<CameraChannel<S>>) {
    channel_slot.lock().await.take();
    if let Some(mut link) = link_slot.lock().await.take() {
        if let Err(e) = link.disconnect().await {
            warn!("BLE disconnect failed: {}", e);
        }
    }
}

/// Session task: bring the camera up, then watch the link until it drops
async fn drive_session(
    handle: SessionHandle,
    profile: Arc<CameraProfile>,
    config: ConnectionConfig,
    peripheral: Peripheral,
    central_events: Pin<Box<dyn Stream<Item = CentralEvent> + Send>>,
    link_slot: LinkSlot,
    channel_slot: ChannelSlot,
) {
    let lost = wait_for_disconnect(central_events, peripheral.id());
    let work = bring_up(&handle, profile, config, peripheral, &link_slot, &channel_slot);
    supervise(&handle, work, lost, &link_slot, &channel_slot).await;
}

/// Race `work` against `lost`; once the peripheral is gone, release the
/// session's resources and report the drop
async fn supervise<L, S, W, D>(
    handle: &SessionHandle,
    work: W,
    lost: D,
    link_slot: &Slot<L>,
    channel_slot: &Slot<CameraChannel<S>>,
) where
    L: CameraLink,
    W: Future<Output = Result<(), BringUpError>>,
    D: Future<Output = ()>,
{
    tokio::pin!(lost);

    let result = tokio::select! {
        result = work => result,
        _ = &mut lost => Err(BringUpError::Disconnected),
    };

    match result {
        Err(BringUpError::Disconnected) => {}
        Err(e) => {
            fail(handle, &e);
            // Stay on the link for WiFi info and manual joins
            if link_slot.lock().await.is_none() {
                return;
            }
            lost.await;
        }
        Ok(()) => lost.await,
    }

    release(link_slot, channel_slot).await;
    warn!("Camera disconnected unexpectedly");
    handle.status("Camera disconnected unexpectedly", MessageSeverity::Warning);
    handle.transition(ConnectionState::Error(FailureReason::PeripheralDisconnected));
}

async fn bring_up(
    handle: &SessionHandle,
    profile: Arc<CameraProfile>,
    config: ConnectionConfig,
    peripheral: Peripheral,
    link_slot: &LinkSlot,
    channel_slot: &ChannelSlot,
) -> Result<(), BringUpError> {
    let link = BleConnection::new(handle.clone(), config)
        .connect(peripheral)
        .await?;

    let sequencer = CameraService::sequencer(handle, &profile);
    let discovered = bootstrap_in_slot(&sequencer, link, link_slot).await?;

    let network = sequencer.join_camera_network(&discovered).await?;
    open_channel(handle, network, channel_slot).await
}

/// Bootstrap with the link already stored, so a teardown at any point
/// finds it. Returns the SSID candidates the camera revealed.
async fn bootstrap_in_slot<L, J, P>(
    sequencer: &BringUpSequencer<J, P>,
    link: L,
    link_slot: &Slot<L>,
) -> Result<Vec<String>, BringUpError>
where
    L: CameraLink,
    J: WifiJoiner,
    P: EndpointProber,
{
    let mut guard = link_slot.lock().await;
    let link = guard.insert(link);
    match sequencer.bootstrap(link).await {
        Ok(ssid_hint) => Ok(link.name().into_iter().chain(ssid_hint).collect()),
        Err(e) => {
            if let Some(mut link) = guard.take() {
                let _ = link.disconnect().await;
            }
            Err(e)
        }
    }
}

async fn open_channel(
    handle: &SessionHandle,
    network: CameraNetwork<TcpStream>,
    channel_slot: &ChannelSlot,
) -> Result<(), BringUpError> {
    info!("Opening data channel to {} on {}", network.endpoint, network.ssid);
    let mut channel = CameraChannel::open(network.stream, handle.clone());
    channel.handshake().await?;
    *channel_slot.lock().await = Some(channel);
    Ok(())
}
