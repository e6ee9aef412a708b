//! BLE Connection Module
//!
//! Connects to the camera, binds the characteristic handle set and exposes
//! it as a [`CameraLink`].

use crate::domain::models::{CharacteristicRole, MessageSeverity};
use crate::domain::session::{ConnectionState, SessionHandle};
use crate::domain::settings::CameraProfile;
use crate::infrastructure::bluetooth::link::{CameraLink, CharacteristicSet, RoleUuids};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::error::BringUpError;
use async_trait::async_trait;
use btleplug::api::{CharPropFlags, Characteristic, Peripheral as _, ValueNotification, WriteType};
use btleplug::platform::Peripheral;
use futures::stream::{Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, info, warn};

/// Configuration for connection behavior
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    /// Pause after enabling notifications before the first read
    pub settle_delay: Duration,
    pub uuids: RoleUuids,
}

impl ConnectionConfig {
    pub fn from_profile(profile: &CameraProfile) -> anyhow::Result<Self> {
        Ok(Self {
            connect_timeout: Duration::from_secs(profile.connect_timeout_secs),
            settle_delay: Duration::from_millis(profile.settle_delay_ms),
            uuids: RoleUuids {
                service: protocol::parse_uuid(&profile.service_uuid)?,
                wifi_control: protocol::parse_uuid(&profile.wifi_control_uuid)?,
                camera_control: protocol::parse_uuid(&profile.camera_control_uuid)?,
                status: protocol::parse_uuid(&profile.status_uuid)?,
                notify: protocol::parse_uuid(&profile.notify_uuid)?,
            },
        })
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            settle_delay: Duration::from_secs(2),
            uuids: RoleUuids {
                service: protocol::CAMERA_SERVICE_UUID,
                wifi_control: protocol::WIFI_CONTROL_UUID,
                camera_control: protocol::CAMERA_CONTROL_UUID,
                status: protocol::STATUS_UUID,
                notify: protocol::NOTIFY_UUID,
            },
        }
    }
}

type NotificationStream = Pin<Box<dyn Stream<Item = ValueNotification> + Send>>;

/// Live GATT link to a connected camera
pub struct BtleLink {
    peripheral: Peripheral,
    name: Option<String>,
    characteristics: CharacteristicSet<Characteristic>,
    uuids: RoleUuids,
    notifications: NotificationStream,
}

/// Pick without-response when the characteristic allows it
fn write_type_for(characteristic: &Characteristic) -> WriteType {
    if characteristic
        .properties
        .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
    {
        WriteType::WithoutResponse
    } else {
        WriteType::WithResponse
    }
}

#[async_trait]
impl CameraLink for BtleLink {
    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn has_role(&self, role: CharacteristicRole) -> bool {
        self.characteristics.contains(role)
    }

    async fn write(
        &mut self,
        role: CharacteristicRole,
        payload: &[u8],
    ) -> Result<(), BringUpError> {
        let characteristic = self.characteristics.require(role)?;
        self.peripheral
            .write(characteristic, payload, write_type_for(characteristic))
            .await?;
        Ok(())
    }

    async fn read(&mut self, role: CharacteristicRole) -> Result<Vec<u8>, BringUpError> {
        let characteristic = self.characteristics.require(role)?;
        if !characteristic.properties.contains(CharPropFlags::READ) {
            return Err(BringUpError::MissingCharacteristic(role));
        }
        Ok(self.peripheral.read(characteristic).await?)
    }

    async fn next_notification(
        &mut self,
        wait: Duration,
    ) -> Option<(CharacteristicRole, Vec<u8>)> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let next = tokio::time::timeout_at(deadline, self.notifications.next())
                .await
                .ok()??;
            // Notifications from other services are of no interest
            if let Some(role) = self.uuids.role_of(&next.uuid) {
                return Some((role, next.value));
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), BringUpError> {
        if self.peripheral.is_connected().await.unwrap_or(false) {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

/// Without the WiFi control characteristic there is no command channel
fn require_command_channel<C>(
    set: CharacteristicSet<C>,
    service_found: bool,
    service: &uuid::Uuid,
) -> Result<CharacteristicSet<C>, BringUpError> {
    if set.contains(CharacteristicRole::WifiControl) {
        Ok(set)
    } else if service_found {
        Err(BringUpError::MissingCharacteristic(CharacteristicRole::WifiControl))
    } else {
        Err(BringUpError::ServiceNotFound(service.to_string()))
    }
}

/// Await `connect` for at most `limit`
async fn connect_within<F>(
    session: &SessionHandle,
    limit: Duration,
    connect: F,
) -> Result<(), BringUpError>
where
    F: Future<Output = btleplug::Result<()>>,
{
    match tokio::time::timeout(limit, connect).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            error!("Connection timed out");
            session.status("Connection timed out", MessageSeverity::Error);
            Err(BringUpError::ConnectTimeout(limit.as_secs()))
        }
    }
}

/// BLE Connection handler
pub struct BleConnection {
    session: SessionHandle,
    config: ConnectionConfig,
}

impl BleConnection {
    pub fn new(session: SessionHandle, config: ConnectionConfig) -> Self {
        Self { session, config }
    }

    /// Connect, discover and bind the characteristic handle set
    pub async fn connect(&self, peripheral: Peripheral) -> Result<BtleLink, BringUpError> {
        let name = peripheral
            .properties()
            .await
            .ok()
            .flatten()
            .and_then(|p| p.local_name);
        let display_name = name.clone().unwrap_or_else(|| "Unknown".to_string());

        info!("Connecting to camera {} ({})", display_name, peripheral.id());
        self.session.transition(ConnectionState::Connecting);
        self.session.status(
            format!("Connecting to {}", display_name),
            MessageSeverity::Info,
        );

        // Step 1: Connect with a hard timeout
        let connected =
            connect_within(&self.session, self.config.connect_timeout, peripheral.connect()).await;
        if let Err(e) = connected {
            // Cancel the pending connection
            let _ = peripheral.disconnect().await;
            return Err(e);
        }
        self.session.transition(ConnectionState::ServiceDiscovery);
        self.session.status(
            format!("Bluetooth connected: {}", display_name),
            MessageSeverity::Success,
        );

        match self.bind(&peripheral).await {
            Ok((characteristics, notifications)) => Ok(BtleLink {
                peripheral,
                name,
                characteristics,
                uuids: self.config.uuids.clone(),
                notifications,
            }),
            Err(e) => {
                warn!("Dropping connection after failed discovery: {}", e);
                let _ = peripheral.disconnect().await;
                Err(e)
            }
        }
    }

    async fn bind(
        &self,
        peripheral: &Peripheral,
    ) -> Result<(CharacteristicSet<Characteristic>, NotificationStream), BringUpError> {
        // Step 2: Discover services and bind characteristics
        peripheral.discover_services().await?;
        let characteristics = self.get_characteristics(peripheral)?;

        // Step 3: Subscribe to notifications before any command is written
        let notifications = peripheral.notifications().await?;
        if let Some(notify) = characteristics.get(CharacteristicRole::Notify) {
            self.enable_notifications(peripheral, notify).await;
        }

        // Step 4: Let the remaining characteristics settle
        tokio::time::sleep(self.config.settle_delay).await;

        Ok((characteristics, notifications))
    }

    /// Match characteristics by UUID; a role stays unset until seen
    fn get_characteristics(
        &self,
        peripheral: &Peripheral,
    ) -> Result<CharacteristicSet<Characteristic>, BringUpError> {
        let uuids = &self.config.uuids;
        let services = peripheral.services();
        info!("Found {} services", services.len());

        let has_service = services.iter().any(|s| s.uuid == uuids.service);
        if has_service {
            self.session
                .status("Camera service found", MessageSeverity::Info);
        } else {
            warn!("Camera service {} not found, matching characteristics on all services", uuids.service);
            self.session.debug("Camera service not advertised, continuing");
        }

        let mut set = CharacteristicSet::default();
        for characteristic in peripheral.characteristics() {
            if has_service && characteristic.service_uuid != uuids.service {
                continue;
            }
            if let Some(role) = uuids.role_of(&characteristic.uuid) {
                info!(
                    "Found {} characteristic {} ({:?})",
                    role, characteristic.uuid, characteristic.properties
                );
                set.assign(role, characteristic);
            }
        }

        require_command_channel(set, has_service, &uuids.service)
    }

    /// Enable notifications with retry logic
    async fn enable_notifications(&self, peripheral: &Peripheral, notify: &Characteristic) {
        if !notify.properties.contains(CharPropFlags::NOTIFY) {
            warn!("Notify characteristic does not support notifications");
            return;
        }

        for attempt in 1..=3 {
            match peripheral.subscribe(notify).await {
                Ok(()) => {
                    info!("Notifications enabled");
                    self.session.debug("Notifications enabled on notify characteristic");
                    return;
                }
                Err(e) => {
                    warn!("Notification subscription attempt {} failed: {}", attempt, e);
                    if attempt < 3 {
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
        }

        warn!("Continuing without notifications; responses will be polled");
        self.session.status(
            "Connected (notifications unavailable)",
            MessageSeverity::Warning,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::domain::session::Session;
    use crate::domain::settings::CameraProfile;
    use std::collections::BTreeSet;
    use tokio::sync::mpsc;

    fn characteristic(properties: CharPropFlags) -> Characteristic {
        Characteristic {
            uuid: protocol::WIFI_CONTROL_UUID,
            service_uuid: protocol::CAMERA_SERVICE_UUID,
            properties,
            descriptors: BTreeSet::new(),
        }
    }

    #[test]
    fn prefers_write_without_response() {
        let c = characteristic(CharPropFlags::WRITE | CharPropFlags::WRITE_WITHOUT_RESPONSE);
        assert_eq!(write_type_for(&c), WriteType::WithoutResponse);
        let c = characteristic(CharPropFlags::WRITE);
        assert_eq!(write_type_for(&c), WriteType::WithResponse);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_the_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new(tx);
        let handle = session.begin();

        let start = tokio::time::Instant::now();
        let result = connect_within(
            &handle,
            Duration::from_secs(30),
            std::future::pending::<btleplug::Result<()>>(),
        )
        .await;

        assert!(matches!(result, Err(BringUpError::ConnectTimeout(30))));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        let mut statuses = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let AppEvent::LogMessage(msg) = event {
                statuses.push(msg.message);
            }
        }
        assert!(statuses.iter().any(|m| m == "Connection timed out"));
    }

    #[tokio::test]
    async fn connect_errors_pass_through() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = Session::new(tx).handle();
        let result = connect_within(&handle, Duration::from_secs(30), async {
            Err(btleplug::Error::DeviceNotFound)
        })
        .await;
        assert!(matches!(result, Err(BringUpError::Ble(btleplug::Error::DeviceNotFound))));
    }

    #[test]
    fn command_channel_is_required() {
        let service = protocol::CAMERA_SERVICE_UUID;
        let empty: CharacteristicSet<u8> = CharacteristicSet::default();
        assert!(matches!(
            require_command_channel(empty.clone(), false, &service),
            Err(BringUpError::ServiceNotFound(_))
        ));
        assert!(matches!(
            require_command_channel(empty, true, &service),
            Err(BringUpError::MissingCharacteristic(CharacteristicRole::WifiControl))
        ));

        let mut set: CharacteristicSet<u8> = CharacteristicSet::default();
        set.assign(CharacteristicRole::WifiControl, 3);
        assert!(require_command_channel(set, false, &service).is_ok());
    }

    #[test]
    fn config_follows_profile() {
        let mut profile = CameraProfile::default();
        profile.connect_timeout_secs = 5;
        profile.notify_uuid = "FFF8".to_string();
        let config = ConnectionConfig::from_profile(&profile).unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.settle_delay, Duration::from_secs(2));
        assert_eq!(config.uuids.notify, protocol::short_uuid(0xFFF8));
        assert_eq!(config.uuids.wifi_control, protocol::WIFI_CONTROL_UUID);
    }
}
