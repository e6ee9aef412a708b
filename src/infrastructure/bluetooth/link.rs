//! GATT link abstraction
//!
//! The bring-up sequencer only needs to write, read and listen on the four
//! camera characteristics. [`CameraLink`] captures exactly that so the
//! sequencer can run against the btleplug link or a scripted one.

use crate::domain::models::CharacteristicRole;
use crate::infrastructure::error::BringUpError;
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

#[async_trait]
pub trait CameraLink: Send {
    /// Advertised name of the connected peripheral
    fn name(&self) -> Option<String>;

    fn has_role(&self, role: CharacteristicRole) -> bool;

    /// Write a payload; with-response writes are awaited
    async fn write(&mut self, role: CharacteristicRole, payload: &[u8])
        -> Result<(), BringUpError>;

    async fn read(&mut self, role: CharacteristicRole) -> Result<Vec<u8>, BringUpError>;

    /// Wait up to `wait` for the next notification
    async fn next_notification(&mut self, wait: Duration) -> Option<(CharacteristicRole, Vec<u8>)>;

    async fn disconnect(&mut self) -> Result<(), BringUpError>;
}

/// UUIDs of the four roles, resolved from the camera profile
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleUuids {
    pub service: Uuid,
    pub wifi_control: Uuid,
    pub camera_control: Uuid,
    pub status: Uuid,
    pub notify: Uuid,
}

impl RoleUuids {
    pub fn role_of(&self, uuid: &Uuid) -> Option<CharacteristicRole> {
        if *uuid == self.wifi_control {
            Some(CharacteristicRole::WifiControl)
        } else if *uuid == self.camera_control {
            Some(CharacteristicRole::CameraControl)
        } else if *uuid == self.status {
            Some(CharacteristicRole::Status)
        } else if *uuid == self.notify {
            Some(CharacteristicRole::Notify)
        } else {
            None
        }
    }
}

/// Characteristic handles bound to one connection.
///
/// A role is only usable once its UUID has been seen during discovery.
#[derive(Debug, Clone)]
pub struct CharacteristicSet<C> {
    wifi_control: Option<C>,
    camera_control: Option<C>,
    status: Option<C>,
    notify: Option<C>,
}

impl<C> Default for CharacteristicSet<C> {
    fn default() -> Self {
        Self {
            wifi_control: None,
            camera_control: None,
            status: None,
            notify: None,
        }
    }
}

impl<C> CharacteristicSet<C> {
    pub fn assign(&mut self, role: CharacteristicRole, handle: C) {
        let slot = match role {
            CharacteristicRole::WifiControl => &mut self.wifi_control,
            CharacteristicRole::CameraControl => &mut self.camera_control,
            CharacteristicRole::Status => &mut self.status,
            CharacteristicRole::Notify => &mut self.notify,
        };
        *slot = Some(handle);
    }

    pub fn get(&self, role: CharacteristicRole) -> Option<&C> {
        match role {
            CharacteristicRole::WifiControl => self.wifi_control.as_ref(),
            CharacteristicRole::CameraControl => self.camera_control.as_ref(),
            CharacteristicRole::Status => self.status.as_ref(),
            CharacteristicRole::Notify => self.notify.as_ref(),
        }
    }

    pub fn require(&self, role: CharacteristicRole) -> Result<&C, BringUpError> {
        self.get(role)
            .ok_or(BringUpError::MissingCharacteristic(role))
    }

    pub fn contains(&self, role: CharacteristicRole) -> bool {
        self.get(role).is_some()
    }
}
