//! Camera session lifecycle
//!
//! The connection lifecycle is one finite-state machine:
//!
//! ```text
//! Disconnected → Connecting → ServiceDiscovery → BringUp → WifiJoining → Ready
//!        ▲                                                        │
//!        └──────────────── any state ─► Error(reason) ◄───────────┘
//! ```
//!
//! Every piece of work belonging to a session publishes through a
//! [`SessionHandle`] stamped with the session epoch. Tearing a session down
//! bumps the epoch, so a handle held by a late timer or a task that has not
//! yet observed its cancellation can no longer change state or emit events.

use crate::domain::log_buffer::{LogBuffer, DEBUG_LOG_CAPACITY};
use crate::domain::models::{AppEvent, Endpoint, MessageSeverity, StatusMessage};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Why a session ended up in [`ConnectionState::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    AdapterUnavailable,
    Unauthorized,
    ConnectTimeout,
    ServiceDiscovery,
    PeripheralDisconnected,
    ManualJoinRequired,
    EndpointUnreachable,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AdapterUnavailable => "Bluetooth is off or unavailable",
            Self::Unauthorized => "Bluetooth permission is required",
            Self::ConnectTimeout => "connection timed out",
            Self::ServiceDiscovery => "camera service not found",
            Self::PeripheralDisconnected => "camera disconnected unexpectedly",
            Self::ManualJoinRequired => "camera WiFi must be joined manually",
            Self::EndpointUnreachable => "camera endpoint unreachable",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    ServiceDiscovery,
    BringUp,
    WifiJoining,
    Ready,
    Error(FailureReason),
}

impl ConnectionState {
    /// True while a BLE link to the camera is up
    pub fn is_bluetooth_connected(&self) -> bool {
        matches!(
            self,
            Self::ServiceDiscovery | Self::BringUp | Self::WifiJoining | Self::Ready
        )
    }

    /// True once the camera endpoint answered over WiFi
    pub fn is_wifi_connected(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Automatic bring-up is still between connect and the final result
    pub fn is_bringing_up(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::ServiceDiscovery | Self::BringUp | Self::WifiJoining
        )
    }

    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) | (_, Error(_)) => true,
            (Disconnected | Error(_), Connecting) => true,
            (Connecting, ServiceDiscovery) => true,
            (ServiceDiscovery, BringUp) => true,
            (BringUp, WifiJoining) => true,
            (WifiJoining, Ready) => true,
            // Joining a network by hand does not need a BLE link
            (Disconnected | Error(_) | Ready, WifiJoining) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => f.write_str("Disconnected"),
            Self::Connecting => f.write_str("Connecting"),
            Self::ServiceDiscovery => f.write_str("Service discovery"),
            Self::BringUp => f.write_str("WiFi bring-up"),
            Self::WifiJoining => f.write_str("Joining camera WiFi"),
            Self::Ready => f.write_str("Ready"),
            Self::Error(reason) => write!(f, "Error: {}", reason),
        }
    }
}

/// Point-in-time copy of the session, safe to hand to a front end
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub epoch: u64,
    pub state: ConnectionState,
    pub status: String,
    pub ssid: Option<String>,
    pub endpoint: Option<Endpoint>,
    pub photo_count: u32,
    pub debug_log: Vec<String>,
}

impl SessionSnapshot {
    pub fn is_bluetooth_connected(&self) -> bool {
        self.state.is_bluetooth_connected()
    }

    pub fn is_wifi_connected(&self) -> bool {
        self.state.is_wifi_connected()
    }
}

#[derive(Debug)]
struct SessionState {
    epoch: u64,
    state: ConnectionState,
    status: String,
    ssid: Option<String>,
    endpoint: Option<Endpoint>,
    photo_count: u32,
    debug_log: LogBuffer,
}

impl SessionState {
    fn new() -> Self {
        Self {
            epoch: 0,
            state: ConnectionState::Disconnected,
            status: "Searching for camera...".to_string(),
            ssid: None,
            endpoint: None,
            photo_count: 0,
            debug_log: LogBuffer::new(DEBUG_LOG_CAPACITY),
        }
    }
}

fn lock(shared: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Epoch-stamped publisher for one session
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Mutex<SessionState>>,
    events: mpsc::UnboundedSender<AppEvent>,
    epoch: u64,
}

impl SessionHandle {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_current(&self) -> bool {
        lock(&self.shared).epoch == self.epoch
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    /// Run `f` only while this handle still owns the session.
    ///
    /// Events are sent while the lock is held so they are ordered with
    /// respect to teardown.
    fn with_current<R>(&self, f: impl FnOnce(&mut SessionState, &Sender<'_>) -> R) -> Option<R> {
        let mut guard = lock(&self.shared);
        if guard.epoch != self.epoch {
            return None;
        }
        Some(f(&mut guard, &Sender(&self.events)))
    }

    /// Move to `next`; returns false for stale handles and illegal moves
    pub fn transition(&self, next: ConnectionState) -> bool {
        self.with_current(|state, tx| {
            if state.state == next {
                return true;
            }
            if !state.state.can_transition_to(&next) {
                debug!("Ignoring transition {} -> {}", state.state, next);
                return false;
            }
            info!("Session {}: {} -> {}", state.epoch, state.state, next);
            state.state = next;
            tx.send(AppEvent::ConnectionState(next));
            true
        })
        .unwrap_or(false)
    }

    /// Publish a user-facing status line
    pub fn status(&self, message: impl Into<String>, severity: MessageSeverity) -> bool {
        let message = message.into();
        self.with_current(|state, tx| {
            state.status = message.clone();
            state.debug_log.push(&message);
            tx.send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
        })
        .is_some()
    }

    /// Record a line in the session debug log without changing the status
    pub fn debug(&self, message: impl Into<String>) {
        let message = message.into();
        self.with_current(|state, _| {
            debug!("{}", message);
            state.debug_log.push(&message);
        });
    }

    pub fn set_ssid(&self, ssid: &str) {
        self.with_current(|state, _| state.ssid = Some(ssid.to_string()));
    }

    pub fn set_endpoint(&self, endpoint: &Endpoint) {
        self.with_current(|state, _| state.endpoint = Some(endpoint.clone()));
    }

    pub fn camera_response(&self, text: String) {
        self.with_current(|state, tx| {
            state.debug_log.push(&format!("Camera response: {}", text));
            tx.send(AppEvent::CameraResponse(text));
        });
    }

    /// Count a delivered capture command; returns the new total
    pub fn record_capture(&self) -> Option<u32> {
        self.with_current(|state, tx| {
            state.photo_count += 1;
            tx.send(AppEvent::PhotoCaptured {
                count: state.photo_count,
            });
            state.photo_count
        })
    }
}

struct Sender<'a>(&'a mpsc::UnboundedSender<AppEvent>);

impl Sender<'_> {
    fn send(&self, event: AppEvent) {
        let _ = self.0.send(event);
    }
}

/// Owner of the session state and of the task currently driving it
pub struct Session {
    shared: Arc<Mutex<SessionState>>,
    events: mpsc::UnboundedSender<AppEvent>,
    task: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(events: mpsc::UnboundedSender<AppEvent>) -> Self {
        Self {
            shared: Arc::new(Mutex::new(SessionState::new())),
            events,
            task: None,
        }
    }

    /// Handle for the current epoch
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
            events: self.events.clone(),
            epoch: lock(&self.shared).epoch,
        }
    }

    /// Start a new epoch, silently cancelling whatever ran before
    pub fn begin(&mut self) -> SessionHandle {
        self.abort_task();
        {
            let mut state = lock(&self.shared);
            state.epoch += 1;
            state.ssid = None;
            state.endpoint = None;
        }
        self.handle()
    }

    /// Attach the task driving the current epoch
    pub fn attach(&mut self, task: JoinHandle<()>) {
        self.abort_task();
        self.task = Some(task);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }

    /// End the session: bump the epoch, cancel all pending work, and publish
    /// one final state and status. Nothing from the old epoch is published
    /// afterwards.
    pub fn teardown(&mut self, message: &str, severity: MessageSeverity) {
        {
            let mut state = lock(&self.shared);
            state.epoch += 1;
            state.state = ConnectionState::Disconnected;
            state.status = message.to_string();
            state.ssid = None;
            state.endpoint = None;
            state.debug_log.push(message);
            let _ = self
                .events
                .send(AppEvent::ConnectionState(ConnectionState::Disconnected));
            let _ = self
                .events
                .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
        }
        self.abort_task();
        info!("Session torn down: {}", message);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.shared);
        SessionSnapshot {
            epoch: state.epoch,
            state: state.state,
            status: state.status.clone(),
            ssid: state.ssid.clone(),
            endpoint: state.endpoint.clone(),
            photo_count: state.photo_count,
            debug_log: state.debug_log.lines().map(str::to_string).collect(),
        }
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_task();
    }
}
