//! WiFi bring-up sequencer
//!
//! Drives a connected camera from "BLE link up" to "TCP channel open":
//!
//! 1. read the status and camera control characteristics for hints
//! 2. read the WiFi control characteristic; a placeholder value gets the
//!    reset table first
//! 3. send the full bring-up table, listening for responses after each write
//! 4. unless the camera already reported ready, switch client mode to AP mode
//!    and re-send the broadcast commands
//! 5. join the camera's network and probe for a reachable endpoint,
//!    re-scanning at fixed offsets before asking for a manual join
//!
//! Every command goes through one sequential pipeline, so no two writes
//! or joins are ever in flight at once.

use crate::domain::models::{CharacteristicRole, CommandEntry, Endpoint, MessageSeverity};
use crate::domain::session::{ConnectionState, SessionHandle};
use crate::domain::settings::CameraProfile;
use crate::infrastructure::bluetooth::link::CameraLink;
use crate::infrastructure::bluetooth::protocol::{
    self, classify_notify, classify_wifi_status, hex, NotifyEvent, WifiStatus,
};
use crate::infrastructure::error::BringUpError;
use crate::infrastructure::wifi::join::{candidate_ssids, join_first};
use crate::infrastructure::wifi::probe::probe_first;
use crate::infrastructure::wifi::{EndpointProber, WifiJoiner};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

const STATUS_READ_PAUSE: Duration = Duration::from_secs(1);

/// A joined camera network with its open data channel
pub struct CameraNetwork<S> {
    pub ssid: String,
    pub endpoint: Endpoint,
    pub stream: S,
}

/// Send `table` in order over the WiFi control characteristic.
///
/// After each write the entry's delay is spent listening for responses.
/// Returns true if the camera reported its access point ready meanwhile.
pub async fn run_table<L: CameraLink>(
    link: &mut L,
    session: &SessionHandle,
    name: &str,
    table: &[CommandEntry],
) -> Result<bool, BringUpError> {
    info!("Sending {} table ({} commands)", name, table.len());
    let mut ready = false;

    for (index, entry) in table.iter().enumerate() {
        if !session.is_current() {
            return Err(BringUpError::Cancelled);
        }
        session.debug(format!(
            "Sending {} ({}/{}): {}",
            entry.label,
            index + 1,
            table.len(),
            hex(&entry.payload)
        ));
        link.write(CharacteristicRole::WifiControl, &entry.payload)
            .await?;
        ready |= listen(link, session, Duration::from_millis(entry.delay_ms)).await;
    }

    Ok(ready)
}

/// Consume notifications for exactly `window`
async fn listen<L: CameraLink>(link: &mut L, session: &SessionHandle, window: Duration) -> bool {
    let deadline = Instant::now() + window;
    let mut ready = false;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match link.next_notification(remaining).await {
            Some((role, value)) => ready |= handle_response(session, role, &value),
            None => break,
        }
    }

    tokio::time::sleep_until(deadline).await;
    ready
}

fn handle_response(session: &SessionHandle, role: CharacteristicRole, value: &[u8]) -> bool {
    session.debug(format!("Response on {}: {}", role, hex(value)));
    match role {
        CharacteristicRole::Notify => match classify_notify(value) {
            NotifyEvent::WifiReady => {
                session.status("Camera WiFi ready", MessageSeverity::Success);
                true
            }
            NotifyEvent::ApModeActive => {
                session.status("Camera AP mode active", MessageSeverity::Success);
                true
            }
            NotifyEvent::Other(_) => false,
        },
        CharacteristicRole::WifiControl => match classify_wifi_status(value) {
            WifiStatus::ApModeActive => {
                session.status("Camera AP mode active", MessageSeverity::Success);
                true
            }
            status => {
                session.debug(format!("WiFi status {:?}", status));
                false
            }
        },
        _ => false,
    }
}

pub struct BringUpSequencer<J, P> {
    session: SessionHandle,
    profile: Arc<CameraProfile>,
    joiner: Arc<J>,
    prober: Arc<P>,
}

impl<J: WifiJoiner, P: EndpointProber> BringUpSequencer<J, P> {
    pub fn new(
        session: SessionHandle,
        profile: Arc<CameraProfile>,
        joiner: Arc<J>,
        prober: Arc<P>,
    ) -> Self {
        Self {
            session,
            profile,
            joiner,
            prober,
        }
    }

    /// Bring the camera's access point up.
    ///
    /// Returns the SSID the camera reported over BLE, if any.
    pub async fn bootstrap<L: CameraLink>(
        &self,
        link: &mut L,
    ) -> Result<Option<String>, BringUpError> {
        if !self.session.transition(ConnectionState::BringUp) {
            return Err(BringUpError::Cancelled);
        }
        self.session
            .status("Preparing camera WiFi...", MessageSeverity::Info);

        if let Some(status) = self.read_optional(link, CharacteristicRole::Status).await {
            if protocol::is_wifi_mode_status(&status) {
                self.session
                    .status("Camera switched to WiFi mode", MessageSeverity::Info);
            }
        }

        let ssid_hint = self
            .read_optional(link, CharacteristicRole::CameraControl)
            .await
            .and_then(|data| protocol::decode_ssid_hint(&data));
        if let Some(ssid) = &ssid_hint {
            self.session
                .status(format!("Camera WiFi SSID: {}", ssid), MessageSeverity::Info);
        }

        tokio::time::sleep(STATUS_READ_PAUSE).await;

        let initial = self.read_wifi_status(link).await;
        if initial == Some(WifiStatus::Placeholder) {
            self.session
                .status("Initializing WiFi module...", MessageSeverity::Info);
            run_table(link, &self.session, "reset", &self.profile.reset_table).await?;
        }

        self.session
            .status("Activating camera WiFi...", MessageSeverity::Info);
        let mut ready =
            run_table(link, &self.session, "bring-up", &self.profile.bring_up_table).await?;

        if !ready {
            match self.read_wifi_status(link).await {
                Some(WifiStatus::ClientMode) => {
                    self.session
                        .status("Switching camera to AP mode...", MessageSeverity::Info);
                    link.write(CharacteristicRole::WifiControl, &protocol::AP_MODE_ON)
                        .await?;
                    ready = self.broadcast(link).await?;
                }
                Some(WifiStatus::ApModeActive) => {
                    self.session
                        .status("Camera AP mode active", MessageSeverity::Success);
                    ready = self.broadcast(link).await?;
                }
                _ => {}
            }
        }

        if !ready {
            info!("No ready signal from camera, trying to join anyway");
        }
        Ok(ssid_hint)
    }

    async fn broadcast<L: CameraLink>(&self, link: &mut L) -> Result<bool, BringUpError> {
        run_table(
            link,
            &self.session,
            "AP broadcast",
            &self.profile.ap_broadcast_table,
        )
        .await
    }

    async fn read_optional<L: CameraLink>(
        &self,
        link: &mut L,
        role: CharacteristicRole,
    ) -> Option<Vec<u8>> {
        if !link.has_role(role) {
            return None;
        }
        match link.read(role).await {
            Ok(data) => {
                self.session
                    .debug(format!("Read {}: {}", role, hex(&data)));
                Some(data)
            }
            Err(e) => {
                warn!("Reading {} failed: {}", role, e);
                None
            }
        }
    }

    async fn read_wifi_status<L: CameraLink>(&self, link: &mut L) -> Option<WifiStatus> {
        let data = self
            .read_optional(link, CharacteristicRole::WifiControl)
            .await?;
        Some(classify_wifi_status(&data))
    }

    /// Join the camera network and open the data channel.
    ///
    /// `discovered` holds names learnt from the peripheral; they are tried
    /// before the configured candidates.
    pub async fn join_camera_network(
        &self,
        discovered: &[String],
    ) -> Result<CameraNetwork<P::Stream>, BringUpError> {
        if !self.session.transition(ConnectionState::WifiJoining) {
            return Err(BringUpError::Cancelled);
        }
        self.session
            .status("Connecting to camera WiFi...", MessageSeverity::Info);

        let candidates = candidate_ssids(
            discovered.iter().map(String::as_str),
            &self.profile.ssid_candidates,
        );

        if let Some(network) = self.join_pass(&candidates).await {
            return self.established(network);
        }

        let first_pass_end = Instant::now();
        for offset in &self.profile.rescan_offsets_secs {
            tokio::time::sleep_until(first_pass_end + Duration::from_secs(*offset)).await;
            self.session.status(
                format!("Searching for camera WiFi again (+{}s)", offset),
                MessageSeverity::Info,
            );
            if let Some(network) = self.join_pass(&candidates).await {
                return self.established(network);
            }
        }

        Err(BringUpError::ManualJoinRequired)
    }

    /// Join a user-supplied network, then probe it
    pub async fn join_with_credentials(
        &self,
        ssid: &str,
        passphrase: &str,
    ) -> Result<CameraNetwork<P::Stream>, BringUpError> {
        if !self.session.transition(ConnectionState::WifiJoining) {
            return Err(BringUpError::Cancelled);
        }
        self.session
            .status(format!("Joining {}...", ssid), MessageSeverity::Info);

        let outcome = self.joiner.join(ssid, Some(passphrase)).await;
        if !outcome.is_success() {
            return Err(BringUpError::JoinFailed {
                ssid: ssid.to_string(),
                reason: format!("{:?}", outcome),
            });
        }
        self.joined(ssid);

        let (endpoint, stream) = self
            .probe()
            .await
            .ok_or(BringUpError::EndpointUnreachable)?;
        self.established(CameraNetwork {
            ssid: ssid.to_string(),
            endpoint,
            stream,
        })
    }

    async fn join_pass(&self, candidates: &[String]) -> Option<CameraNetwork<P::Stream>> {
        let ssid = match self.joiner.current_ssid().await {
            Some(current) if protocol::is_camera_network(&current, &self.profile.network_patterns) => {
                self.session
                    .debug(format!("Already on camera network {}", current));
                current
            }
            _ => {
                join_first(self.joiner.as_ref(), candidates, None, |ssid, outcome| {
                    self.session
                        .debug(format!("Join {}: {:?}", ssid, outcome));
                })
                .await?
            }
        };
        self.joined(&ssid);

        let (endpoint, stream) = self.probe().await?;
        Some(CameraNetwork {
            ssid,
            endpoint,
            stream,
        })
    }

    fn joined(&self, ssid: &str) {
        self.session.set_ssid(ssid);
        self.session
            .status(format!("WiFi joined: {}", ssid), MessageSeverity::Success);
    }

    async fn probe(&self) -> Option<(Endpoint, P::Stream)> {
        self.session
            .status("Checking camera connection...", MessageSeverity::Info);
        let found = probe_first(
            self.prober.as_ref(),
            &self.profile.hosts,
            self.profile.primary_port,
            &self.profile.alternative_ports,
        )
        .await;
        if found.is_none() {
            self.session
                .status("Camera not reachable on any address", MessageSeverity::Warning);
        }
        found
    }

    fn established(
        &self,
        network: CameraNetwork<P::Stream>,
    ) -> Result<CameraNetwork<P::Stream>, BringUpError> {
        self.session.set_endpoint(&network.endpoint);
        if !self.session.transition(ConnectionState::Ready) {
            return Err(BringUpError::Cancelled);
        }
        self.session.status(
            format!("Camera connected at {}", network.endpoint),
            MessageSeverity::Success,
        );
        Ok(network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::domain::session::Session;
    use crate::infrastructure::wifi::JoinOutcome;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::io::DuplexStream;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct ScriptedLink {
        reads: HashMap<CharacteristicRole, VecDeque<Vec<u8>>>,
        writes: Vec<Vec<u8>>,
        /// Notification delivered after the write with this index
        notify_after: HashMap<usize, (CharacteristicRole, Vec<u8>)>,
        pending: VecDeque<(CharacteristicRole, Vec<u8>)>,
    }

    impl ScriptedLink {
        fn with_wifi_reads(reads: &[&[u8]]) -> Self {
            let mut link = Self::default();
            link.reads.insert(
                CharacteristicRole::WifiControl,
                reads.iter().map(|r| r.to_vec()).collect(),
            );
            link
        }
    }

    #[async_trait]
    impl CameraLink for ScriptedLink {
        fn name(&self) -> Option<String> {
            Some("X2D II 100C 003635".to_string())
        }

        fn has_role(&self, role: CharacteristicRole) -> bool {
            self.reads.contains_key(&role) || role == CharacteristicRole::Notify
        }

        async fn write(
            &mut self,
            role: CharacteristicRole,
            payload: &[u8],
        ) -> Result<(), BringUpError> {
            assert_eq!(role, CharacteristicRole::WifiControl);
            self.writes.push(payload.to_vec());
            if let Some(notification) = self.notify_after.remove(&(self.writes.len() - 1)) {
                self.pending.push_back(notification);
            }
            Ok(())
        }

        async fn read(&mut self, role: CharacteristicRole) -> Result<Vec<u8>, BringUpError> {
            let queue = self
                .reads
                .get_mut(&role)
                .ok_or(BringUpError::MissingCharacteristic(role))?;
            if queue.len() > 1 {
                Ok(queue.pop_front().unwrap())
            } else {
                queue
                    .front()
                    .cloned()
                    .ok_or(BringUpError::MissingCharacteristic(role))
            }
        }

        async fn next_notification(
            &mut self,
            wait: Duration,
        ) -> Option<(CharacteristicRole, Vec<u8>)> {
            if let Some(notification) = self.pending.pop_front() {
                return Some(notification);
            }
            tokio::time::sleep(wait).await;
            None
        }

        async fn disconnect(&mut self) -> Result<(), BringUpError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeJoiner {
        current: Option<String>,
        accept: Option<String>,
        attempts: Mutex<Vec<(String, Instant)>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl WifiJoiner for FakeJoiner {
        async fn current_ssid(&self) -> Option<String> {
            self.current.clone()
        }

        async fn join(&self, ssid: &str, _passphrase: Option<&str>) -> JoinOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            self.attempts
                .lock()
                .unwrap()
                .push((ssid.to_string(), Instant::now()));
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if self.accept.as_deref() == Some(ssid) {
                JoinOutcome::Joined
            } else {
                JoinOutcome::NotFound
            }
        }
    }

    struct FakeProber {
        open: Option<Endpoint>,
    }

    #[async_trait]
    impl EndpointProber for FakeProber {
        type Stream = DuplexStream;

        async fn probe(&self, endpoint: &Endpoint) -> io::Result<DuplexStream> {
            if self.open.as_ref() == Some(endpoint) {
                Ok(tokio::io::duplex(64).0)
            } else {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            }
        }
    }

    fn profile() -> Arc<CameraProfile> {
        let mut profile = CameraProfile::default();
        profile.ssid_candidates = vec!["X2D-II-100C-003635".to_string(), "X2D".to_string()];
        Arc::new(profile)
    }

    fn camera_endpoint() -> Endpoint {
        Endpoint {
            host: "192.168.2.1".to_string(),
            port: 80,
        }
    }

    fn connected_session() -> (Session, SessionHandle, mpsc::UnboundedReceiver<AppEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut session = Session::new(tx);
        let handle = session.begin();
        handle.transition(ConnectionState::Connecting);
        handle.transition(ConnectionState::ServiceDiscovery);
        (session, handle, rx)
    }

    fn sequencer(
        handle: &SessionHandle,
        joiner: Arc<FakeJoiner>,
        open: Option<Endpoint>,
    ) -> BringUpSequencer<FakeJoiner, FakeProber> {
        BringUpSequencer::new(
            handle.clone(),
            profile(),
            joiner,
            Arc::new(FakeProber { open }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_gets_reset_table_first() {
        let (_session, handle, _rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), None);
        let mut link = ScriptedLink::with_wifi_reads(&[&[0x11, 0x22, 0x33, 0x44], &[0x0a, 0x00, 0x01]]);

        seq.bootstrap(&mut link).await.unwrap();

        let reset: Vec<_> = protocol::reset_table().into_iter().map(|e| e.payload).collect();
        let full: Vec<_> = protocol::full_bring_up_table()
            .into_iter()
            .map(|e| e.payload)
            .collect();
        assert_eq!(link.writes.len(), reset.len() + full.len());
        assert_eq!(link.writes[..3], reset[..]);
        assert_eq!(link.writes[3..], full[..]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_table_waits_between_writes() {
        let (_session, handle, _rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), None);
        let mut link = ScriptedLink::with_wifi_reads(&[&[0x0a, 0x00, 0x01]]);

        let start = Instant::now();
        seq.bootstrap(&mut link).await.unwrap();

        assert_eq!(link.writes.len(), 17);
        // one second pause plus 17 x 200 ms
        assert!(start.elapsed() >= Duration::from_millis(4400));
        assert_eq!(handle.state(), ConnectionState::BringUp);
    }

    #[tokio::test(start_paused = true)]
    async fn client_mode_switches_to_ap_and_rebroadcasts() {
        let (_session, handle, _rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), None);
        let mut link = ScriptedLink::with_wifi_reads(&[&[0x02, 0x00, 0x01], &[0x01, 0x00]]);

        seq.bootstrap(&mut link).await.unwrap();

        assert_eq!(link.writes.len(), 17 + 1 + 8);
        assert_eq!(link.writes[17], protocol::AP_MODE_ON.to_vec());
        assert_eq!(link.writes[25], vec![0xFF, 0x01, 0x00]);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_notification_skips_mode_switch() {
        let (_session, handle, _rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), None);
        let mut link = ScriptedLink::with_wifi_reads(&[&[0x02, 0x00, 0x01], &[0x01, 0x00]]);
        link.notify_after
            .insert(10, (CharacteristicRole::Notify, vec![0x01, 0x00]));

        seq.bootstrap(&mut link).await.unwrap();

        assert_eq!(link.writes.len(), 17);
    }

    #[tokio::test(start_paused = true)]
    async fn ssid_hint_comes_from_camera_control() {
        let (_session, handle, _rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), None);
        let mut link = ScriptedLink::with_wifi_reads(&[&[0x0a, 0x00, 0x01]]);
        link.reads.insert(
            CharacteristicRole::CameraControl,
            VecDeque::from(vec![b"X2D II 100C 003635".to_vec()]),
        );

        let hint = seq.bootstrap(&mut link).await.unwrap();
        assert_eq!(hint.as_deref(), Some("X2D II 100C 003635"));
    }

    #[tokio::test(start_paused = true)]
    async fn candidates_are_tried_in_order_one_at_a_time() {
        let (session, handle, _rx) = connected_session();
        handle.transition(ConnectionState::BringUp);
        let joiner = Arc::new(FakeJoiner::default());
        let seq = sequencer(&handle, joiner.clone(), Some(camera_endpoint()));

        let start = Instant::now();
        let result = seq
            .join_camera_network(&["X2D II 100C 003635".to_string(), "X2D".to_string()])
            .await;
        assert!(matches!(result, Err(BringUpError::ManualJoinRequired)));

        let attempts = joiner.attempts.lock().unwrap();
        let names: Vec<_> = attempts.iter().map(|(ssid, _)| ssid.as_str()).collect();
        let pass = ["X2D II 100C 003635", "X2D", "X2D-II-100C-003635"];
        // first pass plus four re-scans
        assert_eq!(names.len(), pass.len() * 5);
        for chunk in names.chunks(pass.len()) {
            assert_eq!(chunk, pass);
        }
        assert_eq!(joiner.max_in_flight.load(Ordering::SeqCst), 1);

        // last re-scan starts 15 s after the first pass ended
        let first_pass_end = attempts[pass.len() - 1].1 + Duration::from_millis(50);
        let last_rescan = attempts[pass.len() * 4].1;
        assert!(last_rescan - first_pass_end >= Duration::from_secs(15));
        assert!(start.elapsed() >= Duration::from_secs(15));
        assert_eq!(session.snapshot().state, ConnectionState::WifiJoining);
    }

    #[tokio::test(start_paused = true)]
    async fn joined_and_reachable_camera_is_ready() {
        let (session, handle, _rx) = connected_session();
        handle.transition(ConnectionState::BringUp);
        let joiner = Arc::new(FakeJoiner {
            accept: Some("X2D".to_string()),
            ..Default::default()
        });
        let seq = sequencer(&handle, joiner.clone(), Some(camera_endpoint()));

        let network = seq.join_camera_network(&[]).await.unwrap();

        assert_eq!(network.ssid, "X2D");
        assert_eq!(network.endpoint, camera_endpoint());
        let snapshot = session.snapshot();
        assert!(snapshot.is_wifi_connected());
        assert_eq!(snapshot.ssid.as_deref(), Some("X2D"));
        assert_eq!(snapshot.endpoint, Some(camera_endpoint()));
    }

    #[tokio::test(start_paused = true)]
    async fn current_camera_network_counts_as_joined() {
        let (_session, handle, _rx) = connected_session();
        handle.transition(ConnectionState::BringUp);
        let joiner = Arc::new(FakeJoiner {
            current: Some("X2D II 100C 003635".to_string()),
            ..Default::default()
        });
        let seq = sequencer(&handle, joiner.clone(), Some(camera_endpoint()));

        let network = seq.join_camera_network(&[]).await.unwrap();

        assert_eq!(network.ssid, "X2D II 100C 003635");
        assert!(joiner.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn credentials_that_fail_are_reported() {
        let (_session, handle, _rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), Some(camera_endpoint()));
        handle.transition(ConnectionState::Disconnected);

        let result = seq.join_with_credentials("Studio", "secret").await;
        assert!(matches!(result, Err(BringUpError::JoinFailed { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_silences_a_running_bring_up() {
        let (mut session, handle, mut rx) = connected_session();
        let seq = sequencer(&handle, Arc::default(), Some(camera_endpoint()));
        session.attach(tokio::spawn(async move {
            let mut link = ScriptedLink::with_wifi_reads(&[&[0x0a, 0x00, 0x01]]);
            let _ = seq.bootstrap(&mut link).await;
            let _ = seq.join_camera_network(&[]).await;
        }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        session.teardown("Disconnected", MessageSeverity::Info);
        while rx.try_recv().is_ok() {}

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
        let snapshot = session.snapshot();
        assert!(!snapshot.is_bluetooth_connected());
        assert!(!snapshot.is_wifi_connected());
        assert_eq!(snapshot.status, "Disconnected");
    }
}
