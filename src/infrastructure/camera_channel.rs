//! JSON control channel to the camera over its WiFi network

use crate::domain::models::GpsFix;
use crate::domain::session::SessionHandle;
use crate::infrastructure::error::BringUpError;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const READ_CHUNK: usize = 64 * 1024;

pub const CLIENT_NAME: &str = "PhotoPin";
pub const CLIENT_VERSION: &str = "1.0";
const CAPABILITIES: [&str; 3] = ["capture", "gps", "preview"];

#[derive(Debug, Serialize)]
struct Handshake<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    client: &'a str,
    version: &'a str,
    capabilities: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct Capture<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    settings: CaptureSettings<'a>,
}

#[derive(Debug, Serialize)]
struct CaptureSettings<'a> {
    format: &'a str,
    gps: GpsPayload,
}

#[derive(Debug, Serialize)]
struct GpsPayload {
    latitude: f64,
    longitude: f64,
    altitude: f64,
    timestamp: String,
}

pub fn handshake_message() -> Result<Vec<u8>, BringUpError> {
    Ok(serde_json::to_vec(&Handshake {
        kind: "handshake",
        client: CLIENT_NAME,
        version: CLIENT_VERSION,
        capabilities: &CAPABILITIES,
    })?)
}

/// Capture command; without a fix the location is zeroed and stamped now
pub fn capture_message(fix: Option<&GpsFix>) -> Result<Vec<u8>, BringUpError> {
    let gps = match fix {
        Some(fix) => GpsPayload {
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            timestamp: fix.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        },
        None => GpsPayload {
            latitude: 0.0,
            longitude: 0.0,
            altitude: 0.0,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        },
    };
    Ok(serde_json::to_vec(&Capture {
        kind: "capture",
        settings: CaptureSettings { format: "raw", gps },
    })?)
}

/// Open channel; camera responses are logged by a background reader that
/// stops when the channel is dropped
pub struct CameraChannel<S> {
    writer: WriteHalf<S>,
    reader: JoinHandle<()>,
    session: SessionHandle,
}

impl<S> CameraChannel<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn open(stream: S, session: SessionHandle) -> Self {
        let (mut read_half, writer) = tokio::io::split(stream);
        let reader_session = session.clone();

        let reader = tokio::spawn(async move {
            let mut buffer = vec![0u8; READ_CHUNK];
            loop {
                match read_half.read(&mut buffer).await {
                    Ok(0) => {
                        debug!("Camera closed the data channel");
                        break;
                    }
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&buffer[..n]).into_owned();
                        info!("Camera response: {}", text);
                        reader_session.camera_response(text);
                    }
                    Err(e) => {
                        warn!("Data channel read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            writer,
            reader,
            session,
        }
    }

    pub async fn handshake(&mut self) -> Result<(), BringUpError> {
        let message = handshake_message()?;
        self.send(&message).await?;
        self.session.debug("Handshake sent");
        Ok(())
    }

    /// Send a capture command; returns the new photo count
    pub async fn capture(&mut self, fix: Option<&GpsFix>) -> Result<u32, BringUpError> {
        let message = capture_message(fix)?;
        self.send(&message).await?;
        self.session
            .record_capture()
            .ok_or(BringUpError::Cancelled)
    }

    async fn send(&mut self, message: &[u8]) -> Result<(), BringUpError> {
        self.writer.write_all(message).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

impl<S> Drop for CameraChannel<S> {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AppEvent;
    use crate::domain::session::Session;
    use chrono::TimeZone;
    use tokio::sync::mpsc;

    #[test]
    fn handshake_shape() {
        let value: serde_json::Value = serde_json::from_slice(&handshake_message().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "handshake",
                "client": "PhotoPin",
                "version": "1.0",
                "capabilities": ["capture", "gps", "preview"],
            })
        );
    }

    #[test]
    fn capture_carries_fix() {
        let fix = GpsFix {
            latitude: 37.5665,
            longitude: 126.978,
            altitude: 38.0,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 3, 4, 5).unwrap(),
        };
        let value: serde_json::Value =
            serde_json::from_slice(&capture_message(Some(&fix)).unwrap()).unwrap();
        assert_eq!(value["type"], "capture");
        assert_eq!(value["settings"]["format"], "raw");
        assert_eq!(value["settings"]["gps"]["latitude"], 37.5665);
        assert_eq!(value["settings"]["gps"]["timestamp"], "2024-05-01T03:04:05Z");

        let value: serde_json::Value =
            serde_json::from_slice(&capture_message(None).unwrap()).unwrap();
        assert_eq!(value["settings"]["gps"]["altitude"], 0.0);
        assert!(value["settings"]["gps"]["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn exchanges_messages_and_counts_captures() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new(tx);
        let handle = session.begin();
        let (ours, mut camera) = tokio::io::duplex(READ_CHUNK);

        let mut channel = CameraChannel::open(ours, handle);
        channel.handshake().await.unwrap();

        let mut buffer = vec![0u8; 1024];
        let n = camera.read(&mut buffer).await.unwrap();
        let sent: serde_json::Value = serde_json::from_slice(&buffer[..n]).unwrap();
        assert_eq!(sent["type"], "handshake");

        camera.write_all(b"{\"status\":\"ok\"}").await.unwrap();
        let response = loop {
            match rx.recv().await.unwrap() {
                AppEvent::CameraResponse(text) => break text,
                _ => continue,
            }
        };
        assert_eq!(response, "{\"status\":\"ok\"}");

        assert_eq!(channel.capture(None).await.unwrap(), 1);
        assert_eq!(channel.capture(None).await.unwrap(), 2);
        assert_eq!(session.snapshot().photo_count, 2);
    }
}
