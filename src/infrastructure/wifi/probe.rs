//! TCP reachability probing of the camera's candidate endpoints

use crate::domain::models::Endpoint;
use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};
use tracing::{debug, info, warn};

#[async_trait]
pub trait EndpointProber: Send + Sync {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Open a connection to `endpoint`, or fail
    async fn probe(&self, endpoint: &Endpoint) -> io::Result<Self::Stream>;
}

/// TCP connect with a per-attempt timeout, pinned to the WiFi interface
/// so a router on another link is never mistaken for the camera
pub struct TcpProber {
    timeout: Duration,
    /// Empty means any interface
    interface: String,
}

impl TcpProber {
    pub fn new(timeout: Duration, interface: impl Into<String>) -> Self {
        Self {
            timeout,
            interface: interface.into(),
        }
    }

    fn socket_for(&self, address: &SocketAddr) -> io::Result<TcpSocket> {
        let socket = Socket::new(Domain::for_address(*address), Type::STREAM, Some(Protocol::TCP))?;
        if !self.interface.is_empty() {
            bind_to_interface(&socket, &self.interface, address)?;
        }
        socket.set_nodelay(true)?;
        socket.set_nonblocking(true)?;
        Ok(TcpSocket::from_std_stream(socket.into()))
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn bind_to_interface(socket: &Socket, interface: &str, _address: &SocketAddr) -> io::Result<()> {
    socket.bind_device(Some(interface.as_bytes()))
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn bind_to_interface(socket: &Socket, interface: &str, address: &SocketAddr) -> io::Result<()> {
    use std::ffi::CString;
    use std::num::NonZeroU32;

    let name = CString::new(interface)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "invalid interface name"))?;
    // SAFETY: `name` is a valid NUL-terminated string for the whole call
    let index = unsafe { libc::if_nametoindex(name.as_ptr()) };
    let index = NonZeroU32::new(index).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("network interface {} not found", interface),
        )
    })?;
    match address {
        SocketAddr::V4(_) => socket.bind_device_by_index_v4(Some(index)),
        SocketAddr::V6(_) => socket.bind_device_by_index_v6(Some(index)),
    }
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios"
)))]
fn bind_to_interface(_socket: &Socket, interface: &str, _address: &SocketAddr) -> io::Result<()> {
    warn!("Cannot restrict probes to {} on this platform", interface);
    Ok(())
}

#[async_trait]
impl EndpointProber for TcpProber {
    type Stream = TcpStream;

    async fn probe(&self, endpoint: &Endpoint) -> io::Result<TcpStream> {
        let address = tokio::net::lookup_host((endpoint.host.as_str(), endpoint.port))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
        let socket = self.socket_for(&address).map_err(|e| {
            warn!("Cannot bind probe socket to {}: {}", self.interface, e);
            e
        })?;
        tokio::time::timeout(self.timeout, socket.connect(address))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }
}

/// Probe order: every host on the primary port, then every host on each
/// alternative port
pub fn probe_order(hosts: &[String], primary: u16, alternatives: &[u16]) -> Vec<Endpoint> {
    std::iter::once(primary)
        .chain(alternatives.iter().copied().filter(|p| *p != primary))
        .flat_map(|port| {
            hosts.iter().map(move |host| Endpoint {
                host: host.clone(),
                port,
            })
        })
        .collect()
}

/// First endpoint that accepts a connection, with that connection
pub async fn probe_first<P: EndpointProber + ?Sized>(
    prober: &P,
    hosts: &[String],
    primary: u16,
    alternatives: &[u16],
) -> Option<(Endpoint, P::Stream)> {
    for endpoint in probe_order(hosts, primary, alternatives) {
        match prober.probe(&endpoint).await {
            Ok(stream) => {
                info!("Camera endpoint reachable at {}", endpoint);
                return Some((endpoint, stream));
            }
            Err(e) => debug!("Probe {} failed: {}", endpoint, e),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    struct FakeProber {
        open: Endpoint,
        probed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EndpointProber for FakeProber {
        type Stream = DuplexStream;

        async fn probe(&self, endpoint: &Endpoint) -> io::Result<DuplexStream> {
            self.probed.lock().unwrap().push(endpoint.to_string());
            if *endpoint == self.open {
                Ok(tokio::io::duplex(64).0)
            } else {
                Err(io::Error::from(io::ErrorKind::ConnectionRefused))
            }
        }
    }

    fn hosts() -> Vec<String> {
        vec!["192.168.2.1".to_string(), "192.168.1.1".to_string()]
    }

    #[test]
    fn primary_port_goes_first_on_every_host() {
        let order: Vec<String> = probe_order(&hosts(), 80, &[8080, 80, 5000])
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            order,
            vec![
                "192.168.2.1:80",
                "192.168.1.1:80",
                "192.168.2.1:8080",
                "192.168.1.1:8080",
                "192.168.2.1:5000",
                "192.168.1.1:5000",
            ]
        );
    }

    #[tokio::test]
    async fn stops_at_first_reachable_endpoint() {
        let prober = FakeProber {
            open: Endpoint {
                host: "192.168.2.1".to_string(),
                port: 8080,
            },
            probed: Mutex::new(Vec::new()),
        };
        let (endpoint, _stream) = probe_first(&prober, &hosts(), 80, &[8080, 8888])
            .await
            .unwrap();
        assert_eq!(endpoint.port, 8080);
        assert_eq!(prober.probed.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tcp_probe_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let prober = TcpProber::new(Duration::from_secs(2), "");
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port,
        };
        let stream = prober.probe(&endpoint).await.unwrap();
        assert!(stream.nodelay().unwrap());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn reachability_stays_on_its_interface() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint {
            host: "127.0.0.1".to_string(),
            port: listener.local_addr().unwrap().port(),
        };

        // The listener is only reachable over loopback
        let elsewhere = TcpProber::new(Duration::from_secs(2), "photopin-none0");
        assert!(elsewhere.probe(&endpoint).await.is_err());

        let loopback = TcpProber::new(Duration::from_secs(2), "lo");
        assert!(loopback.probe(&endpoint).await.is_ok());
    }
}
