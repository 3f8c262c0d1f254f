//! Port reachability probing.
//!
//! The network adapter probes every declared service port once per status
//! pass. A probe answers a single yes/no question within a short deadline and
//! never surfaces an error: refusal, timeout and resolution failure are all
//! simply "not reachable". UDP has no handshake, so a UDP port only counts as
//! reachable when it answers a one-byte datagram before the deadline.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket, lookup_host};
use tokio::time::timeout;
use tracing::debug;

/// Default probe deadline.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(20);

/// Reachability check for one `address:port` pair.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Returns `true` when `address:port` accepts a connection over `protocol`
    /// ("TCP", "UDP", "SCTP") within the probe deadline. For UDP that means a
    /// reply datagram.
    async fn probe(&self, protocol: &str, address: &str, port: i32) -> bool;
}

/// Socket-based probe with a bounded connect timeout.
#[derive(Clone, Debug)]
pub struct TcpProbe {
    timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn connect(&self, protocol: &str, address: &str, port: u16) -> std::io::Result<()> {
        let target = lookup_host((address, port))
            .await?
            .next()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no address"))?;

        match protocol {
            "UDP" => {
                let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
                let socket = UdpSocket::bind(bind).await?;
                socket.connect(target).await?;
                // A connected socket surfaces ICMP port-unreachable as ConnectionRefused;
                // silence runs into the deadline
                socket.send(&[0]).await?;
                let mut buf = [0u8; 1];
                socket.recv(&mut buf).await.map(drop)
            }
            _ => TcpStream::connect(target).await.map(drop),
        }
    }
}

#[async_trait]
impl PortProbe for TcpProbe {
    async fn probe(&self, protocol: &str, address: &str, port: i32) -> bool {
        // Headless services and unassigned addresses have nothing to dial
        if address.is_empty() || address == "None" {
            return false;
        }
        let Ok(port) = u16::try_from(port) else {
            return false;
        };
        let protocol = if protocol.is_empty() { "TCP" } else { protocol };
        if !matches!(protocol, "TCP" | "UDP") {
            debug!(protocol, "Unsupported probe protocol");
            return false;
        }

        match timeout(self.timeout, self.connect(protocol, address, port)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!(address, port, error = %e, "Port probe failed");
                false
            }
            Err(_) => {
                debug!(address, port, "Port probe timed out");
                false
            }
        }
    }
}
