//! Finding printers on the local network.
//!
//! A greeting is multicast once; every printer that hears it answers with a
//! datagram holding its name, NUL-terminated. The sender address of that
//! datagram is the printer's IP.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use slog::{debug, info, o, Logger};
use tokio::{net::UdpSocket, time::Instant};

use crate::{Error, Result};

/// Multicast group printers listen on.
pub const DISCOVERY_GROUP: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(225, 0, 0, 9), 19000);

/// Local port the probe is sent from.
pub const DISCOVERY_PORT: u16 = 8002;

/// How long a search runs when no limit is reached.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Pause after a failed receive before trying again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// One printer that answered the probe.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DiscoveryRecord {
    /// Name the printer reported.
    pub name: String,
    /// Address the reply came from.
    pub ip: IpAddr,
}

/// Settings for a [DiscoveryClient].
#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Where the greeting is sent.
    pub group: SocketAddr,
    /// Local port to bind. `0` lets the OS choose.
    pub local_port: u16,
    /// Multicast TTL of the greeting.
    pub ttl: u32,
    /// Payload of the greeting.
    pub greeting: Vec<u8>,
    /// Local interface address to bind. Detected when unset.
    pub interface: Option<IpAddr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            group: SocketAddr::V4(DISCOVERY_GROUP),
            local_port: DISCOVERY_PORT,
            ttl: 4,
            greeting: b"Hello World!".to_vec(),
            interface: None,
        }
    }
}

/// One-shot multicast search for printers.
pub struct DiscoveryClient {
    config: DiscoveryConfig,
    log: Logger,
}

impl DiscoveryClient {
    /// Create a client. Nothing is sent until [DiscoveryClient::discover].
    pub fn new(config: DiscoveryConfig, log: Option<Logger>) -> Self {
        let log = log.unwrap_or_else(crate::discard_logger).new(o!("component" => "discovery"));
        Self { config, log }
    }

    /// Send the greeting and collect replies until `limit` printers have
    /// answered or `timeout` elapses. Running out of time is not an error:
    /// whatever was collected, possibly nothing, is returned. A limit of `0`
    /// means no limit.
    ///
    /// The socket lives only for the duration of the call and is closed on
    /// every exit path, including cancellation.
    pub async fn discover(&self, timeout: Duration, limit: Option<usize>) -> Result<Vec<DiscoveryRecord>> {
        let interface = match self.config.interface {
            Some(ip) => ip,
            None => local_ip().await,
        };
        let bind = SocketAddr::new(interface, self.config.local_port);

        let socket = UdpSocket::bind(bind).await.map_err(Error::Discovery)?;
        if self.config.group.ip().is_multicast() {
            configure_multicast(&socket, self.config.ttl, interface).map_err(Error::Discovery)?;
        }
        socket
            .send_to(&self.config.greeting, self.config.group)
            .await
            .map_err(Error::Discovery)?;
        debug!(self.log, "greeting sent"; "interface" => %bind, "group" => %self.config.group);

        let limit = limit.filter(|&limit| limit > 0);
        let deadline = Instant::now() + timeout;
        let mut found = Vec::new();
        let mut buf = [0u8; 1536];

        while limit.map_or(true, |limit| found.len() < limit) {
            match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                Err(_) => {
                    debug!(self.log, "search window elapsed"; "found" => found.len());
                    break;
                }
                Ok(Err(err)) => {
                    debug!(self.log, "receive failed, backing off"; "error" => %err);
                    tokio::time::sleep_until(retry_at(Instant::now(), deadline)).await;
                }
                Ok(Ok((n, from))) => {
                    let record = parse_reply(&buf[..n], from.ip());
                    info!(self.log, "printer online"; "name" => &record.name, "ip" => %record.ip);
                    found.push(record);
                }
            }
        }

        Ok(found)
    }
}

/// Set the TTL of outgoing multicast and the interface it leaves through.
fn configure_multicast(socket: &UdpSocket, ttl: u32, interface: IpAddr) -> std::io::Result<()> {
    socket.set_multicast_ttl_v4(ttl)?;
    if let IpAddr::V4(interface) = interface {
        socket2::SockRef::from(socket).set_multicast_if_v4(&interface)?;
    }
    Ok(())
}

fn retry_at(now: Instant, deadline: Instant) -> Instant {
    (now + RECV_ERROR_BACKOFF).min(deadline)
}

/// Decode one reply datagram: the name runs up to the first NUL byte.
pub fn parse_reply(payload: &[u8], ip: IpAddr) -> DiscoveryRecord {
    let end = payload.iter().position(|&b| b == 0).unwrap_or(payload.len());
    DiscoveryRecord {
        name: String::from_utf8_lossy(&payload[..end]).into_owned(),
        ip,
    }
}

/// Address of the interface that would carry outbound traffic. Connecting a
/// UDP socket only selects a route; no packet is sent.
pub async fn local_ip() -> IpAddr {
    let probe = async {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.connect((Ipv4Addr::new(10, 255, 255, 255), 1)).await?;
        socket.local_addr()
    };

    match probe.await {
        Ok(addr) => addr.ip(),
        Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
