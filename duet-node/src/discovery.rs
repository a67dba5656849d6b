//! Room rendezvous: map a room token to the host's TCP address.
//! LAN: host answers multicast queries for its token. Static: in-process directory.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use duet_core::{SignalingError, TransportEvent};
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::transport::LinkEvent;

const MULTICAST_GROUP: Ipv4Addr = Ipv4Addr::new(239, 255, 60, 61);
const QUERY_INTERVAL: Duration = Duration::from_millis(500);
/// Host listens this long for an existing owner of its token before claiming it.
const CLAIM_WINDOW: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
enum Packet {
    #[serde(rename = "duet-query")]
    Query { token: String, instance: String },
    #[serde(rename = "duet-beacon")]
    Beacon {
        token: String,
        instance: String,
        port: u16,
    },
}

fn encode(packet: &Packet) -> Result<Vec<u8>, SignalingError> {
    serde_json::to_vec(packet).map_err(|e| SignalingError::Other(e.to_string()))
}

/// Anything that is not one of our packets is ignored.
fn decode(buf: &[u8]) -> Option<Packet> {
    serde_json::from_slice(buf).ok()
}

fn io_error(e: std::io::Error) -> SignalingError {
    SignalingError::Other(format!("rendezvous: {e}"))
}

/// Token to address directory shared by every session in this process.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory(Arc<Mutex<HashMap<String, SocketAddr>>>);

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, SocketAddr>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn claim(&self, token: &str, addr: SocketAddr) -> Result<(), SignalingError> {
        let mut entries = self.entries();
        if entries.contains_key(token) {
            return Err(SignalingError::TokenTaken(token.to_owned()));
        }
        entries.insert(token.to_owned(), addr);
        Ok(())
    }
}

/// How hosts publish tokens and joiners find them.
#[derive(Debug, Clone)]
pub enum Rendezvous {
    Lan {
        discovery_port: u16,
        resolve_timeout: Duration,
    },
    Static(StaticDirectory),
}

/// Held by the host while the token is claimed. Dropping it withdraws the token.
#[derive(Debug)]
pub struct Registration {
    token: String,
    inner: RegistrationInner,
}

#[derive(Debug)]
enum RegistrationInner {
    Lan(JoinHandle<()>),
    Static(StaticDirectory),
}

impl Drop for Registration {
    fn drop(&mut self) {
        match &self.inner {
            RegistrationInner::Lan(task) => task.abort(),
            RegistrationInner::Static(dir) => {
                dir.entries().remove(&self.token);
            }
        }
        tracing::debug!(token = %self.token, "room token withdrawn");
    }
}

impl Rendezvous {
    /// Claim `token` for a host listening on TCP `port`. Losing the rendezvous later is
    /// reported on `events` as [`TransportEvent::SignalingDisconnected`].
    pub async fn register(
        &self,
        token: &str,
        port: u16,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Registration, SignalingError> {
        let inner = match self {
            Rendezvous::Static(dir) => {
                dir.claim(token, SocketAddr::from((Ipv4Addr::LOCALHOST, port)))?;
                RegistrationInner::Static(dir.clone())
            }
            Rendezvous::Lan { discovery_port, .. } => {
                RegistrationInner::Lan(register_lan(token, port, *discovery_port, events).await?)
            }
        };
        tracing::info!(token, port, "room token registered");
        Ok(Registration {
            token: token.to_owned(),
            inner,
        })
    }

    /// Find the host for `token`. No host means [`SignalingError::PeerUnavailable`].
    pub async fn resolve(&self, token: &str) -> Result<SocketAddr, SignalingError> {
        match self {
            Rendezvous::Static(dir) => dir
                .entries()
                .get(token)
                .copied()
                .ok_or(SignalingError::PeerUnavailable),
            Rendezvous::Lan {
                discovery_port,
                resolve_timeout,
            } => resolve_lan(token, *discovery_port, *resolve_timeout).await,
        }
    }
}

fn make_multicast_socket(discovery_port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, discovery_port))?;
    std_sock.join_multicast_v4(&MULTICAST_GROUP, &Ipv4Addr::UNSPECIFIED)?;
    std_sock.set_multicast_ttl_v4(1)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

async fn register_lan(
    token: &str,
    port: u16,
    discovery_port: u16,
    events: mpsc::UnboundedSender<LinkEvent>,
) -> Result<JoinHandle<()>, SignalingError> {
    let socket = make_multicast_socket(discovery_port).map_err(io_error)?;
    let instance = uuid::Uuid::new_v4().simple().to_string();
    let group = SocketAddr::from((MULTICAST_GROUP, discovery_port));

    let query = encode(&Packet::Query {
        token: token.to_owned(),
        instance: instance.clone(),
    })?;
    if let Err(e) = socket.send_to(&query, group).await {
        tracing::debug!(error = %e, "claim query not sent");
    }
    if let Ok(Some(owner)) =
        tokio::time::timeout(CLAIM_WINDOW, wait_for_beacon(&socket, token, &instance)).await
    {
        tracing::warn!(token, %owner, "room token already hosted on the LAN");
        return Err(SignalingError::TokenTaken(token.to_owned()));
    }

    let beacon = encode(&Packet::Beacon {
        token: token.to_owned(),
        instance: instance.clone(),
        port,
    })?;
    let token = token.to_owned();
    Ok(tokio::spawn(async move {
        answer_queries(socket, token, instance, beacon).await;
        let _ = events.send(LinkEvent::Transport(TransportEvent::SignalingDisconnected));
    }))
}

/// Wait for a beacon for `token` from anyone but `instance`. `None` on socket failure.
async fn wait_for_beacon(socket: &UdpSocket, token: &str, instance: &str) -> Option<SocketAddr> {
    let mut buf = vec![0u8; 2048];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await.ok()?;
        if let Some(Packet::Beacon {
            token: t,
            instance: i,
            port,
        }) = decode(&buf[..n])
        {
            if t == token && i != instance {
                return Some(SocketAddr::new(from.ip(), port));
            }
        }
    }
}

/// Answer queries for `token` until the socket fails.
async fn answer_queries(socket: UdpSocket, token: String, instance: String, beacon: Vec<u8>) {
    let mut buf = vec![0u8; 2048];
    loop {
        let (n, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, token = %token, "rendezvous socket failed");
                return;
            }
        };
        match decode(&buf[..n]) {
            Some(Packet::Query { token: t, instance: i }) if t == token && i != instance => {
                tracing::debug!(%from, "answering room query");
                if let Err(e) = socket.send_to(&beacon, from).await {
                    tracing::debug!(%from, error = %e, "beacon not sent");
                }
            }
            Some(Packet::Beacon { token: t, instance: i, .. }) if t == token && i != instance => {
                tracing::warn!(%from, "another host announced the same room token");
            }
            _ => {}
        }
    }
}

async fn resolve_lan(
    token: &str,
    discovery_port: u16,
    timeout: Duration,
) -> Result<SocketAddr, SignalingError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .map_err(io_error)?;
    socket.set_multicast_ttl_v4(1).map_err(io_error)?;
    let instance = uuid::Uuid::new_v4().simple().to_string();
    let query = encode(&Packet::Query {
        token: token.to_owned(),
        instance: instance.clone(),
    })?;
    let group = SocketAddr::from((MULTICAST_GROUP, discovery_port));
    let deadline = tokio::time::Instant::now() + timeout;
    let mut ticker = tokio::time::interval(QUERY_INTERVAL);
    let mut buf = vec![0u8; 2048];
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                tracing::info!(token, "no host answered");
                return Err(SignalingError::PeerUnavailable);
            }
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&query, group).await {
                    tracing::debug!(error = %e, "room query not sent");
                }
            }
            r = socket.recv_from(&mut buf) => {
                let (n, from) = r.map_err(io_error)?;
                if let Some(Packet::Beacon { token: t, port, .. }) = decode(&buf[..n]) {
                    if t == token {
                        let addr = SocketAddr::new(from.ip(), port);
                        tracing::info!(token, %addr, "host found");
                        return Ok(addr);
                    }
                }
            }
        }
    }
}
