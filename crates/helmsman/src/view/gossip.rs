//! Gossip Membership Protocol (UDP)
//!
//! Each member broadcasts a tiny JSON heartbeat to its configured peers every
//! interval. A member is in the view while its heartbeats keep arriving; it
//! drops out after the peer timeout or as soon as it announces that it is
//! leaving.
//!
//! View order is oldest member first (`joined_at_ms`, then `node_id`), so
//! every member that hears the same set of peers agrees on the leader.

use async_trait::async_trait;
use helmsman_common::ElectionError;
use helmsman_common::constants::{
    DEFAULT_GOSSIP_BIND_ADDR, GOSSIP_HEARTBEAT_INTERVAL_MS, GOSSIP_MAX_PACKET_BYTES,
    GOSSIP_PEER_TIMEOUT_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;

use super::{MemberAddress, MembershipHandle, MembershipTransport};

/// Gossip protocol configuration
#[derive(Clone, Debug, Deserialize)]
pub struct GossipConfig {
    /// Local bind address (e.g., "10.100.0.1:9400")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Peer addresses to send heartbeats to
    #[serde(default)]
    pub peers: Vec<String>,
    /// Heartbeat interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Peer timeout in milliseconds (dropped from the view after this)
    #[serde(default = "default_peer_timeout_ms")]
    pub peer_timeout_ms: u64,
}

fn default_bind_addr() -> String { DEFAULT_GOSSIP_BIND_ADDR.to_string() }
fn default_interval_ms() -> u64 { GOSSIP_HEARTBEAT_INTERVAL_MS }
fn default_peer_timeout_ms() -> u64 { GOSSIP_PEER_TIMEOUT_MS }

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            peers: vec![],
            interval_ms: default_interval_ms(),
            peer_timeout_ms: default_peer_timeout_ms(),
        }
    }
}

/// Heartbeat packet sent to peers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GossipPacket {
    /// Group (election key) the sender belongs to
    pub group: String,
    /// Unique node identifier
    pub node_id: String,
    /// When the sender joined the group (unix millis)
    pub joined_at_ms: i64,
    /// Sender is leaving the group
    #[serde(default)]
    pub leaving: bool,
}

impl GossipPacket {
    pub fn heartbeat(group: String, node_id: String, joined_at_ms: i64) -> Self {
        Self {
            group,
            node_id,
            joined_at_ms,
            leaving: false,
        }
    }

    pub fn leaving(group: String, node_id: String, joined_at_ms: i64) -> Self {
        Self {
            leaving: true,
            ..Self::heartbeat(group, node_id, joined_at_ms)
        }
    }
}

/// What we know about a peer
#[derive(Clone, Debug)]
struct PeerState {
    joined_at_ms: i64,
    last_seen: Instant,
    addr: SocketAddr,
}

/// Membership table of one joined group
#[derive(Debug)]
struct Membership {
    group: String,
    node_id: String,
    joined_at_ms: i64,
    peer_timeout: Duration,
    peers: RwLock<HashMap<String, PeerState>>,
}

impl Membership {
    fn new(group: String, node_id: String, peer_timeout: Duration) -> Self {
        Self {
            group,
            node_id,
            joined_at_ms: chrono::Utc::now().timestamp_millis(),
            peer_timeout,
            peers: RwLock::new(HashMap::new()),
        }
    }

    fn heartbeat(&self) -> GossipPacket {
        GossipPacket::heartbeat(self.group.clone(), self.node_id.clone(), self.joined_at_ms)
    }

    fn farewell(&self) -> GossipPacket {
        GossipPacket::leaving(self.group.clone(), self.node_id.clone(), self.joined_at_ms)
    }

    /// Live members, oldest first
    async fn view(&self) -> Vec<MemberAddress> {
        let peers = self.peers.read().await;
        let mut members: Vec<(i64, &str)> = peers
            .iter()
            .filter(|(_, p)| p.last_seen.elapsed() <= self.peer_timeout)
            .map(|(id, p)| (p.joined_at_ms, id.as_str()))
            .collect();
        members.push((self.joined_at_ms, self.node_id.as_str()));
        members.sort();

        members.into_iter().map(|(_, id)| id.to_string()).collect()
    }

    /// Handle an incoming gossip packet
    async fn handle_packet(&self, data: &[u8], addr: SocketAddr) {
        let packet: GossipPacket = match serde_json::from_slice(data) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(addr = %addr, error = %e, "Invalid gossip packet");
                return;
            }
        };

        // Don't process our own packets or other groups
        if packet.node_id == self.node_id || packet.group != self.group {
            return;
        }

        let mut peers = self.peers.write().await;
        if packet.leaving {
            if peers.remove(&packet.node_id).is_some() {
                tracing::info!(group = %self.group, node = %packet.node_id, "Peer left the group");
            }
            return;
        }

        tracing::trace!(
            group = %self.group,
            node = %packet.node_id,
            joined_at = packet.joined_at_ms,
            "Received heartbeat"
        );

        let previous = peers.insert(
            packet.node_id.clone(),
            PeerState {
                joined_at_ms: packet.joined_at_ms,
                last_seen: Instant::now(),
                addr,
            },
        );
        if previous.is_none() {
            tracing::info!(group = %self.group, node = %packet.node_id, addr = %addr, "Peer joined the group");
        }
    }

    /// Forget peers that have been silent past the timeout
    async fn check_peer_health(&self) {
        let mut peers = self.peers.write().await;
        peers.retain(|node_id, peer| {
            let alive = peer.last_seen.elapsed() <= self.peer_timeout;
            if !alive {
                tracing::warn!(
                    group = %self.group,
                    node = %node_id,
                    addr = %peer.addr,
                    "Peer dropped from view (timeout)"
                );
            }
            alive
        });
    }
}

/// UDP gossip membership transport
pub struct GossipTransport {
    config: GossipConfig,
    node_id: String,
}

impl GossipTransport {
    pub fn new(config: GossipConfig, node_id: String) -> Self {
        Self { config, node_id }
    }
}

#[async_trait]
impl MembershipTransport for GossipTransport {
    fn kind(&self) -> &'static str {
        "gossip"
    }

    async fn join(&self, group: &str) -> Result<Box<dyn MembershipHandle>, ElectionError> {
        let socket = UdpSocket::bind(&self.config.bind_addr).await.map_err(|e| {
            ElectionError::InitializationFailed(format!(
                "failed to bind gossip socket {}: {}",
                self.config.bind_addr, e
            ))
        })?;
        let socket = Arc::new(socket);

        let membership = Arc::new(Membership::new(
            group.to_string(),
            self.node_id.clone(),
            Duration::from_millis(self.config.peer_timeout_ms),
        ));
        let (shutdown, shutdown_rx) = broadcast::channel(1);

        tracing::info!(
            group = %group,
            node = %self.node_id,
            addr = %self.config.bind_addr,
            peers = ?self.config.peers,
            "Joined gossip group"
        );

        let task = tokio::spawn(run_gossip(
            membership.clone(),
            socket,
            self.config.peers.clone(),
            Duration::from_millis(self.config.interval_ms.max(1)),
            shutdown_rx,
        ));

        Ok(Box::new(GossipHandle {
            membership,
            shutdown,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Membership in one gossip group
struct GossipHandle {
    membership: Arc<Membership>,
    shutdown: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MembershipHandle for GossipHandle {
    fn local_address(&self) -> &str {
        &self.membership.node_id
    }

    async fn current_view(&self) -> Result<Vec<MemberAddress>, ElectionError> {
        if self.task.lock().await.is_none() {
            return Err(ElectionError::BackendUnavailable(format!(
                "left gossip group {}",
                self.membership.group
            )));
        }
        Ok(self.membership.view().await)
    }

    async fn leave(&self) {
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        let _ = self.shutdown.send(());
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Gossip task ended abnormally");
        }
    }
}

async fn send_to_peers(socket: &UdpSocket, peers: &[String], packet: &GossipPacket) {
    let bytes = match serde_json::to_vec(packet) {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize gossip packet");
            return;
        }
    };

    for peer in peers {
        if let Err(e) = socket.send_to(&bytes, peer).await {
            tracing::warn!(peer = %peer, error = %e, "Failed to send gossip");
        }
    }
}

/// Heartbeat sender and receiver for one group
async fn run_gossip(
    membership: Arc<Membership>,
    socket: Arc<UdpSocket>,
    peers: Vec<String>,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut buf = vec![0u8; GOSSIP_MAX_PACKET_BYTES];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                send_to_peers(&socket, &peers, &membership.heartbeat()).await;
                membership.check_peer_health().await;
            }
            result = socket.recv_from(&mut buf) => {
                match result {
                    Ok((len, addr)) => {
                        membership.handle_packet(&buf[..len], addr).await;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Gossip receive error");
                    }
                }
            }
            _ = shutdown.recv() => {
                send_to_peers(&socket, &peers, &membership.farewell()).await;
                tracing::info!(group = %membership.group, "Left gossip group");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9400".parse().unwrap()
    }

    fn packet(group: &str, node_id: &str, joined_at_ms: i64) -> Vec<u8> {
        serde_json::to_vec(&GossipPacket::heartbeat(
            group.to_string(),
            node_id.to_string(),
            joined_at_ms,
        ))
        .unwrap()
    }

    fn membership() -> Membership {
        let mut membership =
            Membership::new("grp".to_string(), "node-b".to_string(), Duration::from_secs(30));
        membership.joined_at_ms = 2_000;
        membership
    }

    #[test]
    fn test_gossip_packet_serialization() {
        let packet = GossipPacket::leaving("grp".to_string(), "node-1".to_string(), 1234);

        let json = serde_json::to_string(&packet).unwrap();
        let parsed: GossipPacket = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.node_id, "node-1");
        assert_eq!(parsed.joined_at_ms, 1234);
        assert!(parsed.leaving);
    }

    #[tokio::test]
    async fn test_view_is_oldest_first() {
        let membership = membership();
        membership.handle_packet(&packet("grp", "node-c", 3_000), addr()).await;
        membership.handle_packet(&packet("grp", "node-a", 1_000), addr()).await;
        // Same join time: node id breaks the tie
        membership.handle_packet(&packet("grp", "node-0", 3_000), addr()).await;

        assert_eq!(
            membership.view().await,
            vec!["node-a", "node-b", "node-0", "node-c"]
        );
    }

    #[tokio::test]
    async fn test_ignores_foreign_and_own_packets() {
        let membership = membership();
        membership.handle_packet(&packet("other", "node-a", 1_000), addr()).await;
        membership.handle_packet(&packet("grp", "node-b", 1_000), addr()).await;
        membership.handle_packet(b"not json", addr()).await;

        assert_eq!(membership.view().await, vec!["node-b"]);
    }

    #[tokio::test]
    async fn test_leaving_peer_removed() {
        let membership = membership();
        membership.handle_packet(&packet("grp", "node-a", 1_000), addr()).await;
        assert_eq!(membership.view().await[0], "node-a");

        let farewell = serde_json::to_vec(&GossipPacket::leaving(
            "grp".to_string(),
            "node-a".to_string(),
            1_000,
        ))
        .unwrap();
        membership.handle_packet(&farewell, addr()).await;
        assert_eq!(membership.view().await, vec!["node-b"]);
    }

    #[tokio::test]
    async fn test_silent_peer_dropped() {
        let mut membership = membership();
        membership.peer_timeout = Duration::from_millis(20);
        membership.handle_packet(&packet("grp", "node-a", 1_000), addr()).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(membership.view().await, vec!["node-b"]);

        membership.check_peer_health().await;
        assert!(membership.peers.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_join_and_leave() {
        let config = GossipConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..Default::default()
        };
        let transport = GossipTransport::new(config, "node-1".to_string());
        let handle = transport.join("grp").await.unwrap();

        assert_eq!(handle.local_address(), "node-1");
        assert_eq!(handle.current_view().await.unwrap(), vec!["node-1"]);

        handle.leave().await;
        assert!(handle.current_view().await.is_err());
    }

    #[tokio::test]
    async fn test_bind_failure_is_initialization_error() {
        let config = GossipConfig {
            bind_addr: "not-an-address".to_string(),
            ..Default::default()
        };
        let transport = GossipTransport::new(config, "node-1".to_string());
        let err = transport.join("grp").await.err().unwrap();
        assert!(matches!(err, ElectionError::InitializationFailed(_)));
    }
}
