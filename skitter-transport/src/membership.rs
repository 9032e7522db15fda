//! Cluster membership and heartbeat-based failure detection: if a peer
//! becomes unreachable, all its registered callbacks fire with
//! `node_down(address)` within a bounded interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use skitter_core::node::NodeRef;

use crate::connection::PeerSender;
use crate::wire::{Control, Frame, Mode};

/// Ping cadence and the number of consecutively missed pongs tolerated
/// before a peer is declared down. Three missed heartbeats at one second
/// gives a bounded worst-case detection window of ~3s.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const MISSED_HEARTBEAT_THRESHOLD: u32 = 3;

struct Peer {
    sender: PeerSender,
    mode: Mode,
    tags: Vec<String>,
    missed_pongs: Arc<AtomicU32>,
}

/// Callback fired when a peer is declared unreachable.
pub type NodeDownCallback = Arc<dyn Fn(&NodeRef) + Send + Sync>;

/// Live view of every connected peer, plus the subscribers to `node_down`.
#[derive(Default)]
pub struct Membership {
    peers: RwLock<HashMap<NodeRef, Peer>>,
    on_node_down: RwLock<Vec<NodeDownCallback>>,
}

impl Membership {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, node: NodeRef, mode: Mode, tags: Vec<String>, sender: PeerSender) {
        self.peers.write().insert(
            node,
            Peer {
                sender,
                mode,
                tags,
                missed_pongs: Arc::new(AtomicU32::new(0)),
            },
        );
    }

    pub fn subscribe(&self, callback: NodeDownCallback) {
        self.on_node_down.write().push(callback);
    }

    pub fn is_connected(&self, node: &NodeRef) -> bool {
        self.peers.read().contains_key(node)
    }

    pub fn tagged(&self, tag: &str) -> Vec<NodeRef> {
        self.peers
            .read()
            .iter()
            .filter(|(_, p)| p.tags.iter().any(|t| t == tag))
            .map(|(node, _)| node.clone())
            .collect()
    }

    pub fn nodes(&self) -> Vec<NodeRef> {
        self.peers.read().keys().cloned().collect()
    }

    pub fn pong_received(&self, node: &NodeRef) {
        if let Some(peer) = self.peers.read().get(node) {
            peer.missed_pongs.store(0, Ordering::Relaxed);
        }
    }

    pub fn send(&self, node: &NodeRef, frame: Frame) -> Result<(), crate::error::RemoteError> {
        let peers = self.peers.read();
        let peer = peers
            .get(node)
            .ok_or_else(|| crate::error::RemoteError::Unreachable(node.clone()))?;
        peer.sender.send(frame)
    }

    fn declare_down(self: &Arc<Self>, node: &NodeRef) {
        self.peers.write().remove(node);
        tracing::warn!(%node, "peer declared unreachable");
        for cb in self.on_node_down.read().iter() {
            cb(node);
        }
    }

    /// Spawns the heartbeat task: every [`HEARTBEAT_INTERVAL`], pings every
    /// connected peer and declares down any peer that has not answered for
    /// [`MISSED_HEARTBEAT_THRESHOLD`] consecutive rounds.
    pub fn spawn_heartbeat(self: &Arc<Self>) {
        let membership = self.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tick.tick().await;
                let snapshot: Vec<(NodeRef, Arc<AtomicU32>)> = {
                    let peers = membership.peers.read();
                    peers
                        .iter()
                        .map(|(n, p)| (n.clone(), p.missed_pongs.clone()))
                        .collect()
                };
                for (node, missed) in snapshot {
                    let count = missed.fetch_add(1, Ordering::Relaxed) + 1;
                    if count > MISSED_HEARTBEAT_THRESHOLD {
                        membership.declare_down(&node);
                        continue;
                    }
                    let _ = membership.send(&node, Frame::Control(Control::Ping));
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection;

    /// A loopback TCP pair, so a `Peer` can be registered with a real
    /// [`PeerSender`] instead of a mock.
    async fn connected_pair() -> (PeerSender, PeerSender) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (client_sender, _client_frames) = connection::spawn(client);
        let (server_sender, _server_frames) = connection::spawn(server);
        (client_sender, server_sender)
    }

    #[tokio::test]
    async fn declare_down_removes_the_peer_and_fires_subscribers() {
        let membership = Membership::new();
        let (sender, _keep_alive) = connected_pair().await;
        let node = NodeRef::from("peer-1");
        membership.register(node.clone(), Mode::Worker, vec!["gpu".into()], sender);
        assert!(membership.is_connected(&node));
        assert_eq!(membership.tagged("gpu"), vec![node.clone()]);

        let fired = Arc::new(std::sync::Mutex::new(None));
        let fired_cb = fired.clone();
        membership.subscribe(Arc::new(move |n: &NodeRef| *fired_cb.lock().unwrap() = Some(n.clone())));

        membership.declare_down(&node);

        assert!(!membership.is_connected(&node));
        assert_eq!(*fired.lock().unwrap(), Some(node));
    }

    #[tokio::test]
    async fn spawn_heartbeat_declares_a_silent_peer_down() {
        let membership = Membership::new();
        let (sender, _keep_alive) = connected_pair().await;
        let node = NodeRef::from("silent-peer");
        membership.register(node.clone(), Mode::Worker, vec![], sender);

        let declared_down = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let declared_cb = declared_down.clone();
        membership.subscribe(Arc::new(move |_| declared_cb.store(true, Ordering::Relaxed)));

        membership.spawn_heartbeat();
        // Nothing ever answers these pings, so after
        // `MISSED_HEARTBEAT_THRESHOLD` rounds the peer must be dropped.
        tokio::time::sleep(HEARTBEAT_INTERVAL * (MISSED_HEARTBEAT_THRESHOLD + 1)).await;

        assert!(declared_down.load(Ordering::Relaxed));
        assert!(!membership.is_connected(&node));
    }

    #[tokio::test]
    async fn pong_received_resets_the_missed_pong_counter() {
        let membership = Membership::new();
        let (sender, _keep_alive) = connected_pair().await;
        let node = NodeRef::from("responsive-peer");
        membership.register(node.clone(), Mode::Worker, vec![], sender);

        {
            let peers = membership.peers.read();
            peers[&node].missed_pongs.store(2, Ordering::Relaxed);
        }
        membership.pong_received(&node);
        let peers = membership.peers.read();
        assert_eq!(peers[&node].missed_pongs.load(Ordering::Relaxed), 0);
    }
}
