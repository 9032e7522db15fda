//! Connecting, accepting, and dispatching frames for one node: a worker
//! registers with a master; a master is configured with a list of expected
//! workers, and mode mismatch is rejected at connection time.

use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use tokio::net::TcpListener;

use skitter_core::node::NodeRef;
use skitter_core::value::Value;
use skitter_core::worker_handle::WorkerId;

use crate::connection;
use crate::error::RemoteError;
use crate::membership::Membership;
use crate::wire::{Control, Frame, Mode};

pub type WorkerMessageHandler = Arc<dyn Fn(WorkerId, Value) + Send + Sync>;
pub type ControlHandler = Arc<dyn Fn(NodeRef, Control) + Send + Sync>;

/// The transport for one node: owns its [`Membership`] table and dispatches
/// frames read off any peer connection to the handlers registered by the
/// deployment engine.
pub struct Transport {
    pub node: NodeRef,
    pub mode: Mode,
    pub membership: Arc<Membership>,
    on_worker_message: RwLock<Option<WorkerMessageHandler>>,
    on_control: RwLock<Option<ControlHandler>>,
}

impl Transport {
    pub fn new(node: NodeRef, mode: Mode) -> Arc<Self> {
        let transport = Arc::new(Self {
            node,
            mode,
            membership: Membership::new(),
            on_worker_message: RwLock::new(None),
            on_control: RwLock::new(None),
        });
        transport.membership.spawn_heartbeat();
        transport
    }

    pub fn on_worker_message(&self, handler: WorkerMessageHandler) {
        *self.on_worker_message.write().unwrap() = Some(handler);
    }

    pub fn on_control(&self, handler: ControlHandler) {
        *self.on_control.write().unwrap() = Some(handler);
    }

    /// Accepts connections on `addr` until the listener is dropped. Each
    /// accepted connection must send `Hello` with a mode this node accepts
    /// before anything else; a mismatch closes the connection with
    /// [`RemoteError::ModeMismatch`] logged rather than propagated (the
    /// accept loop keeps serving other peers).
    pub async fn listen(self: &Arc<Self>, addr: SocketAddr) -> Result<(), RemoteError> {
        let listener = TcpListener::bind(addr).await?;
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                let (stream, peer_addr) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };
                let transport = transport.clone();
                tokio::spawn(async move {
                    if let Err(err) = transport.accept_one(stream).await {
                        tracing::warn!(%peer_addr, error = %err, "inbound connection rejected");
                    }
                });
            }
        });
        Ok(())
    }

    async fn accept_one(self: &Arc<Self>, stream: tokio::net::TcpStream) -> Result<(), RemoteError> {
        let (sender, mut frames) = connection::spawn(stream);
        let hello = frames
            .recv()
            .await
            .ok_or_else(|| RemoteError::Io(std::io::Error::other("peer closed before hello")))?;
        let Frame::Hello { node, mode, tags } = hello else {
            return Err(RemoteError::Io(std::io::Error::other(
                "expected hello as first frame",
            )));
        };
        self.accept_peer(node, mode, tags, sender, frames).await
    }

    /// Dials `addr`, exchanges `Hello`, and rejects the connection at the
    /// application level if the peer's mode is not one this node expects to
    /// talk to.
    pub async fn connect(
        self: &Arc<Self>,
        addr: SocketAddr,
        expected_mode: Mode,
        tags: Vec<String>,
    ) -> Result<NodeRef, RemoteError> {
        let stream = connection::connect(addr).await?;
        let (sender, mut frames) = connection::spawn(stream);
        sender.send(Frame::Hello {
            node: self.node.clone(),
            mode: self.mode,
            tags: tags.clone(),
        })?;
        let hello = frames
            .recv()
            .await
            .ok_or_else(|| RemoteError::Io(std::io::Error::other("peer closed before hello")))?;
        let Frame::Hello {
            node: peer_node,
            mode: peer_mode,
            tags: peer_tags,
        } = hello
        else {
            return Err(RemoteError::Io(std::io::Error::other(
                "expected hello as first frame",
            )));
        };
        if peer_mode != expected_mode {
            return Err(RemoteError::ModeMismatch {
                expected: peer_node,
                expected_mode: expected_mode.to_string(),
                got_mode: peer_mode.to_string(),
            });
        }
        self.accept_peer(peer_node.clone(), peer_mode, peer_tags, sender, frames)
            .await?;
        Ok(peer_node)
    }

    async fn accept_peer(
        self: &Arc<Self>,
        node: NodeRef,
        mode: Mode,
        tags: Vec<String>,
        sender: connection::PeerSender,
        mut frames: tokio::sync::mpsc::UnboundedReceiver<Frame>,
    ) -> Result<(), RemoteError> {
        if self.membership.is_connected(&node) {
            return Err(RemoteError::DuplicateConnection(node));
        }
        self.membership.register(node.clone(), mode, tags, sender);

        let transport = self.clone();
        let peer_node = node;
        tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                transport.dispatch(&peer_node, frame);
            }
            tracing::info!(node = %peer_node, "peer connection closed");
        });
        Ok(())
    }

    fn dispatch(&self, from: &NodeRef, frame: Frame) {
        match frame {
            Frame::Hello { .. } => {
                tracing::warn!(%from, "unexpected second hello, ignoring");
            }
            Frame::Control(Control::Ping) => {
                let _ = self.membership.send(from, Frame::Control(Control::Pong));
            }
            Frame::Control(Control::Pong) => {
                self.membership.pong_received(from);
            }
            Frame::Control(other) => {
                if let Some(handler) = self.on_control.read().unwrap().as_ref() {
                    handler(from.clone(), other);
                }
            }
            Frame::WorkerMessage { worker, payload } => {
                if let Some(handler) = self.on_worker_message.read().unwrap().as_ref() {
                    handler(worker, payload);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::membership::{HEARTBEAT_INTERVAL, MISSED_HEARTBEAT_THRESHOLD};
    use std::time::Duration;

    /// Reserves a port by binding it, then immediately frees it for
    /// `Transport::listen` to rebind. Small race in theory; fine for tests.
    async fn free_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn connect_registers_the_peer_on_both_ends_and_carries_tags() {
        let addr = free_addr().await;
        let master = Transport::new(NodeRef::from("master"), Mode::Master);
        master.listen(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let worker = Transport::new(NodeRef::from("worker"), Mode::Worker);
        let peer = worker.connect(addr, Mode::Master, vec!["gpu".into()]).await.unwrap();

        assert_eq!(peer, NodeRef::from("master"));
        assert!(worker.membership.is_connected(&NodeRef::from("master")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(master.membership.is_connected(&NodeRef::from("worker")));
        assert_eq!(master.membership.tagged("gpu"), vec![NodeRef::from("worker")]);
    }

    #[tokio::test]
    async fn connect_rejects_an_unexpected_peer_mode() {
        let addr = free_addr().await;
        let master = Transport::new(NodeRef::from("master"), Mode::Master);
        master.listen(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let worker = Transport::new(NodeRef::from("worker"), Mode::Worker);
        let err = worker.connect(addr, Mode::Worker, vec![]).await.unwrap_err();
        assert!(matches!(err, RemoteError::ModeMismatch { .. }));
    }

    #[tokio::test]
    async fn reconnecting_to_an_already_registered_peer_is_rejected() {
        let addr = free_addr().await;
        let master = Transport::new(NodeRef::from("master"), Mode::Master);
        master.listen(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let worker = Transport::new(NodeRef::from("worker"), Mode::Worker);
        worker.connect(addr, Mode::Master, vec![]).await.unwrap();
        let err = worker.connect(addr, Mode::Master, vec![]).await.unwrap_err();
        assert!(matches!(err, RemoteError::DuplicateConnection(_)));
    }

    #[tokio::test]
    async fn a_live_connection_answers_heartbeats_and_outlives_the_failure_window() {
        let addr = free_addr().await;
        let master = Transport::new(NodeRef::from("master"), Mode::Master);
        master.listen(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let worker = Transport::new(NodeRef::from("worker"), Mode::Worker);
        worker.connect(addr, Mode::Master, vec![]).await.unwrap();

        tokio::time::sleep(HEARTBEAT_INTERVAL * (MISSED_HEARTBEAT_THRESHOLD + 1)).await;
        assert!(worker.membership.is_connected(&NodeRef::from("master")));
        assert!(master.membership.is_connected(&NodeRef::from("worker")));
    }
}
