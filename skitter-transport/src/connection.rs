//! A single peer connection: a `Framed<TcpStream, FrameCodec>` split into a
//! sender half any task can clone-and-use and a receiver half owned by the
//! connection's read loop.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::codec::FrameCodec;
use crate::error::RemoteError;
use crate::wire::Frame;

/// Cheaply cloneable handle used to push frames to one peer. Backed by an
/// unbounded channel drained by the connection's single writer task, so
/// `send` never blocks the caller (mirrors the worker mailbox's
/// no-backpressure contract).
#[derive(Clone)]
pub struct PeerSender {
    tx: mpsc::UnboundedSender<Frame>,
}

impl PeerSender {
    pub fn send(&self, frame: Frame) -> Result<(), RemoteError> {
        self.tx
            .send(frame)
            .map_err(|_| RemoteError::Io(std::io::Error::other("peer connection closed")))
    }
}

/// Splits `stream` into a writer task fed by the returned [`PeerSender`] and
/// a [`mpsc::UnboundedReceiver<Frame>`] of frames read from the peer. The
/// writer task exits, closing the connection, once every `PeerSender` clone
/// is dropped; the reader task exits when the peer disconnects or sends a
/// malformed frame.
pub fn spawn(stream: TcpStream) -> (PeerSender, mpsc::UnboundedReceiver<Frame>) {
    let framed = Framed::new(stream, FrameCodec::default());
    let (mut sink, mut source) = framed.split();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();

    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        while let Some(result) = source.next().await {
            match result {
                Ok(frame) => {
                    if in_tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "connection read failed, closing");
                    break;
                }
            }
        }
    });

    (PeerSender { tx: out_tx }, in_rx)
}

pub async fn connect(addr: std::net::SocketAddr) -> Result<TcpStream, RemoteError> {
    TcpStream::connect(addr)
        .await
        .map_err(|e| RemoteError::Connect(skitter_core::node::NodeRef::from(addr.to_string().as_str()), e))
}
