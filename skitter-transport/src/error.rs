use skitter_core::node::NodeRef;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("node {0} is unreachable")]
    Unreachable(NodeRef),
    #[error("mode mismatch: {expected} expected a peer in mode {expected_mode}, got {got_mode}")]
    ModeMismatch {
        expected: NodeRef,
        expected_mode: String,
        got_mode: String,
    },
    #[error("duplicate connection from {0}")]
    DuplicateConnection(NodeRef),
    #[error("connection to {0} failed: {1}")]
    Connect(NodeRef, std::io::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wire encoding error: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("peer {0} disconnected")]
    Disconnected(NodeRef),
}
