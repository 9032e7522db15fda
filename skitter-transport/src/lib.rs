//! Node membership, wire framing, and message dispatch between skitter
//! nodes: a persistent per-peer connection carrying a small frame enum
//! instead of HTTP requests.

pub mod codec;
pub mod connection;
pub mod error;
pub mod membership;
pub mod transport;
pub mod wire;

pub use error::RemoteError;
pub use membership::{Membership, NodeDownCallback};
pub use transport::Transport;
pub use wire::{Control, Frame, Mode};
