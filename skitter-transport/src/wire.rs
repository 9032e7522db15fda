//! Wire frames exchanged between nodes.
//!
//! The protocol is deliberately plain: every frame is one `Frame` value,
//! length-prefixed by the codec and JSON-encoded, because the contract only
//! requires FIFO per (sender, worker_id) and control/worker-message/failure
//! coverage — not a compact binary format.

use serde::{Deserialize, Serialize};

use skitter_core::descriptor::port::NodeId;
use skitter_core::node::NodeRef;
use skitter_core::value::Value;
use skitter_core::worker_handle::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    Worker,
    Master,
    Local,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Worker => "worker",
            Mode::Master => "master",
            Mode::Local => "local",
        };
        write!(f, "{s}")
    }
}

/// Control-plane messages: membership, deployment, and failure detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Control {
    Ping,
    Pong,
    Tags(Vec<String>),
    Deploy(Value),
    Undeploy,
    NodeDown(NodeRef),
    /// Ask the receiving node to spawn a worker for `node_id`, reusing the
    /// sender-chosen `worker_id` so both sides agree on its address without
    /// a round trip.
    SpawnWorker {
        node_id: NodeId,
        worker_id: String,
        /// Looked up in the receiving node's own registry: every node
        /// registers the same descriptors at startup from the same
        /// compiled code, so a name is enough to find the matching
        /// `Operation`/`Strategy` locally (no closure crosses the wire).
        operation_name: String,
        strategy_name: Option<String>,
        args: Value,
        initial_state: Value,
        tag: Option<String>,
    },
    /// A `process` hook running on a worker node forwards its `emit()` call
    /// back to the node hosting the deployment engine, which alone holds
    /// the workflow graph needed to route it.
    Emit {
        node_id: NodeId,
        port_values: Vec<(String, Vec<Value>)>,
        invocation: Option<String>,
    },
    /// A `process` hook's `send()` call targeting a worker not hosted on
    /// this node is relayed through the deployment-engine node, the only
    /// peer every node is guaranteed to be connected to.
    Relay { worker: WorkerId, payload: Value },
}

/// One frame on the wire. `Hello` is the only frame sent before a peer's
/// identity/mode has been established; everything else assumes a live,
/// identified connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Hello {
        node: NodeRef,
        mode: Mode,
        tags: Vec<String>,
    },
    Control(Control),
    WorkerMessage { worker: WorkerId, payload: Value },
}
