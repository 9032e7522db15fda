//! Worker handles: a runtime entity owned by exactly one node in one
//! address space.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::NodeRef;
use crate::value::Value;

/// A stable, cluster-wide reference to a worker. Cloneable and cheap: the
/// `alive` flag is shared so every clone observes a crash immediately once
/// the worker terminates and its handle goes dead.
#[derive(Clone)]
pub struct WorkerHandle {
    pub id: String,
    pub node: NodeRef,
    pub tag: Option<String>,
    alive: Arc<AtomicBool>,
}

impl WorkerHandle {
    pub fn new(id: impl Into<String>, node: NodeRef, tag: Option<String>) -> Self {
        Self {
            id: id.into(),
            node,
            tag,
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    /// Encodes this handle's wire identity (id, node, tag) as a `Value`, so
    /// a strategy can carry worker references through `deployment`, which
    /// is constrained to `Value` like every other opaque payload in this
    /// crate.
    pub fn to_value(&self) -> Value {
        Value::Map(vec![
            (Value::str("id"), Value::str(self.id.clone())),
            (Value::str("node"), Value::str(self.node.0.clone())),
            (
                Value::str("tag"),
                self.tag.clone().map(Value::str).unwrap_or(Value::Nil),
            ),
        ])
    }

    /// Rebuilds a handle from [`WorkerHandle::to_value`]'s encoding. The
    /// result's own liveness flag always starts `true` and is not
    /// authoritative: routing (`send`) looks up the real table entry for
    /// this id and node, not this flag.
    pub fn from_value(value: &Value) -> Option<WorkerHandle> {
        let Value::Map(entries) = value else {
            return None;
        };
        let field = |key: &str| {
            entries
                .iter()
                .find(|(k, _)| k.as_str() == Some(key))
                .map(|(_, v)| v)
        };
        let id = field("id")?.as_str()?.to_string();
        let node = field("node")?.as_str()?.to_string();
        let tag = field("tag").and_then(Value::as_str).map(str::to_string);
        Some(WorkerHandle::new(id, NodeRef(node), tag))
    }
}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("tag", &self.tag)
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.node == other.node
    }
}
impl Eq for WorkerHandle {}

impl std::hash::Hash for WorkerHandle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
        self.node.hash(state);
    }
}

/// The wire-safe identity of a handle, used to address `worker_message`
/// frames without carrying the liveness flag across nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId {
    pub id: String,
    pub node: NodeRef,
}

impl From<&WorkerHandle> for WorkerId {
    fn from(h: &WorkerHandle) -> Self {
        Self {
            id: h.id.clone(),
            node: h.node.clone(),
        }
    }
}
