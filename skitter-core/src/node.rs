//! Node addressing. Kept minimal and transport-agnostic so `skitter-core` has
//! no dependency on `skitter-transport`: a [`NodeRef`] is just the stable
//! address a worker lives on.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeRef(pub String);

impl NodeRef {
    pub const LOCAL: &'static str = "local";

    pub fn local() -> Self {
        Self(Self::LOCAL.to_string())
    }

    pub fn is_local(&self) -> bool {
        self.0 == Self::LOCAL
    }
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a strategy hook picks a node for `remote_worker`/`on_all_worker_cores`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelector {
    Local,
    Specific(NodeRef),
    AnyWorker,
    Tagged(String),
}
