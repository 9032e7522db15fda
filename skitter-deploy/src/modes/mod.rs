//! Mode supervisors (component C9): the three long-running process shapes
//! plus the one-shot `deploy` helper, all built from the same
//! [`crate::engine::DeployEngine`] / [`crate::agent::WorkerAgent`] plus
//! [`skitter_transport::Transport`] building blocks.

pub mod local;
pub mod master;
pub mod worker;

/// Process exit code used by the shutdown paths that fire specifically
/// because a remote peer disconnected (`shutdown_with_master`,
/// `shutdown_with_workers`).
pub const EXIT_PEER_DISCONNECTED: i32 = 4;
