//! The worker runtime: spawns one task per worker and keeps a local table of
//! who is running on this node, so a deployment engine can deliver messages
//! without owning any channel ends itself.

pub mod metrics;
pub mod table;
pub mod worker;

pub use metrics::{Metrics, MetricsSnapshot};
pub use table::{WorkerTable, MAILBOX_SOFT_LIMIT};
pub use worker::MakeApi;
