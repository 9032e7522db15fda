//! Local worker registry: maps a worker id spawned on this node to its
//! mailbox sender and backlog counter, so `send()` and crash bookkeeping can
//! be done without the caller holding a channel end.
//!
//! One `RwLock<HashMap<..>>` guarding short, non-blocking critical sections.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use skitter_core::descriptor::strategy::ProcessHook;
use skitter_core::node::NodeRef;
use skitter_core::value::Value;
use skitter_core::worker_handle::WorkerHandle;

use crate::metrics::Metrics;
use crate::worker::{self, MakeApi};

/// Mailboxes are unbounded in principle; past this many pending messages a
/// worker is considered backlogged and the condition is only surfaced as a
/// metric, never as backpressure on the sender.
pub const MAILBOX_SOFT_LIMIT: usize = 4096;

struct Entry {
    handle: WorkerHandle,
    sender: mpsc::UnboundedSender<Value>,
    backlog: Arc<AtomicUsize>,
}

/// The set of workers currently running on this node.
pub struct WorkerTable {
    entries: RwLock<HashMap<String, Entry>>,
    metrics: Arc<Metrics>,
}

impl WorkerTable {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            metrics,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &self,
        id: String,
        node: NodeRef,
        tag: Option<String>,
        initial_state: Value,
        process: ProcessHook,
        make_api: MakeApi,
    ) -> WorkerHandle {
        let backlog = Arc::new(AtomicUsize::new(0));
        let (handle, sender) = worker::spawn(
            id.clone(),
            node,
            tag,
            initial_state,
            process,
            make_api,
            self.metrics.clone(),
            backlog.clone(),
        );
        self.entries.write().insert(
            id,
            Entry {
                handle: handle.clone(),
                sender,
                backlog,
            },
        );
        handle
    }

    /// Enqueues `message` for worker `id`. Dropped, with a metric bump, if
    /// the worker is unknown, already dead, or its mailbox is closed:
    /// delivery to a dead handle drops silently rather than erroring.
    pub fn send(&self, id: &str, message: Value) {
        let dead = {
            let entries = self.entries.read();
            match entries.get(id) {
                None => true,
                Some(entry) if !entry.handle.is_alive() => true,
                Some(entry) => {
                    let pending = entry.backlog.fetch_add(1, Ordering::Relaxed) + 1;
                    if pending > MAILBOX_SOFT_LIMIT {
                        self.metrics.record_mailbox_over_soft_limit();
                    }
                    if entry.sender.send(message).is_err() {
                        entry.handle.mark_dead();
                        true
                    } else {
                        false
                    }
                }
            }
        };
        if dead {
            self.metrics.record_dropped_delivery();
        }
    }

    pub fn handle(&self, id: &str) -> Option<WorkerHandle> {
        self.entries.read().get(id).map(|e| e.handle.clone())
    }

    pub fn remove(&self, id: &str) -> Option<WorkerHandle> {
        self.entries.write().remove(id).map(|e| {
            e.handle.mark_dead();
            e.handle
        })
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
