//! The worker actor: a task that drains one mailbox to completion, one
//! message at a time, repeatedly invoking a strategy's `process` hook and
//! replacing the worker's owned state after each call. Ownership of `state`,
//! not a lock, is what guarantees at most one `process` activation per
//! worker at any instant.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use skitter_core::descriptor::strategy::{HookApi, ProcessHook};
use skitter_core::node::NodeRef;
use skitter_core::value::Value;
use skitter_core::worker_handle::WorkerHandle;

use crate::metrics::Metrics;

/// Builds a fresh [`HookApi`] for one `process` invocation. Called once per
/// delivered message rather than once per worker, since the API exposes
/// `emit`/`send`/`remote_worker`, each of which needs to borrow shared
/// deployment-engine state mutably for the duration of a single hook call
/// only.
pub type MakeApi = Arc<dyn Fn() -> Box<dyn HookApi> + Send + Sync>;

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Spawns a worker task. Returns the cluster-wide handle and the mailbox
/// sender the owning [`crate::table::WorkerTable`] keeps to deliver
/// messages; `backlog` is shared with the table so it can report the soft
/// mailbox limit without the worker blocking on send.
pub fn spawn(
    id: String,
    node: NodeRef,
    tag: Option<String>,
    initial_state: Value,
    process: ProcessHook,
    make_api: MakeApi,
    metrics: Arc<Metrics>,
    backlog: Arc<AtomicUsize>,
) -> (WorkerHandle, mpsc::UnboundedSender<Value>) {
    let handle = WorkerHandle::new(id.clone(), node, tag.clone());
    let handle_for_task = handle.clone();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        let mut state = initial_state;
        while let Some(message) = rx.recv().await {
            backlog.fetch_sub(1, Ordering::Relaxed);
            let mut api = make_api();
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                process(api.as_mut(), message, &mut state, tag.as_deref());
            }));
            if let Err(payload) = outcome {
                let reason = panic_message(payload);
                tracing::error!(worker = %id, reason = %reason, "process hook panicked; worker terminated");
                metrics.record_crash();
                handle_for_task.mark_dead();
                return;
            }
        }
        tracing::debug!(worker = %id, "worker mailbox drained, shutting down");
    });

    (handle, tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use skitter_core::context::Context;
    use skitter_core::descriptor::operation::{CallbackKey, Operation};
    use skitter_core::invoke::CallResult;
    use skitter_core::node::NodeSelector;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct NoopApi {
        ctx: Context,
    }
    impl HookApi for NoopApi {
        fn context(&self) -> &Context {
            &self.ctx
        }
        fn call(&mut self, _key: &CallbackKey, _args: &[Value]) -> CallResult {
            unimplemented!()
        }
        fn call_full(
            &mut self,
            _key: &CallbackKey,
            _state: &Value,
            _config: &Value,
            _args: &[Value],
        ) -> CallResult {
            unimplemented!()
        }
        fn call_if_exists(
            &mut self,
            _key: &CallbackKey,
            _state: Option<&Value>,
            _config: &Value,
            _args: &[Value],
        ) -> CallResult {
            unimplemented!()
        }
        fn emit(&mut self, _port_values: HashMap<skitter_core::PortName, Vec<Value>>) {}
        fn send(&mut self, _worker: &WorkerHandle, _message: Value) {}
        fn remote_worker(
            &mut self,
            _state: Value,
            _tag: Option<String>,
            _node: NodeSelector,
        ) -> WorkerHandle {
            unimplemented!()
        }
        fn known_nodes(&self) -> Vec<NodeRef> {
            vec![]
        }
    }

    fn test_op() -> Arc<Operation> {
        Arc::new(Operation::new(None, vec![], vec![], Value::Nil, None, None, vec![]).unwrap())
    }

    #[tokio::test]
    async fn processes_messages_in_fifo_order_and_updates_state() {
        let observed = Arc::new(Mutex::new(Vec::new()));
        let observed_cb = observed.clone();
        let process: ProcessHook = Arc::new(move |_api, msg, state, _tag| {
            let n = state.as_int().unwrap_or(0) + 1;
            *state = Value::Int(n);
            observed_cb.lock().unwrap().push((n, msg));
        });
        let ctx = Context::new(test_op(), Value::Nil);
        let make_api: MakeApi = Arc::new(move || Box::new(NoopApi { ctx: ctx.clone() }));
        let metrics = Arc::new(Metrics::default());
        let backlog = Arc::new(AtomicUsize::new(0));

        let (handle, tx) = spawn(
            "w1".into(),
            NodeRef::local(),
            None,
            Value::Int(0),
            process,
            make_api,
            metrics,
            backlog,
        );

        tx.send(Value::str("a")).unwrap();
        tx.send(Value::str("b")).unwrap();
        drop(tx);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(handle.is_alive());
        let seen = observed.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(1, Value::str("a")), (2, Value::str("b"))]
        );
    }

    #[tokio::test]
    async fn panicking_hook_kills_only_this_worker() {
        let process: ProcessHook = Arc::new(|_api, _msg, _state, _tag| {
            panic!("boom");
        });
        let ctx = Context::new(test_op(), Value::Nil);
        let make_api: MakeApi = Arc::new(move || Box::new(NoopApi { ctx: ctx.clone() }));
        let metrics = Arc::new(Metrics::default());
        let backlog = Arc::new(AtomicUsize::new(0));

        let (handle, tx) = spawn(
            "w2".into(),
            NodeRef::local(),
            None,
            Value::Nil,
            process,
            make_api,
            metrics,
            backlog,
        );
        tx.send(Value::Nil).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!handle.is_alive());
    }
}
