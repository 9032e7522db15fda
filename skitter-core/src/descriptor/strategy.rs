//! The `Strategy` descriptor and the [`HookApi`] trait hooks call into.
//!
//! `HookApi` is a dependency-inversion seam: `skitter-core` only declares the
//! shape of the strategy runtime operators, while `skitter-runtime` supplies
//! the concrete implementation that actually spawns workers, enqueues emits,
//! and sends messages. This keeps the descriptor model free of any
//! dependency on the scheduler or transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::context::Context;
use crate::descriptor::operation::{CallbackKey, EmitSink};
use crate::descriptor::port::PortName;
use crate::invoke::CallResult;
use crate::node::{NodeRef, NodeSelector};
use crate::value::Value;
use crate::worker_handle::WorkerHandle;

/// Operators available inside a hook body.
pub trait HookApi: Send {
    fn context(&self) -> &Context;

    /// `call(cb, args)`: invoke with the operation's initial state and nil
    /// config.
    fn call(&mut self, key: &CallbackKey, args: &[Value]) -> CallResult;

    /// `call(cb, state, config, args)`: full-control invocation.
    fn call_full(
        &mut self,
        key: &CallbackKey,
        state: &Value,
        config: &Value,
        args: &[Value],
    ) -> CallResult;

    fn call_if_exists(
        &mut self,
        key: &CallbackKey,
        state: Option<&Value>,
        config: &Value,
        args: &[Value],
    ) -> CallResult;

    /// Enqueue values at the emit router for the current node.
    fn emit(&mut self, port_values: HashMap<PortName, Vec<Value>>);

    /// Enqueue a message into a worker's mailbox.
    fn send(&mut self, worker: &WorkerHandle, message: Value);

    /// Create a worker on a chosen node.
    fn remote_worker(
        &mut self,
        state: Value,
        tag: Option<String>,
        node: NodeSelector,
    ) -> WorkerHandle;

    /// Create a worker on the local node.
    fn local_worker(&mut self, state: Value, tag: Option<String>) -> WorkerHandle {
        self.remote_worker(state, tag, NodeSelector::Local)
    }

    /// Every node this process currently knows about: itself plus every
    /// connected peer. The pool `on_all_worker_cores` fans a deploy out
    /// across.
    fn known_nodes(&self) -> Vec<NodeRef>;

    /// Enumerates `(node, core_index)` pairs, one per logical core of every
    /// node in [`HookApi::known_nodes`], and calls `make_state` on each to
    /// create one worker per logical core. Core count is read from the
    /// process actually running this hook; skitter has no wire round trip
    /// to ask a remote node how many cores it has, so every node is
    /// assumed to match the caller's own core count.
    fn on_all_worker_cores(
        &mut self,
        tag: Option<String>,
        make_state: &mut dyn FnMut(&NodeRef, usize) -> Value,
    ) -> Vec<WorkerHandle> {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let mut handles = Vec::new();
        for node in self.known_nodes() {
            for core in 0..parallelism {
                let state = make_state(&node, core);
                handles.push(self.remote_worker(state, tag.clone(), NodeSelector::Specific(node.clone())));
            }
        }
        handles
    }
}

pub type DeployHook = Arc<dyn Fn(&mut dyn HookApi) -> Value + Send + Sync>;
pub type UndeployHook = Arc<dyn Fn(&mut dyn HookApi) + Send + Sync>;
/// `deliver(value, dest_in_port)`: decides which worker(s) to `send` a value
/// to, or drops it.
pub type DeliverHook = Arc<dyn Fn(&mut dyn HookApi, Value, &PortName) + Send + Sync>;
/// `process(message, state, tag) -> new_state`; `state` is mutated in place
/// rather than threaded through a return tuple.
pub type ProcessHook =
    Arc<dyn Fn(&mut dyn HookApi, Value, &mut Value, Option<&str>) + Send + Sync>;
/// Optional: fired when a worker this strategy created has crashed.
pub type WorkerDownHook = Arc<dyn Fn(&mut dyn HookApi, &WorkerHandle) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Hooks {
    pub deploy: Option<DeployHook>,
    pub undeploy: Option<UndeployHook>,
    pub deliver: Option<DeliverHook>,
    pub process: Option<ProcessHook>,
    pub worker_down: Option<WorkerDownHook>,
}

/// Immutable distribution-policy descriptor.
#[derive(Clone)]
pub struct Strategy {
    pub name: Option<String>,
    pub hooks: Hooks,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StrategyError {
    #[error("strategy{0} is missing required hook `{1}`")]
    MissingHook(String, &'static str),
}

impl Strategy {
    pub fn new(name: Option<String>, hooks: Hooks) -> Result<Self, StrategyError> {
        let strategy = Self { name, hooks };
        strategy.check_required_hooks()?;
        Ok(strategy)
    }

    fn label(&self) -> String {
        match &self.name {
            Some(n) => format!(" `{n}`"),
            None => String::new(),
        }
    }

    fn check_required_hooks(&self) -> Result<(), StrategyError> {
        if self.hooks.deploy.is_none() {
            return Err(StrategyError::MissingHook(self.label(), "deploy"));
        }
        if self.hooks.deliver.is_none() {
            return Err(StrategyError::MissingHook(self.label(), "deliver"));
        }
        if self.hooks.process.is_none() {
            return Err(StrategyError::MissingHook(self.label(), "process"));
        }
        Ok(())
    }
}

impl fmt::Debug for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategy")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Strategy {
    fn eq(&self, other: &Self) -> bool {
        self.name.is_some() && self.name == other.name
    }
}
impl Eq for Strategy {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::operation::Operation;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedNodesApi {
        ctx: Context,
        nodes: Vec<NodeRef>,
        spawned: Arc<AtomicUsize>,
    }

    impl HookApi for FixedNodesApi {
        fn context(&self) -> &Context {
            &self.ctx
        }
        fn call(&mut self, _key: &CallbackKey, _args: &[Value]) -> CallResult {
            unimplemented!()
        }
        fn call_full(&mut self, _key: &CallbackKey, _state: &Value, _config: &Value, _args: &[Value]) -> CallResult {
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
        fn emit(&mut self, _port_values: HashMap<PortName, Vec<Value>>) {}
        fn send(&mut self, _worker: &WorkerHandle, _message: Value) {}
        fn remote_worker(&mut self, _state: Value, tag: Option<String>, node: NodeSelector) -> WorkerHandle {
            self.spawned.fetch_add(1, Ordering::Relaxed);
            let target = match node {
                NodeSelector::Specific(n) => n,
                _ => NodeRef::local(),
            };
            WorkerHandle::new(
                format!("w{}", self.spawned.load(Ordering::Relaxed)),
                target,
                tag,
            )
        }
        fn known_nodes(&self) -> Vec<NodeRef> {
            self.nodes.clone()
        }
    }

    #[test]
    fn on_all_worker_cores_spawns_one_worker_per_node_per_logical_core() {
        let nodes = vec![NodeRef::local(), NodeRef::from("other")];
        let mut api = FixedNodesApi {
            ctx: Context::new(Arc::new(Operation::new(None, vec![], vec![], Value::Nil, None, None, vec![]).unwrap()), Value::Nil),
            nodes: nodes.clone(),
            spawned: Arc::new(AtomicUsize::new(0)),
        };
        let parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let handles = api.on_all_worker_cores(None, &mut move |node, core| {
            seen_cb.lock().unwrap().push((node.clone(), core));
            Value::Nil
        });

        assert_eq!(handles.len(), nodes.len() * parallelism);
        assert_eq!(seen.lock().unwrap().len(), nodes.len() * parallelism);
        for node in &nodes {
            let cores: Vec<usize> = seen
                .lock()
                .unwrap()
                .iter()
                .filter(|(n, _)| n == node)
                .map(|(_, c)| *c)
                .collect();
            assert_eq!(cores.len(), parallelism);
        }
    }

    #[test]
    fn missing_required_hook_is_rejected() {
        let err = Strategy::new(
            Some("Broken".into()),
            Hooks {
                deploy: None,
                ..Default::default()
            },
        )
        .unwrap_err();
        assert_eq!(
            err,
            StrategyError::MissingHook(" `Broken`".into(), "deploy")
        );
    }
}
