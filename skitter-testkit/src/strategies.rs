//! Built-in `Strategy`s covering the placement policies skitter's own test
//! suite and the end-to-end scenarios exercise: one-worker-per-node
//! (`singleton`), fixed fan-out (`stateless_replica`, `broadcast`),
//! key-partitioned fan-out (`keyed_state`), and a pass-through to a worker
//! owned elsewhere (`direct_link`).
//!
//! Every strategy here shares the same `process` hook
//! ([`process_hook`]): invoke the node's `("react", 1)` callback and
//! propagate whatever it emits. The hooks that actually differ between
//! strategies are `deploy` (how many workers, where) and `deliver` (which
//! of them gets a given value).

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use skitter_core::descriptor::operation::CallbackKey;
use skitter_core::descriptor::strategy::{Hooks, ProcessHook};
use skitter_core::node::NodeSelector;
use skitter_core::value::Value;
use skitter_core::worker_handle::WorkerHandle;
use skitter_core::Strategy;

/// The `process` hook shared by every strategy in this module: call
/// `("react", 1)` with the worker's own state and the node's deploy-time
/// args as config, replace the state, and forward any emits.
pub fn process_hook() -> ProcessHook {
    Arc::new(|api, message, state, _tag| {
        let key = CallbackKey::new("react", 1);
        let config = api.context().args.clone();
        let result = api.call_full(&key, state, &config, &[message]);
        *state = result.state;
        if !result.emits.is_empty() {
            api.emit(result.emits);
        }
    })
}

fn decode_handles(deployment: &Value) -> Vec<WorkerHandle> {
    match deployment {
        Value::List(items) => items.iter().filter_map(WorkerHandle::from_value).collect(),
        other => WorkerHandle::from_value(other).into_iter().collect(),
    }
}

fn encode_handles(handles: &[WorkerHandle]) -> Value {
    Value::List(handles.iter().map(WorkerHandle::to_value).collect())
}

fn replica_count(args: &Value, default: usize) -> usize {
    match args.as_int() {
        Some(n) if n > 0 => n as usize,
        _ => default,
    }
}

/// Spawns `n` stateless replicas on `deploy` (`n` taken from the node's
/// `args`, default 1) and round-robins deliveries across them.
pub fn stateless_replica(default_replicas: usize) -> Arc<Strategy> {
    let next = Arc::new(AtomicUsize::new(0));
    Arc::new(
        Strategy::new(
            Some("StatelessReplica".into()),
            Hooks {
                deploy: Some(Arc::new(move |api| {
                    let n = replica_count(&api.context().args.clone(), default_replicas);
                    let initial_state = Value::Nil;
                    let handles: Vec<WorkerHandle> =
                        (0..n).map(|_| api.local_worker(initial_state.clone(), None)).collect();
                    encode_handles(&handles)
                })),
                deliver: Some(Arc::new({
                    let next = next.clone();
                    move |api, value, _dest_port| {
                        let handles = decode_handles(&api.context().deployment.clone());
                        if handles.is_empty() {
                            return;
                        }
                        let idx = next.fetch_add(1, Ordering::Relaxed) % handles.len();
                        api.send(&handles[idx], value);
                    }
                })),
                process: Some(process_hook()),
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// Spawns exactly one worker and sends every delivery to it.
pub fn singleton() -> Arc<Strategy> {
    Arc::new(
        Strategy::new(
            Some("Singleton".into()),
            Hooks {
                deploy: Some(Arc::new(|api| {
                    let handle = api.local_worker(Value::Nil, None);
                    handle.to_value()
                })),
                deliver: Some(Arc::new(|api, value, _dest_port| {
                    let Some(handle) = WorkerHandle::from_value(&api.context().deployment.clone()) else {
                        return;
                    };
                    api.send(&handle, value);
                })),
                process: Some(process_hook()),
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// Spawns a worker per distinct key the first time that key is seen
/// (hashing the delivered value itself), and routes every later delivery
/// of an already-seen key to the same worker.
pub fn keyed_state() -> Arc<Strategy> {
    let workers: Arc<Mutex<HashMap<u64, WorkerHandle>>> = Arc::new(Mutex::new(HashMap::new()));
    Arc::new(
        Strategy::new(
            Some("KeyedState".into()),
            Hooks {
                deploy: Some(Arc::new(|_api| Value::Nil)),
                deliver: Some(Arc::new(move |api, value, _dest_port| {
                    let mut hasher = DefaultHasher::new();
                    value.hash(&mut hasher);
                    let key = hasher.finish();

                    let existing = workers.lock().get(&key).cloned();
                    let handle = match existing {
                        Some(handle) => handle,
                        None => {
                            let handle = api.local_worker(Value::Nil, None);
                            workers.lock().insert(key, handle.clone());
                            handle
                        }
                    };
                    api.send(&handle, value);
                })),
                process: Some(process_hook()),
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// Never spawns a worker of its own: `deploy` decodes a [`WorkerHandle`]
/// already encoded in the node's `args` (typically produced by another
/// node's `deploy` hook) and routes every delivery straight to it. Useful
/// for wiring a node directly onto a worker another part of the workflow
/// owns, without creating a second one.
pub fn direct_link() -> Arc<Strategy> {
    Arc::new(
        Strategy::new(
            Some("DirectLink".into()),
            Hooks {
                deploy: Some(Arc::new(|api| api.context().args.clone())),
                deliver: Some(Arc::new(|api, value, _dest_port| {
                    let Some(handle) = WorkerHandle::from_value(&api.context().deployment.clone()) else {
                        tracing::warn!("DirectLink node has no valid worker handle in its args");
                        return;
                    };
                    api.send(&handle, value);
                })),
                process: Some(process_hook()),
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// Spawns `n` replicas (`n` from `args`, default 1) and sends every
/// delivery to all of them.
pub fn broadcast(default_replicas: usize) -> Arc<Strategy> {
    Arc::new(
        Strategy::new(
            Some("Broadcast".into()),
            Hooks {
                deploy: Some(Arc::new(move |api| {
                    let n = replica_count(&api.context().args.clone(), default_replicas);
                    let handles: Vec<WorkerHandle> =
                        (0..n).map(|_| api.local_worker(Value::Nil, None)).collect();
                    encode_handles(&handles)
                })),
                deliver: Some(Arc::new(|api, value, _dest_port| {
                    let handles = decode_handles(&api.context().deployment.clone());
                    for handle in &handles {
                        api.send(handle, value.clone());
                    }
                })),
                process: Some(process_hook()),
                ..Default::default()
            },
        )
        .unwrap(),
    )
}

/// Picks a node-placement strategy's node selector from a node's `args`
/// (`Value::Str` tag => `Tagged`, anything else => `Local`). Exposed for
/// strategies that want to honor a `node` argument without each
/// reimplementing the match.
pub fn selector_from_args(args: &Value) -> NodeSelector {
    match args {
        Value::Str(tag) => NodeSelector::Tagged(tag.clone()),
        _ => NodeSelector::Local,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::identity;
    use skitter_core::context::Context;
    use skitter_core::descriptor::port::PortName;
    use skitter_core::descriptor::strategy::HookApi;
    use skitter_core::worker_handle::WorkerId;
    use std::collections::HashMap as StdHashMap;

    struct RecordingApi {
        ctx: Context,
        sent: Vec<(WorkerId, Value)>,
        spawned: usize,
    }

    impl HookApi for RecordingApi {
        fn context(&self) -> &Context {
            &self.ctx
        }
        fn call(&mut self, key: &CallbackKey, args: &[Value]) -> skitter_core::invoke::CallResult {
            skitter_core::invoke::call(&self.ctx.component, key, None, &Value::Nil, args).unwrap()
        }
        fn call_full(
            &mut self,
            key: &CallbackKey,
            state: &Value,
            config: &Value,
            args: &[Value],
        ) -> skitter_core::invoke::CallResult {
            skitter_core::invoke::call(&self.ctx.component, key, Some(state), config, args).unwrap()
        }
        fn call_if_exists(
            &mut self,
            key: &CallbackKey,
            state: Option<&Value>,
            config: &Value,
            args: &[Value],
        ) -> skitter_core::invoke::CallResult {
            skitter_core::invoke::call_if_exists(&self.ctx.component, key, state, config, args)
        }
        fn emit(&mut self, _port_values: StdHashMap<PortName, Vec<Value>>) {}
        fn send(&mut self, worker: &WorkerHandle, message: Value) {
            self.sent.push((WorkerId::from(worker), message));
        }
        fn remote_worker(&mut self, _state: Value, tag: Option<String>, _node: NodeSelector) -> WorkerHandle {
            self.spawned += 1;
            WorkerHandle::new(format!("w{}", self.spawned), skitter_core::node::NodeRef::local(), tag)
        }
        fn known_nodes(&self) -> Vec<skitter_core::node::NodeRef> {
            vec![skitter_core::node::NodeRef::local()]
        }
    }

    fn api() -> RecordingApi {
        RecordingApi {
            ctx: Context::new(identity(), Value::Nil),
            sent: Vec::new(),
            spawned: 0,
        }
    }

    #[test]
    fn stateless_replica_round_robins_across_deploy_spawned_workers() {
        let strategy = stateless_replica(2);
        let mut deploy_api = api();
        let deployment = (strategy.hooks.deploy.as_ref().unwrap())(&mut deploy_api);
        assert_eq!(deploy_api.spawned, 2);

        let mut deliver_api = api();
        deliver_api.ctx = deliver_api.ctx.with_deployment(deployment);
        let deliver = strategy.hooks.deliver.as_ref().unwrap();
        deliver(&mut deliver_api, Value::Int(1), &PortName::new("in"));
        deliver(&mut deliver_api, Value::Int(2), &PortName::new("in"));
        deliver(&mut deliver_api, Value::Int(3), &PortName::new("in"));
        let targets: Vec<&WorkerId> = deliver_api.sent.iter().map(|(w, _)| w).collect();
        assert_ne!(targets[0], targets[1]);
        assert_eq!(targets[0], targets[2]);
    }

    #[test]
    fn keyed_state_routes_the_same_key_to_the_same_worker() {
        let strategy = keyed_state();
        let mut api = api();
        let deliver = strategy.hooks.deliver.as_ref().unwrap();
        deliver(&mut api, Value::str("a"), &PortName::new("in"));
        deliver(&mut api, Value::str("b"), &PortName::new("in"));
        deliver(&mut api, Value::str("a"), &PortName::new("in"));
        assert_eq!(api.spawned, 2);
        assert_eq!(api.sent[0].0, api.sent[2].0);
        assert_ne!(api.sent[0].0, api.sent[1].0);
    }

    #[test]
    fn broadcast_sends_to_every_replica() {
        let strategy = broadcast(3);
        let mut deploy_api = api();
        let deployment = (strategy.hooks.deploy.as_ref().unwrap())(&mut deploy_api);
        let mut deliver_api = api();
        deliver_api.ctx = deliver_api.ctx.with_deployment(deployment);
        let deliver = strategy.hooks.deliver.as_ref().unwrap();
        deliver(&mut deliver_api, Value::Int(7), &PortName::new("in"));
        assert_eq!(deliver_api.sent.len(), 3);
    }
}
