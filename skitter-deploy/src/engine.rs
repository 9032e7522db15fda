//! The deployment engine and emit router: owns the flattened workflow, the
//! frozen per-node deployment data, and the local
//! worker table, and is the only thing in the cluster that ever calls a
//! `deploy`/`deliver` hook. `process` hooks for workers spawned on *other*
//! nodes run against [`crate::agent::WorkerAgent`] instead — see that
//! module for how `emit`/`send` from those hooks gets back here.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use uuid::Uuid;

use skitter_core::context::{Context, Invocation};
use skitter_core::descriptor::port::{NodeId, PortName};
use skitter_core::descriptor::workflow::{flatten, Node, Workflow};
use skitter_core::node::{NodeRef, NodeSelector};
use skitter_core::value::Value;
use skitter_core::worker_handle::{WorkerHandle, WorkerId};
use skitter_runtime::{MakeApi, Metrics, WorkerTable};
use skitter_transport::{Control, Frame, Transport};

use crate::error::DeployError;
use crate::hook_api::EngineHookApi;

#[derive(Default)]
struct EngineState {
    workflow: Option<Arc<Workflow>>,
    order: Vec<NodeId>,
    deployment_data: HashMap<NodeId, Value>,
    node_workers: HashMap<NodeId, Vec<WorkerHandle>>,
    /// Handles for workers spawned on other nodes, so a `node_down` event
    /// can mark them dead even though the handle's own `alive` flag lives
    /// in that node's process, not ours.
    remote_handles: HashMap<(NodeRef, String), WorkerHandle>,
}

pub struct DeployEngine {
    pub node: NodeRef,
    pub transport: Arc<Transport>,
    pub table: Arc<WorkerTable>,
    pub metrics: Arc<Metrics>,
    state: RwLock<EngineState>,
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Kahn's algorithm over the flattened graph's node links, breaking ties by
/// `NodeId` so the deploy order (and therefore the rollback order on
/// failure) is deterministic across runs.
fn topological_order(nodes: &HashMap<NodeId, Node>) -> Result<Vec<NodeId>, DeployError> {
    let mut in_degree: HashMap<NodeId, usize> = nodes.keys().cloned().map(|id| (id, 0)).collect();
    let mut adjacency: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
    for (id, node) in nodes {
        for dests in node.links().values() {
            for (dest, _) in dests {
                adjacency.entry(id.clone()).or_default().push(dest.clone());
                *in_degree.entry(dest.clone()).or_insert(0) += 1;
            }
        }
    }

    let mut ready: std::collections::BTreeSet<NodeId> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(id, _)| id.clone())
        .collect();
    let mut order = Vec::with_capacity(nodes.len());
    let mut remaining: HashSet<NodeId> = nodes.keys().cloned().collect();

    while let Some(next) = ready.iter().next().cloned() {
        ready.remove(&next);
        remaining.remove(&next);
        order.push(next.clone());
        if let Some(adj) = adjacency.get(&next) {
            for dest in adj {
                let deg = in_degree.get_mut(dest).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(dest.clone());
                }
            }
        }
    }

    if !remaining.is_empty() {
        return Err(DeployError::Cycle);
    }
    Ok(order)
}

impl DeployEngine {
    pub fn new(node: NodeRef, transport: Arc<Transport>, metrics: Arc<Metrics>) -> Arc<Self> {
        let engine = Arc::new(Self {
            node,
            transport,
            table: Arc::new(WorkerTable::new(metrics.clone())),
            metrics,
            state: RwLock::new(EngineState::default()),
        });
        engine.wire_transport();
        engine
    }

    fn wire_transport(self: &Arc<Self>) {
        let for_worker_message = self.clone();
        self.transport.on_worker_message(Arc::new(move |worker, payload| {
            if worker.node == for_worker_message.node {
                for_worker_message.table.send(&worker.id, payload);
            } else {
                for_worker_message.metrics.record_dropped_delivery();
            }
        }));

        let for_control = self.clone();
        self.transport
            .on_control(Arc::new(move |from, control| for_control.handle_control(from, control)));

        let for_node_down = self.clone();
        self.transport
            .membership
            .subscribe(Arc::new(move |node| for_node_down.handle_node_down(node)));
    }

    fn handle_control(self: &Arc<Self>, from: NodeRef, control: Control) {
        match control {
            Control::Emit {
                node_id,
                port_values,
                invocation,
            } => {
                let port_values = port_values
                    .into_iter()
                    .map(|(port, values)| (PortName::new(port), values))
                    .collect();
                self.route_emit(&node_id, port_values, invocation.map(Invocation::new));
            }
            Control::Relay { worker, payload } => {
                if worker.node == self.node {
                    self.table.send(&worker.id, payload);
                } else if let Err(err) = self
                    .transport
                    .membership
                    .send(&worker.node, Frame::WorkerMessage { worker, payload })
                {
                    tracing::warn!(error = %err, "failed to relay worker message");
                    self.metrics.record_dropped_delivery();
                }
            }
            Control::SpawnWorker {
                node_id,
                worker_id,
                operation_name,
                strategy_name,
                args,
                initial_state,
                tag,
            } => {
                self.spawn_requested(node_id, worker_id, operation_name, strategy_name, args, initial_state, tag);
            }
            Control::NodeDown(node) => self.handle_node_down(&node),
            _ => {
                tracing::debug!(%from, ?control, "control frame ignored by deployment engine");
            }
        }
    }

    fn handle_node_down(self: &Arc<Self>, node: &NodeRef) {
        let dead: Vec<WorkerHandle> = {
            let mut state = self.state.write();
            let dead = state
                .remote_handles
                .iter()
                .filter(|((n, _), _)| n == node)
                .map(|(_, h)| h.clone())
                .collect::<Vec<_>>();
            state.remote_handles.retain(|(n, _), _| n != node);
            dead
        };
        for handle in dead {
            handle.mark_dead();
        }
    }

    /// Runs on a node that received a [`Control::SpawnWorker`] request for
    /// an operation it does not itself host in a `Workflow` — it resolves
    /// the operation/strategy from its own process-wide registry instead.
    #[allow(clippy::too_many_arguments)]
    fn spawn_requested(
        self: &Arc<Self>,
        node_id: NodeId,
        worker_id: String,
        operation_name: String,
        strategy_name: Option<String>,
        args: Value,
        initial_state: Value,
        tag: Option<String>,
    ) {
        let Some(crate::registry_lookup::Resolved { operation, process, .. }) =
            crate::registry_lookup::resolve(&operation_name, strategy_name.as_deref())
        else {
            return;
        };

        let engine = self.clone();
        let ctx_ctor_op = operation.clone();
        let ctx_ctor_args = args.clone();
        let make_api: MakeApi = Arc::new(move || {
            let ctx = Context::new(ctx_ctor_op.clone(), ctx_ctor_args.clone());
            Box::new(EngineHookApi {
                ctx,
                node_id: node_id.clone(),
                engine: engine.clone(),
            })
        });
        let handle = self
            .table
            .spawn(worker_id, self.node.clone(), tag, initial_state, process, make_api);
        tracing::info!(worker = %handle.id, %operation_name, "spawned requested worker");
    }

    /// Runs `workflow` through deploy: flatten, topologically sort, call
    /// each node's `deploy` hook in order. On failure, rolls back already
    /// deployed nodes in reverse.
    pub fn deploy(self: &Arc<Self>, workflow: Workflow) -> Result<(), DeployError> {
        let flat = Arc::new(flatten(&workflow));
        let order = topological_order(&flat.nodes)?;
        self.state.write().workflow = Some(flat.clone());

        let mut deployed = Vec::new();
        for node_id in &order {
            let Some(Node::Leaf { operation, args, .. }) = flat.nodes.get(node_id) else {
                continue;
            };
            let strategy = flat
                .nodes
                .get(node_id)
                .and_then(Node::resolved_strategy)
                .expect("a validated workflow always resolves a strategy");
            let deploy_hook = strategy
                .hooks
                .deploy
                .clone()
                .expect("a validated strategy always carries a deploy hook");

            let ctx = Context::new(operation.clone(), args.clone());
            let mut api = EngineHookApi {
                ctx,
                node_id: node_id.clone(),
                engine: self.clone(),
            };
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| deploy_hook(&mut api)));
            match outcome {
                Ok(deployment_value) => {
                    self.state.write().deployment_data.insert(node_id.clone(), deployment_value);
                    deployed.push(node_id.clone());
                }
                Err(payload) => {
                    let reason = panic_message(payload);
                    tracing::error!(node = %node_id, reason = %reason, "deploy hook failed, rolling back");
                    for rollback_id in deployed.iter().rev() {
                        self.undeploy_node(rollback_id, &flat);
                    }
                    let mut state = self.state.write();
                    state.workflow = None;
                    state.deployment_data.clear();
                    state.node_workers.clear();
                    return Err(DeployError::Hook {
                        node: node_id.clone(),
                        reason,
                    });
                }
            }
        }

        self.state.write().order = order;
        tracing::info!(nodes = flat.nodes.len(), "deployment complete");
        Ok(())
    }

    /// Reverses deployment: calls `undeploy` on every node in reverse
    /// deploy order and invalidates every worker handle it created.
    pub fn undeploy(self: &Arc<Self>) {
        let (order, workflow) = {
            let state = self.state.read();
            (state.order.clone(), state.workflow.clone())
        };
        let Some(workflow) = workflow else {
            return;
        };
        for node_id in order.iter().rev() {
            self.undeploy_node(node_id, &workflow);
        }
        let mut state = self.state.write();
        state.deployment_data.clear();
        state.node_workers.clear();
        state.order.clear();
        state.workflow = None;
    }

    fn undeploy_node(self: &Arc<Self>, node_id: &NodeId, workflow: &Workflow) {
        if let Some(Node::Leaf { operation, args, .. }) = workflow.nodes.get(node_id) {
            if let Some(strategy) = workflow.nodes.get(node_id).and_then(Node::resolved_strategy) {
                if let Some(undeploy_hook) = strategy.hooks.undeploy.clone() {
                    let deployment = self
                        .state
                        .read()
                        .deployment_data
                        .get(node_id)
                        .cloned()
                        .unwrap_or(Value::Nil);
                    let ctx = Context::new(operation.clone(), args.clone()).with_deployment(deployment);
                    let mut api = EngineHookApi {
                        ctx,
                        node_id: node_id.clone(),
                        engine: self.clone(),
                    };
                    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| undeploy_hook(&mut api)));
                }
            }
        }
        let workers = self.state.write().node_workers.remove(node_id);
        if let Some(workers) = workers {
            for handle in workers {
                handle.mark_dead();
                self.table.remove(&handle.id);
            }
        }
    }

    /// The emit router: for every emitted value, calls
    /// `deliver` once on each downstream node's strategy, preserving
    /// per-port emission order.
    pub fn route_emit(
        self: &Arc<Self>,
        node_id: &NodeId,
        port_values: HashMap<PortName, Vec<Value>>,
        invocation: Option<Invocation>,
    ) {
        let plan = {
            let state = self.state.read();
            let Some(workflow) = state.workflow.as_ref() else {
                return;
            };
            let Some(source) = workflow.nodes.get(node_id) else {
                return;
            };
            let mut plan = Vec::new();
            for (port, values) in port_values {
                let Some(dests) = source.links().get(&port) else {
                    continue;
                };
                for value in values {
                    for (dest_id, dest_port) in dests {
                        let Some(Node::Leaf { operation, args, .. }) = workflow.nodes.get(dest_id) else {
                            continue;
                        };
                        let Some(strategy) = workflow.nodes.get(dest_id).and_then(Node::resolved_strategy) else {
                            continue;
                        };
                        let deployment = state.deployment_data.get(dest_id).cloned().unwrap_or(Value::Nil);
                        plan.push((
                            value.clone(),
                            dest_id.clone(),
                            dest_port.clone(),
                            operation.clone(),
                            strategy,
                            args.clone(),
                            deployment,
                        ));
                    }
                }
            }
            plan
        };

        for (value, dest_id, dest_port, operation, strategy, args, deployment) in plan {
            let Some(deliver) = strategy.hooks.deliver.clone() else {
                continue;
            };
            let ctx = Context::new(operation, args)
                .with_deployment(deployment)
                .with_invocation(invocation.clone());
            let mut api = EngineHookApi {
                ctx,
                node_id: dest_id,
                engine: self.clone(),
            };
            deliver(&mut api, value, &dest_port);
        }
    }

    /// Delivers a value arriving through one of the deployed workflow's own
    /// in-ports, via `entry_links`, rather than through a node's emits.
    /// This is how a caller (a test, or a future external-ingress adapter)
    /// feeds a workflow from outside once it is deployed.
    pub fn deliver_external(self: &Arc<Self>, in_port: &PortName, value: Value, invocation: Option<Invocation>) {
        let plan = {
            let state = self.state.read();
            let Some(workflow) = state.workflow.as_ref() else {
                return;
            };
            let Some(dests) = workflow.entry_links.get(in_port) else {
                return;
            };
            let mut plan = Vec::new();
            for (dest_id, dest_port) in dests {
                let Some(Node::Leaf { operation, args, .. }) = workflow.nodes.get(dest_id) else {
                    continue;
                };
                let Some(strategy) = workflow.nodes.get(dest_id).and_then(Node::resolved_strategy) else {
                    continue;
                };
                let deployment = state.deployment_data.get(dest_id).cloned().unwrap_or(Value::Nil);
                plan.push((dest_id.clone(), dest_port.clone(), operation.clone(), strategy, args.clone(), deployment));
            }
            plan
        };

        for (dest_id, dest_port, operation, strategy, args, deployment) in plan {
            let Some(deliver) = strategy.hooks.deliver.clone() else {
                continue;
            };
            let ctx = Context::new(operation, args)
                .with_deployment(deployment)
                .with_invocation(invocation.clone());
            let mut api = EngineHookApi {
                ctx,
                node_id: dest_id,
                engine: self.clone(),
            };
            deliver(&mut api, value.clone(), &dest_port);
        }
    }

    pub fn send_to_worker(self: &Arc<Self>, worker: &WorkerHandle, message: Value) {
        if worker.node == self.node {
            self.table.send(&worker.id, message);
            return;
        }
        let frame = Frame::WorkerMessage {
            worker: WorkerId::from(worker),
            payload: message,
        };
        if let Err(err) = self.transport.membership.send(&worker.node, frame) {
            tracing::warn!(error = %err, worker = %worker.id, "failed to send to remote worker");
            self.metrics.record_dropped_delivery();
        }
    }

    fn resolve_node(&self, selector: NodeSelector) -> NodeRef {
        match selector {
            NodeSelector::Local => self.node.clone(),
            NodeSelector::Specific(node) => node,
            NodeSelector::AnyWorker => self
                .transport
                .membership
                .nodes()
                .into_iter()
                .next()
                .unwrap_or_else(|| self.node.clone()),
            NodeSelector::Tagged(tag) => self
                .transport
                .membership
                .tagged(&tag)
                .into_iter()
                .next()
                .unwrap_or_else(|| self.node.clone()),
        }
    }

    pub fn spawn_worker(
        self: &Arc<Self>,
        node_id: &NodeId,
        initial_state: Value,
        tag: Option<String>,
        selector: NodeSelector,
    ) -> WorkerHandle {
        let target = self.resolve_node(selector);
        if target == self.node {
            return self.spawn_local(node_id, initial_state, tag);
        }

        let (operation_name, strategy_name, args) = {
            let state = self.state.read();
            let workflow = state.workflow.as_ref().expect("spawn_worker called before deploy");
            let Some(Node::Leaf { operation, args, .. }) = workflow.nodes.get(node_id) else {
                panic!("spawn_worker on an unknown or non-leaf node");
            };
            let strategy = workflow
                .nodes
                .get(node_id)
                .and_then(Node::resolved_strategy)
                .expect("a deployed node always resolves a strategy");
            (operation.name.clone(), strategy.name.clone(), args.clone())
        };

        let Some(operation_name) = operation_name else {
            tracing::warn!(%node_id, "operation has no name; cannot spawn on a remote node, spawning locally instead");
            return self.spawn_local(node_id, initial_state, tag);
        };

        let worker_id = Uuid::new_v4().to_string();
        let handle = WorkerHandle::new(worker_id.clone(), target.clone(), tag.clone());
        let frame = Frame::Control(Control::SpawnWorker {
            node_id: node_id.clone(),
            worker_id,
            operation_name,
            strategy_name,
            args,
            initial_state,
            tag,
        });
        if let Err(err) = self.transport.membership.send(&target, frame) {
            tracing::warn!(error = %err, node = %target, "failed to request remote worker spawn");
            handle.mark_dead();
        }

        let mut state = self.state.write();
        state
            .remote_handles
            .insert((target, handle.id.clone()), handle.clone());
        state.node_workers.entry(node_id.clone()).or_default().push(handle.clone());
        handle
    }

    fn spawn_local(self: &Arc<Self>, node_id: &NodeId, initial_state: Value, tag: Option<String>) -> WorkerHandle {
        let (operation, strategy, args) = {
            let state = self.state.read();
            let workflow = state.workflow.as_ref().expect("spawn_worker called before deploy");
            let Some(Node::Leaf { operation, args, .. }) = workflow.nodes.get(node_id) else {
                panic!("spawn_worker on an unknown or non-leaf node");
            };
            let strategy = workflow
                .nodes
                .get(node_id)
                .and_then(Node::resolved_strategy)
                .expect("a deployed node always resolves a strategy");
            (operation.clone(), strategy, args.clone())
        };
        let process = strategy
            .hooks
            .process
            .clone()
            .expect("a validated strategy always carries a process hook");
        let deployment = self
            .state
            .read()
            .deployment_data
            .get(node_id)
            .cloned()
            .unwrap_or(Value::Nil);

        let engine = self.clone();
        let node_id_owned = node_id.clone();
        let make_api: MakeApi = Arc::new(move || {
            let ctx = Context::new(operation.clone(), args.clone()).with_deployment(deployment.clone());
            Box::new(EngineHookApi {
                ctx,
                node_id: node_id_owned.clone(),
                engine: engine.clone(),
            })
        });

        let worker_id = Uuid::new_v4().to_string();
        let handle = self
            .table
            .spawn(worker_id, self.node.clone(), tag, initial_state, process, make_api);
        self.state
            .write()
            .node_workers
            .entry(node_id.clone())
            .or_default()
            .push(handle.clone());
        handle
    }
}
