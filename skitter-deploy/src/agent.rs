//! The worker-side counterpart to [`crate::engine::DeployEngine`]: runs on a
//! node that hosts workers but not the workflow graph or emit router.
//!
//! A [`WorkerAgent`] only ever receives [`Control::SpawnWorker`] requests
//! from the hub (the node running `DeployEngine`, reached over whichever
//! connection this node dialled in as `worker` mode) and hosts the
//! resulting workers locally. A `process` hook's `emit`/`send` calls are
//! relayed back to the hub rather than handled here, since only the hub
//! holds the workflow's links and deployment data.

use std::sync::Arc;

use skitter_core::context::Context;
use skitter_core::descriptor::operation::CallbackKey;
use skitter_core::descriptor::port::{NodeId, PortName};
use skitter_core::descriptor::strategy::HookApi;
use skitter_core::invoke::{self, CallResult};
use skitter_core::node::{NodeRef, NodeSelector};
use skitter_core::value::Value;
use skitter_core::worker_handle::{WorkerHandle, WorkerId};
use skitter_runtime::{MakeApi, Metrics, WorkerTable};
use skitter_transport::{Control, Frame, Transport};
use std::collections::HashMap;

pub struct WorkerAgent {
    pub node: NodeRef,
    pub hub: NodeRef,
    pub transport: Arc<Transport>,
    pub table: Arc<WorkerTable>,
    pub metrics: Arc<Metrics>,
}

impl WorkerAgent {
    pub fn new(node: NodeRef, hub: NodeRef, transport: Arc<Transport>, metrics: Arc<Metrics>) -> Arc<Self> {
        let agent = Arc::new(Self {
            node,
            hub,
            transport,
            table: Arc::new(WorkerTable::new(metrics.clone())),
            metrics,
        });
        agent.wire_transport();
        agent
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
    }

    fn handle_control(self: &Arc<Self>, _from: NodeRef, control: Control) {
        match control {
            Control::SpawnWorker {
                node_id,
                worker_id,
                operation_name,
                strategy_name,
                args,
                initial_state,
                tag,
            } => self.spawn_requested(node_id, worker_id, operation_name, strategy_name, args, initial_state, tag),
            other => {
                tracing::debug!(?other, "control frame ignored by worker agent");
            }
        }
    }

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

        let agent = self.clone();
        let make_api: MakeApi = Arc::new(move || {
            let ctx = Context::new(operation.clone(), args.clone());
            Box::new(WorkerAgentHookApi {
                ctx,
                node_id: node_id.clone(),
                agent: agent.clone(),
            })
        });
        let handle = self
            .table
            .spawn(worker_id, self.node.clone(), tag, initial_state, process, make_api);
        tracing::info!(worker = %handle.id, %operation_name, "spawned requested worker");
    }

    fn relay_to_hub(&self, frame: Frame) {
        if let Err(err) = self.transport.membership.send(&self.hub, frame) {
            tracing::warn!(error = %err, hub = %self.hub, "failed to relay to hub");
            self.metrics.record_dropped_delivery();
        }
    }
}

/// [`HookApi`] for a `process` hook invoked on a worker spawned on a node
/// without a `DeployEngine`. `emit`/`send` relay through the hub; spawning
/// further workers only fully supports [`NodeSelector::Local`], since a
/// remote/tagged/any-worker placement decision needs the workflow graph
/// this node doesn't hold.
pub struct WorkerAgentHookApi {
    pub ctx: Context,
    pub node_id: NodeId,
    pub agent: Arc<WorkerAgent>,
}

impl HookApi for WorkerAgentHookApi {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn call(&mut self, key: &CallbackKey, args: &[Value]) -> CallResult {
        invoke::call(&self.ctx.component, key, None, &Value::Nil, args)
            .unwrap_or_else(|err| panic!("call({key:?}): {err}"))
    }

    fn call_full(&mut self, key: &CallbackKey, state: &Value, config: &Value, args: &[Value]) -> CallResult {
        invoke::call(&self.ctx.component, key, Some(state), config, args)
            .unwrap_or_else(|err| panic!("call({key:?}): {err}"))
    }

    fn call_if_exists(
        &mut self,
        key: &CallbackKey,
        state: Option<&Value>,
        config: &Value,
        args: &[Value],
    ) -> CallResult {
        invoke::call_if_exists(&self.ctx.component, key, state, config, args)
    }

    fn emit(&mut self, port_values: HashMap<PortName, Vec<Value>>) {
        let port_values = port_values
            .into_iter()
            .map(|(port, values)| (port.0, values))
            .collect();
        self.agent.relay_to_hub(Frame::Control(Control::Emit {
            node_id: self.node_id.clone(),
            port_values,
            invocation: self.ctx.invocation.as_ref().map(|inv| inv.0.clone()),
        }));
    }

    fn send(&mut self, worker: &WorkerHandle, message: Value) {
        if worker.node == self.agent.node {
            self.agent.table.send(&worker.id, message);
        } else {
            self.agent.relay_to_hub(Frame::Control(Control::Relay {
                worker: WorkerId::from(worker),
                payload: message,
            }));
        }
    }

    fn remote_worker(&mut self, state: Value, tag: Option<String>, node: NodeSelector) -> WorkerHandle {
        if !matches!(node, NodeSelector::Local) {
            tracing::warn!(
                node_id = %self.node_id,
                "remote_worker with a non-local selector from a worker-hosted process hook is not supported; spawning locally instead"
            );
        }
        let Some(crate::registry_lookup::Resolved { process, .. }) =
            crate::registry_lookup::resolve(self.ctx.component.name.as_deref().unwrap_or_default(), None)
        else {
            tracing::error!(node_id = %self.node_id, "cannot spawn local worker: own operation not found in registry by name");
            let handle = WorkerHandle::new(uuid::Uuid::new_v4().to_string(), self.agent.node.clone(), tag);
            handle.mark_dead();
            return handle;
        };
        let agent = self.agent.clone();
        let operation = self.ctx.component.clone();
        let args = self.ctx.args.clone();
        let node_id = self.node_id.clone();
        let make_api: MakeApi = Arc::new(move || {
            let ctx = Context::new(operation.clone(), args.clone());
            Box::new(WorkerAgentHookApi {
                ctx,
                node_id: node_id.clone(),
                agent: agent.clone(),
            })
        });
        let worker_id = uuid::Uuid::new_v4().to_string();
        self.agent
            .table
            .spawn(worker_id, self.agent.node.clone(), tag, state, process, make_api)
    }

    /// A worker-hosted agent only dials its hub, not the full cluster, so
    /// the only node it can honestly report is itself.
    fn known_nodes(&self) -> Vec<NodeRef> {
        vec![self.agent.node.clone()]
    }
}
