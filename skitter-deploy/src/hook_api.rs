//! The concrete [`HookApi`] a strategy hook actually runs against while a
//! deploy, deliver, or locally-hosted process invocation is in flight.
//!
//! Kept separate from [`crate::engine::DeployEngine`] itself so the engine
//! doesn't need to also implement the trait; one `EngineHookApi` is built
//! fresh per hook call (`skitter_runtime::worker::MakeApi`'s contract) with
//! the `Context` that call needs.

use std::sync::Arc;

use skitter_core::context::Context;
use skitter_core::descriptor::operation::CallbackKey;
use skitter_core::descriptor::port::{NodeId, PortName};
use skitter_core::descriptor::strategy::HookApi;
use skitter_core::invoke::{self, CallResult};
use skitter_core::node::{NodeRef, NodeSelector};
use skitter_core::value::Value;
use skitter_core::worker_handle::WorkerHandle;
use std::collections::HashMap;

use crate::engine::DeployEngine;

pub struct EngineHookApi {
    pub ctx: Context,
    pub node_id: NodeId,
    pub engine: Arc<DeployEngine>,
}

impl HookApi for EngineHookApi {
    fn context(&self) -> &Context {
        &self.ctx
    }

    fn call(&mut self, key: &CallbackKey, args: &[Value]) -> CallResult {
        invoke::call(&self.ctx.component, key, None, &Value::Nil, args)
            .unwrap_or_else(|err| panic!("call({key:?}): {err}"))
    }

    fn call_full(
        &mut self,
        key: &CallbackKey,
        state: &Value,
        config: &Value,
        args: &[Value],
    ) -> CallResult {
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
        self.engine
            .route_emit(&self.node_id, port_values, self.ctx.invocation.clone());
    }

    fn send(&mut self, worker: &WorkerHandle, message: Value) {
        self.engine.send_to_worker(worker, message);
    }

    fn remote_worker(&mut self, state: Value, tag: Option<String>, node: NodeSelector) -> WorkerHandle {
        self.engine.spawn_worker(&self.node_id, state, tag, node)
    }

    fn known_nodes(&self) -> Vec<NodeRef> {
        let mut nodes = self.engine.transport.membership.nodes();
        nodes.push(self.engine.node.clone());
        nodes
    }
}
