//! Resolves a [`Control::SpawnWorker`] request's operation/strategy names
//! against this process's own registry. Shared by [`crate::engine`] (the
//! hub) and [`crate::agent`] (a pure worker node), since both sides receive
//! the same frame shape and need the same lookup.

use std::sync::Arc;

use skitter_core::descriptor::operation::Operation;
use skitter_core::descriptor::strategy::{ProcessHook, Strategy};
use skitter_core::registry::{global, RegistryEntry};

pub struct Resolved {
    pub operation: Arc<Operation>,
    pub strategy: Arc<Strategy>,
    pub process: ProcessHook,
}

pub fn resolve(operation_name: &str, strategy_name: Option<&str>) -> Option<Resolved> {
    let operation = match global().get(operation_name) {
        Ok(RegistryEntry::Operation(op)) => op,
        _ => {
            tracing::warn!(%operation_name, "cannot resolve requested worker: operation not registered here");
            return None;
        }
    };

    let named_strategy = strategy_name.and_then(|name| match global().get(name) {
        Ok(RegistryEntry::Strategy(s)) => Some(s),
        _ => None,
    });
    let strategy = named_strategy.or_else(|| operation.default_strategy.clone());
    let Some(strategy) = strategy else {
        tracing::warn!(%operation_name, "cannot resolve requested worker: no resolvable strategy");
        return None;
    };
    let Some(process) = strategy.hooks.process.clone() else {
        tracing::warn!(%operation_name, "strategy has no process hook");
        return None;
    };

    Some(Resolved {
        operation,
        strategy,
        process,
    })
}
