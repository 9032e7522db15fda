//! Built-in operations and strategies registered under well-known names,
//! so a workflow can reference them without a crate of its own. Used by
//! skitter's own end-to-end tests and by `skitter-cli` as a starting point
//! for new deployments.

pub mod operations;
pub mod strategies;

use std::sync::Arc;

use skitter_core::registry::{global, RegistryEntry, RegistryError};

/// Registers every built-in operation and strategy under the names the CLI
/// and integration tests reference them by. Safe to call more than once
/// (and from more than one mode supervisor in the same process): a name
/// that is already defined is left untouched rather than treated as an
/// error, since `Registry::put` is otherwise first-definition-wins.
pub fn register_builtins() {
    let operations: Vec<_> = vec![
        operations::source(),
        operations::identity(),
        operations::logging_sink(),
        operations::count(),
    ];
    for operation in operations {
        put_ignoring_duplicates(
            operation.name.clone().expect("built-in operations are always named"),
            RegistryEntry::Operation(operation),
        );
    }

    let strategies: Vec<Arc<skitter_core::Strategy>> = vec![
        strategies::singleton(),
        strategies::stateless_replica(1),
        strategies::broadcast(1),
        strategies::keyed_state(),
        strategies::direct_link(),
    ];
    for strategy in strategies {
        put_ignoring_duplicates(
            strategy.name.clone().expect("built-in strategies are always named"),
            RegistryEntry::Strategy(strategy),
        );
    }
}

fn put_ignoring_duplicates(name: String, entry: RegistryEntry) {
    match global().put(name.clone(), entry) {
        Ok(()) | Err(RegistryError::AlreadyDefined(_)) => {}
        Err(err) => tracing::warn!(name, %err, "failed to register built-in"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_builtins_is_idempotent() {
        register_builtins();
        register_builtins();
        assert!(global().get("Identity").is_ok());
        assert!(global().get("Singleton").is_ok());
    }
}
