//! Process-wide name→descriptor registry.
//!
//! A `OnceLock`-backed global table: initialized lazily on first access and
//! written to exactly once per node at process start by whichever mode
//! supervisor is running.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use crate::descriptor::operation::Operation;
use crate::descriptor::strategy::Strategy;
use crate::descriptor::workflow::Workflow;

#[derive(Clone)]
pub enum RegistryEntry {
    Operation(Arc<Operation>),
    Strategy(Arc<Strategy>),
    Workflow(Arc<Workflow>),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("`{0}` is already defined")]
    AlreadyDefined(String),
    #[error("`{0}` is not defined")]
    NotFound(String),
}

#[derive(Default)]
pub struct Registry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl Registry {
    fn new() -> Self {
        Self::default()
    }

    /// Insert-only write: fails with `AlreadyDefined` if `name` already
    /// exists, which is what makes first-definition-wins deterministic.
    pub fn put(&self, name: impl Into<String>, value: RegistryEntry) -> Result<(), RegistryError> {
        let name = name.into();
        let mut entries = self.entries.write().expect("registry lock poisoned");
        if entries.contains_key(&name) {
            return Err(RegistryError::AlreadyDefined(name));
        }
        entries.insert(name, value);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<RegistryEntry, RegistryError> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<String> {
        let entries = self.entries.read().expect("registry lock poisoned");
        let mut names: Vec<_> = entries.keys().cloned().collect();
        names.sort();
        names
    }
}

static GLOBAL: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry. Initialised lazily on first access; a mode
/// supervisor does not need to call anything special before using it, but
/// tests that require a pristine registry should run in separate processes
/// or route through [`Registry::new`] directly instead of this singleton.
pub fn global() -> &'static Registry {
    GLOBAL.get_or_init(Registry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_first_definition_wins() {
        let registry = Registry::new();
        let op = Arc::new(
            Operation::new(Some("A".into()), vec![], vec![], crate::value::Value::Nil, None, None, vec![])
                .unwrap(),
        );
        registry
            .put("A", RegistryEntry::Operation(op.clone()))
            .unwrap();
        let err = registry
            .put("A", RegistryEntry::Operation(op))
            .unwrap_err();
        assert_eq!(err, RegistryError::AlreadyDefined("A".into()));
    }

    #[test]
    fn get_missing_is_not_found() {
        let registry = Registry::new();
        let err = registry.get("missing").unwrap_err();
        assert_eq!(err, RegistryError::NotFound("missing".into()));
    }

    #[test]
    fn list_is_sorted() {
        let registry = Registry::new();
        let op = |n: &str| {
            RegistryEntry::Operation(Arc::new(
                Operation::new(Some(n.into()), vec![], vec![], crate::value::Value::Nil, None, None, vec![])
                    .unwrap(),
            ))
        };
        registry.put("Zebra", op("Zebra")).unwrap();
        registry.put("Alpha", op("Alpha")).unwrap();
        assert_eq!(registry.list(), vec!["Alpha".to_string(), "Zebra".to_string()]);
    }
}
