//! The `Operation` descriptor and the callback closures it carries.
//!
//! A callback here is a plain closure receiving a mutable state cell and an
//! emit sink, rather than a macro-rewritten clause set; `read?`/`write?`/
//! `emit?` are declared explicitly by the builder rather than inferred from
//! source.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::descriptor::port::PortName;
use crate::descriptor::strategy::Strategy;
use crate::value::Value;

/// Mutable cell a callback body reads and writes through: every branch in
/// the closure body mutates the same reference rather than threading state
/// through a return tuple.
pub type CallbackState = Value;
pub type CallbackConfig = Value;

/// Sink a callback writes emitted values to, preserving per-port insertion
/// order.
#[derive(Debug, Default, Clone)]
pub struct EmitSink {
    ports: Vec<(PortName, Value)>,
}

impl EmitSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, port: impl Into<PortName>, value: impl Into<Value>) {
        self.ports.push((port.into(), value.into()));
    }

    /// Group accumulated emissions by port, preserving per-port order.
    pub fn into_emits(self) -> HashMap<PortName, Vec<Value>> {
        let mut out: HashMap<PortName, Vec<Value>> = HashMap::new();
        for (port, value) in self.ports {
            out.entry(port).or_default().push(value);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

type CallbackFn =
    dyn Fn(&mut CallbackState, &CallbackConfig, &[Value], &mut EmitSink) -> Value + Send + Sync;

/// A named function inside an `Operation`.
#[derive(Clone)]
pub struct Callback {
    pub(crate) name: String,
    pub(crate) arity: usize,
    pub(crate) read: bool,
    pub(crate) write: bool,
    pub(crate) emit: bool,
    function: Arc<CallbackFn>,
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("read", &self.read)
            .field("write", &self.write)
            .field("emit", &self.emit)
            .finish_non_exhaustive()
    }
}

impl Callback {
    pub fn new(
        name: impl Into<String>,
        arity: usize,
        read: bool,
        write: bool,
        emit: bool,
        function: impl Fn(&mut CallbackState, &CallbackConfig, &[Value], &mut EmitSink) -> Value
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            arity,
            read,
            write,
            emit,
            function: Arc::new(function),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn read(&self) -> bool {
        self.read
    }

    pub fn write(&self) -> bool {
        self.write
    }

    pub fn emit(&self) -> bool {
        self.emit
    }

    pub(crate) fn invoke(
        &self,
        state: &mut CallbackState,
        config: &CallbackConfig,
        args: &[Value],
        emits: &mut EmitSink,
    ) -> Value {
        (self.function)(state, config, args, emits)
    }
}

/// A key identifying a callback inside an operation: `(name, arity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackKey {
    pub name: String,
    pub arity: usize,
}

impl CallbackKey {
    pub fn new(name: impl Into<String>, arity: usize) -> Self {
        Self {
            name: name.into(),
            arity,
        }
    }
}

/// Immutable pure-data-processing descriptor.
#[derive(Clone)]
pub struct Operation {
    pub name: Option<String>,
    pub in_ports: Vec<PortName>,
    pub out_ports: Vec<PortName>,
    pub initial_state: Value,
    pub state_struct: Option<Vec<(String, Value)>>,
    pub default_strategy: Option<Arc<Strategy>>,
    callbacks: HashMap<CallbackKey, Callback>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OperationError {
    #[error("duplicate port name within one port list: {0}")]
    DuplicatePort(String),
    #[error("in_ports and out_ports are not disjoint: {0}")]
    PortOverlap(String),
}

impl Operation {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: Option<String>,
        in_ports: Vec<PortName>,
        out_ports: Vec<PortName>,
        initial_state: Value,
        state_struct: Option<Vec<(String, Value)>>,
        default_strategy: Option<Arc<Strategy>>,
        callbacks: Vec<Callback>,
    ) -> Result<Self, OperationError> {
        Self::check_unique(&in_ports)?;
        Self::check_unique(&out_ports)?;
        for p in &in_ports {
            if out_ports.contains(p) {
                return Err(OperationError::PortOverlap(p.to_string()));
            }
        }
        let callbacks = callbacks
            .into_iter()
            .map(|cb| (CallbackKey::new(cb.name.clone(), cb.arity), cb))
            .collect();
        Ok(Self {
            name,
            in_ports,
            out_ports,
            initial_state,
            state_struct,
            default_strategy,
            callbacks,
        })
    }

    fn check_unique(ports: &[PortName]) -> Result<(), OperationError> {
        let mut seen = std::collections::HashSet::new();
        for p in ports {
            if !seen.insert(p) {
                return Err(OperationError::DuplicatePort(p.to_string()));
            }
        }
        Ok(())
    }

    pub fn callback(&self, key: &CallbackKey) -> Option<&Callback> {
        self.callbacks.get(key)
    }

    pub fn has_in_port(&self, port: &PortName) -> bool {
        self.in_ports.contains(port)
    }

    pub fn has_out_port(&self, port: &PortName) -> bool {
        self.out_ports.contains(port)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("name", &self.name)
            .field("in_ports", &self.in_ports)
            .field("out_ports", &self.out_ports)
            .field("callbacks", &self.callbacks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

// Descriptors are compared/looked-up by name, not by structural content:
// callbacks and hooks are closures with no meaningful `Eq`. Two operations
// with the same name are the same descriptor for registry purposes.
impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.name.is_some() && self.name == other.name
    }
}
impl Eq for Operation {}
