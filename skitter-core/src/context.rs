//! Per-hook-call context.

use std::sync::Arc;

use crate::descriptor::operation::Operation;
use crate::value::Value;

/// Correlation token attached to a value as it propagates from a source
/// through emits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Invocation(pub String);

impl Invocation {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

/// Bundle exposed to a strategy hook: the descriptor of the *node* being
/// served, that node's deploy-time `args`, and its frozen `deployment` value
/// (`Value::Nil` while `deploy` itself is still running).
#[derive(Clone)]
pub struct Context {
    pub component: Arc<Operation>,
    pub args: Value,
    pub deployment: Value,
    pub invocation: Option<Invocation>,
}

impl Context {
    pub fn new(component: Arc<Operation>, args: Value) -> Self {
        Self {
            component,
            args,
            deployment: Value::Nil,
            invocation: None,
        }
    }

    pub fn with_deployment(mut self, deployment: Value) -> Self {
        self.deployment = deployment;
        self
    }

    pub fn with_invocation(mut self, invocation: Option<Invocation>) -> Self {
        self.invocation = invocation;
        self
    }
}
