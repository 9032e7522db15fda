//! Descriptor model, registry, and callback invoker for skitter.
//!
//! This crate has no dependency on the scheduler ([`skitter_runtime`]) or
//! transport ([`skitter_transport`]) crates; [`descriptor::strategy::HookApi`]
//! is the seam those crates implement against.

pub mod context;
pub mod descriptor;
pub mod error;
pub mod invoke;
pub mod node;
pub mod registry;
pub mod value;
pub mod worker_handle;

pub use context::{Context, Invocation};
pub use descriptor::operation::{Callback, CallbackKey, EmitSink, Operation, OperationError};
pub use descriptor::port::{NodeId, PortName};
pub use descriptor::strategy::{HookApi, Hooks, Strategy, StrategyError};
pub use descriptor::workflow::{flatten, Links, Node, ValidationError, Workflow};
pub use invoke::{call, call_if_exists, CallResult, InvokeError};
pub use node::{NodeRef, NodeSelector};
pub use registry::{Registry, RegistryEntry, RegistryError};
pub use value::Value;
pub use worker_handle::{WorkerHandle, WorkerId};
