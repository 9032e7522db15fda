//! Deployment engine, emit router, and mode supervisors for skitter
//! (components C6, C7, C9).

pub mod agent;
pub mod engine;
pub mod error;
pub mod hook_api;
pub mod modes;
mod registry_lookup;

pub use agent::{WorkerAgent, WorkerAgentHookApi};
pub use engine::DeployEngine;
pub use error::DeployError;
pub use hook_api::EngineHookApi;
