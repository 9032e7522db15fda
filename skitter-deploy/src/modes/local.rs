//! Local mode: starts C2–C8 in one address space. No transport listener is
//! bound; workers are tasks on the same Tokio runtime as the engine.

use std::sync::Arc;

use skitter_core::node::NodeRef;
use skitter_runtime::Metrics;
use skitter_transport::{Mode, Transport};

use crate::engine::DeployEngine;
use crate::error::DeployError;

pub struct LocalConfig {
    pub deploy: Option<String>,
}

/// Starts a local-mode engine, optionally deploys `config.deploy`
/// immediately, and returns it — the caller (CLI entry point, or a test)
/// decides how long to keep it alive.
pub async fn start(config: LocalConfig) -> Result<Arc<DeployEngine>, DeployError> {
    let node = NodeRef::local();
    let transport = Transport::new(node.clone(), Mode::Local);
    let metrics = Arc::new(Metrics::default());
    let engine = DeployEngine::new(node, transport, metrics);

    if let Some(name) = &config.deploy {
        let workflow = super::master::lookup_workflow(name)?;
        engine.deploy((*workflow).clone())?;
        tracing::info!(workflow = %name, "deployed configured workflow");
    }

    Ok(engine)
}
