//! Master mode (and the one-shot `deploy` CLI command, which is a master
//! that requires `deploy` to be set and typically does not outlive its
//! workers): starts the registry, the transport, and the deployment
//! engine, connects to the configured workers, then deploys.

use std::net::SocketAddr;
use std::sync::Arc;

use skitter_core::descriptor::workflow::Workflow;
use skitter_core::node::NodeRef;
use skitter_core::registry::{global, RegistryEntry};
use skitter_runtime::Metrics;
use skitter_transport::{Mode, Transport};

use crate::engine::DeployEngine;
use crate::error::DeployError;
use crate::modes::EXIT_PEER_DISCONNECTED;

pub struct MasterConfig {
    pub bind: SocketAddr,
    pub workers: Vec<SocketAddr>,
    /// Name of a workflow registered via [`skitter_core::registry`], looked
    /// up and deployed on startup if set.
    pub deploy: Option<String>,
    pub shutdown_with_workers: bool,
}

pub(crate) fn lookup_workflow(name: &str) -> Result<Arc<Workflow>, DeployError> {
    match global().get(name) {
        Ok(RegistryEntry::Workflow(w)) => Ok(w),
        _ => Err(DeployError::Hook {
            node: skitter_core::descriptor::port::NodeId::new(name),
            reason: format!("`{name}` is not a registered workflow"),
        }),
    }
}

/// Runs a master node: connects to every configured worker (a connection
/// failure here is fatal), deploys `config.deploy` if set, then runs until
/// killed or, if `shutdown_with_workers` is set, until any connected worker
/// disconnects.
pub async fn run(config: MasterConfig) -> Result<(), DeployError> {
    let node = NodeRef::from(config.bind.to_string().as_str());
    let transport = Transport::new(node.clone(), Mode::Master);
    transport.listen(config.bind).await?;
    let metrics = Arc::new(Metrics::default());
    let engine = DeployEngine::new(node, transport.clone(), metrics);

    for worker_addr in &config.workers {
        transport
            .connect(worker_addr.to_owned(), Mode::Worker, vec![])
            .await?;
    }

    if let Some(name) = &config.deploy {
        let workflow = lookup_workflow(name)?;
        engine.deploy((*workflow).clone())?;
        tracing::info!(workflow = %name, "deployed configured workflow");
    }

    if config.shutdown_with_workers {
        let shutdown_engine = engine.clone();
        transport.membership.subscribe(Arc::new(move |down| {
            tracing::error!(worker = %down, "worker disconnected; undeploying and shutting down (shutdown_with_workers)");
            shutdown_engine.undeploy();
            std::process::exit(EXIT_PEER_DISCONNECTED);
        }));
    } else {
        let undeploy_engine = engine.clone();
        transport.membership.subscribe(Arc::new(move |down| {
            tracing::warn!(worker = %down, "worker disconnected; re-issuing undeploy to surviving nodes");
            undeploy_engine.undeploy();
        }));
    }

    std::future::pending::<()>().await;
    unreachable!()
}
