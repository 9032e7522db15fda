//! Worker mode: starts the registry (populated by the binary's own startup
//! code before this runs), the local worker runtime, and the transport,
//! then waits for a master to attach.

use std::net::SocketAddr;
use std::sync::Arc;

use skitter_core::node::NodeRef;
use skitter_runtime::Metrics;
use skitter_transport::{Mode, Transport};

use crate::agent::WorkerAgent;
use crate::error::DeployError;
use crate::modes::EXIT_PEER_DISCONNECTED;

pub struct WorkerConfig {
    pub bind: SocketAddr,
    pub masters: Vec<SocketAddr>,
    pub tags: Vec<String>,
    pub shutdown_with_master: bool,
}

/// Runs a worker node until the process is killed, or until
/// `shutdown_with_master` is set and the last attached master disconnects.
pub async fn run(config: WorkerConfig) -> Result<(), DeployError> {
    let node = NodeRef::from(config.bind.to_string().as_str());
    let transport = Transport::new(node.clone(), Mode::Worker);
    transport.listen(config.bind).await?;
    let metrics = Arc::new(Metrics::default());

    let mut hub = None;
    for master_addr in &config.masters {
        match transport.connect(*master_addr, Mode::Master, config.tags.clone()).await {
            Ok(master_node) => {
                tracing::info!(%master_node, "registered with master");
                hub = Some(master_node);
            }
            Err(err) => {
                tracing::warn!(%master_addr, error = %err, "failed to register with master");
            }
        }
    }

    let Some(hub) = hub.or_else(|| config.masters.first().map(|a| NodeRef::from(a.to_string().as_str()))) else {
        tracing::info!("worker started with no configured master; waiting for an inbound attachment");
        std::future::pending::<()>().await;
        unreachable!()
    };

    let _agent = WorkerAgent::new(node, hub.clone(), transport.clone(), metrics);

    if config.shutdown_with_master {
        let shutdown_hub = hub.clone();
        transport.membership.subscribe(Arc::new(move |down| {
            if *down == shutdown_hub {
                tracing::error!(master = %down, "master disconnected; shutting down (shutdown_with_master)");
                std::process::exit(EXIT_PEER_DISCONNECTED);
            }
        }));
    }

    std::future::pending::<()>().await;
    unreachable!()
}
