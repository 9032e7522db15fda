use skitter_core::descriptor::port::NodeId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("workflow validation failed: {0}")]
    Validation(#[from] skitter_core::descriptor::workflow::ValidationError),
    #[error("workflow contains a dependency cycle")]
    Cycle,
    #[error("deploy hook for node `{node}` failed: {reason}")]
    Hook { node: NodeId, reason: String },
    #[error("transport error: {0}")]
    Remote(#[from] skitter_transport::RemoteError),
    #[error("no connected worker node is available")]
    NoWorkerAvailable,
    #[error("deploy was called before the engine finished starting up")]
    NotReady,
}
