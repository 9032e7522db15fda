//! Shared error kinds that are not already scoped to a single module's own
//! error enum (`OperationError`, `StrategyError`, `ValidationError`,
//! `InvokeError`, `RegistryError`).

/// A summary classification used for logging/telemetry, independent of the
/// concrete error type that carries the detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Definition,
    Validation,
    Deploy,
    Remote,
    WorkerCrash,
    Delivery,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Definition => "definition_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Deploy => "deploy_error",
            ErrorKind::Remote => "remote_error",
            ErrorKind::WorkerCrash => "worker_crash",
            ErrorKind::Delivery => "delivery_error",
        };
        write!(f, "{s}")
    }
}
