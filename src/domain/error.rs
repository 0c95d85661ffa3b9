//! Error taxonomy for the orchestration core.
//!
//! One enum per subsystem, mirroring the vocabulary each component's
//! operations can fail with, plus a crate-wide aggregate for code that
//! spans subsystems (the runtime, the CLI).

use thiserror::Error;

/// Errors raised by the Message Bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("message bus used before start()")]
    NotStarted,

    #[error("message bus already started")]
    AlreadyStarted,

    #[error("publish denied by ACL for source {acl_source:?} on topic {topic}")]
    AclDenied { acl_source: String, topic: String },

    #[error("subscriber queue full, message dropped")]
    QueueFull,
}

impl BusError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull)
    }

    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors raised by the Immutable Log.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("failed to durably append log entry: {0}")]
    PersistenceError(String),

    #[error("log entry {id} is malformed: {reason}")]
    Malformed { id: u64, reason: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl LogError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_))
    }

    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors raised by the Clarity Kernel.
#[derive(Debug, Error)]
pub enum ClarityError {
    #[error("component {0} is not registered")]
    UnknownComponent(String),

    #[error("metric {metric} outside declared contract for component {component}")]
    ContractViolation { component: String, metric: String },

    #[error("component {0} is quarantined")]
    QuarantinedComponent(String),
}

/// Errors raised by the Verification Framework.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("rule {0} is already registered")]
    DuplicateRule(String),

    #[error("critical invariant violated: {0}")]
    CriticalViolation(String),

    #[error("remediation for rule {rule} failed: {reason}")]
    RemediationFailed { rule: String, reason: String },
}

/// Errors raised by the Unified Logic (governance) component.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("proposal {0} rejected by policy")]
    PolicyRejected(String),

    #[error("proposal {0} is missing required evidence")]
    MissingEvidence(String),
}

/// Errors raised by the Intent Governance Router.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("intent {0} requires human approval and cannot execute autonomously")]
    HumanApprovalRequired(String),

    #[error("intent {0} has an unknown type")]
    UnknownIntentType(String),
}

/// Errors raised by the Control Plane.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("kernel {0} is already registered")]
    DuplicateKernel(String),

    #[error("kernel {0} not found")]
    UnknownKernel(String),

    #[error("critical kernel {0} failed to reach running state within its boot timeout")]
    BootTimeout(String),

    #[error("operation on kernel {kernel} timed out after {elapsed_ms}ms")]
    Timeout { kernel: String, elapsed_ms: u64 },

    #[error("kernel {0} exhausted its restart budget; system is degraded")]
    RestartBudgetExhausted(String),
}

impl ControlPlaneError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub const fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

/// Errors raised by the watchdog/safeguard subsystems.
#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("trigger mesh circuit is open, refusing to forward events")]
    CircuitOpen,

    #[error("scheduler guard detected critical queue depth: {0}")]
    QueueDepthCritical(usize),

    #[error("HTM readiness check failed: fewer than {min_workers} live workers ({live} observed)")]
    InsufficientWorkers { min_workers: usize, live: usize },
}

/// Errors raised during the Boot Pipeline.
#[derive(Debug, Error)]
pub enum BootError {
    #[error("boot step {0} failed")]
    StepFailed(String),

    #[error("boot step {0} declares a dependency on unknown step {1}")]
    UnknownDependency(String, String),

    #[error("boot step {0} failed verification")]
    VerificationFailed(String),
}

/// Crate-wide aggregate error for code paths that cross subsystem
/// boundaries (the `Runtime`, the CLI entrypoint).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Clarity(#[from] ClarityError),

    #[error(transparent)]
    Verification(#[from] VerificationError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Watchdog(#[from] WatchdogError),

    #[error(transparent)]
    Boot(#[from] BootError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("irrecoverable internal error: {0}")]
    Internal(String),
}
