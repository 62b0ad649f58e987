use thiserror::Error;

/// Errors from pool/load-balancer name generation and parsing (§4.2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NamingError {
    #[error("Invalid pool name: {0}")]
    InvalidPoolName(String),
}

/// Errors from `[provider]`/`[kubernetes]` configuration validation (§4.3).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required cloud configuration setting: {0}")]
    MissingSetting(&'static str),
    #[error("Invalid cloud configuration setting")]
    InvalidProvider,
}

/// Errors from node/subnet filtering and selector/annotation validation (§4.4).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    #[error("Cannot parse node filter: {0}")]
    InvalidNodeFilter(String),
    #[error("invalid VPC subnet: {0}")]
    InvalidVpcSubnet(String),
    #[error("no cluster subnets in zone {0}")]
    NoSubnetsInZone(String),
}

/// Errors from the cloud SDK port (§4.1). Carries the cloud's retrievable
/// status code when one was returned.
#[derive(Debug, Error, Clone)]
#[error("{message}")]
pub struct SdkError {
    pub message: String,
    pub status: Option<u16>,
}

impl SdkError {
    #[must_use]
    pub fn new(message: impl Into<String>, status: Option<u16>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(message, Some(404))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.status == Some(409)
    }
}

/// Errors from planning (malformed pool name observed on an owned LB, or a
/// rejected immutable-attribute change, §4.5.5).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PlannerError {
    #[error(transparent)]
    Naming(#[from] NamingError),
    #[error("setting can not be changed")]
    ImmutableAttributeChanged,
    #[error("Only TCP is supported")]
    UdpNotSupported,
}

/// Top-level reconcile error surfaced by the executor/façade (§4.6, §7).
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Filter(#[from] FilterError),
    #[error(transparent)]
    Planner(#[from] PlannerError),
    #[error("cloud SDK error: {0}")]
    Sdk(#[from] SdkError),
    #[error("kube API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("LoadBalancer is busy")]
    Busy,
    #[error("no available nodes")]
    NoAvailableNodes,
    #[error("finalizer update failed: {0}")]
    Finalizer(String),
}

impl From<ClassicError> for ReconcileError {
    fn from(err: ClassicError) -> Self {
        Self::Finalizer(err.to_string())
    }
}

impl ReconcileError {
    /// Validation-class errors (§7): fatal for this reconcile, not helped by
    /// retrying until the Service is fixed.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Filter(_) | Self::Planner(_) | Self::NoAvailableNodes
        )
    }

    /// Busy-class errors (§7): non-fatal, the next controller tick retries.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy) || matches!(self, Self::Sdk(e) if e.is_busy())
    }
}

/// Errors from the classic-provider keepalived-pod endpoint watcher (§4.7).
pub type ClassicResult<T> = Result<T, ClassicError>;

#[derive(Debug, Error)]
pub enum ClassicError {
    #[error("Cannot parse node filter: {0}")]
    InvalidNodeFilter(#[from] FilterError),
    #[error("Unsupported service type")]
    UnsupportedServiceType,
    #[error("Service was skipped")]
    SkipService,
    #[error("Cannot parse integer value: {0}")]
    ParseIntError(#[from] std::num::ParseIntError),
    #[error("Cannot parse boolean value: {0}")]
    ParseBoolError(#[from] std::str::ParseBoolError),
    #[error("Kube error: {0}")]
    KubeError(#[from] kube::Error),
    #[error("Cannot get target nodes, because the service has no selector")]
    ServiceWithoutSelector,
}
