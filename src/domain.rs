//! Language-neutral value types for the VPC load-balancer domain: LoadBalancer,
//! Listener, Pool, PoolMember, HealthMonitor, Subnet. These mirror the cloud's
//! wire vocabulary closely enough to (de)serialize at the SDK port boundary,
//! but carry no cloud-specific behavior themselves.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStatus {
    Active,
    CreatePending,
    UpdatePending,
    DeletePending,
    MaintenancePending,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileFamily {
    Network,
    Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthMonitorType {
    Tcp,
    Http,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPersistence {
    None,
    SourceIp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyProtocol {
    Disabled,
    V1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberHealth {
    Ok,
    Faulted,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthMonitor {
    pub monitor_type: HealthMonitorType,
    pub port: i32,
    pub delay_secs: i32,
    pub max_retries: i32,
    pub timeout_secs: i32,
    pub url_path: Option<String>,
}

impl HealthMonitor {
    /// Build a TCP monitor against `port` using the spec-defined defaults.
    #[must_use]
    pub fn tcp(port: i32) -> Self {
        Self {
            monitor_type: HealthMonitorType::Tcp,
            port,
            delay_secs: crate::consts::DEFAULT_MONITOR_DELAY_SECS,
            max_retries: crate::consts::DEFAULT_MONITOR_MAX_RETRIES,
            timeout_secs: crate::consts::DEFAULT_MONITOR_TIMEOUT_SECS,
            url_path: None,
        }
    }

    /// Build an HTTP monitor against `port` with `/` as the probe path.
    #[must_use]
    pub fn http(port: i32) -> Self {
        Self {
            monitor_type: HealthMonitorType::Http,
            port,
            delay_secs: crate::consts::DEFAULT_MONITOR_DELAY_SECS,
            max_retries: crate::consts::DEFAULT_MONITOR_MAX_RETRIES,
            timeout_secs: crate::consts::DEFAULT_MONITOR_TIMEOUT_SECS,
            url_path: Some("/".to_string()),
        }
    }

    /// True if this monitor already matches the desired type+port; the planner
    /// only emits an UPDATE-POOL when this returns false.
    #[must_use]
    pub fn matches(&self, other: &Self) -> bool {
        self.monitor_type == other.monitor_type && self.port == other.port
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMember {
    pub id: String,
    pub target_ip: String,
    pub port: i32,
    pub health: MemberHealth,
    pub weight: i32,
    pub provisioning_status: ProvisioningStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub algorithm: String,
    pub health_monitor: HealthMonitor,
    pub session_persistence: SessionPersistence,
    pub proxy_protocol: ProxyProtocol,
    pub members: Vec<PoolMember>,
    pub provisioning_status: ProvisioningStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub port: i32,
    pub protocol: Protocol,
    pub default_pool_id: Option<String>,
    pub connection_limit: i32,
    pub provisioning_status: ProvisioningStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub zone: String,
    pub vpc_id: String,
    pub status: String,
    pub available_ipv4_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub is_public: bool,
    pub hostname: Option<String>,
    pub listener_ids: Vec<String>,
    pub pools: Vec<NamedRef>,
    pub subnets: Vec<NamedRef>,
    pub private_ips: Vec<String>,
    pub public_ips: Vec<String>,
    pub resource_group: NamedRef,
    pub profile_family: ProfileFamily,
    pub operating_status: OperatingStatus,
    pub provisioning_status: ProvisioningStatus,
}

impl LoadBalancer {
    /// "ready" iff online ∧ active.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.operating_status == OperatingStatus::Online
            && self.provisioning_status == ProvisioningStatus::Active
    }

    /// "NLB" iff profile family equals "network" (case-insensitive; the enum
    /// already normalizes case at the SDK boundary).
    #[must_use]
    pub fn is_nlb(&self) -> bool {
        self.profile_family == ProfileFamily::Network
    }

    /// A load balancer is owned by this cluster iff its name starts with
    /// `kube-<clusterID>-`.
    #[must_use]
    pub fn is_owned(&self, cluster_id: &str) -> bool {
        crate::naming::is_owned_lb_name(&self.name, cluster_id)
    }
}
