// Classic-provider label (keepalived pod placement, DaemonSet-style).
pub const LB_NAME_LABEL_NAME: &str = "lb-tracker/balancer";

pub const FINALIZER_NAME: &str = "vpclb.cloud-provider.kubernetes.io/finalizer";

// Service annotation keys (VPC provider). All share the cloud-provider prefix.
pub const ANN_ENABLE_FEATURES: &str =
    "service.kubernetes.io/ibm-load-balancer-cloud-provider-enable-features";
pub const ANN_IP_TYPE: &str = "service.kubernetes.io/ibm-load-balancer-cloud-provider-ip-type";
pub const ANN_VPC_LB_NAME: &str =
    "service.kubernetes.io/ibm-load-balancer-cloud-provider-vpc-lb-name";
pub const ANN_VPC_NODE_SELECTOR: &str =
    "service.kubernetes.io/ibm-load-balancer-cloud-provider-vpc-node-selector";
pub const ANN_VPC_SUBNETS: &str =
    "service.kubernetes.io/ibm-load-balancer-cloud-provider-vpc-subnets";
pub const ANN_ZONE: &str = "service.kubernetes.io/ibm-load-balancer-cloud-provider-zone";

pub const FEATURE_PROXY_PROTOCOL: &str = "proxy-protocol";
pub const FEATURE_IPVS: &str = "ipvs";

pub const IP_TYPE_PUBLIC: &str = "public";
pub const IP_TYPE_PRIVATE: &str = "private";

// Node labels (VPC provider).
pub const LABEL_ZONE: &str = "ibm-cloud.kubernetes.io/zone";
pub const LABEL_INTERNAL_IP: &str = "ibm-cloud.kubernetes.io/internal-ip";
pub const LABEL_DEDICATED: &str = "dedicated";
pub const LABEL_DEDICATED_EDGE_VALUE: &str = "edge";

/// Allow-list of node-selector labels honored by the `vpc-node-selector` annotation.
/// Anything else is silently ignored per spec.
pub const ALLOWED_NODE_SELECTOR_LABELS: &[&str] = &[
    "ibm-cloud.kubernetes.io/zone",
    "ibm-cloud.kubernetes.io/region",
    "ibm-cloud.kubernetes.io/worker-id",
    "ibm-cloud.kubernetes.io/internal-ip",
    "topology.kubernetes.io/zone",
    "topology.kubernetes.io/region",
    "kubernetes.io/hostname",
    "node.kubernetes.io/instance-type",
    "dedicated",
];

// LoadBalancer naming.
pub const LB_NAME_PREFIX: &str = "kube";
pub const LB_NAME_MAX_LEN: usize = 63;

// Pool defaults.
pub const DEFAULT_POOL_WEIGHT: i32 = 50;
pub const DEFAULT_MONITOR_DELAY_SECS: i32 = 5;
pub const DEFAULT_MONITOR_MAX_RETRIES: i32 = 2;
pub const DEFAULT_MONITOR_TIMEOUT_SECS: i32 = 2;
pub const DEFAULT_CONNECTION_LIMIT: i32 = 15000;

// Readiness polling defaults (EnsureLoadBalancer executor).
pub const DEFAULT_MIN_SLEEP_SECS: u64 = 8;
pub const DEFAULT_MAX_WAIT_SECS: u64 = 120;

// Per-request SDK timeout.
pub const SDK_REQUEST_TIMEOUT_SECS: u64 = 90;

// Node metadata cache TTL.
pub const NODE_CACHE_TTL_SECS: u64 = 600;

// Background watcher panic-recovery cooldown.
pub const WATCHER_PANIC_COOLDOWN_SECS: u64 = 10;

// Monitor tick interval.
pub const MONITOR_TICK_SECS: u64 = 60;

pub const EVENT_REASON_NORMAL: &str = "CloudVPCLoadBalancerNormalEvent";
pub const EVENT_REASON_CREATE_FAILED: &str = "CreatingCloudLoadBalancerFailed";
pub const EVENT_REASON_DELETE_FAILED: &str = "DeletingCloudLoadBalancerFailed";
pub const EVENT_REASON_GET_FAILED: &str = "GettingCloudLoadBalancerFailed";
pub const EVENT_REASON_UPDATE_FAILED: &str = "UpdatingCloudLoadBalancerFailed";
pub const EVENT_REASON_VERIFY_FAILED: &str = "VerifyingCloudLoadBalancerFailed";
