//! Reconciliation planner (§4.5) — pure functions from (actual, desired) to
//! an ordered list of cloud-API mutations. No I/O happens here; the executor
//! (`executor.rs`) is the only module allowed to call the SDK port.

use std::collections::{HashMap, HashSet};

use crate::domain::{HealthMonitor, Listener, LoadBalancer, Pool, Protocol};
use crate::error::PlannerError;
use crate::naming;

/// One Service port, already resolved to its node port (`kube-proxy`'s
/// externally reachable port on every eligible node).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DesiredPort {
    pub protocol: Protocol,
    pub port: i32,
    pub node_port: i32,
}

/// `externalTrafficPolicy` + `healthCheckNodePort`, used to derive the health
/// monitor for every pool (§3 HealthMonitor derivation rules).
#[derive(Debug, Clone, Copy)]
pub struct TrafficPolicy {
    pub local: bool,
    pub health_check_node_port: Option<i32>,
}

impl TrafficPolicy {
    #[must_use]
    pub fn derive_health_monitor(&self, node_port: i32) -> HealthMonitor {
        if self.local {
            if let Some(hcnp) = self.health_check_node_port {
                if hcnp > 0 {
                    return HealthMonitor::http(hcnp);
                }
            }
        }
        HealthMonitor::tcp(node_port)
    }
}

/// Desired shape of the load balancer, derived from the Service spec, its
/// resolved node set, and (if present) its resolved subnet annotation.
#[derive(Debug, Clone)]
pub struct DesiredState {
    pub is_public: bool,
    /// `Some` iff the `vpc-subnets` annotation was present; used only for
    /// the immutability check (§4.5.5) — subnet selection itself happens
    /// before planning, at LB-creation time.
    pub resolved_subnet_ids: Option<Vec<String>>,
    pub ports: Vec<DesiredPort>,
    pub node_ips: Vec<String>,
    pub traffic_policy: TrafficPolicy,
}

/// The seven mutation kinds from §4.5.1, each carrying its documented
/// argument tuple.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateListener { pool_name: String },
    CreatePool { pool_name: String },
    CreatePoolMember { pool_name: String, pool_id: String, node_ip: String },
    DeleteListener { pool_name: String, listener_id: String },
    DeletePool { pool_name: String, pool_id: String },
    DeletePoolMember { pool_name: String, pool_id: String, member_id: String, node_ip: String },
    UpdatePool { pool_name: String, pool_id: String },
    ReplacePoolMembers { pool_name: String, pool_id: String },
}

impl Mutation {
    #[must_use]
    pub fn pool_id(&self) -> Option<&str> {
        match self {
            Self::CreatePoolMember { pool_id, .. }
            | Self::DeletePoolMember { pool_id, .. }
            | Self::UpdatePool { pool_id, .. }
            | Self::ReplacePoolMembers { pool_id, .. }
            | Self::DeletePool { pool_id, .. } => Some(pool_id),
            Self::CreateListener { .. } | Self::CreatePool { .. } | Self::DeleteListener { .. } => None,
        }
    }
}

/// Reject update requests that would change an immutable attribute (§4.5.5).
pub fn check_immutability(desired: &DesiredState, actual_lb: &LoadBalancer) -> Result<(), PlannerError> {
    if desired.is_public != actual_lb.is_public {
        return Err(PlannerError::ImmutableAttributeChanged);
    }
    if let Some(subnet_ids) = &desired.resolved_subnet_ids {
        let mut desired_sorted = subnet_ids.clone();
        desired_sorted.sort();
        let mut actual_sorted: Vec<String> = actual_lb.subnets.iter().map(|s| s.id.clone()).collect();
        actual_sorted.sort();
        if desired_sorted != actual_sorted {
            return Err(PlannerError::ImmutableAttributeChanged);
        }
    }
    Ok(())
}

/// Compute the ordered mutation plan for an existing, ready load balancer.
pub fn plan(
    desired: &DesiredState,
    actual_lb: &LoadBalancer,
    actual_listeners: &[Listener],
    actual_pools: &[Pool],
) -> Result<Vec<Mutation>, PlannerError> {
    check_immutability(desired, actual_lb)?;

    if desired.ports.iter().any(|p| p.protocol == Protocol::Udp) {
        return Err(PlannerError::UdpNotSupported);
    }

    struct ParsedPool<'a> {
        pool: &'a Pool,
        protocol: Protocol,
        port: i32,
    }

    let mut parsed_pools = Vec::with_capacity(actual_pools.len());
    for pool in actual_pools {
        let (protocol, port, _node_port) = naming::parse_pool_name(&pool.name)?;
        parsed_pools.push(ParsedPool { pool, protocol, port });
    }

    let desired_by_protoport: HashMap<(Protocol, i32), &DesiredPort> =
        desired.ports.iter().map(|p| ((p.protocol, p.port), p)).collect();

    let pool_name_by_id: HashMap<&str, &str> =
        actual_pools.iter().map(|p| (p.id.as_str(), p.name.as_str())).collect();

    // Step 1: DELETE-LISTENER for ports no longer on the Service.
    let mut step1 = Vec::new();
    for listener in actual_listeners {
        if !desired_by_protoport.contains_key(&(listener.protocol, listener.port)) {
            let pool_name = listener
                .default_pool_id
                .as_deref()
                .and_then(|id| pool_name_by_id.get(id).copied())
                .unwrap_or_default()
                .to_string();
            step1.push(Mutation::DeleteListener {
                pool_name,
                listener_id: listener.id.clone(),
            });
        }
    }

    // Step 2: DELETE-POOL for ports no longer on the Service; tombstone them.
    let mut step2 = Vec::new();
    let mut deleted_pool_ids: HashSet<String> = HashSet::new();
    for pp in &parsed_pools {
        if !desired_by_protoport.contains_key(&(pp.protocol, pp.port)) {
            step2.push(Mutation::DeletePool {
                pool_name: pp.pool.name.clone(),
                pool_id: pp.pool.id.clone(),
            });
            deleted_pool_ids.insert(pp.pool.id.clone());
        }
    }

    // Steps 3-5: per surviving pool, detect node-port rename, traffic-policy
    // driven monitor changes, and member diffs.
    let mut step3 = Vec::new();
    let mut step4 = Vec::new();
    let mut step5 = Vec::new();
    let mut matched: HashSet<(Protocol, i32)> = HashSet::new();

    for pp in &parsed_pools {
        if deleted_pool_ids.contains(&pp.pool.id) {
            continue;
        }
        let Some(desired_port) = desired_by_protoport.get(&(pp.protocol, pp.port)) else {
            continue;
        };
        matched.insert((pp.protocol, pp.port));

        let desired_pool_name = naming::generate_pool_name(pp.protocol, pp.port, desired_port.node_port);
        if desired_pool_name != pp.pool.name {
            // Node-port change: UPDATE-POOL (rename + monitor) followed by
            // REPLACE-POOL-MEMBERS, emitted unconditionally by this step
            // regardless of what the delete-member step above would have
            // observed (§9 Open Question resolution).
            step4.push(Mutation::UpdatePool {
                pool_name: desired_pool_name.clone(),
                pool_id: pp.pool.id.clone(),
            });
            step4.push(Mutation::ReplacePoolMembers {
                pool_name: desired_pool_name,
                pool_id: pp.pool.id.clone(),
            });
            continue;
        }

        let desired_monitor = desired.traffic_policy.derive_health_monitor(desired_port.node_port);
        if !pp.pool.health_monitor.matches(&desired_monitor) {
            step4.push(Mutation::UpdatePool {
                pool_name: pp.pool.name.clone(),
                pool_id: pp.pool.id.clone(),
            });
        }

        for member in &pp.pool.members {
            let eligible = member.port == desired_port.node_port
                && desired.node_ips.iter().any(|ip| ip == &member.target_ip);
            if !eligible {
                step3.push(Mutation::DeletePoolMember {
                    pool_name: pp.pool.name.clone(),
                    pool_id: pp.pool.id.clone(),
                    member_id: member.id.clone(),
                    node_ip: member.target_ip.clone(),
                });
            }
        }
        for ip in &desired.node_ips {
            let present = pp
                .pool
                .members
                .iter()
                .any(|m| &m.target_ip == ip && m.port == desired_port.node_port);
            if !present {
                step5.push(Mutation::CreatePoolMember {
                    pool_name: pp.pool.name.clone(),
                    pool_id: pp.pool.id.clone(),
                    node_ip: ip.clone(),
                });
            }
        }
    }

    // Step 6: CREATE-POOL for new ports, CREATE-LISTENER following it.
    let mut step6 = Vec::new();
    let existing_listener_protoports: HashSet<(Protocol, i32)> =
        actual_listeners.iter().map(|l| (l.protocol, l.port)).collect();
    for desired_port in &desired.ports {
        let pool_name = naming::generate_pool_name(desired_port.protocol, desired_port.port, desired_port.node_port);
        if !matched.contains(&(desired_port.protocol, desired_port.port)) {
            step6.push(Mutation::CreatePool { pool_name: pool_name.clone() });
        }
        if !existing_listener_protoports.contains(&(desired_port.protocol, desired_port.port)) {
            step6.push(Mutation::CreateListener { pool_name });
        }
    }

    let (step3, step5, batched) = batch_member_ops(step3, step5);
    step4.extend(batched);

    let mut mutations = Vec::with_capacity(step1.len() + step2.len() + step3.len() + step4.len() + step5.len() + step6.len());
    mutations.extend(step1);
    mutations.extend(step2);
    mutations.extend(step3);
    mutations.extend(step4);
    mutations.extend(step5);
    mutations.extend(step6);
    Ok(mutations)
}

/// §4.5.4 batch optimisation: any pool with ≥2 per-member ops (create+delete
/// combined) has all of its per-member ops replaced by a single
/// REPLACE-POOL-MEMBERS. Returns the filtered delete/create lists plus the
/// batched REPLACE-POOL-MEMBERS mutations (destined for the step-4 slot).
fn batch_member_ops(
    deletes: Vec<Mutation>,
    creates: Vec<Mutation>,
) -> (Vec<Mutation>, Vec<Mutation>, Vec<Mutation>) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut names: HashMap<String, String> = HashMap::new();
    for m in deletes.iter().chain(creates.iter()) {
        if let Some(id) = m.pool_id() {
            *counts.entry(id.to_string()).or_default() += 1;
            if let Mutation::DeletePoolMember { pool_name, .. } | Mutation::CreatePoolMember { pool_name, .. } = m {
                names.insert(id.to_string(), pool_name.clone());
            }
        }
    }

    let batched_pool_ids: HashSet<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(id, _)| id)
        .collect();

    let keep = |m: &Mutation| match m.pool_id() {
        Some(id) => !batched_pool_ids.contains(id),
        None => true,
    };

    let filtered_deletes: Vec<Mutation> = deletes.into_iter().filter(keep).collect();
    let filtered_creates: Vec<Mutation> = creates.into_iter().filter(keep).collect();

    let batched: Vec<Mutation> = batched_pool_ids
        .into_iter()
        .map(|pool_id| Mutation::ReplacePoolMembers {
            pool_name: names.get(&pool_id).cloned().unwrap_or_default(),
            pool_id,
        })
        .collect();

    (filtered_deletes, filtered_creates, batched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        HealthMonitorType, MemberHealth, NamedRef, OperatingStatus, PoolMember, ProfileFamily,
        ProvisioningStatus, ProxyProtocol, SessionPersistence,
    };

    fn lb(is_public: bool, subnet_ids: &[&str]) -> LoadBalancer {
        LoadBalancer {
            id: "lb-1".into(),
            name: "kube-cluster1-abc123".into(),
            is_public,
            hostname: Some("lb.example.com".into()),
            listener_ids: vec![],
            pools: vec![],
            subnets: subnet_ids
                .iter()
                .map(|id| NamedRef { id: (*id).to_string(), name: (*id).to_string() })
                .collect(),
            private_ips: vec![],
            public_ips: vec![],
            resource_group: NamedRef { id: "rg-1".into(), name: "default".into() },
            profile_family: ProfileFamily::Application,
            operating_status: OperatingStatus::Online,
            provisioning_status: ProvisioningStatus::Active,
        }
    }

    fn member(id: &str, ip: &str, port: i32) -> PoolMember {
        PoolMember {
            id: id.into(),
            target_ip: ip.into(),
            port,
            health: MemberHealth::Ok,
            weight: 50,
            provisioning_status: ProvisioningStatus::Active,
        }
    }

    fn pool(id: &str, name: &str, monitor_port: i32, members: Vec<PoolMember>) -> Pool {
        Pool {
            id: id.into(),
            name: name.into(),
            algorithm: "round_robin".into(),
            health_monitor: HealthMonitor::tcp(monitor_port),
            session_persistence: SessionPersistence::None,
            proxy_protocol: ProxyProtocol::Disabled,
            members,
            provisioning_status: ProvisioningStatus::Active,
        }
    }

    fn listener(id: &str, port: i32, pool_id: &str) -> Listener {
        Listener {
            id: id.into(),
            port,
            protocol: Protocol::Tcp,
            default_pool_id: Some(pool_id.into()),
            connection_limit: 15000,
            provisioning_status: ProvisioningStatus::Active,
        }
    }

    fn cluster_policy() -> TrafficPolicy {
        TrafficPolicy { local: false, health_check_node_port: None }
    }

    /// S2: node added, everything else unchanged.
    #[test]
    fn s2_node_added_creates_one_member() {
        let actual_lb = lb(true, &[]);
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, vec![member("m1", "10.0.0.1", 30303)])];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 80, node_port: 30303 }],
            node_ips: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        assert_eq!(
            result,
            vec![Mutation::CreatePoolMember {
                pool_name: "tcp-80-30303".into(),
                pool_id: "pool-1".into(),
                node_ip: "10.0.0.2".into(),
            }]
        );
    }

    /// S3: node port changed 80->31313 (nodePort 30303->31313 at same ext port 80).
    #[test]
    fn s3_node_port_change_updates_and_replaces() {
        let actual_lb = lb(true, &[]);
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, vec![member("m1", "10.0.0.1", 30303)])];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 80, node_port: 31313 }],
            node_ips: vec!["10.0.0.1".to_string()],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        assert_eq!(
            result,
            vec![
                Mutation::UpdatePool { pool_name: "tcp-80-31313".into(), pool_id: "pool-1".into() },
                Mutation::ReplacePoolMembers { pool_name: "tcp-80-31313".into(), pool_id: "pool-1".into() },
            ]
        );
    }

    /// S4: port removed (80) + port added (443).
    #[test]
    fn s4_port_removed_and_added_preserves_ordering() {
        let actual_lb = lb(true, &[]);
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, vec![member("m1", "10.0.0.1", 30303)])];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 443, node_port: 31313 }],
            node_ips: vec!["10.0.0.1".to_string()],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        assert_eq!(
            result,
            vec![
                Mutation::DeleteListener { pool_name: "tcp-80-30303".into(), listener_id: "l1".into() },
                Mutation::DeletePool { pool_name: "tcp-80-30303".into(), pool_id: "pool-1".into() },
                Mutation::CreatePool { pool_name: "tcp-443-31313".into() },
                Mutation::CreateListener { pool_name: "tcp-443-31313".into() },
            ]
        );
    }

    /// S5: batch — node set changes from {n1,n2,n3} to {n1,n4,n5,n6}: 2
    /// deletes + 3 creates collapse into one REPLACE-POOL-MEMBERS.
    #[test]
    fn s5_batches_member_ops_above_threshold() {
        let actual_lb = lb(true, &[]);
        let members = vec![
            member("m1", "10.0.0.1", 30303),
            member("m2", "10.0.0.2", 30303),
            member("m3", "10.0.0.3", 30303),
        ];
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, members)];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 80, node_port: 30303 }],
            node_ips: vec![
                "10.0.0.1".to_string(),
                "10.0.0.4".to_string(),
                "10.0.0.5".to_string(),
                "10.0.0.6".to_string(),
            ],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        assert_eq!(
            result,
            vec![Mutation::ReplacePoolMembers { pool_name: "tcp-80-30303".into(), pool_id: "pool-1".into() }]
        );
    }

    /// Property: DELETE-LISTENER always precedes DELETE-POOL for the same pool.
    #[test]
    fn property_delete_listener_precedes_delete_pool() {
        let actual_lb = lb(true, &[]);
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, vec![])];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![],
            node_ips: vec![],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        let listener_pos = result.iter().position(|m| matches!(m, Mutation::DeleteListener { .. })).unwrap();
        let pool_pos = result.iter().position(|m| matches!(m, Mutation::DeletePool { .. })).unwrap();
        assert!(listener_pos < pool_pos);
    }

    #[test]
    fn property_create_pool_precedes_its_listener() {
        let actual_lb = lb(true, &[]);
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 80, node_port: 30303 }],
            node_ips: vec!["10.0.0.1".to_string()],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &[], &[]).unwrap();
        let pool_pos = result.iter().position(|m| matches!(m, Mutation::CreatePool { .. })).unwrap();
        let listener_pos = result.iter().position(|m| matches!(m, Mutation::CreateListener { .. })).unwrap();
        assert!(pool_pos < listener_pos);
    }

    /// Property: idempotence — an unchanged desired/actual pair yields an
    /// empty plan.
    #[test]
    fn property_idempotence_empty_plan_when_converged() {
        let actual_lb = lb(true, &[]);
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, vec![member("m1", "10.0.0.1", 30303)])];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 80, node_port: 30303 }],
            node_ips: vec!["10.0.0.1".to_string()],
            traffic_policy: cluster_policy(),
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn immutability_rejects_public_private_flip() {
        let actual_lb = lb(true, &[]);
        let desired = DesiredState {
            is_public: false,
            resolved_subnet_ids: None,
            ports: vec![],
            node_ips: vec![],
            traffic_policy: cluster_policy(),
        };
        let err = plan(&desired, &actual_lb, &[], &[]).unwrap_err();
        assert_eq!(err, PlannerError::ImmutableAttributeChanged);
    }

    #[test]
    fn immutability_rejects_subnet_set_change() {
        let actual_lb = lb(true, &["sub-1"]);
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: Some(vec!["sub-2".to_string()]),
            ports: vec![],
            node_ips: vec![],
            traffic_policy: cluster_policy(),
        };
        let err = plan(&desired, &actual_lb, &[], &[]).unwrap_err();
        assert_eq!(err, PlannerError::ImmutableAttributeChanged);
    }

    #[test]
    fn udp_port_is_rejected() {
        let actual_lb = lb(true, &[]);
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Udp, port: 53, node_port: 30053 }],
            node_ips: vec![],
            traffic_policy: cluster_policy(),
        };
        let err = plan(&desired, &actual_lb, &[], &[]).unwrap_err();
        assert_eq!(err, PlannerError::UdpNotSupported);
    }

    #[test]
    fn health_monitor_derivation_local_with_healthcheck_port() {
        let policy = TrafficPolicy { local: true, health_check_node_port: Some(32000) };
        let monitor = policy.derive_health_monitor(30303);
        assert_eq!(monitor.monitor_type, HealthMonitorType::Http);
        assert_eq!(monitor.port, 32000);
        assert_eq!(monitor.url_path.as_deref(), Some("/"));
    }

    #[test]
    fn health_monitor_derivation_cluster_policy() {
        let policy = TrafficPolicy { local: false, health_check_node_port: None };
        let monitor = policy.derive_health_monitor(30303);
        assert_eq!(monitor.monitor_type, HealthMonitorType::Tcp);
        assert_eq!(monitor.port, 30303);
    }

    #[test]
    fn etp_change_without_rename_emits_update_pool_only() {
        let actual_lb = lb(true, &[]);
        let pools = vec![pool("pool-1", "tcp-80-30303", 30303, vec![member("m1", "10.0.0.1", 30303)])];
        let listeners = vec![listener("l1", 80, "pool-1")];
        let desired = DesiredState {
            is_public: true,
            resolved_subnet_ids: None,
            ports: vec![DesiredPort { protocol: Protocol::Tcp, port: 80, node_port: 30303 }],
            node_ips: vec!["10.0.0.1".to_string()],
            traffic_policy: TrafficPolicy { local: true, health_check_node_port: Some(32000) },
        };
        let result = plan(&desired, &actual_lb, &listeners, &pools).unwrap();
        assert_eq!(
            result,
            vec![Mutation::UpdatePool { pool_name: "tcp-80-30303".into(), pool_id: "pool-1".into() }]
        );
    }
}
