//! Deterministic generation and parsing of pool names (`protocol-port-nodePort`)
//! and load-balancer names (`kube-<clusterID>-<serviceUID>`).

use crate::domain::Protocol;
use crate::error::NamingError;
use crate::consts::{LB_NAME_MAX_LEN, LB_NAME_PREFIX};

/// Build the pool name for a `(protocol, port, nodePort)` tuple.
///
/// Injective over its inputs: two tuples that differ in any component
/// produce different names.
#[must_use]
pub fn generate_pool_name(protocol: Protocol, port: i32, node_port: i32) -> String {
    format!("{protocol}-{port}-{node_port}")
}

/// Parse a pool name back into `(protocol, port, nodePort)`. Any deviation
/// from the grammar is a hard error naming the offending value.
pub fn parse_pool_name(name: &str) -> Result<(Protocol, i32, i32), NamingError> {
    let parts: Vec<&str> = name.split('-').collect();
    let [proto_str, port_str, node_port_str] = parts.as_slice() else {
        return Err(NamingError::InvalidPoolName(name.to_string()));
    };

    let protocol = match *proto_str {
        "tcp" => Protocol::Tcp,
        "udp" => Protocol::Udp,
        _ => return Err(NamingError::InvalidPoolName(name.to_string())),
    };

    let port = port_str
        .parse::<i32>()
        .map_err(|_| NamingError::InvalidPoolName(name.to_string()))?;
    let node_port = node_port_str
        .parse::<i32>()
        .map_err(|_| NamingError::InvalidPoolName(name.to_string()))?;

    if !(1..=65535).contains(&port) || !(1..=65535).contains(&node_port) {
        return Err(NamingError::InvalidPoolName(name.to_string()));
    }

    Ok((protocol, port, node_port))
}

/// Build the load balancer name: `kube-<clusterID>-<serviceUID-without-dashes>`,
/// truncated to 63 characters.
#[must_use]
pub fn generate_lb_name(cluster_id: &str, service_uid: &str) -> String {
    let uid_no_dashes: String = service_uid.chars().filter(|c| *c != '-').collect();
    let full = format!("{LB_NAME_PREFIX}-{cluster_id}-{uid_no_dashes}");
    if full.len() > LB_NAME_MAX_LEN {
        full.chars().take(LB_NAME_MAX_LEN).collect()
    } else {
        full
    }
}

/// The prefix used to discover and to scope ownership of load balancers for
/// a given cluster, e.g. for the `ListLoadBalancers` prefix match.
#[must_use]
pub fn owned_lb_prefix(cluster_id: &str) -> String {
    format!("{LB_NAME_PREFIX}-{cluster_id}-")
}

/// A load balancer name is owned by this cluster iff it begins with
/// `kube-<clusterID>-`. The system must never mutate or delete a load
/// balancer for which this returns false.
#[must_use]
pub fn is_owned_lb_name(lb_name: &str, cluster_id: &str) -> bool {
    lb_name.starts_with(&owned_lb_prefix(cluster_id))
}
