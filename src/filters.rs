//! Pure selectors over the cluster node set and subnet list.

use std::str::FromStr;

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;

use crate::consts;
use crate::domain::Subnet;
use crate::error::FilterError;
use crate::label_filter::LabelFilter;

/// If any node carries `dedicated=edge`, return only those; else return the
/// input unchanged.
#[must_use]
pub fn filter_nodes_by_edge_label(nodes: &[Node]) -> Vec<Node> {
    let edge_nodes: Vec<Node> = nodes
        .iter()
        .filter(|n| {
            n.labels().get(consts::LABEL_DEDICATED).map(String::as_str)
                == Some(consts::LABEL_DEDICATED_EDGE_VALUE)
        })
        .cloned()
        .collect();
    if edge_nodes.is_empty() {
        nodes.to_vec()
    } else {
        edge_nodes
    }
}

/// Filter nodes by the `ibm-cloud.kubernetes.io/zone` label.
#[must_use]
pub fn filter_nodes_by_zone(nodes: &[Node], zone: &str) -> Vec<Node> {
    nodes
        .iter()
        .filter(|n| n.labels().get(consts::LABEL_ZONE).map(String::as_str) == Some(zone))
        .cloned()
        .collect()
}

/// Filter nodes using the raw `vpc-node-selector` grammar (equal / not-equal /
/// exists / does-not-exist), restricted by the caller to allow-listed labels.
pub fn filter_nodes_by_selector(nodes: &[Node], selector: &str) -> Result<Vec<Node>, FilterError> {
    let filter = LabelFilter::from_str(selector)?;
    Ok(nodes
        .iter()
        .filter(|n| filter.check(n.labels()))
        .cloned()
        .collect())
}

/// Prefer the `ibm-cloud.kubernetes.io/internal-ip` label; else the first
/// `InternalIP` address on the node; else `None` (the node is excluded from
/// the pool's membership set).
#[must_use]
pub fn get_node_internal_ip(node: &Node) -> Option<String> {
    if let Some(ip) = node.labels().get(consts::LABEL_INTERNAL_IP) {
        return Some(ip.clone());
    }
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|addr| addr.type_ == "InternalIP")
        .map(|addr| addr.address.clone())
}

/// Membership against `,<csv>,` (substring match so each token is an exact
/// element, not a prefix/suffix of a longer name).
#[must_use]
pub fn filter_subnets_by_name(subnets: &[Subnet], csv: &str) -> Vec<Subnet> {
    let wrapped = format!(",{csv},");
    subnets
        .iter()
        .filter(|s| wrapped.contains(&format!(",{},", s.name)))
        .cloned()
        .collect()
}

/// Each token in `csv` must equal a subnet id, name, or CIDR within
/// `vpc_id`. Duplicates collapse; a token that doesn't resolve within the
/// target VPC (whether absent or belonging to another VPC) is an error.
pub fn validate_service_subnets(
    csv: &str,
    vpc_id: &str,
    subnets: &[Subnet],
) -> Result<Vec<String>, FilterError> {
    let mut resolved: Vec<String> = Vec::new();
    for token in csv.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let found = subnets.iter().find(|s| {
            s.vpc_id == vpc_id && (s.id == token || s.name == token || s.cidr == token)
        });
        match found {
            Some(subnet) => {
                if !resolved.contains(&subnet.id) {
                    resolved.push(subnet.id.clone());
                }
            }
            None => return Err(FilterError::InvalidVpcSubnet(token.to_string())),
        }
    }
    Ok(resolved)
}

/// Produce the set of subnet ids in `zone` within `vpc_id`. An empty result
/// is an error: "no cluster subnets in that zone".
pub fn validate_service_zone(
    zone: &str,
    vpc_id: &str,
    subnets: &[Subnet],
) -> Result<Vec<String>, FilterError> {
    let ids: Vec<String> = subnets
        .iter()
        .filter(|s| s.vpc_id == vpc_id && s.zone == zone)
        .map(|s| s.id.clone())
        .collect();
    if ids.is_empty() {
        return Err(FilterError::NoSubnetsInZone(zone.to_string()));
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn node(labels: &[(&str, &str)], internal_ip: Option<&str>) -> Node {
        Node {
            metadata: ObjectMeta {
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect::<BTreeMap<_, _>>(),
                ),
                ..Default::default()
            },
            status: internal_ip.map(|ip| NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: ip.to_string(),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn subnet(id: &str, name: &str, cidr: &str, zone: &str, vpc_id: &str) -> Subnet {
        Subnet {
            id: id.into(),
            name: name.into(),
            cidr: cidr.into(),
            zone: zone.into(),
            vpc_id: vpc_id.into(),
            status: "available".into(),
            available_ipv4_count: 250,
        }
    }

    #[test]
    fn edge_label_filter_falls_back_to_all_nodes() {
        let nodes = vec![node(&[], None), node(&[], None)];
        assert_eq!(filter_nodes_by_edge_label(&nodes).len(), 2);
    }

    #[test]
    fn edge_label_filter_restricts_to_edge_nodes() {
        let nodes = vec![
            node(&[("dedicated", "edge")], None),
            node(&[], None),
        ];
        let filtered = filter_nodes_by_edge_label(&nodes);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn internal_ip_prefers_label_over_status() {
        let n = node(
            &[("ibm-cloud.kubernetes.io/internal-ip", "10.0.0.9")],
            Some("10.0.0.1"),
        );
        assert_eq!(get_node_internal_ip(&n).as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn internal_ip_falls_back_to_status_address() {
        let n = node(&[], Some("10.0.0.1"));
        assert_eq!(get_node_internal_ip(&n).as_deref(), Some("10.0.0.1"));
    }

    #[test]
    fn internal_ip_absent_excludes_node() {
        let n = node(&[], None);
        assert_eq!(get_node_internal_ip(&n), None);
    }

    #[test]
    fn validate_subnets_resolves_by_id_name_or_cidr() {
        let subnets = vec![subnet("sub-1", "subnet1", "10.0.0.0/24", "zone1", "vpc1")];
        let ids = validate_service_subnets("subnet1", "vpc1", &subnets).unwrap();
        assert_eq!(ids, vec!["sub-1".to_string()]);
    }

    #[test]
    fn validate_subnets_rejects_cross_vpc() {
        let subnets = vec![subnet("sub-1", "subnet1", "10.0.0.0/24", "zone1", "vpc2")];
        assert!(validate_service_subnets("subnet1", "vpc1", &subnets).is_err());
    }

    #[test]
    fn validate_subnets_collapses_duplicates() {
        let subnets = vec![subnet("sub-1", "subnet1", "10.0.0.0/24", "zone1", "vpc1")];
        let ids = validate_service_subnets("subnet1,sub-1", "vpc1", &subnets).unwrap();
        assert_eq!(ids, vec!["sub-1".to_string()]);
    }

    #[test]
    fn validate_zone_empty_set_is_error() {
        let subnets = vec![subnet("sub-1", "subnet1", "10.0.0.0/24", "zone1", "vpc1")];
        assert!(validate_service_zone("zone9", "vpc1", &subnets).is_err());
    }
}
