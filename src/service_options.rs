//! Parses the VPC-provider Service annotations into a validated,
//! immutable-per-reconcile struct.

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use crate::consts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpType {
    Public,
    Private,
}

impl Default for IpType {
    fn default() -> Self {
        Self::Public
    }
}

#[derive(Debug, Clone, Default)]
pub struct ServiceOptions {
    pub enable_features: Vec<String>,
    pub ip_type: IpType,
    pub vpc_subnets: Vec<String>,
    pub vpc_node_selector: Option<(String, String)>,
    pub zone: Option<String>,
    pub lb_name_override: Option<String>,
}

impl ServiceOptions {
    #[must_use]
    pub fn from_service(svc: &Service) -> Self {
        let anns = svc.annotations();

        let enable_features = anns
            .get(consts::ANN_ENABLE_FEATURES)
            .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();

        let ip_type = match anns.get(consts::ANN_IP_TYPE).map(String::as_str) {
            Some(consts::IP_TYPE_PRIVATE) => IpType::Private,
            _ => IpType::Public,
        };

        let vpc_subnets = anns
            .get(consts::ANN_VPC_SUBNETS)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let vpc_node_selector = anns
            .get(consts::ANN_VPC_NODE_SELECTOR)
            .and_then(|raw| parse_allowed_node_selector(raw));

        let zone = anns.get(consts::ANN_ZONE).cloned();
        let lb_name_override = anns.get(consts::ANN_VPC_LB_NAME).cloned();

        Self {
            enable_features,
            ip_type,
            vpc_subnets,
            vpc_node_selector,
            zone,
            lb_name_override,
        }
    }

    #[must_use]
    pub fn has_feature(&self, feature: &str) -> bool {
        self.enable_features.iter().any(|f| f == feature)
    }

    #[must_use]
    pub fn is_public(&self) -> bool {
        self.ip_type == IpType::Public
    }
}

/// Parse `label=value` from the `vpc-node-selector` annotation, restricted to
/// the allow-listed label set. A selector naming any other label is
/// silently ignored — this returns `None` in that case.
#[must_use]
pub fn parse_allowed_node_selector(raw: &str) -> Option<(String, String)> {
    let (label, value) = raw.split_once('=')?;
    if consts::ALLOWED_NODE_SELECTOR_LABELS.contains(&label) {
        Some((label.to_string(), value.to_string()))
    } else {
        None
    }
}
