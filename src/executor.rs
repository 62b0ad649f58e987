//! Reconciliation executor & Service façade: `VpcCloudProvider` owns
//! the SDK port, configuration, and event reporter, and exposes the four
//! `Ensure*`/`Get` entry points the controller calls per Service. Planning
//! (pure, `planner::plan`) stays separate from execution (effectful, here).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::{Node, Service};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::ResourceExt;

use crate::config::VpcConfiguration;
use crate::consts;
use crate::domain::{LoadBalancer, Protocol, ProxyProtocol};
use crate::error::{FilterError, PlannerError, ReconcileError};
use crate::filters;
use crate::naming;
use crate::node_cache::{NodeCache, NodeMetadata};
use crate::planner::{self, DesiredPort, DesiredState, Mutation, TrafficPolicy};
use crate::sdk::{CreateListenerRequest, CreateLoadBalancerRequest, CreatePoolRequest, UpdatePoolRequest, VpcLoadBalancerApi};
use crate::service_options::ServiceOptions;

/// Single-ingress-hostname status returned to the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerStatus {
    pub hostname: Option<String>,
}

pub struct VpcCloudProvider {
    api: Arc<dyn VpcLoadBalancerApi>,
    config: VpcConfiguration,
    min_sleep: Duration,
    max_wait: Duration,
    recorder_reporter: Reporter,
    client: kube::Client,
    node_cache: Arc<NodeCache>,
}

impl VpcCloudProvider {
    #[must_use]
    pub fn new(api: Arc<dyn VpcLoadBalancerApi>, config: VpcConfiguration, client: kube::Client) -> Self {
        Self::with_node_cache(api, config, client, Arc::new(NodeCache::new()))
    }

    /// As [`Self::new`], but sharing a node-metadata cache with the
    /// rest of the process instead of owning a private one — the monitor
    /// loop and the reconcile loop both read through the same TTL cache so a
    /// node's internal IP isn't re-derived from labels every tick.
    #[must_use]
    pub fn with_node_cache(
        api: Arc<dyn VpcLoadBalancerApi>,
        config: VpcConfiguration,
        client: kube::Client,
        node_cache: Arc<NodeCache>,
    ) -> Self {
        Self {
            api,
            config,
            min_sleep: Duration::from_secs(consts::DEFAULT_MIN_SLEEP_SECS),
            max_wait: Duration::from_secs(consts::DEFAULT_MAX_WAIT_SECS),
            recorder_reporter: Reporter {
                controller: "vpclb-controller".to_string(),
                instance: None,
            },
            client,
            node_cache,
        }
    }

    fn lb_name(&self, svc: &Service, opts: &ServiceOptions) -> String {
        opts.lb_name_override
            .clone()
            .unwrap_or_else(|| naming::generate_lb_name(&self.config.cluster_id, &svc.uid().unwrap_or_default()))
    }

    /// Resolve the desired subnet id set: `vpc-subnets`
    /// annotation wins; else `zone` annotation; else the configured subnet
    /// names from `[provider] g2VpcSubnetNames`. `self.config.vpc_name` is
    /// used directly as the VPC scoping key — this crate's SDK port has no
    /// VPC-listing operation, so subnet-to-VPC matching happens against the
    /// configured VPC name taken as the subnet's `vpc_id` field.
    async fn resolve_subnet_ids(&self, opts: &ServiceOptions) -> Result<Vec<String>, ReconcileError> {
        let subnets = self.api.list_subnets().await?;
        let vpc_name = &self.config.vpc_name;

        if !opts.vpc_subnets.is_empty() {
            let csv = opts.vpc_subnets.join(",");
            return Ok(filters::validate_service_subnets(&csv, vpc_name, &subnets)?);
        }
        if let Some(zone) = &opts.zone {
            return Ok(filters::validate_service_zone(zone, vpc_name, &subnets)?);
        }
        let csv = self.config.subnet_names.join(",");
        Ok(filters::filter_subnets_by_name(&subnets, &csv).into_iter().map(|s| s.id).collect())
    }

    async fn find_owned(&self, name: &str) -> Result<Option<LoadBalancer>, ReconcileError> {
        let lbs = self.api.list_load_balancers().await?;
        Ok(lbs.into_iter().find(|lb| lb.name == name && lb.is_owned(&self.config.cluster_id)))
    }

    async fn wait_ready(&self, lb_id: &str) -> Result<LoadBalancer, ReconcileError> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let lb = self.api.get_load_balancer(lb_id).await?;
            if lb.is_ready() {
                return Ok(lb);
            }
            if Instant::now() >= deadline {
                return Err(ReconcileError::Busy);
            }
            tokio::time::sleep(self.min_sleep).await;
        }
    }

    async fn emit(&self, svc: &Service, event_type: EventType, reason: &str, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.recorder_reporter.clone(), svc.object_ref(&()));
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(event).await {
            tracing::warn!(error = %err, "failed to publish event");
        }
    }

    /// EnsureLoadBalancer(name, service, nodes): find; absent → create;
    /// present-not-ready → busy error; present-ready → converge.
    pub async fn ensure_load_balancer(
        &self,
        svc: &Service,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ReconcileError> {
        let opts = ServiceOptions::from_service(svc);
        let name = self.lb_name(svc, &opts);

        match self.find_owned(&name).await? {
            None => self.create(svc, &opts, &name, nodes).await,
            Some(lb) if !lb.is_ready() => {
                self.emit(svc, EventType::Warning, consts::EVENT_REASON_VERIFY_FAILED, "LoadBalancer is busy".to_string()).await;
                Err(ReconcileError::Busy)
            }
            Some(lb) => self.converge(svc, &opts, &lb, nodes).await,
        }
    }

    async fn create(
        &self,
        svc: &Service,
        opts: &ServiceOptions,
        name: &str,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ReconcileError> {
        let desired = self.build_desired_state(svc, opts, nodes).await?;
        if desired.ports.iter().any(|p| p.protocol == Protocol::Udp) {
            let err = ReconcileError::Planner(PlannerError::UdpNotSupported);
            self.emit(svc, EventType::Warning, consts::EVENT_REASON_CREATE_FAILED, err.to_string()).await;
            return Err(err);
        }
        if desired.node_ips.is_empty() {
            let err = ReconcileError::NoAvailableNodes;
            self.emit(svc, EventType::Warning, consts::EVENT_REASON_CREATE_FAILED, err.to_string()).await;
            return Err(err);
        }

        let subnet_ids = self.resolve_subnet_ids(opts).await?;
        let listeners = desired
            .ports
            .iter()
            .map(|p| CreateListenerRequest {
                port: p.port,
                protocol: p.protocol,
                default_pool_name: Some(naming::generate_pool_name(p.protocol, p.port, p.node_port)),
            })
            .collect();
        let pools = desired
            .ports
            .iter()
            .map(|p| CreatePoolRequest {
                name: naming::generate_pool_name(p.protocol, p.port, p.node_port),
                health_monitor: desired.traffic_policy.derive_health_monitor(p.node_port),
                proxy_protocol: self.proxy_protocol(opts),
                members: desired.node_ips.iter().map(|ip| (ip.clone(), p.node_port)).collect(),
            })
            .collect();

        let req = CreateLoadBalancerRequest {
            name: name.to_string(),
            is_public: opts.is_public(),
            subnet_ids,
            resource_group_id: String::new(),
            listeners,
            pools,
        };

        let result = self.api.create_load_balancer(req).await;
        let lb = match result {
            Ok(lb) => lb,
            Err(err) => {
                let err = ReconcileError::Sdk(err);
                self.emit(svc, EventType::Warning, consts::EVENT_REASON_CREATE_FAILED, err.to_string()).await;
                return Err(err);
            }
        };

        self.emit(svc, EventType::Normal, consts::EVENT_REASON_NORMAL, "LoadBalancer created".to_string()).await;

        if lb.is_nlb() {
            let ready = self.wait_ready(&lb.id).await?;
            return Ok(LoadBalancerStatus { hostname: ready.hostname });
        }
        Ok(LoadBalancerStatus { hostname: lb.hostname })
    }

    async fn converge(
        &self,
        svc: &Service,
        opts: &ServiceOptions,
        lb: &LoadBalancer,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ReconcileError> {
        let desired = self.build_desired_state(svc, opts, nodes).await?;
        let listeners = self.api.list_listeners(&lb.id).await?;
        let mut pools = self.api.list_pools(&lb.id).await?;
        for pool in &mut pools {
            pool.members = self.api.list_pool_members(&lb.id, &pool.id).await?;
        }

        let mutations = planner::plan(&desired, lb, &listeners, &pools).map_err(|err| {
            ReconcileError::Planner(err)
        })?;
        if mutations.is_empty() {
            return Ok(LoadBalancerStatus { hostname: lb.hostname.clone() });
        }

        if let Err(err) = self.execute_plan(&lb.id, mutations, &desired, self.proxy_protocol(opts)).await {
            self.emit(svc, EventType::Warning, consts::EVENT_REASON_UPDATE_FAILED, err.to_string()).await;
            return Err(err);
        }

        self.emit(svc, EventType::Normal, consts::EVENT_REASON_NORMAL, "LoadBalancer updated".to_string()).await;
        let refreshed = self.api.get_load_balancer(&lb.id).await?;
        Ok(LoadBalancerStatus { hostname: refreshed.hostname })
    }

    async fn execute_plan(
        &self,
        lb_id: &str,
        mutations: Vec<Mutation>,
        desired: &DesiredState,
        proxy_protocol: ProxyProtocol,
    ) -> Result<(), ReconcileError> {
        let mut pool_ids: HashMap<String, String> = HashMap::new();
        for (i, mutation) in mutations.iter().enumerate() {
            if i > 0 {
                self.wait_ready(lb_id).await?;
            }
            self.apply_mutation(lb_id, mutation, desired, proxy_protocol, &mut pool_ids).await?;
        }
        Ok(())
    }

    async fn apply_mutation(
        &self,
        lb_id: &str,
        mutation: &Mutation,
        desired: &DesiredState,
        proxy_protocol: ProxyProtocol,
        pool_ids: &mut HashMap<String, String>,
    ) -> Result<(), ReconcileError> {
        match mutation {
            Mutation::DeleteListener { listener_id, .. } => {
                self.api.delete_listener(lb_id, listener_id).await?;
            }
            Mutation::DeletePool { pool_id, .. } => {
                self.api.delete_pool(lb_id, pool_id).await?;
            }
            Mutation::DeletePoolMember { pool_id, member_id, .. } => {
                self.api.delete_pool_member(lb_id, pool_id, member_id).await?;
            }
            Mutation::UpdatePool { pool_name, pool_id } => {
                let (_, _, node_port) = naming::parse_pool_name(pool_name)?;
                let monitor = desired.traffic_policy.derive_health_monitor(node_port);
                self.api
                    .update_pool(
                        lb_id,
                        pool_id,
                        UpdatePoolRequest {
                            name: Some(pool_name.clone()),
                            health_monitor: Some(monitor),
                            proxy_protocol: None,
                        },
                    )
                    .await?;
                pool_ids.insert(pool_name.clone(), pool_id.clone());
            }
            Mutation::ReplacePoolMembers { pool_id, pool_name } => {
                let (_, _, node_port) = naming::parse_pool_name(pool_name)?;
                let members = desired.node_ips.iter().map(|ip| (ip.clone(), node_port)).collect();
                self.api.replace_pool_members(lb_id, pool_id, members).await?;
            }
            Mutation::CreatePoolMember { pool_id, pool_name, node_ip } => {
                let (_, _, node_port) = naming::parse_pool_name(pool_name)?;
                self.api.create_pool_member(lb_id, pool_id, node_ip, node_port).await?;
            }
            Mutation::CreatePool { pool_name } => {
                let (_, _, node_port) = naming::parse_pool_name(pool_name)?;
                let monitor = desired.traffic_policy.derive_health_monitor(node_port);
                let members = desired.node_ips.iter().map(|ip| (ip.clone(), node_port)).collect();
                let pool = self
                    .api
                    .create_pool(
                        lb_id,
                        CreatePoolRequest {
                            name: pool_name.clone(),
                            health_monitor: monitor,
                            proxy_protocol,
                            members,
                        },
                    )
                    .await?;
                pool_ids.insert(pool_name.clone(), pool.id);
            }
            Mutation::CreateListener { pool_name } => {
                // The pool may already exist (only the listener is missing,
                // e.g. the pool survived from a previous reconcile) rather
                // than having been created earlier in this same plan, in
                // which case it isn't in `pool_ids` yet.
                let pool_id = match pool_ids.get(pool_name).cloned() {
                    Some(id) => id,
                    None => {
                        let actual_pools = self.api.list_pools(lb_id).await?;
                        let id = actual_pools
                            .into_iter()
                            .find(|p| &p.name == pool_name)
                            .map(|p| p.id)
                            .ok_or_else(|| {
                                crate::error::SdkError::new(format!("no pool id tracked for {pool_name}"), None)
                            })?;
                        pool_ids.insert(pool_name.clone(), id.clone());
                        id
                    }
                };
                let (protocol, port, _) = naming::parse_pool_name(pool_name)?;
                self.api.create_listener(lb_id, port, protocol, &pool_id).await?;
            }
        }
        Ok(())
    }

    fn proxy_protocol(&self, opts: &ServiceOptions) -> ProxyProtocol {
        if opts.has_feature(consts::FEATURE_PROXY_PROTOCOL) {
            ProxyProtocol::V1
        } else {
            ProxyProtocol::Disabled
        }
    }

    /// Builds the desired shape from the Service spec, its resolved node
    /// set, and (if present) its resolved subnet annotation.
    async fn build_desired_state(
        &self,
        svc: &Service,
        opts: &ServiceOptions,
        nodes: &[Node],
    ) -> Result<DesiredState, ReconcileError> {
        let spec = svc.spec.as_ref();
        let ports: Vec<DesiredPort> = spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .filter_map(|p| {
                        let node_port = p.node_port?;
                        let protocol = match p.protocol.as_deref() {
                            Some("UDP") => Protocol::Udp,
                            _ => Protocol::Tcp,
                        };
                        Some(DesiredPort { protocol, port: p.port, node_port })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let filtered_nodes = if let Some(selector) = &opts.vpc_node_selector {
            filters::filter_nodes_by_selector(nodes, &format!("{}={}", selector.0, selector.1))?
        } else if let Some(zone) = &opts.zone {
            filters::filter_nodes_by_edge_label(&filters::filter_nodes_by_zone(nodes, zone))
        } else {
            filters::filter_nodes_by_edge_label(nodes)
        };
        self.reap_deleted_nodes(nodes).await;
        let mut node_ips = Vec::with_capacity(filtered_nodes.len());
        for node in &filtered_nodes {
            if let Some(ip) = self.resolve_node_ip(node).await {
                node_ips.push(ip);
            }
        }

        let traffic_policy = TrafficPolicy {
            local: spec.and_then(|s| s.external_traffic_policy.as_deref()) == Some("Local"),
            health_check_node_port: spec.and_then(|s| s.health_check_node_port).filter(|p| *p > 0),
        };

        // Only `Some` when the `vpc-subnets` annotation is present: the
        // immutability check (§4.5.5) fires on this field, and it must not
        // reject a converge just because the config-derived default subnet
        // set (zone or configured subnet names) drifted from the LB's
        // actual subnets — that default isn't a user-declared commitment.
        let resolved_subnet_ids = if opts.vpc_subnets.is_empty() {
            None
        } else {
            Some(self.resolve_subnet_ids(opts).await?)
        };

        Ok(DesiredState {
            is_public: opts.is_public(),
            resolved_subnet_ids,
            ports,
            node_ips,
            traffic_policy,
        })
    }

    /// Resolve a node's internal IP through the TTL cache: a hit returns
    /// the cached value directly; a miss re-derives it from the node's
    /// labels/status (`filters::get_node_internal_ip`) and populates the
    /// cache for the next tick.
    async fn resolve_node_ip(&self, node: &Node) -> Option<String> {
        let name = node.name_any();
        if let Some(cached) = self.node_cache.get(&name).await {
            return cached.internal_ip;
        }
        let internal_ip = filters::get_node_internal_ip(node);
        let zone = node.labels().get(consts::LABEL_ZONE).cloned();
        self.node_cache
            .insert(NodeMetadata {
                name,
                internal_ip: internal_ip.clone(),
                zone,
                labels: node.labels().clone().into_iter().collect(),
            })
            .await;
        internal_ip
    }

    /// Drop cache entries for nodes that no longer exist in the cluster.
    async fn reap_deleted_nodes(&self, current_nodes: &[Node]) {
        let current_names: std::collections::HashSet<String> =
            current_nodes.iter().map(ResourceExt::name_any).collect();
        self.node_cache.retain_names(&current_names).await;
    }

    /// EnsureLoadBalancerDeleted(name, service): find; absent → success; else delete, no wait.
    pub async fn ensure_load_balancer_deleted(&self, svc: &Service) -> Result<(), ReconcileError> {
        let opts = ServiceOptions::from_service(svc);
        let name = self.lb_name(svc, &opts);
        let found = match self.find_owned(&name).await {
            Ok(found) => found,
            Err(err) => {
                self.emit(svc, EventType::Warning, consts::EVENT_REASON_DELETE_FAILED, err.to_string()).await;
                return Err(err);
            }
        };
        match found {
            None => Ok(()),
            Some(lb) => {
                if let Err(err) = self.api.delete_load_balancer(&lb.id).await {
                    let err = ReconcileError::Sdk(err);
                    self.emit(svc, EventType::Warning, consts::EVENT_REASON_DELETE_FAILED, err.to_string()).await;
                    return Err(err);
                }
                Ok(())
            }
        }
    }

    /// EnsureLoadBalancerUpdated: find; absent → warning+success; not ready → warning+error; else converge.
    pub async fn ensure_load_balancer_updated(
        &self,
        svc: &Service,
        nodes: &[Node],
    ) -> Result<LoadBalancerStatus, ReconcileError> {
        let opts = ServiceOptions::from_service(svc);
        let name = self.lb_name(svc, &opts);
        match self.find_owned(&name).await? {
            None => {
                self.emit(svc, EventType::Warning, consts::EVENT_REASON_UPDATE_FAILED, "LoadBalancer not found".to_string()).await;
                Ok(LoadBalancerStatus::default())
            }
            Some(lb) if !lb.is_ready() => {
                self.emit(svc, EventType::Warning, consts::EVENT_REASON_VERIFY_FAILED, "LoadBalancer is busy".to_string()).await;
                Err(ReconcileError::Busy)
            }
            Some(lb) => self.converge(svc, &opts, &lb, nodes).await,
        }
    }

    /// GetLoadBalancer: find; returns (status, exists), falling back to the
    /// Service's existing ingress if the LB exists but isn't ready yet.
    pub async fn get_load_balancer(&self, svc: &Service) -> Result<(LoadBalancerStatus, bool), ReconcileError> {
        let opts = ServiceOptions::from_service(svc);
        let name = self.lb_name(svc, &opts);
        let found = match self.find_owned(&name).await {
            Ok(found) => found,
            Err(err) => {
                self.emit(svc, EventType::Warning, consts::EVENT_REASON_GET_FAILED, err.to_string()).await;
                return Err(err);
            }
        };
        match found {
            None => Ok((LoadBalancerStatus::default(), false)),
            Some(lb) if lb.is_ready() => Ok((LoadBalancerStatus { hostname: lb.hostname }, true)),
            Some(_) => Ok((LoadBalancerStatus { hostname: current_ingress_hostname(svc) }, true)),
        }
    }
}

fn current_ingress_hostname(svc: &Service) -> Option<String> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .hostname
        .clone()
}

impl From<FilterError> for ReconcileError {
    fn from(err: FilterError) -> Self {
        Self::Filter(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sdk::fake::FakeVpcApi;
    use k8s_openapi::api::core::v1::{NodeAddress, NodeStatus, ServicePort, ServiceSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node(name: &str, ip: &str) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress { type_: "InternalIP".to_string(), address: ip.to_string() }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn service(uid: &str, port: i32, node_port: i32) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc1".to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ports: Some(vec![ServicePort {
                    port,
                    node_port: Some(node_port),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn provider_with_subnet() -> (VpcCloudProvider, Arc<FakeVpcApi>) {
        let fake = Arc::new(FakeVpcApi::new());
        fake.seed_subnets(vec![crate::domain::Subnet {
            id: "sub-1".into(),
            name: "subnet1".into(),
            cidr: "10.0.0.0/24".into(),
            zone: "zone1".into(),
            vpc_id: "vpc-1".into(),
            status: "available".into(),
            available_ipv4_count: 250,
        }]);
        let operator_config = crate::config::OperatorConfig {
            provider: crate::config::ProviderKind::Fake,
            cluster_id: "cluster1".into(),
            account_id: String::new(),
            api_key_secret: String::new(),
            region: String::new(),
            resource_group_name: String::new(),
            subnet_names: "subnet1".into(),
            vpc_name: "vpc-1".into(),
            staging: false,
            enable_private: false,
            log_level: tracing::level_filters::LevelFilter::INFO,
        };
        let vpc_config = VpcConfiguration::initialize(&operator_config).unwrap();
        let client = kube::Client::try_from(kube::Config::new("https://127.0.0.1:1".parse().unwrap())).unwrap();
        let provider = VpcCloudProvider::new(fake.clone(), vpc_config, client);
        (provider, fake)
    }

    #[tokio::test]
    async fn ensure_load_balancer_creates_when_absent() {
        let (provider, fake) = provider_with_subnet();
        let svc = service("abc-123", 80, 30303);
        let nodes = vec![node("n1", "10.0.0.1")];
        let status = provider.ensure_load_balancer(&svc, &nodes).await.unwrap();
        assert!(status.hostname.is_some() || fake.load_balancer_count() == 1);
        assert_eq!(fake.load_balancer_count(), 1);
    }

    #[tokio::test]
    async fn ensure_load_balancer_no_nodes_is_an_error() {
        let (provider, _fake) = provider_with_subnet();
        let svc = service("abc-123", 80, 30303);
        let err = provider.ensure_load_balancer(&svc, &[]).await.unwrap_err();
        assert!(matches!(err, ReconcileError::NoAvailableNodes));
    }

    #[test]
    fn status_default_has_no_hostname() {
        assert_eq!(LoadBalancerStatus::default().hostname, None);
    }
}
