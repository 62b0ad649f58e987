//! In-memory [`VpcLoadBalancerApi`] implementation returning canned objects
//! and programmable errors, for deterministic unit/integration tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{
    Listener, LoadBalancer, MemberHealth, NamedRef, OperatingStatus, Pool, PoolMember,
    ProfileFamily, ProvisioningStatus, Subnet,
};
use crate::error::SdkError;

use super::{CreateLoadBalancerRequest, CreatePoolRequest, UpdatePoolRequest, VpcLoadBalancerApi};

#[derive(Default)]
struct FakeVpcApiState {
    load_balancers: HashMap<String, LoadBalancer>,
    listeners: HashMap<String, Vec<Listener>>,
    pools: HashMap<String, Vec<Pool>>,
    subnets: Vec<Subnet>,
    /// Queued errors keyed by a coarse operation name; consumed FIFO.
    queued_errors: HashMap<&'static str, VecDeque<SdkError>>,
}

/// Programmable fake of the cloud's VPC load-balancer API.
pub struct FakeVpcApi {
    state: Mutex<FakeVpcApiState>,
}

impl Default for FakeVpcApi {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeVpcApi {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeVpcApiState::default()),
        }
    }

    /// Pre-seed the fake with subnets, as if returned by `ListSubnets`.
    pub fn seed_subnets(&self, subnets: Vec<Subnet>) {
        self.state.lock().unwrap().subnets = subnets;
    }

    /// Pre-seed the fake with an existing load balancer, listeners and pools,
    /// as if already created in a previous reconcile.
    pub fn seed_load_balancer(&self, lb: LoadBalancer, listeners: Vec<Listener>, pools: Vec<Pool>) {
        let mut state = self.state.lock().unwrap();
        state.listeners.insert(lb.id.clone(), listeners);
        state.pools.insert(lb.id.clone(), pools);
        state.load_balancers.insert(lb.id.clone(), lb);
    }

    /// Queue a synthetic error to be returned on the next call to `op`.
    pub fn queue_error(&self, op: &'static str, err: SdkError) {
        self.state
            .lock()
            .unwrap()
            .queued_errors
            .entry(op)
            .or_default()
            .push_back(err);
    }

    fn take_queued_error(&self, op: &'static str) -> Option<SdkError> {
        self.state
            .lock()
            .unwrap()
            .queued_errors
            .get_mut(op)
            .and_then(VecDeque::pop_front)
    }

    #[must_use]
    pub fn load_balancer_count(&self) -> usize {
        self.state.lock().unwrap().load_balancers.len()
    }
}

#[async_trait]
impl VpcLoadBalancerApi for FakeVpcApi {
    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>, SdkError> {
        if let Some(e) = self.take_queued_error("list_load_balancers") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().load_balancers.values().cloned().collect())
    }

    async fn get_load_balancer(&self, lb_id: &str) -> Result<LoadBalancer, SdkError> {
        if let Some(e) = self.take_queued_error("get_load_balancer") {
            return Err(e);
        }
        self.state
            .lock()
            .unwrap()
            .load_balancers
            .get(lb_id)
            .cloned()
            .ok_or_else(|| SdkError::not_found(format!("load balancer {lb_id} not found")))
    }

    async fn create_load_balancer(
        &self,
        req: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer, SdkError> {
        if let Some(e) = self.take_queued_error("create_load_balancer") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        let lb_id = format!("lb-{}", Uuid::new_v4());

        let mut pools = Vec::new();
        for p in &req.pools {
            let pool_id = format!("pool-{}", Uuid::new_v4());
            let members = p
                .members
                .iter()
                .map(|(ip, port)| PoolMember {
                    id: format!("member-{}", Uuid::new_v4()),
                    target_ip: ip.clone(),
                    port: *port,
                    health: MemberHealth::Unknown,
                    weight: crate::consts::DEFAULT_POOL_WEIGHT,
                    provisioning_status: ProvisioningStatus::Active,
                })
                .collect();
            pools.push(Pool {
                id: pool_id,
                name: p.name.clone(),
                algorithm: "round_robin".to_string(),
                health_monitor: p.health_monitor.clone(),
                session_persistence: crate::domain::SessionPersistence::None,
                proxy_protocol: p.proxy_protocol,
                members,
                provisioning_status: ProvisioningStatus::Active,
            });
        }

        let mut listeners = Vec::new();
        for l in &req.listeners {
            let default_pool_id = l
                .default_pool_name
                .as_ref()
                .and_then(|name| pools.iter().find(|p| &p.name == name))
                .map(|p| p.id.clone());
            listeners.push(Listener {
                id: format!("listener-{}", Uuid::new_v4()),
                port: l.port,
                protocol: l.protocol,
                default_pool_id,
                connection_limit: crate::consts::DEFAULT_CONNECTION_LIMIT,
                provisioning_status: ProvisioningStatus::Active,
            });
        }

        let lb = LoadBalancer {
            id: lb_id.clone(),
            name: req.name,
            is_public: req.is_public,
            hostname: Some(format!("{lb_id}.lb.example.com")),
            listener_ids: listeners.iter().map(|l| l.id.clone()).collect(),
            pools: pools.iter().map(|p| NamedRef { id: p.id.clone(), name: p.name.clone() }).collect(),
            subnets: req
                .subnet_ids
                .iter()
                .map(|id| NamedRef { id: id.clone(), name: id.clone() })
                .collect(),
            private_ips: vec![],
            public_ips: if req.is_public { vec!["198.51.100.10".to_string()] } else { vec![] },
            resource_group: NamedRef { id: req.resource_group_id.clone(), name: req.resource_group_id },
            profile_family: ProfileFamily::Application,
            operating_status: OperatingStatus::Online,
            provisioning_status: ProvisioningStatus::Active,
        };

        state.pools.insert(lb_id.clone(), pools);
        state.listeners.insert(lb_id.clone(), listeners);
        state.load_balancers.insert(lb_id.clone(), lb.clone());
        Ok(lb)
    }

    async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), SdkError> {
        if let Some(e) = self.take_queued_error("delete_load_balancer") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        state.load_balancers.remove(lb_id);
        state.listeners.remove(lb_id);
        state.pools.remove(lb_id);
        Ok(())
    }

    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>, SdkError> {
        if let Some(e) = self.take_queued_error("list_listeners") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().listeners.get(lb_id).cloned().unwrap_or_default())
    }

    async fn create_listener(
        &self,
        lb_id: &str,
        port: i32,
        protocol: crate::domain::Protocol,
        default_pool_id: &str,
    ) -> Result<Listener, SdkError> {
        if let Some(e) = self.take_queued_error("create_listener") {
            return Err(e);
        }
        let listener = Listener {
            id: format!("listener-{}", Uuid::new_v4()),
            port,
            protocol,
            default_pool_id: Some(default_pool_id.to_string()),
            connection_limit: crate::consts::DEFAULT_CONNECTION_LIMIT,
            provisioning_status: ProvisioningStatus::Active,
        };
        let mut state = self.state.lock().unwrap();
        state.listeners.entry(lb_id.to_string()).or_default().push(listener.clone());
        if let Some(lb) = state.load_balancers.get_mut(lb_id) {
            lb.listener_ids.push(listener.id.clone());
        }
        Ok(listener)
    }

    async fn delete_listener(&self, lb_id: &str, listener_id: &str) -> Result<(), SdkError> {
        if let Some(e) = self.take_queued_error("delete_listener") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(listeners) = state.listeners.get_mut(lb_id) {
            listeners.retain(|l| l.id != listener_id);
        }
        if let Some(lb) = state.load_balancers.get_mut(lb_id) {
            lb.listener_ids.retain(|id| id != listener_id);
        }
        Ok(())
    }

    async fn list_pools(&self, lb_id: &str) -> Result<Vec<Pool>, SdkError> {
        if let Some(e) = self.take_queued_error("list_pools") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().pools.get(lb_id).cloned().unwrap_or_default())
    }

    async fn create_pool(&self, lb_id: &str, req: CreatePoolRequest) -> Result<Pool, SdkError> {
        if let Some(e) = self.take_queued_error("create_pool") {
            return Err(e);
        }
        let members = req
            .members
            .iter()
            .map(|(ip, port)| PoolMember {
                id: format!("member-{}", Uuid::new_v4()),
                target_ip: ip.clone(),
                port: *port,
                health: MemberHealth::Unknown,
                weight: crate::consts::DEFAULT_POOL_WEIGHT,
                provisioning_status: ProvisioningStatus::Active,
            })
            .collect();
        let pool = Pool {
            id: format!("pool-{}", Uuid::new_v4()),
            name: req.name,
            algorithm: "round_robin".to_string(),
            health_monitor: req.health_monitor,
            session_persistence: crate::domain::SessionPersistence::None,
            proxy_protocol: req.proxy_protocol,
            members,
            provisioning_status: ProvisioningStatus::Active,
        };
        let mut state = self.state.lock().unwrap();
        state.pools.entry(lb_id.to_string()).or_default().push(pool.clone());
        if let Some(lb) = state.load_balancers.get_mut(lb_id) {
            lb.pools.push(NamedRef { id: pool.id.clone(), name: pool.name.clone() });
        }
        Ok(pool)
    }

    async fn update_pool(
        &self,
        lb_id: &str,
        pool_id: &str,
        patch: UpdatePoolRequest,
    ) -> Result<Pool, SdkError> {
        if let Some(e) = self.take_queued_error("update_pool") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        let pools = state
            .pools
            .get_mut(lb_id)
            .ok_or_else(|| SdkError::not_found(format!("load balancer {lb_id} not found")))?;
        let pool = pools
            .iter_mut()
            .find(|p| p.id == pool_id)
            .ok_or_else(|| SdkError::not_found(format!("pool {pool_id} not found")))?;
        if let Some(name) = patch.name {
            pool.name = name;
        }
        if let Some(monitor) = patch.health_monitor {
            pool.health_monitor = monitor;
        }
        if let Some(proxy) = patch.proxy_protocol {
            pool.proxy_protocol = proxy;
        }
        let updated = pool.clone();
        if let Some(lb) = state.load_balancers.get_mut(lb_id) {
            if let Some(named) = lb.pools.iter_mut().find(|p| p.id == pool_id) {
                named.name = updated.name.clone();
            }
        }
        Ok(updated)
    }

    async fn delete_pool(&self, lb_id: &str, pool_id: &str) -> Result<(), SdkError> {
        if let Some(e) = self.take_queued_error("delete_pool") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(pools) = state.pools.get_mut(lb_id) {
            pools.retain(|p| p.id != pool_id);
        }
        if let Some(lb) = state.load_balancers.get_mut(lb_id) {
            lb.pools.retain(|p| p.id != pool_id);
        }
        Ok(())
    }

    async fn list_pool_members(&self, lb_id: &str, pool_id: &str) -> Result<Vec<PoolMember>, SdkError> {
        if let Some(e) = self.take_queued_error("list_pool_members") {
            return Err(e);
        }
        let state = self.state.lock().unwrap();
        Ok(state
            .pools
            .get(lb_id)
            .and_then(|pools| pools.iter().find(|p| p.id == pool_id))
            .map(|p| p.members.clone())
            .unwrap_or_default())
    }

    async fn create_pool_member(
        &self,
        lb_id: &str,
        pool_id: &str,
        target_ip: &str,
        port: i32,
    ) -> Result<PoolMember, SdkError> {
        if let Some(e) = self.take_queued_error("create_pool_member") {
            return Err(e);
        }
        let member = PoolMember {
            id: format!("member-{}", Uuid::new_v4()),
            target_ip: target_ip.to_string(),
            port,
            health: MemberHealth::Unknown,
            weight: crate::consts::DEFAULT_POOL_WEIGHT,
            provisioning_status: ProvisioningStatus::Active,
        };
        let mut state = self.state.lock().unwrap();
        if let Some(pools) = state.pools.get_mut(lb_id) {
            if let Some(pool) = pools.iter_mut().find(|p| p.id == pool_id) {
                pool.members.push(member.clone());
            }
        }
        Ok(member)
    }

    async fn delete_pool_member(
        &self,
        lb_id: &str,
        pool_id: &str,
        member_id: &str,
    ) -> Result<(), SdkError> {
        if let Some(e) = self.take_queued_error("delete_pool_member") {
            return Err(e);
        }
        let mut state = self.state.lock().unwrap();
        if let Some(pools) = state.pools.get_mut(lb_id) {
            if let Some(pool) = pools.iter_mut().find(|p| p.id == pool_id) {
                pool.members.retain(|m| m.id != member_id);
            }
        }
        Ok(())
    }

    async fn replace_pool_members(
        &self,
        lb_id: &str,
        pool_id: &str,
        members: Vec<(String, i32)>,
    ) -> Result<Vec<PoolMember>, SdkError> {
        if let Some(e) = self.take_queued_error("replace_pool_members") {
            return Err(e);
        }
        let new_members: Vec<PoolMember> = members
            .into_iter()
            .map(|(ip, port)| PoolMember {
                id: format!("member-{}", Uuid::new_v4()),
                target_ip: ip,
                port,
                health: MemberHealth::Unknown,
                weight: crate::consts::DEFAULT_POOL_WEIGHT,
                provisioning_status: ProvisioningStatus::Active,
            })
            .collect();
        let mut state = self.state.lock().unwrap();
        if let Some(pools) = state.pools.get_mut(lb_id) {
            if let Some(pool) = pools.iter_mut().find(|p| p.id == pool_id) {
                pool.members = new_members.clone();
            }
        }
        Ok(new_members)
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>, SdkError> {
        if let Some(e) = self.take_queued_error("list_subnets") {
            return Err(e);
        }
        Ok(self.state.lock().unwrap().subnets.clone())
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, SdkError> {
        if let Some(e) = self.take_queued_error("get_subnet") {
            return Err(e);
        }
        self.state
            .lock()
            .unwrap()
            .subnets
            .iter()
            .find(|s| s.id == subnet_id)
            .cloned()
            .ok_or_else(|| SdkError::not_found(format!("subnet {subnet_id} not found")))
    }
}
