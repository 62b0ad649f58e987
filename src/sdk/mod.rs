//! Cloud SDK port: a capability boundary exposing typed operations
//! against the VPC API. Two implementations exist — [`live::LiveVpcApi`]
//! binding to the cloud's REST API over `reqwest`, and [`fake::FakeVpcApi`]
//! returning canned objects and programmable errors for tests.

pub mod fake;
pub mod live;

use async_trait::async_trait;

use crate::domain::{HealthMonitor, Listener, LoadBalancer, Pool, PoolMember, ProxyProtocol, Subnet};
use crate::error::SdkError;

#[derive(Debug, Clone, Default)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub is_public: bool,
    pub subnet_ids: Vec<String>,
    pub resource_group_id: String,
    pub listeners: Vec<CreateListenerRequest>,
    pub pools: Vec<CreatePoolRequest>,
}

#[derive(Debug, Clone)]
pub struct CreateListenerRequest {
    pub port: i32,
    pub protocol: crate::domain::Protocol,
    pub default_pool_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatePoolRequest {
    pub name: String,
    pub health_monitor: HealthMonitor,
    pub proxy_protocol: ProxyProtocol,
    pub members: Vec<(String, i32)>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdatePoolRequest {
    pub name: Option<String>,
    pub health_monitor: Option<HealthMonitor>,
    pub proxy_protocol: Option<ProxyProtocol>,
}

/// The cloud SDK port. All operations are synchronous request/response from
/// the caller's point of view (`async fn` over the network); pagination is
/// handled internally via the cloud's opaque `next.href` cursor so callers
/// always see a fully materialized list.
#[async_trait]
pub trait VpcLoadBalancerApi: Send + Sync {
    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>, SdkError>;
    async fn get_load_balancer(&self, lb_id: &str) -> Result<LoadBalancer, SdkError>;
    async fn create_load_balancer(
        &self,
        req: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer, SdkError>;
    async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), SdkError>;

    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>, SdkError>;
    async fn create_listener(
        &self,
        lb_id: &str,
        port: i32,
        protocol: crate::domain::Protocol,
        default_pool_id: &str,
    ) -> Result<Listener, SdkError>;
    async fn delete_listener(&self, lb_id: &str, listener_id: &str) -> Result<(), SdkError>;

    async fn list_pools(&self, lb_id: &str) -> Result<Vec<Pool>, SdkError>;
    async fn create_pool(&self, lb_id: &str, req: CreatePoolRequest) -> Result<Pool, SdkError>;
    async fn update_pool(
        &self,
        lb_id: &str,
        pool_id: &str,
        patch: UpdatePoolRequest,
    ) -> Result<Pool, SdkError>;
    async fn delete_pool(&self, lb_id: &str, pool_id: &str) -> Result<(), SdkError>;

    async fn list_pool_members(&self, lb_id: &str, pool_id: &str) -> Result<Vec<PoolMember>, SdkError>;
    async fn create_pool_member(
        &self,
        lb_id: &str,
        pool_id: &str,
        target_ip: &str,
        port: i32,
    ) -> Result<PoolMember, SdkError>;
    async fn delete_pool_member(
        &self,
        lb_id: &str,
        pool_id: &str,
        member_id: &str,
    ) -> Result<(), SdkError>;
    async fn replace_pool_members(
        &self,
        lb_id: &str,
        pool_id: &str,
        members: Vec<(String, i32)>,
    ) -> Result<Vec<PoolMember>, SdkError>;

    async fn list_subnets(&self) -> Result<Vec<Subnet>, SdkError>;
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, SdkError>;
}
