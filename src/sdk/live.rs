//! Live [`VpcLoadBalancerApi`] implementation binding to the cloud's VPC REST
//! API over `reqwest`. Since no pre-generated SDK crate exists for this
//! provider's VPC surface, this is a small hand-written typed client with
//! its own wire DTOs and `From` conversions into the domain model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::consts::SDK_REQUEST_TIMEOUT_SECS;
use crate::domain::{
    HealthMonitor, Listener, LoadBalancer, MemberHealth, NamedRef, OperatingStatus, Pool,
    PoolMember, ProfileFamily, Protocol, ProvisioningStatus, Subnet,
};
use crate::error::SdkError;
use crate::iam::IamAuthenticator;

use super::{CreateLoadBalancerRequest, CreatePoolRequest, UpdatePoolRequest, VpcLoadBalancerApi};

#[derive(Debug, Clone, Deserialize)]
struct NextLink {
    href: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct PageLinks {
    next: Option<NextLink>,
}

pub struct LiveVpcApi {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn IamAuthenticator>,
}

impl LiveVpcApi {
    /// `base_url` is the VPC endpoint with the `/v1` suffix already appended
    /// by `VpcConfiguration::initialize`.
    #[must_use]
    pub fn new(base_url: String, auth: Arc<dyn IamAuthenticator>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(SDK_REQUEST_TIMEOUT_SECS))
            .build()
            .expect("reqwest client configuration is always valid");
        Self { http, base_url, auth }
    }

    async fn authed(&self, builder: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder, SdkError> {
        let token = self.auth.access_token().await?;
        Ok(builder.bearer_auth(token))
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, SdkError> {
        let builder = self.authed(builder).await?;
        let resp = builder
            .send()
            .await
            .map_err(|e| SdkError::new(format!("request failed: {e}"), None))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::info!(status = %status, body, "cloud API returned an error");
            return Err(SdkError::new(
                format!("cloud API returned status {status}"),
                Some(status.as_u16()),
            ));
        }
        resp.json::<T>()
            .await
            .map_err(|e| SdkError::new(format!("response decode failed: {e}"), None))
    }

    async fn send_empty(&self, builder: reqwest::RequestBuilder) -> Result<(), SdkError> {
        let builder = self.authed(builder).await?;
        let resp = builder
            .send()
            .await
            .map_err(|e| SdkError::new(format!("request failed: {e}"), None))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::info!(status = %status, body, "cloud API returned an error");
            return Err(SdkError::new(
                format!("cloud API returned status {status}"),
                Some(status.as_u16()),
            ));
        }
        Ok(())
    }

    /// Follow the opaque `next.href` cursor until the cloud stops returning
    /// one, accumulating every page's items.
    async fn paginate<T, F>(&self, first_url: String, extract: F) -> Result<Vec<T>, SdkError>
    where
        F: Fn(serde_json::Value) -> (Vec<T>, PageLinks),
    {
        let mut items = Vec::new();
        let mut url = Some(first_url);
        while let Some(next_url) = url {
            let page: serde_json::Value = self.send_json(self.http.get(&next_url)).await?;
            let (mut page_items, links) = extract(page);
            items.append(&mut page_items);
            url = links.next.map(|n| n.href);
        }
        Ok(items)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl VpcLoadBalancerApi for LiveVpcApi {
    async fn list_load_balancers(&self) -> Result<Vec<LoadBalancer>, SdkError> {
        let raw: Vec<WireLoadBalancer> = self
            .paginate(self.url("/load_balancers"), |page| {
                let items = page
                    .get("load_balancers")
                    .cloned()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .unwrap_or_default();
                let links: PageLinks = page
                    .get("next")
                    .cloned()
                    .map(|n| PageLinks { next: serde_json::from_value(n).ok() })
                    .unwrap_or_default();
                (items, links)
            })
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn get_load_balancer(&self, lb_id: &str) -> Result<LoadBalancer, SdkError> {
        let wire: WireLoadBalancer = self
            .send_json(self.http.get(self.url(&format!("/load_balancers/{lb_id}"))))
            .await?;
        Ok(wire.into())
    }

    async fn create_load_balancer(
        &self,
        req: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancer, SdkError> {
        let body = serde_json::json!({
            "name": req.name,
            "is_public": req.is_public,
            "subnets": req.subnet_ids.iter().map(|id| serde_json::json!({"id": id})).collect::<Vec<_>>(),
            "resource_group": {"id": req.resource_group_id},
            "pools": req.pools.iter().map(wire_create_pool_body).collect::<Vec<_>>(),
            "listeners": req.listeners.iter().map(|l| serde_json::json!({
                "port": l.port,
                "protocol": l.protocol,
                "default_pool": {"name": l.default_pool_name},
            })).collect::<Vec<_>>(),
        });
        let wire: WireLoadBalancer = self
            .send_json(self.http.post(self.url("/load_balancers")).json(&body))
            .await?;
        Ok(wire.into())
    }

    async fn delete_load_balancer(&self, lb_id: &str) -> Result<(), SdkError> {
        self.send_empty(self.http.delete(self.url(&format!("/load_balancers/{lb_id}"))))
            .await
    }

    async fn list_listeners(&self, lb_id: &str) -> Result<Vec<Listener>, SdkError> {
        let raw: Vec<WireListener> = self
            .paginate(self.url(&format!("/load_balancers/{lb_id}/listeners")), |page| {
                let items = page
                    .get("listeners")
                    .cloned()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .unwrap_or_default();
                let links: PageLinks = page
                    .get("next")
                    .cloned()
                    .map(|n| PageLinks { next: serde_json::from_value(n).ok() })
                    .unwrap_or_default();
                (items, links)
            })
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn create_listener(
        &self,
        lb_id: &str,
        port: i32,
        protocol: Protocol,
        default_pool_id: &str,
    ) -> Result<Listener, SdkError> {
        let body = serde_json::json!({
            "port": port,
            "protocol": protocol,
            "default_pool": {"id": default_pool_id},
        });
        let wire: WireListener = self
            .send_json(
                self.http
                    .post(self.url(&format!("/load_balancers/{lb_id}/listeners")))
                    .json(&body),
            )
            .await?;
        Ok(wire.into())
    }

    async fn delete_listener(&self, lb_id: &str, listener_id: &str) -> Result<(), SdkError> {
        self.send_empty(self.http.delete(self.url(&format!(
            "/load_balancers/{lb_id}/listeners/{listener_id}"
        ))))
        .await
    }

    async fn list_pools(&self, lb_id: &str) -> Result<Vec<Pool>, SdkError> {
        let raw: Vec<WirePool> = self
            .paginate(self.url(&format!("/load_balancers/{lb_id}/pools")), |page| {
                let items = page
                    .get("pools")
                    .cloned()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .unwrap_or_default();
                let links: PageLinks = page
                    .get("next")
                    .cloned()
                    .map(|n| PageLinks { next: serde_json::from_value(n).ok() })
                    .unwrap_or_default();
                (items, links)
            })
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn create_pool(&self, lb_id: &str, req: CreatePoolRequest) -> Result<Pool, SdkError> {
        let body = wire_create_pool_body(&req);
        let wire: WirePool = self
            .send_json(
                self.http
                    .post(self.url(&format!("/load_balancers/{lb_id}/pools")))
                    .json(&body),
            )
            .await?;
        Ok(wire.into())
    }

    async fn update_pool(
        &self,
        lb_id: &str,
        pool_id: &str,
        patch: UpdatePoolRequest,
    ) -> Result<Pool, SdkError> {
        let mut body = serde_json::Map::new();
        if let Some(name) = patch.name {
            body.insert("name".to_string(), serde_json::json!(name));
        }
        if let Some(monitor) = patch.health_monitor {
            body.insert("health_monitor".to_string(), wire_health_monitor_body(&monitor));
        }
        if let Some(proxy) = patch.proxy_protocol {
            body.insert("proxy_protocol".to_string(), serde_json::json!(proxy));
        }
        let wire: WirePool = self
            .send_json(
                self.http
                    .patch(self.url(&format!("/load_balancers/{lb_id}/pools/{pool_id}")))
                    .json(&serde_json::Value::Object(body)),
            )
            .await?;
        Ok(wire.into())
    }

    async fn delete_pool(&self, lb_id: &str, pool_id: &str) -> Result<(), SdkError> {
        self.send_empty(
            self.http
                .delete(self.url(&format!("/load_balancers/{lb_id}/pools/{pool_id}"))),
        )
        .await
    }

    async fn list_pool_members(&self, lb_id: &str, pool_id: &str) -> Result<Vec<PoolMember>, SdkError> {
        let raw: Vec<WirePoolMember> = self
            .paginate(
                self.url(&format!("/load_balancers/{lb_id}/pools/{pool_id}/members")),
                |page| {
                    let items = page
                        .get("members")
                        .cloned()
                        .map(|v| serde_json::from_value(v).unwrap_or_default())
                        .unwrap_or_default();
                    let links: PageLinks = page
                        .get("next")
                        .cloned()
                        .map(|n| PageLinks { next: serde_json::from_value(n).ok() })
                        .unwrap_or_default();
                    (items, links)
                },
            )
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn create_pool_member(
        &self,
        lb_id: &str,
        pool_id: &str,
        target_ip: &str,
        port: i32,
    ) -> Result<PoolMember, SdkError> {
        let body = serde_json::json!({
            "port": port,
            "target": {"address": target_ip},
        });
        let wire: WirePoolMember = self
            .send_json(
                self.http
                    .post(self.url(&format!("/load_balancers/{lb_id}/pools/{pool_id}/members")))
                    .json(&body),
            )
            .await?;
        Ok(wire.into())
    }

    async fn delete_pool_member(
        &self,
        lb_id: &str,
        pool_id: &str,
        member_id: &str,
    ) -> Result<(), SdkError> {
        self.send_empty(self.http.delete(self.url(&format!(
            "/load_balancers/{lb_id}/pools/{pool_id}/members/{member_id}"
        ))))
        .await
    }

    async fn replace_pool_members(
        &self,
        lb_id: &str,
        pool_id: &str,
        members: Vec<(String, i32)>,
    ) -> Result<Vec<PoolMember>, SdkError> {
        let body = serde_json::json!({
            "members": members
                .iter()
                .map(|(ip, port)| serde_json::json!({"port": port, "target": {"address": ip}}))
                .collect::<Vec<_>>(),
        });
        let raw: Vec<WirePoolMember> = self
            .send_json(
                self.http
                    .put(self.url(&format!("/load_balancers/{lb_id}/pools/{pool_id}/members")))
                    .json(&body),
            )
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn list_subnets(&self) -> Result<Vec<Subnet>, SdkError> {
        let raw: Vec<WireSubnet> = self
            .paginate(self.url("/subnets"), |page| {
                let items = page
                    .get("subnets")
                    .cloned()
                    .map(|v| serde_json::from_value(v).unwrap_or_default())
                    .unwrap_or_default();
                let links: PageLinks = page
                    .get("next")
                    .cloned()
                    .map(|n| PageLinks { next: serde_json::from_value(n).ok() })
                    .unwrap_or_default();
                (items, links)
            })
            .await?;
        Ok(raw.into_iter().map(Into::into).collect())
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, SdkError> {
        let wire: WireSubnet = self
            .send_json(self.http.get(self.url(&format!("/subnets/{subnet_id}"))))
            .await?;
        Ok(wire.into())
    }
}

fn wire_health_monitor_body(monitor: &HealthMonitor) -> serde_json::Value {
    serde_json::json!({
        "type": monitor.monitor_type,
        "port": monitor.port,
        "delay": monitor.delay_secs,
        "max_retries": monitor.max_retries,
        "timeout": monitor.timeout_secs,
        "url_path": monitor.url_path,
    })
}

fn wire_create_pool_body(req: &CreatePoolRequest) -> serde_json::Value {
    serde_json::json!({
        "name": req.name,
        "algorithm": "round_robin",
        "health_monitor": wire_health_monitor_body(&req.health_monitor),
        "proxy_protocol": req.proxy_protocol,
        "members": req.members.iter().map(|(ip, port)| serde_json::json!({
            "port": port,
            "target": {"address": ip},
        })).collect::<Vec<_>>(),
    })
}

// Wire DTOs. Kept separate from the domain types so the cloud's JSON shape
// never leaks past this module.

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireLoadBalancer {
    id: String,
    name: String,
    is_public: bool,
    hostname: Option<String>,
    #[serde(default)]
    listeners: Vec<WireIdRef>,
    #[serde(default)]
    pools: Vec<WireIdRef>,
    #[serde(default)]
    subnets: Vec<WireIdRef>,
    #[serde(default)]
    private_ips: Vec<String>,
    #[serde(default)]
    public_ips: Vec<String>,
    resource_group: WireIdRef,
    profile_family: String,
    operating_status: String,
    provisioning_status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireIdRef {
    id: String,
    #[serde(default)]
    name: String,
}

impl From<WireIdRef> for NamedRef {
    fn from(w: WireIdRef) -> Self {
        Self { id: w.id, name: w.name }
    }
}

impl From<WireLoadBalancer> for LoadBalancer {
    fn from(w: WireLoadBalancer) -> Self {
        Self {
            id: w.id,
            name: w.name,
            is_public: w.is_public,
            hostname: w.hostname,
            listener_ids: w.listeners.into_iter().map(|l| l.id).collect(),
            pools: w.pools.into_iter().map(Into::into).collect(),
            subnets: w.subnets.into_iter().map(Into::into).collect(),
            private_ips: w.private_ips,
            public_ips: w.public_ips,
            resource_group: w.resource_group.into(),
            profile_family: if w.profile_family.eq_ignore_ascii_case("network") {
                ProfileFamily::Network
            } else {
                ProfileFamily::Application
            },
            operating_status: if w.operating_status.eq_ignore_ascii_case("online") {
                OperatingStatus::Online
            } else {
                OperatingStatus::Offline
            },
            provisioning_status: parse_provisioning_status(&w.provisioning_status),
        }
    }
}

fn parse_provisioning_status(s: &str) -> ProvisioningStatus {
    match s {
        "create_pending" => ProvisioningStatus::CreatePending,
        "update_pending" => ProvisioningStatus::UpdatePending,
        "delete_pending" => ProvisioningStatus::DeletePending,
        "maintenance_pending" => ProvisioningStatus::MaintenancePending,
        "failed" => ProvisioningStatus::Failed,
        _ => ProvisioningStatus::Active,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireListener {
    id: String,
    port: i32,
    protocol: String,
    default_pool: Option<WireIdRef>,
    connection_limit: i32,
    provisioning_status: String,
}

impl From<WireListener> for Listener {
    fn from(w: WireListener) -> Self {
        Self {
            id: w.id,
            port: w.port,
            protocol: if w.protocol.eq_ignore_ascii_case("udp") {
                Protocol::Udp
            } else {
                Protocol::Tcp
            },
            default_pool_id: w.default_pool.map(|p| p.id),
            connection_limit: w.connection_limit,
            provisioning_status: parse_provisioning_status(&w.provisioning_status),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireHealthMonitor {
    #[serde(rename = "type")]
    monitor_type: String,
    port: i32,
    delay: i32,
    max_retries: i32,
    timeout: i32,
    url_path: Option<String>,
}

impl From<WireHealthMonitor> for HealthMonitor {
    fn from(w: WireHealthMonitor) -> Self {
        Self {
            monitor_type: if w.monitor_type.eq_ignore_ascii_case("http") {
                crate::domain::HealthMonitorType::Http
            } else {
                crate::domain::HealthMonitorType::Tcp
            },
            port: w.port,
            delay_secs: w.delay,
            max_retries: w.max_retries,
            timeout_secs: w.timeout,
            url_path: w.url_path,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WirePool {
    id: String,
    name: String,
    algorithm: String,
    health_monitor: WireHealthMonitor,
    session_persistence: Option<String>,
    proxy_protocol: String,
    #[serde(default)]
    members: Vec<WirePoolMember>,
    provisioning_status: String,
}

impl From<WirePool> for Pool {
    fn from(w: WirePool) -> Self {
        Self {
            id: w.id,
            name: w.name,
            algorithm: w.algorithm,
            health_monitor: w.health_monitor.into(),
            session_persistence: match w.session_persistence.as_deref() {
                Some("source_ip") => crate::domain::SessionPersistence::SourceIp,
                _ => crate::domain::SessionPersistence::None,
            },
            proxy_protocol: if w.proxy_protocol == "v1" {
                crate::domain::ProxyProtocol::V1
            } else {
                crate::domain::ProxyProtocol::Disabled
            },
            members: w.members.into_iter().map(Into::into).collect(),
            provisioning_status: parse_provisioning_status(&w.provisioning_status),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WirePoolMember {
    id: String,
    #[serde(default)]
    target: WireTarget,
    port: i32,
    health: Option<String>,
    weight: Option<i32>,
    provisioning_status: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireTarget {
    address: String,
}

impl From<WirePoolMember> for PoolMember {
    fn from(w: WirePoolMember) -> Self {
        Self {
            id: w.id,
            target_ip: w.target.address,
            port: w.port,
            health: match w.health.as_deref() {
                Some("ok") => MemberHealth::Ok,
                Some("faulted") => MemberHealth::Faulted,
                _ => MemberHealth::Unknown,
            },
            weight: w.weight.unwrap_or(crate::consts::DEFAULT_POOL_WEIGHT),
            provisioning_status: parse_provisioning_status(&w.provisioning_status),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireSubnet {
    id: String,
    name: String,
    ipv4_cidr_block: String,
    zone: WireZone,
    vpc: WireIdRef,
    status: String,
    available_ipv4_address_count: i64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
struct WireZone {
    name: String,
}

impl From<WireSubnet> for Subnet {
    fn from(w: WireSubnet) -> Self {
        Self {
            id: w.id,
            name: w.name,
            cidr: w.ipv4_cidr_block,
            zone: w.zone.name,
            vpc_id: w.vpc.id,
            status: w.status,
            available_ipv4_count: w.available_ipv4_address_count,
        }
    }
}
