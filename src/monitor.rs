//! `MonitorLoadBalancers` (§4.6, §9's "single process-wide CloudVpc handle"
//! design note): a periodic tick that classifies every owned load balancer's
//! operational state against the Service that expects it, emits events on
//! state transitions (not every tick), and reclaims orphans.

use std::collections::HashMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::ResourceExt;

use crate::config::VpcConfiguration;
use crate::consts;
use crate::domain::LoadBalancer;
use crate::naming;
use crate::sdk::VpcLoadBalancerApi;
use crate::service_options::ServiceOptions;

/// Carried between ticks so events fire on transition, not on every poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObservedStatus {
    Ready,
    NotReady,
}

/// Process-wide carry-state for the monitor loop, held in an `Arc<RwLock<_>>`
/// by whoever starts the loop and initialized once at boot.
#[derive(Debug, Default)]
pub struct MonitorState {
    last_status: HashMap<String, ObservedStatus>,
}

impl MonitorState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

pub struct Monitor {
    api: Arc<dyn VpcLoadBalancerApi>,
    config: VpcConfiguration,
    client: kube::Client,
    reporter: Reporter,
}

impl Monitor {
    #[must_use]
    pub fn new(api: Arc<dyn VpcLoadBalancerApi>, config: VpcConfiguration, client: kube::Client) -> Self {
        Self {
            api,
            config,
            client,
            reporter: Reporter {
                controller: "vpclb-monitor".to_string(),
                instance: None,
            },
        }
    }

    /// One tick of `MonitorLoadBalancers(services, carryStatus)`: build
    /// `lbMap` (service uid -> expected LB name) for `LoadBalancer`-typed
    /// Services and `npMap` for `NodePort`-typed ones, list all owned LBs,
    /// diff observed status against `state`'s carried status, emit events on
    /// transition only, then reclaim any owned LB with no Service in either
    /// map that's still in a ready state.
    pub async fn tick(&self, services: &[Service], state: &mut MonitorState) -> Result<(), crate::error::SdkError> {
        let lb_map = build_lb_map(services, &self.config.cluster_id);
        let np_map = build_np_map(services, &self.config.cluster_id);

        let owned: Vec<LoadBalancer> = self
            .api
            .list_load_balancers()
            .await?
            .into_iter()
            .filter(|lb| lb.is_owned(&self.config.cluster_id))
            .collect();

        let mut next_status = HashMap::new();

        for (name, svc) in &lb_map {
            let Some(lb) = owned.iter().find(|lb| &lb.name == name) else {
                continue;
            };
            let observed = if lb.is_ready() { ObservedStatus::Ready } else { ObservedStatus::NotReady };
            let previous = state.last_status.get(name).copied();

            match (previous, observed) {
                (Some(ObservedStatus::NotReady) | None, ObservedStatus::Ready) => {
                    self.emit(svc, EventType::Normal, consts::EVENT_REASON_NORMAL, "LoadBalancer is online".to_string()).await;
                }
                (Some(ObservedStatus::NotReady), ObservedStatus::NotReady) => {
                    self.emit(svc, EventType::Warning, consts::EVENT_REASON_VERIFY_FAILED, "LoadBalancer is still not ready".to_string()).await;
                }
                _ => {}
            }

            next_status.insert(name.clone(), observed);
        }

        for lb in &owned {
            if lb_map.contains_key(&lb.name) || np_map.contains_key(&lb.name) {
                continue;
            }
            if lb.is_ready() {
                tracing::info!(lb_id = %lb.id, lb_name = %lb.name, "reclaiming orphaned load balancer");
                self.api.delete_load_balancer(&lb.id).await?;
            }
        }

        state.last_status = next_status;
        Ok(())
    }

    async fn emit(&self, svc: &Service, event_type: EventType, reason: &str, note: String) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), svc.object_ref(&()));
        let event = Event {
            type_: event_type,
            reason: reason.to_string(),
            note: Some(note),
            action: "Monitor".to_string(),
            secondary: None,
        };
        if let Err(err) = recorder.publish(event).await {
            tracing::warn!(error = %err, "failed to publish monitor event");
        }
    }
}

/// `lbMap`: service uid -> expected owned LB name, for every Service of type
/// `LoadBalancer`.
fn build_lb_map<'a>(services: &'a [Service], cluster_id: &str) -> HashMap<String, &'a Service> {
    services
        .iter()
        .filter(|svc| is_load_balancer_type(svc))
        .map(|svc| {
            let opts = ServiceOptions::from_service(svc);
            let name = opts
                .lb_name_override
                .clone()
                .unwrap_or_else(|| naming::generate_lb_name(cluster_id, &svc.uid().unwrap_or_default()));
            (name, svc)
        })
        .collect()
}

/// `npMap`: same keying, for `NodePort`-typed Services — these never owned a
/// load balancer but are tracked so the monitor doesn't reclaim an LB whose
/// Service was merely changed from `LoadBalancer` to `NodePort` mid-flight.
fn build_np_map<'a>(services: &'a [Service], cluster_id: &str) -> HashMap<String, &'a Service> {
    services
        .iter()
        .filter(|svc| svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("NodePort"))
        .map(|svc| {
            let opts = ServiceOptions::from_service(svc);
            let name = opts
                .lb_name_override
                .clone()
                .unwrap_or_else(|| naming::generate_lb_name(cluster_id, &svc.uid().unwrap_or_default()));
            (name, svc)
        })
        .collect()
}

fn is_load_balancer_type(svc: &Service) -> bool {
    svc.spec.as_ref().and_then(|s| s.type_.as_deref()) == Some("LoadBalancer")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OperatorConfig, ProviderKind};
    use crate::domain::{NamedRef, OperatingStatus, ProfileFamily, ProvisioningStatus};
    use crate::sdk::fake::FakeVpcApi;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::api::core::v1::ServiceSpec;

    fn config() -> VpcConfiguration {
        VpcConfiguration::initialize(&OperatorConfig {
            provider: ProviderKind::Fake,
            cluster_id: "cluster1".into(),
            account_id: String::new(),
            api_key_secret: String::new(),
            region: String::new(),
            resource_group_name: String::new(),
            subnet_names: String::new(),
            vpc_name: String::new(),
            staging: false,
            enable_private: false,
            log_level: tracing::level_filters::LevelFilter::INFO,
        })
        .unwrap()
    }

    fn client() -> kube::Client {
        kube::Client::try_from(kube::Config::new("https://127.0.0.1:1".parse().unwrap())).unwrap()
    }

    fn lb_service(uid: &str) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("svc1".to_string()),
                namespace: Some("default".to_string()),
                uid: Some(uid.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }

    fn lb(id: &str, name: &str, ready: bool) -> LoadBalancer {
        LoadBalancer {
            id: id.to_string(),
            name: name.to_string(),
            is_public: true,
            hostname: Some(format!("{id}.lb.example.com")),
            listener_ids: vec![],
            pools: vec![],
            subnets: vec![],
            private_ips: vec![],
            public_ips: vec![],
            resource_group: NamedRef { id: "rg-1".into(), name: "default".into() },
            profile_family: ProfileFamily::Application,
            operating_status: if ready { OperatingStatus::Online } else { OperatingStatus::Offline },
            provisioning_status: if ready { ProvisioningStatus::Active } else { ProvisioningStatus::UpdatePending },
        }
    }

    #[tokio::test]
    async fn orphaned_ready_lb_is_reclaimed() {
        let api = Arc::new(FakeVpcApi::new());
        let owned_name = naming::generate_lb_name("cluster1", "notmatchinguid");
        api.seed_load_balancer(lb("lb-1", &owned_name, true), vec![], vec![]);
        let monitor = Monitor::new(api.clone(), config(), client());

        let mut state = MonitorState::new();
        monitor.tick(&[], &mut state).await.unwrap();

        assert_eq!(api.load_balancer_count(), 0);
    }

    #[tokio::test]
    async fn tracked_lb_is_not_reclaimed() {
        let api = Arc::new(FakeVpcApi::new());
        let svc = lb_service("abc123");
        let name = naming::generate_lb_name("cluster1", &svc.uid().unwrap());
        api.seed_load_balancer(lb("lb-1", &name, true), vec![], vec![]);
        let monitor = Monitor::new(api.clone(), config(), client());

        let mut state = MonitorState::new();
        monitor.tick(&[svc], &mut state).await.unwrap();

        assert_eq!(api.load_balancer_count(), 1);
    }

    #[tokio::test]
    async fn not_ready_lb_is_never_reclaimed() {
        let api = Arc::new(FakeVpcApi::new());
        let owned_name = naming::generate_lb_name("cluster1", "notmatchinguid");
        api.seed_load_balancer(lb("lb-1", &owned_name, false), vec![], vec![]);
        let monitor = Monitor::new(api.clone(), config(), client());

        let mut state = MonitorState::new();
        monitor.tick(&[], &mut state).await.unwrap();

        assert_eq!(api.load_balancer_count(), 1);
    }

    #[tokio::test]
    async fn status_transition_to_ready_is_tracked_in_state() {
        let api = Arc::new(FakeVpcApi::new());
        let svc = lb_service("abc123");
        let name = naming::generate_lb_name("cluster1", &svc.uid().unwrap());
        api.seed_load_balancer(lb("lb-1", &name, true), vec![], vec![]);
        let monitor = Monitor::new(api.clone(), config(), client());

        let mut state = MonitorState::new();
        monitor.tick(std::slice::from_ref(&svc), &mut state).await.unwrap();

        assert_eq!(state.last_status.get(&name), Some(&ObservedStatus::Ready));
    }

    #[test]
    fn unowned_lb_never_enters_lb_map() {
        let svc = lb_service("abc123");
        let map = build_lb_map(&[svc], "cluster1");
        assert_eq!(map.len(), 1);
    }
}
