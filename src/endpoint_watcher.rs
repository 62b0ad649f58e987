//! Endpoint re-placement watcher, classic provider only. Watches
//! `Endpoints` updates, and for each Service that qualifies (type
//! `LoadBalancer`, `externalTrafficPolicy=Local`, IPVS feature disabled, and
//! already carrying an ingress IP) evicts any keepalived pod, labelled with
//! that IP, whose `hostIP` no longer appears among the Service's endpoint
//! hosts — triggering a reschedule onto a node that still serves traffic.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::{FutureExt, StreamExt};
use k8s_openapi::api::core::v1::{Endpoints, Pod, Service};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, ResourceExt};

use crate::consts;

/// Runs the watch loop forever. A panic inside one event's handling body is
/// caught, logged, and followed by a fixed cooldown before the watch stream
/// is re-entered, so one bad event never takes the background task down
/// for good.
pub async fn run(client: Client) {
    let reporter = Reporter {
        controller: "vpclb-endpoint-watcher".to_string(),
        instance: None,
    };
    loop {
        let api = Api::<Endpoints>::all(client.clone());
        let mut stream = Box::pin(watcher::watcher(api, watcher::Config::default()).default_backoff());
        loop {
            let event = match stream.next().await {
                Some(Ok(event)) => event,
                Some(Err(err)) => {
                    tracing::warn!(error = %err, "endpoint watcher stream error");
                    continue;
                }
                None => break,
            };

            let client = client.clone();
            let reporter = reporter.clone();
            let outcome = AssertUnwindSafe(handle_event(event, client, reporter)).catch_unwind().await;
            if let Err(panic) = outcome {
                tracing::error!(?panic, "endpoint watcher panicked handling an event, restarting after cooldown");
                tokio::time::sleep(Duration::from_secs(consts::WATCHER_PANIC_COOLDOWN_SECS)).await;
                break;
            }
        }
        tokio::time::sleep(Duration::from_secs(consts::WATCHER_PANIC_COOLDOWN_SECS)).await;
    }
}

async fn handle_event(event: watcher::Event<Endpoints>, client: Client, reporter: Reporter) {
    let endpoints = match event {
        watcher::Event::Apply(endpoints) => endpoints,
        watcher::Event::Delete(_) | watcher::Event::Init | watcher::Event::InitApply(_) | watcher::Event::InitDone => return,
    };
    if let Err(err) = reconcile_endpoints(&endpoints, &client, &reporter).await {
        tracing::warn!(error = %err, endpoints = %endpoints.name_any(), "endpoint re-placement pass failed");
    }
}

async fn reconcile_endpoints(endpoints: &Endpoints, client: &Client, reporter: &Reporter) -> Result<(), kube::Error> {
    let host_ips = derive_host_ips(endpoints);
    if host_ips.is_empty() {
        return Ok(());
    }

    let Some(namespace) = endpoints.namespace() else {
        return Ok(());
    };
    let svc_api = Api::<Service>::namespaced(client.clone(), &namespace);
    let Ok(svc) = svc_api.get(&endpoints.name_any()).await else {
        return Ok(());
    };

    if !qualifies(&svc) {
        return Ok(());
    }
    let Some(ingress_ip) = ingress_ip(&svc) else {
        return Ok(());
    };

    let pod_api = Api::<Pod>::namespaced(client.clone(), &namespace);
    let pods = pod_api
        .list(&kube::api::ListParams {
            label_selector: Some(format!("{}={}", consts::LB_NAME_LABEL_NAME, ingress_ip)),
            ..Default::default()
        })
        .await?;

    for pod in pods {
        let Some(host_ip) = pod.status.as_ref().and_then(|s| s.host_ip.clone()) else {
            continue;
        };
        if host_ips.contains(&host_ip) {
            continue;
        }

        tracing::info!(pod = %pod.name_any(), host_ip, "evicting keepalived pod no longer backed by an endpoint host");
        if let Err(err) = pod_api.delete(&pod.name_any(), &kube::api::DeleteParams::default()).await {
            emit_warning(client.clone(), reporter.clone(), &svc, format!("failed to evict keepalived pod {}: {err}", pod.name_any())).await;
        }
    }

    Ok(())
}

/// Host IPs backing at least one ready endpoint address.
fn derive_host_ips(endpoints: &Endpoints) -> HashSet<String> {
    endpoints
        .subsets
        .iter()
        .flatten()
        .flat_map(|subset| subset.addresses.iter().flatten())
        .map(|addr| addr.ip.clone())
        .collect()
}

fn qualifies(svc: &Service) -> bool {
    let Some(spec) = svc.spec.as_ref() else {
        return false;
    };
    if spec.type_.as_deref() != Some("LoadBalancer") {
        return false;
    }
    if spec.external_traffic_policy.as_deref() != Some("Local") {
        return false;
    }
    let opts = crate::service_options::ServiceOptions::from_service(svc);
    !opts.has_feature(consts::FEATURE_IPVS)
}

fn ingress_ip(svc: &Service) -> Option<String> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .clone()
}

async fn emit_warning(client: Client, reporter: Reporter, svc: &Service, note: String) {
    let recorder = Recorder::new(client, reporter, svc.object_ref(&()));
    let event = Event {
        type_: EventType::Warning,
        reason: "KeepalivedPodEvictionFailed".to_string(),
        note: Some(note),
        action: "Reconcile".to_string(),
        secondary: None,
    };
    if let Err(err) = recorder.publish(event).await {
        tracing::warn!(error = %err, "failed to publish keepalived eviction warning event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{EndpointAddress, EndpointSubset, LoadBalancerIngress, LoadBalancerStatus, ServiceSpec, ServiceStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn endpoints_with_hosts(ips: &[&str]) -> Endpoints {
        Endpoints {
            metadata: ObjectMeta::default(),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(ips.iter().map(|ip| EndpointAddress { ip: ip.to_string(), ..Default::default() }).collect()),
                ..Default::default()
            }]),
        }
    }

    #[test]
    fn derive_host_ips_collects_all_subset_addresses() {
        let endpoints = endpoints_with_hosts(&["10.0.0.1", "10.0.0.2"]);
        let ips = derive_host_ips(&endpoints);
        assert_eq!(ips.len(), 2);
        assert!(ips.contains("10.0.0.1"));
    }

    #[test]
    fn empty_subsets_yield_empty_host_set() {
        let endpoints = Endpoints { metadata: ObjectMeta::default(), subsets: None };
        assert!(derive_host_ips(&endpoints).is_empty());
    }

    fn base_service() -> Service {
        Service {
            metadata: ObjectMeta::default(),
            spec: Some(ServiceSpec {
                type_: Some("LoadBalancer".to_string()),
                external_traffic_policy: Some("Local".to_string()),
                ..Default::default()
            }),
            status: None,
        }
    }

    #[test]
    fn qualifies_requires_local_policy_and_lb_type() {
        let mut svc = base_service();
        assert!(qualifies(&svc));
        svc.spec.as_mut().unwrap().external_traffic_policy = Some("Cluster".to_string());
        assert!(!qualifies(&svc));
    }

    #[test]
    fn qualifies_rejects_ipvs_feature() {
        let mut svc = base_service();
        svc.metadata.annotations = Some(
            [(consts::ANN_ENABLE_FEATURES.to_string(), consts::FEATURE_IPVS.to_string())]
                .into_iter()
                .collect(),
        );
        assert!(!qualifies(&svc));
    }

    #[test]
    fn ingress_ip_reads_first_entry() {
        let mut svc = base_service();
        svc.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress { ip: Some("198.51.100.5".to_string()), ..Default::default() }]),
            }),
            ..Default::default()
        });
        assert_eq!(ingress_ip(&svc).as_deref(), Some("198.51.100.5"));
    }

    #[test]
    fn ingress_ip_absent_without_status() {
        assert_eq!(ingress_ip(&base_service()), None);
    }
}
