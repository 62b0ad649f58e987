#![warn(
    // Base lints.
    clippy::all,
    // Some pedantic lints.
    clippy::pedantic,
    // New lints which are cool.
    clippy::nursery,
)]
#![
    allow(
        // I don't care about this.
        clippy::module_name_repetitions,
        // Yo, the hell you should put
        // it in docs, if signature is clear as sky.
        clippy::missing_errors_doc
    )
]

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::serde_json::json;
use kube::{
    api::{ListParams, PatchParams},
    runtime::{controller::Action, watcher, Controller},
    Resource, ResourceExt,
};

use config::{OperatorConfig, ProviderKind, VpcConfiguration};
use error::ReconcileError;
use executor::LoadBalancerStatus;
use monitor::{Monitor, MonitorState};
use provider::CloudProvider;

pub mod config;
pub mod consts;
pub mod domain;
pub mod endpoint_watcher;
pub mod error;
pub mod executor;
pub mod filters;
pub mod finalizers;
pub mod iam;
pub mod label_filter;
pub mod monitor;
pub mod naming;
pub mod node_cache;
pub mod planner;
pub mod provider;
pub mod sdk;
pub mod service_options;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let operator_config = OperatorConfig::parse();
    tracing_subscriber::fmt()
        .with_max_level(operator_config.log_level)
        .init();

    tracing::info!("Starting vpclb-controller v{}", env!("CARGO_PKG_VERSION"));

    let vpc_config = match VpcConfiguration::initialize(&operator_config) {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };

    let client = match kube::Client::try_default().await {
        Ok(c) => c,
        Err(err) => {
            tracing::error!(error = %err, "failed to connect kube client");
            std::process::exit(1);
        }
    };
    tracing::info!("Kube client is connected");

    let (cloud_provider, sdk_handle) = provider::build(&operator_config, vpc_config.clone(), client.clone());

    if let Some(api) = sdk_handle {
        let monitor = Monitor::new(api, vpc_config.clone(), client.clone());
        let monitor_client = client.clone();
        tokio::spawn(async move {
            run_monitor_loop(monitor, monitor_client).await;
        });
    }

    if matches!(operator_config.provider, ProviderKind::Gc) {
        let watcher_client = client.clone();
        tokio::spawn(async move {
            endpoint_watcher::run(watcher_client).await;
        });
    }

    let context = Arc::new(CurrentContext::new(client.clone(), cloud_provider));

    tracing::info!("Starting the controller");
    Controller::new(kube::Api::<Service>::all(client), watcher::Config::default())
        .run(reconcile_service, on_error, context)
        .for_each(|reconcilation_result| async move {
            match reconcilation_result {
                Ok((service, _action)) => {
                    tracing::info!("Reconcilation of a service {} was successful", service.name);
                }
                Err(err) => match err {
                    kube::runtime::controller::Error::ReconcilerFailed(
                        ReconcileError::NoAvailableNodes,
                        _,
                    ) => {}
                    _ => {
                        tracing::error!("Error reconciling service: {:#?}", err);
                    }
                },
            }
        })
        .await;
}

async fn run_monitor_loop(monitor: Monitor, client: kube::Client) {
    let mut state = MonitorState::new();
    let mut ticker = tokio::time::interval(Duration::from_secs(consts::MONITOR_TICK_SECS));
    let svc_api = kube::Api::<Service>::all(client);
    loop {
        ticker.tick().await;
        let services = match svc_api.list(&ListParams::default()).await {
            Ok(list) => list.items,
            Err(err) => {
                tracing::warn!(error = %err, "monitor tick failed to list services");
                continue;
            }
        };
        if let Err(err) = monitor.tick(&services, &mut state).await {
            tracing::warn!(error = %err, "monitor tick failed");
        }
    }
}

#[derive(Clone)]
pub struct CurrentContext {
    pub client: kube::Client,
    pub provider: Arc<dyn CloudProvider>,
}

impl CurrentContext {
    #[must_use]
    pub const fn new(client: kube::Client, provider: Arc<dyn CloudProvider>) -> Self {
        Self { client, provider }
    }
}

/// Reconcile a single Service: add/remove the finalizer, then ensure the
/// cloud load balancer converges to the desired shape via the active
/// `CloudProvider`'s `ensure_load_balancer`/`ensure_load_balancer_deleted`.
#[tracing::instrument(skip(svc, context), fields(service = svc.name_any()))]
pub async fn reconcile_service(
    svc: Arc<Service>,
    context: Arc<CurrentContext>,
) -> Result<Action, ReconcileError> {
    let svc_type = svc
        .spec
        .as_ref()
        .and_then(|s| s.type_.as_ref())
        .map(String::as_str)
        .unwrap_or("ClusterIP");
    if svc_type != "LoadBalancer" {
        tracing::debug!("Service type is not LoadBalancer. Skipping...");
        return Ok(Action::await_change());
    }

    if svc.meta().deletion_timestamp.is_some() {
        tracing::info!("Service deletion detected. Cleaning up resources.");
        context.provider.ensure_load_balancer_deleted(&svc).await?;
        finalizers::remove(context.client.clone(), &svc).await?;
        return Ok(Action::await_change());
    }

    if !finalizers::check(&svc) {
        finalizers::add(context.client.clone(), &svc).await?;
    }

    let nodes_api = kube::Api::<Node>::all(context.client.clone());
    let nodes = nodes_api.list(&ListParams::default()).await?.items;

    let status = context.provider.ensure_load_balancer(&svc, &nodes).await?;
    patch_ingress_status(&context.client, &svc, &status).await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

async fn patch_ingress_status(
    client: &kube::Client,
    svc: &Service,
    status: &LoadBalancerStatus,
) -> Result<(), ReconcileError> {
    let Some(hostname) = &status.hostname else {
        return Ok(());
    };
    let svc_api = kube::Api::<Service>::namespaced(
        client.clone(),
        svc.namespace()
            .unwrap_or_else(|| client.default_namespace().to_string())
            .as_str(),
    );
    svc_api
        .patch_status(
            svc.name_any().as_str(),
            &PatchParams::default(),
            &kube::api::Patch::Merge(json!({
                "status": {
                    "loadBalancer": {
                        "ingress": [{"hostname": hostname}]
                    }
                }
            })),
        )
        .await?;
    Ok(())
}

/// Map a `ReconcileError` to the controller's requeue policy: busy
/// errors retry on the readiness cadence, validation errors wait for the
/// Service to change, anything else backs off 30s.
#[allow(clippy::needless_pass_by_value)]
fn on_error(_: Arc<Service>, error: &ReconcileError, _context: Arc<CurrentContext>) -> Action {
    if error.is_busy() {
        Action::requeue(Duration::from_secs(consts::DEFAULT_MIN_SLEEP_SECS))
    } else if error.is_validation() {
        Action::await_change()
    } else {
        Action::requeue(Duration::from_secs(30))
    }
}
