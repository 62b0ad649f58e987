//! Provider selection: a `CloudProvider` trait with two implementations
//! chosen at boot from `OperatorConfig::provider`. The VPC provider owns the
//! full reconciliation engine; the classic provider's own load-balancer
//! lifecycle is out of scope beyond wiring the endpoint re-placement
//! watcher.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Service};

use crate::config::{OperatorConfig, ProviderKind, VpcConfiguration};
use crate::error::ReconcileError;
use crate::executor::{LoadBalancerStatus, VpcCloudProvider};
use crate::iam::{FakeIamAuthenticator, IamAuthenticator, LiveIamAuthenticator};
use crate::sdk::fake::FakeVpcApi;
use crate::sdk::live::LiveVpcApi;
use crate::sdk::VpcLoadBalancerApi;

/// Uniform façade the controller drives, regardless of which provider is
/// active underneath.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn ensure_load_balancer(&self, svc: &Service, nodes: &[Node]) -> Result<LoadBalancerStatus, ReconcileError>;
    async fn ensure_load_balancer_deleted(&self, svc: &Service) -> Result<(), ReconcileError>;
    async fn ensure_load_balancer_updated(&self, svc: &Service, nodes: &[Node]) -> Result<LoadBalancerStatus, ReconcileError>;
    async fn get_load_balancer(&self, svc: &Service) -> Result<(LoadBalancerStatus, bool), ReconcileError>;
}

#[async_trait]
impl CloudProvider for VpcCloudProvider {
    async fn ensure_load_balancer(&self, svc: &Service, nodes: &[Node]) -> Result<LoadBalancerStatus, ReconcileError> {
        Self::ensure_load_balancer(self, svc, nodes).await
    }
    async fn ensure_load_balancer_deleted(&self, svc: &Service) -> Result<(), ReconcileError> {
        Self::ensure_load_balancer_deleted(self, svc).await
    }
    async fn ensure_load_balancer_updated(&self, svc: &Service, nodes: &[Node]) -> Result<LoadBalancerStatus, ReconcileError> {
        Self::ensure_load_balancer_updated(self, svc, nodes).await
    }
    async fn get_load_balancer(&self, svc: &Service) -> Result<(LoadBalancerStatus, bool), ReconcileError> {
        Self::get_load_balancer(self, svc).await
    }
}

/// The classic provider's Service lifecycle is out of scope: it only wires
/// the keepalived endpoint watcher. Any attempt to reconcile a
/// Service through it is a validation-class error surfaced to the caller
/// rather than a silent no-op, so a misconfigured `cluster-default-provider`
/// fails loudly instead of leaving Services permanently pending.
pub struct ClassicProvider;

#[async_trait]
impl CloudProvider for ClassicProvider {
    async fn ensure_load_balancer(&self, _svc: &Service, _nodes: &[Node]) -> Result<LoadBalancerStatus, ReconcileError> {
        Err(ReconcileError::Config(crate::error::ConfigError::InvalidProvider))
    }
    async fn ensure_load_balancer_deleted(&self, _svc: &Service) -> Result<(), ReconcileError> {
        Ok(())
    }
    async fn ensure_load_balancer_updated(&self, _svc: &Service, _nodes: &[Node]) -> Result<LoadBalancerStatus, ReconcileError> {
        Err(ReconcileError::Config(crate::error::ConfigError::InvalidProvider))
    }
    async fn get_load_balancer(&self, _svc: &Service) -> Result<(LoadBalancerStatus, bool), ReconcileError> {
        Ok((LoadBalancerStatus::default(), false))
    }
}

/// Build the selected provider plus, for the VPC provider, the shared SDK
/// handle the monitor loop also needs.
pub fn build(
    operator_config: &OperatorConfig,
    vpc_config: VpcConfiguration,
    client: kube::Client,
) -> (Arc<dyn CloudProvider>, Option<Arc<dyn VpcLoadBalancerApi>>) {
    match operator_config.provider {
        ProviderKind::G2 => {
            let api: Arc<dyn VpcLoadBalancerApi> = Arc::new(LiveVpcApi::new(
                vpc_config.vpc_endpoint.clone(),
                authenticator(&vpc_config),
            ));
            let provider = Arc::new(VpcCloudProvider::new(api.clone(), vpc_config, client));
            (provider, Some(api))
        }
        ProviderKind::Fake => {
            let api: Arc<dyn VpcLoadBalancerApi> = Arc::new(FakeVpcApi::new());
            let provider = Arc::new(VpcCloudProvider::new(api.clone(), vpc_config, client));
            (provider, Some(api))
        }
        ProviderKind::Gc | ProviderKind::None => (Arc::new(ClassicProvider), None),
    }
}

fn authenticator(vpc_config: &VpcConfiguration) -> Arc<dyn IamAuthenticator> {
    if vpc_config.is_fake {
        Arc::new(FakeIamAuthenticator { token: "fake-token".to_string() })
    } else {
        Arc::new(LiveIamAuthenticator::new(
            reqwest::Client::new(),
            vpc_config.iam_endpoint.clone(),
            vpc_config.api_key_secret.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;

    fn fake_operator_config() -> OperatorConfig {
        OperatorConfig {
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
            log_level: LevelFilter::INFO,
        }
    }

    fn client() -> kube::Client {
        kube::Client::try_from(kube::Config::new("https://127.0.0.1:1".parse().unwrap())).unwrap()
    }

    #[test]
    fn gc_provider_selection_yields_no_sdk_handle() {
        let mut operator_config = fake_operator_config();
        operator_config.provider = ProviderKind::Gc;
        let vpc_config = VpcConfiguration::initialize(&operator_config).unwrap();
        let (_provider, api) = build(&operator_config, vpc_config, client());
        assert!(api.is_none());
    }

    #[test]
    fn fake_provider_selection_yields_sdk_handle() {
        let operator_config = fake_operator_config();
        let vpc_config = VpcConfiguration::initialize(&operator_config).unwrap();
        let (_provider, api) = build(&operator_config, vpc_config, client());
        assert!(api.is_some());
    }

    #[tokio::test]
    async fn classic_provider_rejects_ensure_load_balancer() {
        let provider = ClassicProvider;
        let svc = Service::default();
        let err = provider.ensure_load_balancer(&svc, &[]).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Config(_)));
    }
}
