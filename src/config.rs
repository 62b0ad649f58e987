//! CLI/env configuration layer: `OperatorConfig` is a flat-field
//! `clap::Parser` struct, validated and lowered into an immutable
//! `VpcConfiguration` via `initialize`/`validate`.

use clap::Parser;
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ProviderKind {
    /// `""` in the INI config: no provider configured, operator idles.
    None,
    /// `g2`: the VPC provider.
    G2,
    /// `gc`: the classic provider.
    Gc,
    /// `fake`: VPC provider backed by `FakeVpcApi`, for local testing.
    Fake,
}

#[derive(Debug, Clone, Parser)]
pub struct OperatorConfig {
    #[arg(long, env = "VPCLB_PROVIDER", value_enum, default_value = "g2")]
    pub provider: ProviderKind,

    #[arg(long, env = "VPCLB_CLUSTER_ID")]
    pub cluster_id: String,

    #[arg(long, env = "VPCLB_ACCOUNT_ID", default_value = "")]
    pub account_id: String,

    #[arg(long, env = "VPCLB_API_KEY", default_value = "")]
    pub api_key_secret: String,

    #[arg(long, env = "VPCLB_REGION", default_value = "")]
    pub region: String,

    #[arg(long, env = "VPCLB_RESOURCE_GROUP_NAME", default_value = "")]
    pub resource_group_name: String,

    #[arg(long, env = "VPCLB_SUBNET_NAMES", default_value = "")]
    pub subnet_names: String,

    #[arg(long, env = "VPCLB_VPC_NAME", default_value = "")]
    pub vpc_name: String,

    #[arg(long, env = "VPCLB_STAGING")]
    pub staging: bool,

    #[arg(long, env = "VPCLB_ENABLE_PRIVATE")]
    pub enable_private: bool,

    #[arg(long, env = "VPCLB_LOG_LEVEL", default_value = "INFO")]
    pub log_level: LevelFilter,
}

/// Validated, immutable record derived from `OperatorConfig`.
#[derive(Debug, Clone)]
pub struct VpcConfiguration {
    pub cluster_id: String,
    pub account_id: String,
    pub api_key_secret: String,
    pub region: String,
    pub resource_group_name: String,
    pub subnet_names: Vec<String>,
    pub vpc_name: String,
    pub is_fake: bool,
    pub vpc_endpoint: String,
    pub iam_endpoint: String,
}

impl VpcConfiguration {
    /// `initialize`: validates required fields (skipping endpoint assembly
    /// for the fake provider), then derives endpoint URLs from region,
    /// staging, and private-endpoint settings.
    pub fn initialize(config: &OperatorConfig) -> Result<Self, ConfigError> {
        Self::validate(config)?;

        let is_fake = config.provider == ProviderKind::Fake;
        let (vpc_endpoint, iam_endpoint) = if is_fake {
            (String::new(), String::new())
        } else {
            let vpc_host = Self::vpc_hostname(&config.region, config.staging, config.enable_private);
            let iam_host = Self::iam_hostname(config.staging, config.enable_private);
            (format!("https://{vpc_host}/v1"), format!("https://{iam_host}/identity/token"))
        };

        Ok(Self {
            cluster_id: config.cluster_id.clone(),
            account_id: config.account_id.clone(),
            api_key_secret: config.api_key_secret.clone(),
            region: config.region.clone(),
            resource_group_name: config.resource_group_name.clone(),
            subnet_names: config
                .subnet_names
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            vpc_name: config.vpc_name.clone(),
            is_fake,
            vpc_endpoint,
            iam_endpoint,
        })
    }

    /// `validate`: required-field check for the real (non-fake) provider;
    /// unknown provider selector is rejected by `clap`'s `ValueEnum` parse,
    /// so only the field-presence checks remain here.
    fn validate(config: &OperatorConfig) -> Result<(), ConfigError> {
        if config.provider == ProviderKind::Fake || config.provider == ProviderKind::None {
            return Ok(());
        }
        if config.cluster_id.is_empty() {
            return Err(ConfigError::MissingSetting("clusterID"));
        }
        if config.account_id.is_empty() {
            return Err(ConfigError::MissingSetting("accountID"));
        }
        if config.api_key_secret.is_empty() {
            return Err(ConfigError::MissingSetting("apiKeySecret"));
        }
        if config.region.is_empty() {
            return Err(ConfigError::MissingSetting("region"));
        }
        if config.resource_group_name.is_empty() {
            return Err(ConfigError::MissingSetting("resourceGroupName"));
        }
        if config.subnet_names.is_empty() {
            return Err(ConfigError::MissingSetting("subnetNames"));
        }
        if config.vpc_name.is_empty() {
            return Err(ConfigError::MissingSetting("vpcName"));
        }
        Ok(())
    }

    fn vpc_hostname(region: &str, staging: bool, private: bool) -> String {
        match (staging, private) {
            (true, true) => format!("private.{region}.iaas.stage1.test.cloud"),
            (true, false) => format!("{region}.iaas.stage1.test.cloud"),
            (false, true) => format!("private.{region}.iaas.cloud.ibm.com"),
            (false, false) => format!("{region}.iaas.cloud.ibm.com"),
        }
    }

    fn iam_hostname(staging: bool, private: bool) -> String {
        match (staging, private) {
            (true, true) => "private.iam.stage1.test.cloud".to_string(),
            (true, false) => "iam.stage1.test.cloud".to_string(),
            (false, true) => "private.iam.cloud.ibm.com".to_string(),
            (false, false) => "iam.cloud.ibm.com".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> OperatorConfig {
        OperatorConfig {
            provider: ProviderKind::G2,
            cluster_id: "cluster1".into(),
            account_id: "acct1".into(),
            api_key_secret: "key1".into(),
            region: "us-south".into(),
            resource_group_name: "default".into(),
            subnet_names: "subnet1,subnet2".into(),
            vpc_name: "vpc1".into(),
            staging: false,
            enable_private: false,
            log_level: LevelFilter::INFO,
        }
    }

    #[test]
    fn validates_required_fields_for_real_provider() {
        let mut config = base_config();
        config.cluster_id = String::new();
        let err = VpcConfiguration::initialize(&config).unwrap_err();
        assert_eq!(err, ConfigError::MissingSetting("clusterID"));
    }

    #[test]
    fn fake_provider_skips_validation() {
        let mut config = base_config();
        config.provider = ProviderKind::Fake;
        config.cluster_id = String::new();
        let vpc_config = VpcConfiguration::initialize(&config).unwrap();
        assert!(vpc_config.is_fake);
        assert!(vpc_config.vpc_endpoint.is_empty());
    }

    #[test]
    fn endpoint_derivation_production_public() {
        let config = base_config();
        let vpc_config = VpcConfiguration::initialize(&config).unwrap();
        assert_eq!(vpc_config.vpc_endpoint, "https://us-south.iaas.cloud.ibm.com/v1");
        assert_eq!(vpc_config.iam_endpoint, "https://iam.cloud.ibm.com/identity/token");
    }

    #[test]
    fn endpoint_derivation_staging_private() {
        let mut config = base_config();
        config.staging = true;
        config.enable_private = true;
        let vpc_config = VpcConfiguration::initialize(&config).unwrap();
        assert_eq!(
            vpc_config.vpc_endpoint,
            "https://private.us-south.iaas.stage1.test.cloud/v1"
        );
        assert_eq!(
            vpc_config.iam_endpoint,
            "https://private.iam.stage1.test.cloud/identity/token"
        );
    }

    #[test]
    fn subnet_names_csv_is_trimmed() {
        let config = base_config();
        let vpc_config = VpcConfiguration::initialize(&config).unwrap();
        assert_eq!(vpc_config.subnet_names, vec!["subnet1".to_string(), "subnet2".to_string()]);
    }
}
