use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::contract::Signature;
use crate::error::PromoteError;
use crate::version::OlmType;

/// Deployment stream a bundle is published through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Stage,
    Edge,
    Stable,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Stage => "stage",
            Channel::Edge => "edge",
            Channel::Stable => "stable",
        }
    }

    pub fn accepts_pre_release(&self) -> bool {
        matches!(self, Channel::Stage)
    }

    /// Operator name as published on this channel.
    pub fn operator_name(&self, base: &str) -> String {
        match self {
            Channel::Edge => format!("{base}-internal"),
            Channel::Stage | Channel::Stable => base.to_string(),
        }
    }

    /// Whether promotion carries an addon image set forward from stage.
    pub fn carries_image_set(&self) -> bool {
        matches!(self, Channel::Edge | Channel::Stable)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stage" => Ok(Channel::Stage),
            "edge" => Ok(Channel::Edge),
            "stable" => Ok(Channel::Stable),
            other => Err(format!("unknown channel {other:?}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: Channel,
    /// Directory under `addons/` in managed-tenants.
    pub directory: String,
    /// Environment folder for addon image sets.
    pub environment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleSource {
    pub repo: String,
    /// Folder in the operator repo holding one sub-directory per version.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerOverride {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentOverride {
    pub name: String,
    pub container: ContainerOverride,
}

/// Container whose inherited env list is dropped during promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideConfig {
    pub deployment: DeploymentOverride,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonConfig {
    pub name: String,
    #[serde(default)]
    pub operator_name: Option<String>,
    #[serde(default)]
    pub olm_type: OlmType,
    pub bundle: BundleSource,
    pub channels: Vec<ChannelConfig>,
    #[serde(default, rename = "override")]
    pub override_env: Option<OverrideConfig>,
}

impl AddonConfig {
    pub fn operator(&self) -> &str {
        self.operator_name.as_deref().unwrap_or(&self.name)
    }

    pub fn channel(&self, channel: Channel) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.name == channel)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertingConfig {
    pub pre_release: String,
    pub release: String,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        AlertingConfig {
            pre_release: "integreatly-qe-notifications@redhat.com".to_string(),
            release: "integreatly-notifications@redhat.com".to_string(),
        }
    }
}

fn default_baselines() -> BTreeMap<String, Vec<String>> {
    BTreeMap::from([(
        "keycloak-operator".to_string(),
        vec![
            "keycloak-operator.v18.0.0".to_string(),
            "keycloak-operator.v9.0.3".to_string(),
        ],
    )])
}

fn default_author() -> Signature {
    Signature {
        name: "Delorean".to_string(),
        email: "cloud-services-delorean@redhat.com".to_string(),
    }
}

fn default_operator_container() -> String {
    "operator".to_string()
}

/// Release configuration loaded from YAML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    #[serde(default)]
    pub addons: Vec<AddonConfig>,
    /// Grandfathered CSV names per package, exempt from the completeness check.
    #[serde(default = "default_baselines")]
    pub baselines: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default = "default_author")]
    pub author: Signature,
    #[serde(default)]
    pub use_cluster_storage: String,
    #[serde(default = "default_operator_container")]
    pub operator_container: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        ReleaseConfig {
            addons: Vec::new(),
            baselines: default_baselines(),
            alerting: AlertingConfig::default(),
            author: default_author(),
            use_cluster_storage: String::new(),
            operator_container: default_operator_container(),
        }
    }
}

impl ReleaseConfig {
    pub fn addon(&self, name: &str) -> Result<&AddonConfig, PromoteError> {
        self.addons
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| PromoteError::UnknownAddon(name.to_string()))
    }

    /// Allow-list for `package`, or every configured baseline when the
    /// package has no entry of its own.
    pub fn baselines_for(&self, package: &str) -> Vec<String> {
        match self.baselines.get(package) {
            Some(names) => names.clone(),
            None => self.baselines.values().flatten().cloned().collect(),
        }
    }

    pub fn trace_loaded(&self) {
        info!(
            addons = self.addons.len(),
            baselines = self.baselines.len(),
            "Loaded release configuration"
        );
        debug!(?self, "Release configuration (full debug)");
    }
}
