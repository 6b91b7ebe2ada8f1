use super::{ClusterTopology, PrincipalSpec, ReplicaGroupSpec, SchemaConfig, Secret};
use crate::core::{BootstrapError, BootstrapStep, Result};
use crate::retry::{PollSettings, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const ENV_ADMIN_USERNAME: &str = "SHARDSTRAP_ADMIN_USERNAME";
pub const ENV_ADMIN_PASSWORD: &str = "SHARDSTRAP_ADMIN_PASSWORD";
pub const ENV_ADMIN_DATABASE: &str = "SHARDSTRAP_ADMIN_DATABASE";

/// Retry policies: one default plus optional per-step overrides keyed by step name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetrySettings {
    #[serde(default)]
    pub default: RetryPolicy,
    #[serde(default)]
    pub steps: BTreeMap<String, RetryPolicy>,
}

impl RetrySettings {
    /// Policy for `step`: explicit override, then the built-in step default, then `default`.
    pub fn policy_for(&self, step: BootstrapStep) -> RetryPolicy {
        if let Some(policy) = self.steps.get(step.name()) {
            return policy.clone();
        }
        match step {
            // freshly started shard processes take longer to accept commands
            BootstrapStep::ShardGroups => RetryPolicy::fixed(50, Duration::from_secs(5)),
            BootstrapStep::Principal => RetryPolicy::fixed(30, Duration::from_secs(2)),
            _ => self.default.clone(),
        }
    }

    fn validate(&self) -> Result<()> {
        self.default.validate("default")?;
        for (name, policy) in &self.steps {
            if BootstrapStep::from_name(name).is_none() {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Unknown step '{}' in [retry.steps]",
                    name
                )));
            }
            policy.validate(name)?;
        }
        Ok(())
    }
}

fn default_primary_timeout_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_balancer_timeout_ms() -> u64 {
    30_000
}

/// Bounded waits for cluster-reported conditions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WaitSettings {
    #[serde(default = "default_primary_timeout_ms")]
    pub primary_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_balancer_timeout_ms")]
    pub balancer_timeout_ms: u64,
}

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            primary_timeout_ms: default_primary_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            balancer_timeout_ms: default_balancer_timeout_ms(),
        }
    }
}

impl WaitSettings {
    pub fn primary_poll(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.primary_timeout_ms),
        )
    }

    pub fn balancer_poll(&self) -> PollSettings {
        PollSettings::new(
            Duration::from_millis(self.poll_interval_ms),
            Duration::from_millis(self.balancer_timeout_ms),
        )
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(BootstrapError::InvalidConfig(
                "waits.poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.primary_timeout_ms == 0 || self.balancer_timeout_ms == 0 {
            return Err(BootstrapError::InvalidConfig(
                "wait timeouts must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// How sibling shard groups are brought up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShardMode {
    /// All shard groups at once, joined by a barrier.
    #[default]
    Concurrent,
    /// One shard group after another, in declaration order.
    Sequential,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrchestrationSettings {
    #[serde(default)]
    pub shard_mode: ShardMode,
    /// Request an immediate placement round once the balancer runs.
    #[serde(default)]
    pub force_balancer_round: bool,
}

/// Complete bootstrap configuration.
///
/// Loaded from TOML, then overridden from the environment, then validated:
///
/// ```no_run
/// use shardstrap::BootstrapConfig;
///
/// # fn main() -> shardstrap::Result<()> {
/// let mut config = BootstrapConfig::from_file("config/businessdb.toml")?;
/// config.apply_env_overrides();
/// config.finalize()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapConfig {
    pub topology: ClusterTopology,
    pub principal: PrincipalSpec,
    #[serde(default)]
    pub schema: SchemaConfig,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub waits: WaitSettings,
    #[serde(default)]
    pub orchestration: OrchestrationSettings,
}

impl BootstrapConfig {
    /// Reads and parses a TOML file. Environment overrides are applied separately.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            BootstrapError::InvalidConfig(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads a file, applies process environment overrides and validates.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.finalize()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Applies credential overrides from `lookup`. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.is_empty());
        if let Some(username) = value(ENV_ADMIN_USERNAME) {
            self.principal.username = username;
        }
        if let Some(password) = value(ENV_ADMIN_PASSWORD) {
            self.principal.secret = Secret::new(password);
        }
        if let Some(database) = value(ENV_ADMIN_DATABASE) {
            self.principal.database = database;
        }
    }

    /// Call this after applying environment overrides.
    pub fn finalize(&mut self) -> Result<()> {
        self.principal.username = self.principal.username.trim().to_string();
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        self.topology.validate()?;
        self.principal.validate()?;
        if let Some(group) = &self.principal.group {
            if self.topology.group(group).is_none() {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Principal target group '{}' is not part of the topology",
                    group
                )));
            }
        }
        self.schema.validate()?;
        self.retry.validate()?;
        self.waits.validate()?;
        Ok(())
    }

    /// Replica group the principal is provisioned on (config tier unless overridden).
    pub fn principal_group(&self) -> &ReplicaGroupSpec {
        self.principal
            .group
            .as_deref()
            .and_then(|id| self.topology.group(id))
            .unwrap_or(&self.topology.config_group)
    }

    pub fn policy_for(&self, step: BootstrapStep) -> RetryPolicy {
        self.retry.policy_for(step)
    }
}
