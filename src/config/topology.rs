use crate::core::{BootstrapError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

lazy_static! {
    static ref ENDPOINT_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9.\-]*[A-Za-z0-9])?:[0-9]{1,5}$").unwrap();
}

/// Checks that `endpoint` has the `host:port` shape with a usable port.
pub fn validate_endpoint(endpoint: &str) -> Result<()> {
    if !ENDPOINT_PATTERN.is_match(endpoint) {
        return Err(BootstrapError::InvalidConfig(format!(
            "Endpoint '{}' must have the form host:port",
            endpoint
        )));
    }
    let port = endpoint
        .rsplit_once(':')
        .and_then(|(_, port)| port.parse::<u16>().ok())
        .unwrap_or(0);
    if port == 0 {
        return Err(BootstrapError::InvalidConfig(format!(
            "Endpoint '{}' has an invalid port",
            endpoint
        )));
    }
    Ok(())
}

fn default_priority() -> u32 {
    1
}

/// One member of a replica group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberSpec {
    pub id: u32,
    pub host: String,
    /// Election preference; higher wins. Zero means the member never becomes primary.
    #[serde(default = "default_priority")]
    pub priority: u32,
}

impl MemberSpec {
    pub fn new(id: u32, host: impl Into<String>, priority: u32) -> Self {
        Self {
            id,
            host: host.into(),
            priority,
        }
    }
}

/// Declared membership of a replica group (config tier or shard).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaGroupSpec {
    pub id: String,
    #[serde(default)]
    pub config_role: bool,
    pub members: Vec<MemberSpec>,
}

impl ReplicaGroupSpec {
    pub fn new(id: impl Into<String>, members: Vec<MemberSpec>) -> Self {
        Self {
            id: id.into(),
            config_role: false,
            members,
        }
    }

    pub fn config_server(id: impl Into<String>, members: Vec<MemberSpec>) -> Self {
        Self {
            config_role: true,
            ..Self::new(id, members)
        }
    }

    pub fn hosts(&self) -> Vec<String> {
        self.members.iter().map(|m| m.host.clone()).collect()
    }

    pub fn host_set(&self) -> BTreeSet<String> {
        self.members.iter().map(|m| m.host.clone()).collect()
    }

    /// Members ordered by election preference (priority desc, declaration order on ties).
    pub fn members_by_priority(&self) -> Vec<&MemberSpec> {
        let mut members = self.members.iter().collect::<Vec<_>>();
        members.sort_by(|a, b| b.priority.cmp(&a.priority));
        members
    }

    /// Member that receives the initiation command on the given 1-based attempt.
    ///
    /// Rotates through members by priority so an unreachable seed does not pin the run.
    pub fn seed_for_attempt(&self, attempt: u32) -> &str {
        let ordered = self.members_by_priority();
        if ordered.is_empty() {
            return "";
        }
        let slot = (attempt.max(1) as usize - 1) % ordered.len();
        ordered[slot].host.as_str()
    }

    /// Shard connection string, e.g. `shard1rs/shard1-1:27017,shard1-2:27017`.
    pub fn seed_list(&self) -> String {
        format!("{}/{}", self.id, self.hosts().join(","))
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "replica group id must not be empty".to_string(),
            ));
        }
        if self.members.is_empty() {
            return Err(BootstrapError::InvalidConfig(format!(
                "Replica group '{}' must declare at least one member",
                self.id
            )));
        }

        let mut ids = HashSet::new();
        let mut hosts = HashSet::new();
        for member in &self.members {
            if !ids.insert(member.id) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Member id {} appears more than once in replica group '{}'",
                    member.id, self.id
                )));
            }
            validate_endpoint(&member.host)?;
            if !hosts.insert(member.host.as_str()) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Member host '{}' appears more than once in replica group '{}'",
                    member.host, self.id
                )));
            }
        }

        if self.members.iter().all(|m| m.priority == 0) {
            return Err(BootstrapError::InvalidConfig(format!(
                "Replica group '{}' has no electable member (all priorities are 0)",
                self.id
            )));
        }
        Ok(())
    }
}

/// A routing-tier process the control plane talks to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouterEndpoint {
    pub host: String,
}

impl RouterEndpoint {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

/// Desired end state of the cluster layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterTopology {
    pub config_group: ReplicaGroupSpec,
    pub shards: Vec<ReplicaGroupSpec>,
    pub routers: Vec<RouterEndpoint>,
}

impl ClusterTopology {
    pub fn shard_ids(&self) -> Vec<String> {
        self.shards.iter().map(|s| s.id.clone()).collect()
    }

    pub fn group(&self, id: &str) -> Option<&ReplicaGroupSpec> {
        if self.config_group.id == id {
            return Some(&self.config_group);
        }
        self.shards.iter().find(|s| s.id == id)
    }

    /// Router used on the given 1-based attempt; rotates through the declared routers.
    pub fn router_for_attempt(&self, attempt: u32) -> &str {
        if self.routers.is_empty() {
            return "";
        }
        let slot = (attempt.max(1) as usize - 1) % self.routers.len();
        self.routers[slot].host.as_str()
    }

    pub fn all_groups(&self) -> impl Iterator<Item = &ReplicaGroupSpec> {
        std::iter::once(&self.config_group).chain(self.shards.iter())
    }

    /// Validates the topology.
    ///
    /// Checks for:
    /// - a single config tier flagged with `config_role`,
    /// - at least one shard group and one router,
    /// - unique group ids and hosts across the whole topology.
    pub fn validate(&self) -> Result<()> {
        if !self.config_group.config_role {
            return Err(BootstrapError::InvalidConfig(format!(
                "Config group '{}' must set config_role = true",
                self.config_group.id
            )));
        }
        if let Some(shard) = self.shards.iter().find(|s| s.config_role) {
            return Err(BootstrapError::InvalidConfig(format!(
                "Shard group '{}' cannot have config_role; only one config tier is allowed",
                shard.id
            )));
        }
        if self.shards.is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "topology must declare at least one shard group".to_string(),
            ));
        }
        if self.routers.is_empty() {
            return Err(BootstrapError::InvalidConfig(
                "topology must declare at least one router".to_string(),
            ));
        }

        let mut group_ids = HashSet::new();
        let mut hosts = HashSet::new();
        for group in self.all_groups() {
            group.validate()?;
            if !group_ids.insert(group.id.as_str()) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Replica group id '{}' is declared more than once",
                    group.id
                )));
            }
            for member in &group.members {
                if !hosts.insert(member.host.as_str()) {
                    return Err(BootstrapError::InvalidConfig(format!(
                        "Host '{}' is assigned to more than one replica group",
                        member.host
                    )));
                }
            }
        }

        for router in &self.routers {
            validate_endpoint(&router.host)?;
            if !hosts.insert(router.host.as_str()) {
                return Err(BootstrapError::InvalidConfig(format!(
                    "Router host '{}' collides with another endpoint",
                    router.host
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(id: &str, prefix: &str) -> ReplicaGroupSpec {
        ReplicaGroupSpec::new(
            id,
            vec![
                MemberSpec::new(0, format!("{}-1:27017", prefix), 2),
                MemberSpec::new(1, format!("{}-2:27017", prefix), 1),
                MemberSpec::new(2, format!("{}-3:27017", prefix), 1),
            ],
        )
    }

    fn topology() -> ClusterTopology {
        ClusterTopology {
            config_group: ReplicaGroupSpec::config_server(
                "cfgrs",
                vec![
                    MemberSpec::new(0, "cfgsvr1:27019", 2),
                    MemberSpec::new(1, "cfgsvr2:27019", 1),
                ],
            ),
            shards: vec![group("shard1rs", "shard1"), group("shard2rs", "shard2")],
            routers: vec![RouterEndpoint::new("router1:27017"), RouterEndpoint::new("router2:27017")],
        }
    }

    #[test]
    fn test_valid_topology() {
        topology().validate().unwrap();
    }

    #[test]
    fn test_endpoint_validation() {
        assert!(validate_endpoint("shard2-3:27017").is_ok());
        assert!(validate_endpoint("shard2-3:c27017").is_err());
        assert!(validate_endpoint("shard2-3").is_err());
        assert!(validate_endpoint("shard2-3:0").is_err());
        assert!(validate_endpoint("shard2-3:70000").is_err());
    }

    #[test]
    fn test_duplicate_member_id_rejected() {
        let mut topo = topology();
        topo.shards[0].members[1].id = 0;
        let err = topo.validate().unwrap_err();
        assert!(err.to_string().contains("appears more than once"));
    }

    #[test]
    fn test_second_config_tier_rejected() {
        let mut topo = topology();
        topo.shards[1].config_role = true;
        assert!(topo.validate().is_err());
    }

    #[test]
    fn test_host_shared_between_groups_rejected() {
        let mut topo = topology();
        topo.shards[1].members[0].host = "shard1-1:27017".to_string();
        let err = topo.validate().unwrap_err();
        assert!(err.to_string().contains("more than one replica group"));
    }

    #[test]
    fn test_seed_rotates_by_priority() {
        let spec = group("shard1rs", "shard1");
        assert_eq!(spec.seed_for_attempt(1), "shard1-1:27017");
        assert_eq!(spec.seed_for_attempt(2), "shard1-2:27017");
        assert_eq!(spec.seed_for_attempt(3), "shard1-3:27017");
        assert_eq!(spec.seed_for_attempt(4), "shard1-1:27017");
    }

    #[test]
    fn test_seed_list_format() {
        assert_eq!(
            group("shard1rs", "shard1").seed_list(),
            "shard1rs/shard1-1:27017,shard1-2:27017,shard1-3:27017"
        );
    }

    #[test]
    fn test_router_rotation() {
        let topo = topology();
        assert_eq!(topo.router_for_attempt(1), "router1:27017");
        assert_eq!(topo.router_for_attempt(2), "router2:27017");
        assert_eq!(topo.router_for_attempt(3), "router1:27017");
    }

    #[test]
    fn test_unelectable_group_rejected() {
        let mut spec = group("shard1rs", "shard1");
        for member in &mut spec.members {
            member.priority = 0;
        }
        assert!(spec.validate().is_err());
    }
}
