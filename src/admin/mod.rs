//! Cluster administrative surface
//!
//! The orchestrator never speaks a wire protocol directly. Every control
//! plane operation goes through [`ClusterAdmin`], addressed either at a
//! replica-group member (`node`) or at a routing-tier process (`router`).
//! Drivers for a concrete database implement this trait; the crate ships
//! [`InMemoryCluster`] for simulation and tests.

pub mod in_memory;

use crate::config::{CollectionSchema, IndexSpec, KeyPart, PrincipalSpec, ReplicaGroupSpec, ShardKey};
use crate::core::AdminResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

pub use in_memory::{AdminOp, InMemoryCluster};

/// Member entry of a replica-group initiation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitiationMember {
    pub id: u32,
    pub host: String,
    pub priority: u32,
}

/// Replica-group initiation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupInitiation {
    pub group_id: String,
    pub config_server: bool,
    pub members: Vec<InitiationMember>,
}

impl GroupInitiation {
    pub fn from_spec(spec: &ReplicaGroupSpec) -> Self {
        Self {
            group_id: spec.id.clone(),
            config_server: spec.config_role,
            members: spec
                .members
                .iter()
                .map(|m| InitiationMember {
                    id: m.id,
                    host: m.host.clone(),
                    priority: m.priority,
                })
                .collect(),
        }
    }

    /// Command document as the database expects it.
    pub fn to_document(&self) -> Value {
        let members = self
            .members
            .iter()
            .map(|m| json!({ "_id": m.id, "host": m.host, "priority": m.priority }))
            .collect::<Vec<_>>();
        json!({
            "_id": self.group_id,
            "configsvr": self.config_server,
            "members": members,
        })
    }
}

/// Replication state of one member as seen by the group.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberState {
    Primary,
    Secondary,
    Startup,
    Unreachable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberStatus {
    pub host: String,
    pub state: MemberState,
}

/// Group status report returned by a member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStatusReport {
    pub group_id: String,
    pub config_server: bool,
    pub members: Vec<MemberStatus>,
}

impl GroupStatusReport {
    pub fn primary(&self) -> Option<&str> {
        self.members
            .iter()
            .find(|m| m.state == MemberState::Primary)
            .map(|m| m.host.as_str())
    }
}

/// Role of a single node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRole {
    pub host: String,
    pub group_id: Option<String>,
    pub is_primary: bool,
}

/// An existing account as reported by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrincipalRecord {
    pub username: String,
    pub database: String,
    pub role: String,
}

/// A shard as listed by the routing tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisteredShard {
    pub id: String,
    pub hosts: Vec<String>,
}

/// Existing collection metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionInfo {
    pub namespace: String,
    pub validator: Value,
}

/// Existing index as listed by the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub keys: Vec<KeyPart>,
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BalancerStatus {
    pub enabled: bool,
    pub running: bool,
}

impl BalancerStatus {
    pub fn is_active(&self) -> bool {
        self.enabled && self.running
    }
}

/// Abstract RPC surface of the database's administrative protocol.
#[async_trait]
pub trait ClusterAdmin: Send + Sync {
    /// Forms a replica group by sending the initiation request to `seed`.
    ///
    /// Returns `AlreadyInitialized` when `seed` already belongs to the same group.
    async fn initiate_group(&self, seed: &str, request: &GroupInitiation) -> AdminResult<()>;

    /// Reports group membership and member states as seen by `node`.
    async fn group_status(&self, node: &str) -> AdminResult<GroupStatusReport>;

    /// Reports whether `node` is currently the writable primary.
    async fn node_role(&self, node: &str) -> AdminResult<NodeRole>;

    async fn find_principal(
        &self,
        node: &str,
        database: &str,
        username: &str,
    ) -> AdminResult<Option<PrincipalRecord>>;

    /// Creates an account with its role grant. Must target the primary.
    async fn create_principal(&self, node: &str, principal: &PrincipalSpec) -> AdminResult<()>;

    async fn add_shard(&self, router: &str, group_id: &str, hosts: &[String]) -> AdminResult<()>;

    async fn list_shards(&self, router: &str) -> AdminResult<Vec<RegisteredShard>>;

    async fn enable_sharding(&self, router: &str, database: &str) -> AdminResult<()>;

    async fn collection_info(&self, router: &str, namespace: &str)
    -> AdminResult<Option<CollectionInfo>>;

    async fn create_collection(
        &self,
        router: &str,
        namespace: &str,
        validator: &Value,
    ) -> AdminResult<()>;

    async fn list_indexes(&self, router: &str, namespace: &str) -> AdminResult<Vec<IndexInfo>>;

    async fn create_index(&self, router: &str, namespace: &str, index: &IndexSpec)
    -> AdminResult<()>;

    /// Returns the partitioning key of `namespace`, if it is sharded.
    async fn sharding_info(&self, router: &str, namespace: &str) -> AdminResult<Option<ShardKey>>;

    async fn shard_collection(&self, router: &str, namespace: &str, key: &ShardKey)
    -> AdminResult<()>;

    async fn balancer_start(&self, router: &str) -> AdminResult<()>;

    async fn balancer_status(&self, router: &str) -> AdminResult<BalancerStatus>;

    async fn balancer_force_round(&self, router: &str) -> AdminResult<()>;
}

/// `createCollection` command document for a schema.
pub fn create_collection_document(schema: &CollectionSchema) -> Value {
    json!({ "create": schema.name, "validator": schema.validator() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemberSpec;

    #[test]
    fn test_initiation_document() {
        let spec = ReplicaGroupSpec::config_server(
            "cfgrs",
            vec![
                MemberSpec::new(0, "cfgsvr1:27019", 2),
                MemberSpec::new(1, "cfgsvr2:27019", 1),
            ],
        );
        let doc = GroupInitiation::from_spec(&spec).to_document();
        assert_eq!(doc["_id"], "cfgrs");
        assert_eq!(doc["configsvr"], true);
        assert_eq!(doc["members"][0]["host"], "cfgsvr1:27019");
        assert_eq!(doc["members"][0]["priority"], 2);
    }

    #[test]
    fn test_primary_lookup() {
        let report = GroupStatusReport {
            group_id: "rs".into(),
            config_server: false,
            members: vec![
                MemberStatus {
                    host: "a:1".into(),
                    state: MemberState::Secondary,
                },
                MemberStatus {
                    host: "b:1".into(),
                    state: MemberState::Primary,
                },
            ],
        };
        assert_eq!(report.primary(), Some("b:1"));
    }
}
