use super::{
    BalancerStatus, ClusterAdmin, CollectionInfo, GroupInitiation, GroupStatusReport, IndexInfo,
    InitiationMember, MemberState, MemberStatus, NodeRole, PrincipalRecord, RegisteredShard,
};
use crate::config::{ClusterTopology, IndexSpec, KeyPart, PrincipalSpec, ShardKey};
use crate::core::{AdminError, AdminResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

// The simulated cluster is split by concern to keep each area easy to follow.
include!("in_memory/state.rs");
include!("in_memory/groups.rs");
include!("in_memory/accounts.rs");
include!("in_memory/routing.rs");
include!("in_memory/collections.rs");

/// Operation kinds of the admin surface, used for fault injection and call counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminOp {
    InitiateGroup,
    GroupStatus,
    NodeRole,
    FindPrincipal,
    CreatePrincipal,
    AddShard,
    ListShards,
    EnableSharding,
    CollectionInfo,
    CreateCollection,
    ListIndexes,
    CreateIndex,
    ShardingInfo,
    ShardCollection,
    BalancerStart,
    BalancerStatus,
    BalancerForceRound,
}

impl AdminOp {
    pub const ALL: [AdminOp; 17] = [
        Self::InitiateGroup,
        Self::GroupStatus,
        Self::NodeRole,
        Self::FindPrincipal,
        Self::CreatePrincipal,
        Self::AddShard,
        Self::ListShards,
        Self::EnableSharding,
        Self::CollectionInfo,
        Self::CreateCollection,
        Self::ListIndexes,
        Self::CreateIndex,
        Self::ShardingInfo,
        Self::ShardCollection,
        Self::BalancerStart,
        Self::BalancerStatus,
        Self::BalancerForceRound,
    ];

    /// Operations that change cluster state.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::InitiateGroup
                | Self::CreatePrincipal
                | Self::AddShard
                | Self::EnableSharding
                | Self::CreateCollection
                | Self::CreateIndex
                | Self::ShardCollection
                | Self::BalancerStart
                | Self::BalancerForceRound
        )
    }
}

/// Read-only view of a simulated replica group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSnapshot {
    pub id: String,
    pub config_server: bool,
    pub hosts: Vec<String>,
    pub primary: Option<String>,
}

/// Read-only view of a simulated collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSnapshot {
    pub namespace: String,
    pub validator: Value,
    pub indexes: Vec<IndexInfo>,
    pub shard_key: Option<ShardKey>,
}

/// A deterministic, in-process cluster implementing [`ClusterAdmin`].
///
/// Simulates reachability, replica-group initiation with majority checks,
/// priority-based elections after a configurable number of status probes,
/// routing-tier dependencies on the config tier, and balancer start-up lag.
/// Transient failures can be injected per operation kind.
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<SimState>>,
}

impl InMemoryCluster {
    /// Creates an empty cluster with no reachable nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cluster where every member and router of `topology` is up but unconfigured.
    pub fn from_topology(topology: &ClusterTopology) -> Self {
        let mut state = SimState::default();
        for group in topology.all_groups() {
            for member in &group.members {
                state.nodes.insert(member.host.clone(), SimNode::up());
            }
        }
        for router in &topology.routers {
            state.routers.insert(router.host.clone(), true);
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Registers (or revives) a data node.
    pub async fn add_node(&self, host: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.nodes.entry(host.into()).or_insert_with(SimNode::up).up = true;
    }

    /// Marks a data node or router reachable or unreachable.
    ///
    /// # Examples
    ///
    /// ```
    /// use shardstrap::{AdminError, ClusterAdmin, InMemoryCluster};
    ///
    /// # tokio_test::block_on(async {
    /// let cluster = InMemoryCluster::new();
    /// cluster.add_node("db1:27017").await;
    /// assert!(cluster.node_role("db1:27017").await.unwrap().group_id.is_none());
    ///
    /// cluster.set_node_up("db1:27017", false).await;
    /// assert_eq!(
    ///     cluster.node_role("db1:27017").await,
    ///     Err(AdminError::Unreachable("db1:27017".to_string()))
    /// );
    /// # });
    /// ```
    pub async fn set_node_up(&self, host: &str, up: bool) {
        let mut state = self.state.lock().await;
        if let Some(node) = state.nodes.get_mut(host) {
            node.up = up;
        }
        if let Some(router) = state.routers.get_mut(host) {
            *router = up;
        }
    }

    /// Number of status probes a group needs before electing a primary.
    pub async fn set_election_delay(&self, probes: u32) {
        let mut state = self.state.lock().await;
        state.election_delay = probes;
    }

    /// Makes the next `count` calls of `op` fail with a transient error.
    pub async fn inject_failures(&self, op: AdminOp, count: u32) {
        let mut state = self.state.lock().await;
        state.faults.insert(op, count);
    }

    /// Keeps the balancer from ever reporting `running`.
    pub async fn stall_balancer(&self, stalled: bool) {
        let mut state = self.state.lock().await;
        state.balancer_stalled = stalled;
    }

    /// Pre-forms a replica group, as if a previous bootstrap had initiated it.
    pub async fn seed_group(&self, request: &GroupInitiation) {
        let mut state = self.state.lock().await;
        state.form_group(request);
    }

    /// Pre-creates an account on a group, as if it had been provisioned earlier.
    pub async fn seed_principal(
        &self,
        group_id: &str,
        database: &str,
        username: &str,
        role: &str,
    ) {
        let mut state = self.state.lock().await;
        state.principals.insert(
            principal_key(group_id, database, username),
            SimPrincipal {
                record: PrincipalRecord {
                    username: username.to_string(),
                    database: database.to_string(),
                    role: role.to_string(),
                },
                secret_hash: String::new(),
            },
        );
    }

    pub async fn call_count(&self, op: AdminOp) -> u32 {
        let state = self.state.lock().await;
        state.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn group(&self, group_id: &str) -> Option<GroupSnapshot> {
        let state = self.state.lock().await;
        state.groups.get(group_id).map(|group| GroupSnapshot {
            id: group_id.to_string(),
            config_server: group.config_server,
            hosts: group.members.iter().map(|m| m.host.clone()).collect(),
            primary: group.primary.clone(),
        })
    }

    pub async fn registered_shards(&self) -> Vec<RegisteredShard> {
        let state = self.state.lock().await;
        state.shards.clone()
    }

    pub async fn sharded_databases(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.sharded_databases.iter().cloned().collect()
    }

    pub async fn collections(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.collections.keys().cloned().collect()
    }

    pub async fn collection(&self, namespace: &str) -> Option<CollectionSnapshot> {
        let state = self.state.lock().await;
        state
            .collections
            .get(namespace)
            .map(|collection| CollectionSnapshot {
                namespace: namespace.to_string(),
                validator: collection.validator.clone(),
                indexes: collection.indexes.clone(),
                shard_key: collection.shard_key.clone(),
            })
    }

    pub async fn principals(&self, group_id: &str) -> Vec<PrincipalRecord> {
        let state = self.state.lock().await;
        let mut records = state
            .principals
            .iter()
            .filter(|((group, _, _), _)| group == group_id)
            .map(|(_, principal)| principal.record.clone())
            .collect::<Vec<_>>();
        records.sort_by(|a, b| (&a.database, &a.username).cmp(&(&b.database, &b.username)));
        records
    }

    /// Verifies a principal's secret against the stored hash.
    pub async fn authenticate(
        &self,
        group_id: &str,
        database: &str,
        username: &str,
        secret: &str,
    ) -> bool {
        let state = self.state.lock().await;
        state
            .principals
            .get(&principal_key(group_id, database, username))
            .map(|principal| verify_secret(secret, &principal.secret_hash))
            .unwrap_or(false)
    }

    pub async fn balancer(&self) -> BalancerStatus {
        let state = self.state.lock().await;
        state.balancer
    }

    pub async fn balancer_rounds(&self) -> u32 {
        let state = self.state.lock().await;
        state.balancer_rounds
    }

    /// Counts the call, applies injected faults, then runs `f` against the state.
    async fn call<T>(
        &self,
        op: AdminOp,
        f: impl FnOnce(&mut SimState) -> AdminResult<T>,
    ) -> AdminResult<T> {
        let mut state = self.state.lock().await;
        *state.calls.entry(op).or_default() += 1;
        if let Some(remaining) = state.faults.get_mut(&op) {
            if *remaining > 0 {
                if *remaining != u32::MAX {
                    *remaining -= 1;
                }
                return Err(AdminError::OperationFailed(format!(
                    "injected {:?} failure",
                    op
                )));
            }
        }
        f(&mut state)
    }
}

#[async_trait]
impl ClusterAdmin for InMemoryCluster {
    async fn initiate_group(&self, seed: &str, request: &GroupInitiation) -> AdminResult<()> {
        self.call(AdminOp::InitiateGroup, |state| state.initiate(seed, request))
            .await
    }

    async fn group_status(&self, node: &str) -> AdminResult<GroupStatusReport> {
        self.call(AdminOp::GroupStatus, |state| state.group_status(node))
            .await
    }

    async fn node_role(&self, node: &str) -> AdminResult<NodeRole> {
        self.call(AdminOp::NodeRole, |state| state.node_role(node)).await
    }

    async fn find_principal(
        &self,
        node: &str,
        database: &str,
        username: &str,
    ) -> AdminResult<Option<PrincipalRecord>> {
        self.call(AdminOp::FindPrincipal, |state| {
            state.find_principal(node, database, username)
        })
        .await
    }

    async fn create_principal(&self, node: &str, principal: &PrincipalSpec) -> AdminResult<()> {
        self.call(AdminOp::CreatePrincipal, |state| {
            state.create_principal(node, principal)
        })
        .await
    }

    async fn add_shard(&self, router: &str, group_id: &str, hosts: &[String]) -> AdminResult<()> {
        self.call(AdminOp::AddShard, |state| {
            state.add_shard(router, group_id, hosts)
        })
        .await
    }

    async fn list_shards(&self, router: &str) -> AdminResult<Vec<RegisteredShard>> {
        self.call(AdminOp::ListShards, |state| {
            state.router(router)?;
            Ok(state.shards.clone())
        })
        .await
    }

    async fn enable_sharding(&self, router: &str, database: &str) -> AdminResult<()> {
        self.call(AdminOp::EnableSharding, |state| {
            state.router(router)?;
            state.sharded_databases.insert(database.to_string());
            Ok(())
        })
        .await
    }

    async fn collection_info(
        &self,
        router: &str,
        namespace: &str,
    ) -> AdminResult<Option<CollectionInfo>> {
        self.call(AdminOp::CollectionInfo, |state| {
            state.router(router)?;
            Ok(state
                .collections
                .get(namespace)
                .map(|collection| CollectionInfo {
                    namespace: namespace.to_string(),
                    validator: collection.validator.clone(),
                }))
        })
        .await
    }

    async fn create_collection(
        &self,
        router: &str,
        namespace: &str,
        validator: &Value,
    ) -> AdminResult<()> {
        self.call(AdminOp::CreateCollection, |state| {
            state.create_collection(router, namespace, validator)
        })
        .await
    }

    async fn list_indexes(&self, router: &str, namespace: &str) -> AdminResult<Vec<IndexInfo>> {
        self.call(AdminOp::ListIndexes, |state| {
            state.router(router)?;
            state
                .collections
                .get(namespace)
                .map(|collection| collection.indexes.clone())
                .ok_or_else(|| AdminError::Rejected(format!("namespace {} not found", namespace)))
        })
        .await
    }

    async fn create_index(
        &self,
        router: &str,
        namespace: &str,
        index: &IndexSpec,
    ) -> AdminResult<()> {
        self.call(AdminOp::CreateIndex, |state| {
            state.create_index(router, namespace, index)
        })
        .await
    }

    async fn sharding_info(&self, router: &str, namespace: &str) -> AdminResult<Option<ShardKey>> {
        self.call(AdminOp::ShardingInfo, |state| {
            state.router(router)?;
            Ok(state
                .collections
                .get(namespace)
                .and_then(|collection| collection.shard_key.clone()))
        })
        .await
    }

    async fn shard_collection(
        &self,
        router: &str,
        namespace: &str,
        key: &ShardKey,
    ) -> AdminResult<()> {
        self.call(AdminOp::ShardCollection, |state| {
            state.shard_collection(router, namespace, key)
        })
        .await
    }

    async fn balancer_start(&self, router: &str) -> AdminResult<()> {
        self.call(AdminOp::BalancerStart, |state| state.balancer_start(router))
            .await
    }

    async fn balancer_status(&self, router: &str) -> AdminResult<BalancerStatus> {
        self.call(AdminOp::BalancerStatus, |state| state.balancer_status(router))
            .await
    }

    async fn balancer_force_round(&self, router: &str) -> AdminResult<()> {
        self.call(AdminOp::BalancerForceRound, |state| {
            state.balancer_force_round(router)
        })
        .await
    }
}
