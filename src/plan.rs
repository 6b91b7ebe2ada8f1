//! Dry-run rendering of a bootstrap
//!
//! Lists, in execution order, the administrative commands a run issues on
//! its first attempt, as command documents. Secrets are always redacted.

use crate::admin::{GroupInitiation, create_collection_document};
use crate::config::BootstrapConfig;
use crate::core::BootstrapStep;
use serde::Serialize;
use serde_json::{Value, json};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlannedCommand {
    pub step: BootstrapStep,
    pub target: String,
    pub command: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct BootstrapPlan {
    pub commands: Vec<PlannedCommand>,
}

impl BootstrapPlan {
    pub fn build(config: &BootstrapConfig) -> Self {
        let mut plan = Self::default();
        let topology = &config.topology;
        let router = topology.router_for_attempt(1);

        let config_group = &topology.config_group;
        plan.push(
            BootstrapStep::ConfigGroup,
            config_group.seed_for_attempt(1),
            json!({ "replSetInitiate": GroupInitiation::from_spec(config_group).to_document() }),
        );

        for shard in &topology.shards {
            plan.push(
                BootstrapStep::ShardGroups,
                shard.seed_for_attempt(1),
                json!({ "replSetInitiate": GroupInitiation::from_spec(shard).to_document() }),
            );
        }

        for shard in &topology.shards {
            plan.push(
                BootstrapStep::Routing,
                router,
                json!({ "addShard": shard.seed_list() }),
            );
        }
        plan.push(BootstrapStep::Routing, router, json!({ "listShards": 1 }));

        let principal = &config.principal;
        let principal_group = config.principal_group();
        plan.push(
            BootstrapStep::Principal,
            &format!("{} (primary)", principal_group.id),
            json!({
                "createUser": principal.username,
                "pwd": principal.secret.to_string(),
                "roles": [{ "role": principal.role, "db": principal.database }],
                "$db": principal.database,
            }),
        );

        for database in config.schema.databases() {
            plan.push(
                BootstrapStep::Schema,
                router,
                json!({ "enableSharding": database }),
            );
        }
        for collection in &config.schema.collections {
            let mut create = create_collection_document(collection);
            create["$db"] = json!(collection.database);
            plan.push(BootstrapStep::Schema, router, create);

            let indexes = collection
                .required_indexes()
                .iter()
                .map(|index| {
                    json!({
                        "key": index.key_document(),
                        "name": index.effective_name(),
                        "unique": index.unique,
                    })
                })
                .collect::<Vec<_>>();
            plan.push(
                BootstrapStep::Schema,
                router,
                json!({
                    "createIndexes": collection.name,
                    "indexes": indexes,
                    "$db": collection.database,
                }),
            );
            plan.push(
                BootstrapStep::Schema,
                router,
                json!({
                    "shardCollection": collection.namespace(),
                    "key": collection.shard_key.to_document(),
                }),
            );
        }

        plan.push(BootstrapStep::Balancer, router, json!({ "balancerStart": 1 }));
        plan.push(BootstrapStep::Balancer, router, json!({ "balancerStatus": 1 }));
        if config.orchestration.force_balancer_round {
            plan.push(BootstrapStep::Balancer, router, json!({ "balancerForceRound": 1 }));
        }
        plan
    }

    fn push(&mut self, step: BootstrapStep, target: &str, command: Value) {
        self.commands.push(PlannedCommand {
            step,
            target: target.to_string(),
            command,
        });
    }

    pub fn steps(&self) -> Vec<BootstrapStep> {
        let mut steps = self.commands.iter().map(|c| c.step).collect::<Vec<_>>();
        steps.dedup();
        steps
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
