use crate::admin::ClusterAdmin;
use crate::config::ReplicaGroupSpec;
use crate::core::{AdminError, BootstrapError, Convergence, Result};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{Level, event};

/// Registers shard groups with the routing tier and reads the registration back.
pub struct TopologyRegistrar {
    admin: Arc<dyn ClusterAdmin>,
}

impl TopologyRegistrar {
    pub fn new(admin: Arc<dyn ClusterAdmin>) -> Self {
        Self { admin }
    }

    pub async fn register_shard(
        &self,
        step: &str,
        router: &str,
        group: &ReplicaGroupSpec,
    ) -> Result<Convergence> {
        match self.admin.add_shard(router, &group.id, &group.hosts()).await {
            Ok(()) => {
                event!(Level::INFO, step, router, shard = %group.seed_list(), "shard registered");
                Ok(Convergence::Applied)
            }
            Err(AdminError::AlreadyExists(_)) => {
                event!(Level::DEBUG, step, router, shard = %group.id, "shard already registered");
                Ok(Convergence::AlreadySatisfied)
            }
            Err(err) => Err(BootstrapError::from_admin(step, err)),
        }
    }

    pub async fn list_registered(&self, step: &str, router: &str) -> Result<BTreeSet<String>> {
        let shards = self
            .admin
            .list_shards(router)
            .await
            .map_err(|err| BootstrapError::from_admin(step, err))?;
        Ok(shards.into_iter().map(|shard| shard.id).collect())
    }

    /// Fails with `IncompleteRegistration` unless the routing tier lists exactly `expected`.
    pub async fn verify(
        &self,
        step: &str,
        router: &str,
        expected: &BTreeSet<String>,
    ) -> Result<BTreeSet<String>> {
        let registered = self.list_registered(step, router).await?;
        if &registered != expected {
            return Err(BootstrapError::IncompleteRegistration {
                expected: expected.iter().cloned().collect(),
                registered: registered.into_iter().collect(),
            });
        }
        Ok(registered)
    }
}
