//! Collection, index and partitioning setup
//!
//! For each collection the order is fixed: the database is enabled for
//! sharding, the collection is created with its validator, the indexes
//! (including the one backing the shard key) are built, and only then is
//! the shard key applied. Every stage compares against what the cluster
//! already has, so a rerun converges without duplicating anything.

use crate::admin::ClusterAdmin;
use crate::config::CollectionSchema;
use crate::core::{AdminError, BootstrapError, Convergence, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{Level, event};

/// What changed for one collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaOutcome {
    pub namespace: String,
    pub collection: Convergence,
    pub indexes: Convergence,
    pub sharding: Convergence,
}

impl SchemaOutcome {
    pub fn convergence(&self) -> Convergence {
        self.collection.merge(self.indexes).merge(self.sharding)
    }
}

pub struct SchemaInitializer {
    admin: Arc<dyn ClusterAdmin>,
}

impl SchemaInitializer {
    pub fn new(admin: Arc<dyn ClusterAdmin>) -> Self {
        Self { admin }
    }

    pub async fn apply_schema(
        &self,
        step: &str,
        router: &str,
        schema: &CollectionSchema,
    ) -> Result<SchemaOutcome> {
        let namespace = schema.namespace();
        self.enable_database(step, router, &schema.database).await?;

        let collection = self.ensure_collection(step, router, schema).await?;
        let indexes = self.ensure_indexes(step, router, schema).await?;
        let sharding = self.ensure_sharding(step, router, schema).await?;

        let outcome = SchemaOutcome {
            namespace,
            collection,
            indexes,
            sharding,
        };
        event!(
            Level::INFO,
            step,
            namespace = %outcome.namespace,
            convergence = ?outcome.convergence(),
            "collection ready"
        );
        Ok(outcome)
    }

    async fn enable_database(&self, step: &str, router: &str, database: &str) -> Result<()> {
        match self.admin.enable_sharding(router, database).await {
            Ok(()) | Err(AdminError::AlreadyExists(_)) => Ok(()),
            Err(err) => Err(BootstrapError::from_admin(step, err)),
        }
    }

    async fn ensure_collection(
        &self,
        step: &str,
        router: &str,
        schema: &CollectionSchema,
    ) -> Result<Convergence> {
        let namespace = schema.namespace();
        let validator = schema.validator();

        if self.validator_matches(step, router, schema).await? {
            return Ok(Convergence::AlreadySatisfied);
        }
        match self
            .admin
            .create_collection(router, &namespace, &validator)
            .await
        {
            Ok(()) => Ok(Convergence::Applied),
            // created concurrently; compare once more
            Err(AdminError::AlreadyExists(_)) => {
                if self.validator_matches(step, router, schema).await? {
                    Ok(Convergence::AlreadySatisfied)
                } else {
                    Err(BootstrapError::Transient {
                        step: step.to_string(),
                        source: AdminError::OperationFailed(format!(
                            "collection {} reported as existing but not found",
                            namespace
                        )),
                    })
                }
            }
            Err(err) => Err(BootstrapError::from_admin(step, err)),
        }
    }

    /// True when the collection exists with the declared validator; a different
    /// validator is a conflict.
    async fn validator_matches(
        &self,
        step: &str,
        router: &str,
        schema: &CollectionSchema,
    ) -> Result<bool> {
        let namespace = schema.namespace();
        let existing = self
            .admin
            .collection_info(router, &namespace)
            .await
            .map_err(|err| BootstrapError::from_admin(step, err))?;
        match existing {
            None => Ok(false),
            Some(info) if info.validator == schema.validator() => Ok(true),
            Some(_) => Err(BootstrapError::conflict(
                step,
                format!("collection {} exists with a different validator", namespace),
            )),
        }
    }

    async fn ensure_indexes(
        &self,
        step: &str,
        router: &str,
        schema: &CollectionSchema,
    ) -> Result<Convergence> {
        let namespace = schema.namespace();
        let existing = self
            .admin
            .list_indexes(router, &namespace)
            .await
            .map_err(|err| BootstrapError::from_admin(step, err))?;

        let mut convergence = Convergence::AlreadySatisfied;
        for index in schema.required_indexes() {
            if existing.iter().any(|info| index.same_shape(&info.keys)) {
                continue;
            }
            match self.admin.create_index(router, &namespace, &index).await {
                Ok(()) => {
                    event!(
                        Level::DEBUG,
                        step,
                        namespace = %namespace,
                        index = %index.effective_name(),
                        "index created"
                    );
                    convergence = Convergence::Applied;
                }
                Err(AdminError::AlreadyExists(_)) => {}
                Err(err) => return Err(BootstrapError::from_admin(step, err)),
            }
        }
        Ok(convergence)
    }

    async fn ensure_sharding(
        &self,
        step: &str,
        router: &str,
        schema: &CollectionSchema,
    ) -> Result<Convergence> {
        let namespace = schema.namespace();
        let current = self
            .admin
            .sharding_info(router, &namespace)
            .await
            .map_err(|err| BootstrapError::from_admin(step, err))?;

        match current {
            Some(key) if key == schema.shard_key => Ok(Convergence::AlreadySatisfied),
            Some(key) => Err(BootstrapError::conflict(
                step,
                format!(
                    "collection {} is already sharded on {}",
                    namespace,
                    key.to_document()
                ),
            )),
            None => match self
                .admin
                .shard_collection(router, &namespace, &schema.shard_key)
                .await
            {
                Ok(()) => Ok(Convergence::Applied),
                Err(AdminError::AlreadyExists(_)) => Ok(Convergence::AlreadySatisfied),
                Err(err) => Err(BootstrapError::from_admin(step, err)),
            },
        }
    }
}
