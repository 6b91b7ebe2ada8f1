//! Replica group formation
//!
//! One attempt sends the initiation request to a seed member, accepts an
//! already-formed equivalent group, then waits (bounded) for a primary.

use crate::admin::{ClusterAdmin, GroupInitiation, GroupStatusReport, MemberStatus};
use crate::config::ReplicaGroupSpec;
use crate::core::{AdminError, BootstrapError, Convergence, Result};
use crate::retry::{PollOutcome, PollSettings, poll_until};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Observed state of a replica group after initiation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupStatus {
    pub group_id: String,
    pub primary_observed: bool,
    pub primary: Option<String>,
    pub members: Vec<MemberStatus>,
    pub convergence: Convergence,
}

pub struct ReplicaGroupInitializer {
    admin: Arc<dyn ClusterAdmin>,
    poll: PollSettings,
}

impl ReplicaGroupInitializer {
    pub fn new(admin: Arc<dyn ClusterAdmin>, poll: PollSettings) -> Self {
        Self { admin, poll }
    }

    /// Forms `spec` and waits for a primary.
    ///
    /// `attempt` selects the seed member, so retries rotate away from a dead seed.
    /// A group that is already formed with the same members counts as success.
    pub async fn initiate(
        &self,
        step: &str,
        spec: &ReplicaGroupSpec,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<GroupStatus> {
        let seed = spec.seed_for_attempt(attempt);
        let request = GroupInitiation::from_spec(spec);
        event!(Level::DEBUG, step, group = %spec.id, seed, attempt, "initiating replica group");

        let convergence = match self.admin.initiate_group(seed, &request).await {
            Ok(()) => Convergence::Applied,
            Err(AdminError::AlreadyInitialized(_)) => {
                self.verify_equivalent(step, spec, seed).await?;
                Convergence::AlreadySatisfied
            }
            Err(err) => return Err(BootstrapError::from_admin(step, err)),
        };

        let outcome = poll_until(
            step,
            self.poll,
            cancel,
            move |round| self.probe(step, spec.seed_for_attempt(attempt + round - 1)),
            |report: &GroupStatusReport| report.primary().is_some(),
        )
        .await?;

        match outcome {
            PollOutcome::Satisfied(report) => {
                let primary = report.primary().map(str::to_string);
                event!(
                    Level::INFO,
                    step,
                    group = %spec.id,
                    primary = primary.as_deref().unwrap_or_default(),
                    ?convergence,
                    "replica group has a primary"
                );
                Ok(GroupStatus {
                    group_id: spec.id.clone(),
                    primary_observed: true,
                    primary,
                    members: report.members,
                    convergence,
                })
            }
            PollOutcome::TimedOut { waited, .. } => Err(BootstrapError::NoPrimary {
                group: spec.id.clone(),
                waited_ms: waited.as_millis() as u64,
            }),
        }
    }

    async fn probe(&self, step: &str, node: &str) -> Result<GroupStatusReport> {
        self.admin
            .group_status(node)
            .await
            .map_err(|err| BootstrapError::from_admin(step, err))
    }

    /// Confirms that an existing group matches the declared one.
    async fn verify_equivalent(&self, step: &str, spec: &ReplicaGroupSpec, seed: &str) -> Result<()> {
        let report = self.probe(step, seed).await?;
        let existing = report
            .members
            .iter()
            .map(|m| m.host.clone())
            .collect::<BTreeSet<_>>();

        if report.group_id != spec.id
            || report.config_server != spec.config_role
            || existing != spec.host_set()
        {
            return Err(BootstrapError::conflict(
                step,
                format!(
                    "replica group '{}' already exists with a different member set {:?}",
                    report.group_id, existing
                ),
            ));
        }
        event!(Level::INFO, step, group = %spec.id, "replica group already initialized");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{AdminOp, InMemoryCluster};
    use crate::config::MemberSpec;
    use std::time::Duration;

    fn spec() -> ReplicaGroupSpec {
        ReplicaGroupSpec::new(
            "shard1rs",
            vec![
                MemberSpec::new(0, "shard1-1:27017", 2),
                MemberSpec::new(1, "shard1-2:27017", 1),
                MemberSpec::new(2, "shard1-3:27017", 1),
            ],
        )
    }

    async fn cluster() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        for member in &spec().members {
            cluster.add_node(member.host.clone()).await;
        }
        cluster
    }

    fn initializer(cluster: &InMemoryCluster) -> ReplicaGroupInitializer {
        ReplicaGroupInitializer::new(
            Arc::new(cluster.clone()),
            PollSettings::new(Duration::from_secs(1), Duration::from_secs(30)),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_forms_group_and_waits_for_primary() {
        let cluster = cluster().await;
        cluster.set_election_delay(3).await;
        let cancel = CancellationToken::new();

        let status = initializer(&cluster)
            .initiate("shard_groups", &spec(), 1, &cancel)
            .await
            .unwrap();

        assert!(status.primary_observed);
        assert_eq!(status.primary.as_deref(), Some("shard1-1:27017"));
        assert_eq!(status.convergence, Convergence::Applied);
        assert_eq!(cluster.call_count(AdminOp::GroupStatus).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_already_satisfied() {
        let cluster = cluster().await;
        let cancel = CancellationToken::new();
        let init = initializer(&cluster);

        init.initiate("shard_groups", &spec(), 1, &cancel).await.unwrap();
        let again = init.initiate("shard_groups", &spec(), 1, &cancel).await.unwrap();
        assert_eq!(again.convergence, Convergence::AlreadySatisfied);
        assert_eq!(cluster.group("shard1rs").await.unwrap().hosts.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_existing_group_is_conflict() {
        let cluster = cluster().await;
        let mut other = GroupInitiation::from_spec(&spec());
        other.members.pop();
        cluster.seed_group(&other).await;

        let err = initializer(&cluster)
            .initiate("shard_groups", &spec(), 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::ConflictingState { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_seed_is_transient() {
        let cluster = cluster().await;
        cluster.set_node_up("shard1-1:27017", false).await;

        let err = initializer(&cluster)
            .initiate("shard_groups", &spec(), 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_primary_within_wait_is_reported() {
        let cluster = cluster().await;
        cluster.set_election_delay(1_000).await;

        let started = tokio::time::Instant::now();
        let err = initializer(&cluster)
            .initiate("shard_groups", &spec(), 1, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BootstrapError::NoPrimary { ref group, .. } if group == "shard1rs"));
        assert!(!err.is_retryable());
        assert!(started.elapsed() >= Duration::from_secs(30));
    }
}
