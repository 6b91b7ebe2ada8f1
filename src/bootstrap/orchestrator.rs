//! Bootstrap orchestration
//!
//! Drives the cluster from nothing to serving in a fixed order:
//! config tier, shard groups, routing, principal, schema, balancer.
//! Each step runs under its own [`RetryPolicy`]; shard groups are brought up
//! behind a barrier so a single failed shard fails the phase. Progress lives
//! in [`BootstrapState`], which is inspectable while and after a run.

mod state;

pub use state::{
    BootstrapReport, BootstrapState, FailureSummary, PhaseTransition, StepRecord, StepStatus,
};

use crate::admin::ClusterAdmin;
use crate::bootstrap::balancer::BalancerController;
use crate::bootstrap::principal::PrincipalProvisioner;
use crate::bootstrap::replica_group::{GroupStatus, ReplicaGroupInitializer};
use crate::bootstrap::schema::SchemaInitializer;
use crate::bootstrap::topology::TopologyRegistrar;
use crate::config::{BootstrapConfig, ReplicaGroupSpec, ShardMode};
use crate::core::{
    BarrierMember, BootstrapError, BootstrapPhase, BootstrapStep, Convergence, Result,
};
use crate::retry::{AttemptObserver, RetryPolicy};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Level, event, info_span};

pub struct BootstrapOrchestrator {
    config: BootstrapConfig,
    state: Arc<Mutex<BootstrapState>>,
    groups: ReplicaGroupInitializer,
    principals: PrincipalProvisioner,
    registrar: TopologyRegistrar,
    schema: SchemaInitializer,
    balancer: BalancerController,
}

impl BootstrapOrchestrator {
    /// Validates `config` and wires the components to `admin`.
    pub fn new(admin: Arc<dyn ClusterAdmin>, config: BootstrapConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            groups: ReplicaGroupInitializer::new(admin.clone(), config.waits.primary_poll()),
            principals: PrincipalProvisioner::new(admin.clone()),
            registrar: TopologyRegistrar::new(admin.clone()),
            schema: SchemaInitializer::new(admin.clone()),
            balancer: BalancerController::new(admin, config.waits.balancer_poll()),
            state: Arc::new(Mutex::new(BootstrapState::default())),
            config,
        })
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Snapshot of the current run state.
    pub fn state(&self) -> BootstrapState {
        self.lock_state().clone()
    }

    pub fn report(&self) -> BootstrapReport {
        self.state().into()
    }

    /// Runs every step in order until `Done`, a terminal failure, or cancellation.
    ///
    /// Each run starts from a fresh state; already-completed cluster work is
    /// detected and skipped by the individual steps.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<BootstrapReport> {
        let run_id = {
            let mut state = self.lock_state();
            *state = BootstrapState::default();
            state.run_id
        };
        let span = info_span!("bootstrap", run_id = %run_id);

        async {
            event!(
                Level::INFO,
                shards = self.config.topology.shards.len(),
                collections = self.config.schema.collections.len(),
                shard_mode = ?self.config.orchestration.shard_mode,
                "bootstrap started"
            );

            for step in BootstrapStep::ALL {
                if let Err(err) = self.run_step(step, cancel).await {
                    self.lock_state().fail(step, &err);
                    event!(
                        Level::ERROR,
                        step = %step,
                        kind = err.kind(),
                        error = %err,
                        "bootstrap failed"
                    );
                    return Err(err);
                }
            }

            self.lock_state().transition(BootstrapPhase::Done);
            event!(Level::INFO, "bootstrap done");
            Ok(self.report())
        }
        .instrument(span)
        .await
    }

    async fn run_step(&self, step: BootstrapStep, cancel: &CancellationToken) -> Result<()> {
        let policy = self.config.policy_for(step);
        self.lock_state().begin(step);

        let observer = StepObserver {
            state: &self.state,
            step,
        };
        let span = info_span!("step", step = %step);
        let convergence = async {
            event!(
                Level::INFO,
                max_attempts = policy.max_attempts,
                interval_ms = policy.interval_ms,
                "step started"
            );
            let convergence = match step {
                BootstrapStep::ConfigGroup => self.config_group(&policy, &observer, cancel).await?,
                BootstrapStep::ShardGroups => self.shard_groups(&policy, &observer, cancel).await?,
                BootstrapStep::Routing => self.routing(&policy, &observer, cancel).await?,
                BootstrapStep::Principal => self.principal(&policy, &observer, cancel).await?,
                BootstrapStep::Schema => self.schema(&policy, &observer, cancel).await?,
                BootstrapStep::Balancer => self.balancer(&policy, &observer, cancel).await?,
            };
            event!(Level::INFO, ?convergence, "step succeeded");
            Ok::<_, BootstrapError>(convergence)
        }
        .instrument(span)
        .await?;

        self.lock_state().succeed(step, convergence);
        Ok(())
    }

    async fn config_group(
        &self,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let name = BootstrapStep::ConfigGroup.name();
        let group = &self.config.topology.config_group;
        let status = policy
            .execute(name, cancel, observer, move |attempt| {
                self.groups.initiate(name, group, attempt, cancel)
            })
            .await?;

        let convergence = status.convergence;
        self.lock_state().config_group = Some(status);
        Ok(convergence)
    }

    /// Brings up every shard group and waits for all of them.
    async fn shard_groups(
        &self,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let shards = &self.config.topology.shards;
        let results = match self.config.orchestration.shard_mode {
            ShardMode::Concurrent => {
                join_all(
                    shards
                        .iter()
                        .map(|group| self.shard_group(group, policy, observer, cancel)),
                )
                .await
            }
            ShardMode::Sequential => {
                let mut results = Vec::with_capacity(shards.len());
                for group in shards {
                    let result = self.shard_group(group, policy, observer, cancel).await;
                    let failed = result.1.is_err();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                results
            }
        };

        let mut statuses = Vec::new();
        let mut failures = Vec::new();
        for (group_id, result) in results {
            match result {
                Ok(status) => statuses.push(status),
                Err(error) => failures.push(BarrierMember { group_id, error }),
            }
        }

        let convergence = statuses
            .iter()
            .fold(Convergence::AlreadySatisfied, |acc, s| acc.merge(s.convergence));
        let succeeded = statuses.iter().map(|s| s.group_id.clone()).collect::<Vec<_>>();
        self.lock_state().shard_groups = statuses;

        let step = BootstrapStep::ShardGroups.name();
        if failures.iter().any(|member| member.error.is_cancelled()) {
            return Err(BootstrapError::cancelled(step));
        }
        if !failures.is_empty() {
            return Err(BootstrapError::BarrierFailure {
                step: step.to_string(),
                failures,
                succeeded,
            });
        }
        Ok(convergence)
    }

    async fn shard_group(
        &self,
        group: &ReplicaGroupSpec,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> (String, Result<GroupStatus>) {
        let label = format!("{}/{}", BootstrapStep::ShardGroups.name(), group.id);
        let span = info_span!("shard_group", group = %group.id);
        let result = {
            let label = label.as_str();
            policy
                .execute(label, cancel, observer, move |attempt| {
                    self.groups.initiate(label, group, attempt, cancel)
                })
                .instrument(span)
                .await
        };
        (group.id.clone(), result)
    }

    /// Registers every shard, then checks the routing tier lists exactly the declared set.
    async fn routing(
        &self,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let name = BootstrapStep::Routing.name();
        let topology = &self.config.topology;
        let expected = topology.shard_ids().into_iter().collect::<BTreeSet<_>>();
        let expected = &expected;

        let (convergence, registered) = policy
            .execute(name, cancel, observer, move |attempt| async move {
                let router = topology.router_for_attempt(attempt);
                let mut convergence = Convergence::AlreadySatisfied;
                for group in &topology.shards {
                    let outcome = self.registrar.register_shard(name, router, group).await?;
                    convergence = convergence.merge(outcome);
                }
                let registered = self.registrar.verify(name, router, expected).await?;
                Ok::<_, BootstrapError>((convergence, registered))
            })
            .await?;

        event!(Level::INFO, registered = registered.len(), "routing tier verified");
        self.lock_state().registered_shards = registered.into_iter().collect();
        Ok(convergence)
    }

    async fn principal(
        &self,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let name = BootstrapStep::Principal.name();
        let group = self.config.principal_group();
        let spec = &self.config.principal;
        let convergence = policy
            .execute(name, cancel, observer, move |_| {
                self.principals.provision(name, group, spec)
            })
            .await?;

        self.lock_state().principal = Some(convergence);
        Ok(convergence)
    }

    async fn schema(
        &self,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let name = BootstrapStep::Schema.name();
        let topology = &self.config.topology;
        let collections = &self.config.schema.collections;

        let outcomes = policy
            .execute(name, cancel, observer, move |attempt| async move {
                let router = topology.router_for_attempt(attempt);
                let mut outcomes = Vec::with_capacity(collections.len());
                for collection in collections {
                    outcomes.push(self.schema.apply_schema(name, router, collection).await?);
                }
                Ok::<_, BootstrapError>(outcomes)
            })
            .await?;

        let convergence = outcomes
            .iter()
            .fold(Convergence::AlreadySatisfied, |acc, o| acc.merge(o.convergence()));
        self.lock_state().collections = outcomes;
        Ok(convergence)
    }

    async fn balancer(
        &self,
        policy: &RetryPolicy,
        observer: &StepObserver<'_>,
        cancel: &CancellationToken,
    ) -> Result<Convergence> {
        let name = BootstrapStep::Balancer.name();
        let topology = &self.config.topology;
        let force_round = self.config.orchestration.force_balancer_round;

        let outcome = policy
            .execute(name, cancel, observer, move |attempt| {
                self.balancer.enable_and_verify(
                    name,
                    topology.router_for_attempt(attempt),
                    force_round,
                    cancel,
                )
            })
            .await?;

        let convergence = outcome.convergence;
        self.lock_state().balancer = Some(outcome);
        Ok(convergence)
    }

    fn lock_state(&self) -> MutexGuard<'_, BootstrapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Feeds per-attempt progress of one step into the run state.
struct StepObserver<'a> {
    state: &'a Mutex<BootstrapState>,
    step: BootstrapStep,
}

impl StepObserver<'_> {
    fn lock(&self) -> MutexGuard<'_, BootstrapState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AttemptObserver for StepObserver<'_> {
    fn attempt_started(&self, label: &str, attempt: u32) {
        let mut state = self.lock();
        let record = state.record_mut(self.step);
        record.attempts = record.attempts.saturating_add(1);
        if let Some((_, group)) = label.split_once('/') {
            record.group_attempts.insert(group.to_string(), attempt);
        }
    }

    fn attempt_failed(&self, _label: &str, _attempt: u32, error: &BootstrapError) {
        let mut state = self.lock();
        state.record_mut(self.step).last_error = Some(error.to_string());
    }
}
