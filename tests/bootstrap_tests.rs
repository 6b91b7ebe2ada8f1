/// Bootstrap orchestration tests
///
/// Full runs of the orchestrator against the simulated cluster.
/// Run with: cargo test --test bootstrap_tests
use shardstrap::config::{
    ENV_ADMIN_PASSWORD, FieldConstraint, IndexSpec, KeyPart, PrimitiveType, ShardKey,
};
use shardstrap::{
    AdminOp, BootstrapConfig, BootstrapError, BootstrapOrchestrator, BootstrapPhase,
    BootstrapStep, ClusterAdmin, CollectionSchema, Convergence, InMemoryCluster, RetryPolicy,
    SchemaConfig, ShardMode,
};
use shardstrap::admin::GroupInitiation;
use shardstrap::bootstrap::StepStatus;
use shardstrap::config::{MemberSpec, ReplicaGroupSpec};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

const ROUTER: &str = "router:27017";

fn collection(name: &str, required: &[&str], key: &[&str]) -> CollectionSchema {
    let key = ShardKey::new(key.iter().map(|field| KeyPart::asc(*field)).collect());
    let mut schema = CollectionSchema::new("businessdb", name, key);
    for field in required {
        schema = schema.require(*field, FieldConstraint::Type(PrimitiveType::String));
    }
    schema
}

/// Three shards of three members each, three collections keyed on required fields.
fn config() -> BootstrapConfig {
    let mut config =
        BootstrapConfig::from_toml_str(include_str!("../config/businessdb.toml")).unwrap();
    config.apply_overrides_from(|key| (key == ENV_ADMIN_PASSWORD).then(|| "password1".to_string()));
    config.schema = SchemaConfig {
        collections: vec![
            collection(
                "organizations",
                &["organizationId", "name", "industry"],
                &["industry", "organizationId"],
            ),
            collection("people", &["userId", "firstName", "lastName", "email"], &["userId"])
                .index(IndexSpec {
                    name: None,
                    keys: vec![KeyPart::asc("email")],
                    unique: true,
                }),
            collection(
                "customers",
                &["customerId", "firstName", "lastName", "email"],
                &["customerId"],
            ),
        ],
    };
    config.finalize().unwrap();
    config
}

fn orchestrator(cluster: &InMemoryCluster, config: BootstrapConfig) -> BootstrapOrchestrator {
    BootstrapOrchestrator::new(Arc::new(cluster.clone()), config).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_reaches_done() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.set_election_delay(2).await;

    let report = orchestrator(&cluster, config.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.phase, BootstrapPhase::Done);
    assert_eq!(report.exit_code, 0);
    assert_eq!(report.registered_shards, vec!["shard1rs", "shard2rs", "shard3rs"]);
    assert_eq!(cluster.registered_shards().await.len(), 3);
    assert_eq!(
        cluster.collections().await,
        vec![
            "businessdb.customers",
            "businessdb.organizations",
            "businessdb.people"
        ]
    );

    for schema in &config.schema.collections {
        let snapshot = cluster.collection(&schema.namespace()).await.unwrap();
        assert_eq!(snapshot.validator, schema.validator());
        assert_eq!(snapshot.shard_key.as_ref(), Some(&schema.shard_key));
        for index in schema.required_indexes() {
            assert!(snapshot.indexes.iter().any(|i| index.same_shape(&i.keys)));
        }
    }

    let balancer = cluster.balancer().await;
    assert!(balancer.enabled && balancer.running);
    assert!(report.balancer.unwrap().verified);

    let principals = cluster.principals("cfgrs").await;
    assert_eq!(principals.len(), 1);
    assert_eq!(principals[0].role, "root");
    assert!(cluster.authenticate("cfgrs", "admin", "admin", "password1").await);

    for group in config.topology.all_groups() {
        assert_eq!(
            cluster.group(&group.id).await.unwrap().primary.as_deref(),
            Some(group.members[0].host.as_str())
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_steps_complete_in_order() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);
    let orchestrator = orchestrator(&cluster, config);

    orchestrator.run(&CancellationToken::new()).await.unwrap();

    let state = orchestrator.state();
    assert_eq!(
        state.phases(),
        vec![
            BootstrapPhase::Init,
            BootstrapPhase::ConfigGroupReady,
            BootstrapPhase::ShardGroupsReady,
            BootstrapPhase::RoutingRegistered,
            BootstrapPhase::PrincipalReady,
            BootstrapPhase::SchemaApplied,
            BootstrapPhase::BalancerEnabled,
            BootstrapPhase::Done,
        ]
    );
    for pair in state.steps.windows(2) {
        assert!(pair[0].finished_at.unwrap() <= pair[1].started_at.unwrap());
    }
    assert!(state.steps.iter().all(|r| r.status == StepStatus::Succeeded));
}

#[tokio::test(start_paused = true)]
async fn test_rerun_converges_without_duplicates() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);

    orchestrator(&cluster, config.clone())
        .run(&CancellationToken::new())
        .await
        .unwrap();
    let rerun = orchestrator(&cluster, config.clone());
    let report = rerun.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.phase, BootstrapPhase::Done);
    for record in &report.steps {
        assert_eq!(
            record.convergence,
            Some(Convergence::AlreadySatisfied),
            "step {} changed state on rerun",
            record.step
        );
    }
    assert_eq!(cluster.principals("cfgrs").await.len(), 1);
    assert_eq!(cluster.registered_shards().await.len(), 3);
    assert_eq!(cluster.call_count(AdminOp::CreatePrincipal).await, 1);
    assert_eq!(cluster.call_count(AdminOp::CreateCollection).await, 3);
    assert_eq!(cluster.call_count(AdminOp::ShardCollection).await, 3);
    assert_eq!(cluster.call_count(AdminOp::BalancerStart).await, 1);
    for schema in &config.schema.collections {
        let snapshot = cluster.collection(&schema.namespace()).await.unwrap();
        // `_id_` plus the declared and shard key indexes
        assert_eq!(snapshot.indexes.len(), schema.required_indexes().len() + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_shard_fails_the_barrier() {
    let mut config = config();
    config
        .retry
        .steps
        .insert("shard_groups".to_string(), RetryPolicy::fixed(3, Duration::from_secs(1)));
    let cluster = InMemoryCluster::from_topology(&config.topology);
    for host in config.topology.shards[1].hosts() {
        cluster.set_node_up(&host, false).await;
    }
    let orchestrator = orchestrator(&cluster, config);

    let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

    match &err {
        BootstrapError::BarrierFailure {
            failures,
            succeeded,
            ..
        } => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].group_id, "shard2rs");
            assert!(matches!(
                failures[0].error,
                BootstrapError::RetryExhausted { attempts: 3, .. }
            ));
            assert_eq!(succeeded, &vec!["shard1rs".to_string(), "shard3rs".to_string()]);
        }
        other => panic!("expected a barrier failure, got {other}"),
    }
    assert_eq!(err.exit_code(), 1);

    let state = orchestrator.state();
    assert_eq!(state.phase, BootstrapPhase::Failed(BootstrapStep::ShardGroups));
    assert!(!state.phases().contains(&BootstrapPhase::RoutingRegistered));
    assert_eq!(state.record(BootstrapStep::ShardGroups).group_attempts["shard2rs"], 3);
    assert!(cluster.registered_shards().await.is_empty());
    assert!(cluster.group("shard1rs").await.is_some());
    assert!(cluster.group("shard3rs").await.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_retry_bound_on_persistent_failure() {
    let mut config = config();
    config.retry.default = RetryPolicy::fixed(5, Duration::from_secs(2));
    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.inject_failures(AdminOp::InitiateGroup, u32::MAX).await;
    let orchestrator = orchestrator(&cluster, config);

    let started = Instant::now();
    let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(
        &err,
        BootstrapError::RetryExhausted { step, attempts: 5, .. } if step == "config_group"
    ));
    assert!(err.to_string().contains("failed after 5 attempts"));
    assert!(started.elapsed() >= Duration::from_secs(8));
    assert_eq!(cluster.call_count(AdminOp::InitiateGroup).await, 5);

    let state = orchestrator.state();
    let record = state.record(BootstrapStep::ConfigGroup);
    assert_eq!(record.attempts, 5);
    assert!(record.last_error.as_deref().unwrap().contains("injected"));
    assert_eq!(state.failure.as_ref().unwrap().kind, "retry_exhausted");
}

#[tokio::test(start_paused = true)]
async fn test_conflicting_principal_role_halts_run() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.seed_principal("cfgrs", "admin", "admin", "readOnly").await;
    let orchestrator = orchestrator(&cluster, config);

    let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, BootstrapError::ConflictingState { .. }));
    assert!(err.to_string().contains("readOnly"));
    let state = orchestrator.state();
    assert_eq!(state.phase, BootstrapPhase::Failed(BootstrapStep::Principal));
    assert_eq!(state.record(BootstrapStep::Principal).attempts, 1);
    assert_eq!(cluster.principals("cfgrs").await[0].role, "readOnly");
    assert!(cluster.collections().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_shard_backoff_is_prompt() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);
    for host in config.topology.shards[0].hosts() {
        cluster.set_node_up(&host, false).await;
    }
    let orchestrator = orchestrator(&cluster, config);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let (result, _) = tokio::join!(orchestrator.run(&cancel), async {
        sleep(Duration::from_secs(7)).await;
        cancel.cancel();
    });

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.exit_code(), 130);
    assert!(started.elapsed() < Duration::from_secs(8));

    let state = orchestrator.state();
    assert_eq!(state.phase, BootstrapPhase::Failed(BootstrapStep::ShardGroups));
    assert_eq!(
        state.record(BootstrapStep::ShardGroups).status,
        StepStatus::Cancelled
    );
    assert_eq!(state.record(BootstrapStep::ShardGroups).group_attempts["shard1rs"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_sequential_shard_mode() {
    let mut config = config();
    config.orchestration.shard_mode = ShardMode::Sequential;
    let cluster = InMemoryCluster::from_topology(&config.topology);
    let orchestrator = orchestrator(&cluster, config);

    let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

    let order = report
        .shard_groups
        .iter()
        .map(|status| status.group_id.as_str())
        .collect::<Vec<_>>();
    assert_eq!(order, vec!["shard1rs", "shard2rs", "shard3rs"]);
    assert!(report.shard_groups.iter().all(|status| status.primary_observed));
}

#[tokio::test(start_paused = true)]
async fn test_flaky_cluster_converges() {
    let mut config = config();
    config.orchestration.force_balancer_round = true;
    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.set_election_delay(3).await;
    for op in AdminOp::ALL.into_iter().filter(AdminOp::is_mutation) {
        cluster.inject_failures(op, 2).await;
    }
    let orchestrator = orchestrator(&cluster, config);

    let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.phase, BootstrapPhase::Done);
    assert_eq!(report.steps[BootstrapStep::ConfigGroup.index()].attempts, 3);
    assert_eq!(report.steps[BootstrapStep::Routing.index()].attempts, 3);
    assert_eq!(cluster.registered_shards().await.len(), 3);
    assert_eq!(cluster.balancer_rounds().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_unexpected_registered_shard_is_incomplete_registration() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);
    let stray = ReplicaGroupSpec::new("shard4rs", vec![MemberSpec::new(0, "shard4-1:27017", 1)]);
    cluster.add_node("shard4-1:27017").await;
    cluster
        .seed_group(&GroupInitiation::from_spec(&config.topology.config_group))
        .await;
    cluster.seed_group(&GroupInitiation::from_spec(&stray)).await;
    cluster.add_shard(ROUTER, &stray.id, &stray.hosts()).await.unwrap();
    let orchestrator = orchestrator(&cluster, config);

    let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

    match err {
        BootstrapError::IncompleteRegistration {
            expected,
            registered,
        } => {
            assert_eq!(expected.len(), 3);
            assert_eq!(registered.len(), 4);
        }
        other => panic!("expected incomplete registration, got {other}"),
    }
    assert_eq!(
        orchestrator.state().phase,
        BootstrapPhase::Failed(BootstrapStep::Routing)
    );
}

#[tokio::test(start_paused = true)]
async fn test_stalled_balancer_still_reaches_done() {
    let mut config = config();
    config.waits.balancer_timeout_ms = 5000;
    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.stall_balancer(true).await;
    let orchestrator = orchestrator(&cluster, config);

    let report = orchestrator.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(report.phase, BootstrapPhase::Done);
    assert_eq!(report.exit_code, 0);
    let balancer = report.balancer.unwrap();
    assert!(!balancer.verified);
    assert!(balancer.status.enabled);
    assert!(!balancer.status.running);
    assert_eq!(report.steps[BootstrapStep::Balancer.index()].attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_primary_wait_is_prompt() {
    let config = config();
    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.set_election_delay(100).await;
    let orchestrator = orchestrator(&cluster, config);
    let cancel = CancellationToken::new();

    let started = Instant::now();
    let (result, _) = tokio::join!(orchestrator.run(&cancel), async {
        sleep(Duration::from_millis(2500)).await;
        cancel.cancel();
    });

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.exit_code(), 130);
    assert!(started.elapsed() < Duration::from_secs(3));

    let state = orchestrator.state();
    assert_eq!(state.phase, BootstrapPhase::Failed(BootstrapStep::ConfigGroup));
    let record = state.record(BootstrapStep::ConfigGroup);
    assert_eq!(record.status, StepStatus::Cancelled);
    assert_eq!(record.attempts, 1);
    let group = cluster.group("cfgrs").await.unwrap();
    assert_eq!(group.primary, None);
    assert!(cluster.group("shard1rs").await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_principal_provisioned_on_configured_group() {
    let mut config = config();
    config.principal = config.principal.clone().on_group("shard1rs");
    let cluster = InMemoryCluster::from_topology(&config.topology);
    let orchestrator = orchestrator(&cluster, config);

    orchestrator.run(&CancellationToken::new()).await.unwrap();

    let principals = cluster.principals("shard1rs").await;
    assert_eq!(principals.len(), 1);
    assert_eq!(principals[0].username, "admin");
    assert!(cluster.principals("cfgrs").await.is_empty());
    assert!(cluster.authenticate("shard1rs", "admin", "admin", "password1").await);
}
