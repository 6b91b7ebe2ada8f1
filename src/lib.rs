// ============================================================================
// shardstrap Library
// ============================================================================

pub mod admin;
pub mod bootstrap;
pub mod config;
pub mod core;
pub mod plan;
pub mod retry;

// Re-export main types for convenience
pub use crate::core::{
    AdminError, AdminResult, BootstrapError, BootstrapPhase, BootstrapStep, Convergence,
    EXIT_CANCELLED, EXIT_DONE, EXIT_INVALID_CONFIG, EXIT_STEP_FAILED, Result,
};

pub use crate::config::{
    BootstrapConfig, ClusterTopology, CollectionSchema, PrincipalSpec, ReplicaGroupSpec,
    SchemaConfig, Secret, ShardMode,
};

pub use admin::{AdminOp, ClusterAdmin, InMemoryCluster};

pub use bootstrap::{
    BalancerController, BootstrapOrchestrator, BootstrapReport, BootstrapState, GroupStatus,
    PrincipalProvisioner, ReplicaGroupInitializer, SchemaInitializer, TopologyRegistrar,
};

pub use plan::BootstrapPlan;
pub use retry::{Backoff, PollOutcome, PollSettings, RetryPolicy, poll_until};
