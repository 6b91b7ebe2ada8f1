pub mod balancer;
pub mod orchestrator;
pub mod principal;
pub mod replica_group;
pub mod schema;
pub mod topology;

pub use balancer::{BalancerController, BalancerOutcome};
pub use orchestrator::{
    BootstrapOrchestrator, BootstrapReport, BootstrapState, FailureSummary, PhaseTransition,
    StepRecord, StepStatus,
};
pub use principal::PrincipalProvisioner;
pub use replica_group::{GroupStatus, ReplicaGroupInitializer};
pub use schema::{SchemaInitializer, SchemaOutcome};
pub use topology::TopologyRegistrar;
