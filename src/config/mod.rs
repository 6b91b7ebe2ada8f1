pub mod loader;
pub mod principal;
pub mod schema;
pub mod topology;

pub use loader::{
    BootstrapConfig, ENV_ADMIN_DATABASE, ENV_ADMIN_PASSWORD, ENV_ADMIN_USERNAME,
    OrchestrationSettings, RetrySettings, ShardMode, WaitSettings,
};
pub use principal::{PrincipalSpec, Secret};
pub use schema::{
    CollectionSchema, FieldConstraint, IndexSpec, KeyOrder, KeyPart, PrimitiveType, SchemaConfig,
    ShardKey,
};
pub use topology::{ClusterTopology, MemberSpec, ReplicaGroupSpec, RouterEndpoint, validate_endpoint};
