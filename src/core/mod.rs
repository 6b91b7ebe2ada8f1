pub mod error;
pub mod types;

pub use error::{
    AdminError, AdminResult, BarrierMember, BootstrapError, EXIT_CANCELLED, EXIT_DONE,
    EXIT_INVALID_CONFIG, EXIT_STEP_FAILED, Result,
};
pub use types::{BootstrapPhase, BootstrapStep, Convergence};
