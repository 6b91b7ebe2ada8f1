use thiserror::Error;

/// Errors reported by the cluster administrative surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdminError {
    #[error("Node '{0}' is unreachable")]
    Unreachable(String),

    #[error("Node '{0}' is not primary")]
    NotPrimary(String),

    #[error("Node '{0}' has no replica group configuration")]
    NotInitialized(String),

    #[error("Replica group '{0}' is already initialized")]
    AlreadyInitialized(String),

    #[error("'{0}' already exists")]
    AlreadyExists(String),

    #[error("Command rejected: {0}")]
    Rejected(String),

    #[error("Operation failed: {0}")]
    OperationFailed(String),

    #[error("Operation timed out after {0}ms")]
    Timeout(u64),
}

impl AdminError {
    /// Returns true when the failure may resolve itself as the cluster converges.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable(_)
                | Self::NotPrimary(_)
                | Self::NotInitialized(_)
                | Self::OperationFailed(_)
                | Self::Timeout(_)
        )
    }
}

pub type AdminResult<T> = std::result::Result<T, AdminError>;

/// A shard group that did not reach readiness during a barrier phase.
#[derive(Debug)]
pub struct BarrierMember {
    pub group_id: String,
    pub error: BootstrapError,
}

#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transient failure in step '{step}': {source}")]
    Transient {
        step: String,
        #[source]
        source: AdminError,
    },

    #[error("Conflicting state in step '{step}': {detail}")]
    ConflictingState { step: String, detail: String },

    #[error("Bootstrap step '{step}' failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        step: String,
        attempts: u32,
        last_error: String,
    },

    #[error("No primary observed for replica group '{group}' within {waited_ms}ms")]
    NoPrimary { group: String, waited_ms: u64 },

    #[error(
        "Shard registration incomplete: expected {expected:?}, routing tier reports {registered:?}"
    )]
    IncompleteRegistration {
        expected: Vec<String>,
        registered: Vec<String>,
    },

    #[error("Barrier failure in step '{step}': {}", describe_barrier(.failures, .succeeded))]
    BarrierFailure {
        step: String,
        failures: Vec<BarrierMember>,
        succeeded: Vec<String>,
    },

    #[error("Cancelled during step '{step}'")]
    Cancelled { step: String },
}

fn describe_barrier(failures: &[BarrierMember], succeeded: &[String]) -> String {
    let failed = failures
        .iter()
        .map(|member| format!("{} ({})", member.group_id, member.error))
        .collect::<Vec<_>>()
        .join("; ");
    format!(
        "{} of {} groups failed: {}",
        failures.len(),
        failures.len() + succeeded.len(),
        failed
    )
}

impl BootstrapError {
    /// Wraps an admin failure raised while executing `step`.
    ///
    /// Transient failures stay retryable; everything else becomes a conflict,
    /// since retrying cannot change the answer.
    pub fn from_admin(step: impl Into<String>, err: AdminError) -> Self {
        let step = step.into();
        if err.is_transient() {
            Self::Transient { step, source: err }
        } else {
            Self::ConflictingState {
                step,
                detail: err.to_string(),
            }
        }
    }

    pub fn conflict(step: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::ConflictingState {
            step: step.into(),
            detail: detail.into(),
        }
    }

    pub fn cancelled(step: impl Into<String>) -> Self {
        Self::Cancelled { step: step.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Short machine-readable tag used in reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig(_) => "invalid_config",
            Self::Transient { .. } => "transient",
            Self::ConflictingState { .. } => "conflicting_state",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::NoPrimary { .. } => "no_primary",
            Self::IncompleteRegistration { .. } => "incomplete_registration",
            Self::BarrierFailure { .. } => "barrier_failure",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    /// Process exit status for the surrounding deployment tooling.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidConfig(_) => EXIT_INVALID_CONFIG,
            Self::Cancelled { .. } => EXIT_CANCELLED,
            _ => EXIT_STEP_FAILED,
        }
    }
}

pub const EXIT_DONE: u8 = 0;
pub const EXIT_STEP_FAILED: u8 = 1;
pub const EXIT_INVALID_CONFIG: u8 = 2;
pub const EXIT_CANCELLED: u8 = 130;

pub type Result<T> = std::result::Result<T, BootstrapError>;

impl From<toml::de::Error> for BootstrapError {
    fn from(err: toml::de::Error) -> Self {
        Self::InvalidConfig(format!("Failed to parse config file: {}", err))
    }
}
