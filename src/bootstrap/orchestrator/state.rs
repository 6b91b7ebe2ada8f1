use crate::bootstrap::balancer::BalancerOutcome;
use crate::bootstrap::replica_group::GroupStatus;
use crate::bootstrap::schema::SchemaOutcome;
use crate::core::{BootstrapError, BootstrapPhase, BootstrapStep, Convergence, EXIT_DONE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Progress of one step within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub step: BootstrapStep,
    pub status: StepStatus,
    /// Attempts started, summed over every group for the shard phase.
    pub attempts: u32,
    /// Latest attempt number per shard group.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub group_attempts: BTreeMap<String, u32>,
    pub last_error: Option<String>,
    pub convergence: Option<Convergence>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    fn new(step: BootstrapStep) -> Self {
        Self {
            step,
            status: StepStatus::Pending,
            attempts: 0,
            group_attempts: BTreeMap::new(),
            last_error: None,
            convergence: None,
            started_at: None,
            finished_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PhaseTransition {
    pub phase: BootstrapPhase,
    pub at: DateTime<Utc>,
}

/// Why a run stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailureSummary {
    pub step: BootstrapStep,
    pub kind: String,
    pub message: String,
    pub exit_code: u8,
}

/// In-memory progress of a bootstrap run. Never persisted: a rerun starts fresh
/// and relies on every step being idempotent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapState {
    pub run_id: Uuid,
    pub phase: BootstrapPhase,
    pub step_index: usize,
    pub steps: Vec<StepRecord>,
    pub history: Vec<PhaseTransition>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub config_group: Option<GroupStatus>,
    pub shard_groups: Vec<GroupStatus>,
    pub registered_shards: Vec<String>,
    pub principal: Option<Convergence>,
    pub collections: Vec<SchemaOutcome>,
    pub balancer: Option<BalancerOutcome>,
    pub failure: Option<FailureSummary>,
}

impl Default for BootstrapState {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            phase: BootstrapPhase::Init,
            step_index: 0,
            steps: BootstrapStep::ALL.into_iter().map(StepRecord::new).collect(),
            history: vec![PhaseTransition {
                phase: BootstrapPhase::Init,
                at: now,
            }],
            started_at: now,
            finished_at: None,
            config_group: None,
            shard_groups: Vec::new(),
            registered_shards: Vec::new(),
            principal: None,
            collections: Vec::new(),
            balancer: None,
            failure: None,
        }
    }
}

impl BootstrapState {
    pub fn record(&self, step: BootstrapStep) -> &StepRecord {
        &self.steps[step.index()]
    }

    pub(super) fn record_mut(&mut self, step: BootstrapStep) -> &mut StepRecord {
        &mut self.steps[step.index()]
    }

    pub fn phases(&self) -> Vec<BootstrapPhase> {
        self.history.iter().map(|t| t.phase).collect()
    }

    pub(super) fn transition(&mut self, phase: BootstrapPhase) {
        self.phase = phase;
        self.history.push(PhaseTransition {
            phase,
            at: Utc::now(),
        });
        if phase.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
    }

    pub(super) fn begin(&mut self, step: BootstrapStep) {
        self.step_index = step.index();
        let record = self.record_mut(step);
        record.status = StepStatus::Running;
        record.started_at = Some(Utc::now());
    }

    pub(super) fn succeed(&mut self, step: BootstrapStep, convergence: Convergence) {
        let record = self.record_mut(step);
        record.status = StepStatus::Succeeded;
        record.convergence = Some(convergence);
        record.finished_at = Some(Utc::now());
        self.transition(step.completes());
    }

    pub(super) fn fail(&mut self, step: BootstrapStep, err: &BootstrapError) {
        let record = self.record_mut(step);
        record.status = if err.is_cancelled() {
            StepStatus::Cancelled
        } else {
            StepStatus::Failed
        };
        record.last_error = Some(err.to_string());
        record.finished_at = Some(Utc::now());
        self.failure = Some(FailureSummary {
            step,
            kind: err.kind().to_string(),
            message: err.to_string(),
            exit_code: err.exit_code(),
        });
        self.transition(BootstrapPhase::Failed(step));
    }

    pub fn exit_code(&self) -> u8 {
        self.failure
            .as_ref()
            .map(|failure| failure.exit_code)
            .unwrap_or(EXIT_DONE)
    }
}

/// Serializable summary of a run, written by `shardstrap simulate --report`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BootstrapReport {
    pub run_id: Uuid,
    pub phase: BootstrapPhase,
    pub exit_code: u8,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepRecord>,
    pub history: Vec<PhaseTransition>,
    pub config_group: Option<GroupStatus>,
    pub shard_groups: Vec<GroupStatus>,
    pub registered_shards: Vec<String>,
    pub principal: Option<Convergence>,
    pub collections: Vec<SchemaOutcome>,
    pub balancer: Option<BalancerOutcome>,
    pub failure: Option<FailureSummary>,
}

impl From<BootstrapState> for BootstrapReport {
    fn from(state: BootstrapState) -> Self {
        Self {
            exit_code: state.exit_code(),
            run_id: state.run_id,
            phase: state.phase,
            started_at: state.started_at,
            finished_at: state.finished_at,
            steps: state.steps,
            history: state.history,
            config_group: state.config_group,
            shard_groups: state.shard_groups,
            registered_shards: state.registered_shards,
            principal: state.principal,
            collections: state.collections,
            balancer: state.balancer,
            failure: state.failure,
        }
    }
}

impl BootstrapReport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
