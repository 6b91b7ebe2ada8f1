use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an idempotent control-plane operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Convergence {
    /// The operation changed cluster state.
    Applied,
    /// The cluster already matched the desired state; nothing was changed.
    AlreadySatisfied,
}

impl Convergence {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }

    /// Combines two outcomes: applied if either changed anything.
    pub fn merge(self, other: Convergence) -> Convergence {
        if self.is_applied() || other.is_applied() {
            Self::Applied
        } else {
            Self::AlreadySatisfied
        }
    }
}

/// The ordered control-plane steps of a bootstrap run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapStep {
    ConfigGroup,
    ShardGroups,
    Routing,
    Principal,
    Schema,
    Balancer,
}

impl BootstrapStep {
    pub const ALL: [BootstrapStep; 6] = [
        Self::ConfigGroup,
        Self::ShardGroups,
        Self::Routing,
        Self::Principal,
        Self::Schema,
        Self::Balancer,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ConfigGroup => "config_group",
            Self::ShardGroups => "shard_groups",
            Self::Routing => "routing",
            Self::Principal => "principal",
            Self::Schema => "schema",
            Self::Balancer => "balancer",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|step| step.name() == name)
    }

    /// The phase reached once this step completes.
    pub fn completes(&self) -> BootstrapPhase {
        match self {
            Self::ConfigGroup => BootstrapPhase::ConfigGroupReady,
            Self::ShardGroups => BootstrapPhase::ShardGroupsReady,
            Self::Routing => BootstrapPhase::RoutingRegistered,
            Self::Principal => BootstrapPhase::PrincipalReady,
            Self::Schema => BootstrapPhase::SchemaApplied,
            Self::Balancer => BootstrapPhase::BalancerEnabled,
        }
    }

    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|step| step == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Orchestrator state machine positions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "phase", content = "step")]
pub enum BootstrapPhase {
    Init,
    ConfigGroupReady,
    ShardGroupsReady,
    RoutingRegistered,
    PrincipalReady,
    SchemaApplied,
    BalancerEnabled,
    Done,
    Failed(BootstrapStep),
}

impl BootstrapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => f.write_str("init"),
            Self::ConfigGroupReady => f.write_str("config_group_ready"),
            Self::ShardGroupsReady => f.write_str("shard_groups_ready"),
            Self::RoutingRegistered => f.write_str("routing_registered"),
            Self::PrincipalReady => f.write_str("principal_ready"),
            Self::SchemaApplied => f.write_str("schema_applied"),
            Self::BalancerEnabled => f.write_str("balancer_enabled"),
            Self::Done => f.write_str("done"),
            Self::Failed(step) => write!(f, "failed({})", step),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_complete_phases_in_order() {
        let phases = BootstrapStep::ALL
            .iter()
            .map(|step| step.completes())
            .collect::<Vec<_>>();
        assert_eq!(
            phases,
            vec![
                BootstrapPhase::ConfigGroupReady,
                BootstrapPhase::ShardGroupsReady,
                BootstrapPhase::RoutingRegistered,
                BootstrapPhase::PrincipalReady,
                BootstrapPhase::SchemaApplied,
                BootstrapPhase::BalancerEnabled,
            ]
        );
    }

    #[test]
    fn test_step_names_round_trip() {
        for step in BootstrapStep::ALL {
            assert_eq!(BootstrapStep::from_name(step.name()), Some(step));
        }
        assert_eq!(BootstrapStep::from_name("unknown"), None);
    }

    #[test]
    fn test_convergence_merge() {
        use Convergence::*;
        assert_eq!(AlreadySatisfied.merge(AlreadySatisfied), AlreadySatisfied);
        assert_eq!(AlreadySatisfied.merge(Applied), Applied);
        assert_eq!(Applied.merge(AlreadySatisfied), Applied);
    }
}
