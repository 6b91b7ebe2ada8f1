use crate::admin::{ClusterAdmin, PrincipalRecord};
use crate::config::{PrincipalSpec, ReplicaGroupSpec};
use crate::core::{AdminError, BootstrapError, Convergence, Result};
use std::sync::Arc;
use tracing::{Level, event};

/// Creates the administrative identity on a replica group's primary.
pub struct PrincipalProvisioner {
    admin: Arc<dyn ClusterAdmin>,
}

impl PrincipalProvisioner {
    pub fn new(admin: Arc<dyn ClusterAdmin>) -> Self {
        Self { admin }
    }

    /// One provisioning attempt.
    ///
    /// Having no reachable primary is transient, so the caller's retry policy
    /// backs off until the group elects one. An existing principal with a
    /// different role is a conflict and is never overwritten.
    pub async fn provision(
        &self,
        step: &str,
        group: &ReplicaGroupSpec,
        spec: &PrincipalSpec,
    ) -> Result<Convergence> {
        let primary = self.find_primary(step, group).await?;

        if let Some(existing) = self.lookup(step, &primary, spec).await? {
            return check_role(step, &existing, spec);
        }

        match self.admin.create_principal(&primary, spec).await {
            Ok(()) => {
                event!(
                    Level::INFO,
                    step,
                    group = %group.id,
                    username = %spec.username,
                    database = %spec.database,
                    role = %spec.role,
                    "principal created"
                );
                Ok(Convergence::Applied)
            }
            Err(AdminError::AlreadyExists(_)) => match self.lookup(step, &primary, spec).await? {
                Some(existing) => check_role(step, &existing, spec),
                None => Err(BootstrapError::Transient {
                    step: step.to_string(),
                    source: AdminError::OperationFailed(format!(
                        "principal '{}' reported as existing but not found",
                        spec.username
                    )),
                }),
            },
            Err(err) => Err(BootstrapError::from_admin(step, err)),
        }
    }

    /// Finds the writable primary, trying members in priority order.
    async fn find_primary(&self, step: &str, group: &ReplicaGroupSpec) -> Result<String> {
        for member in group.members_by_priority() {
            match self.admin.node_role(&member.host).await {
                Ok(role) if role.is_primary => return Ok(role.host),
                Ok(_) => {}
                Err(err) => {
                    event!(Level::DEBUG, step, node = %member.host, error = %err, "role probe failed");
                }
            }
        }
        Err(BootstrapError::Transient {
            step: step.to_string(),
            source: AdminError::NotPrimary(group.id.clone()),
        })
    }

    async fn lookup(
        &self,
        step: &str,
        primary: &str,
        spec: &PrincipalSpec,
    ) -> Result<Option<PrincipalRecord>> {
        self.admin
            .find_principal(primary, &spec.database, &spec.username)
            .await
            .map_err(|err| BootstrapError::from_admin(step, err))
    }
}

fn check_role(step: &str, existing: &PrincipalRecord, spec: &PrincipalSpec) -> Result<Convergence> {
    if existing.role == spec.role {
        event!(Level::INFO, step, username = %spec.username, "principal already provisioned");
        return Ok(Convergence::AlreadySatisfied);
    }
    Err(BootstrapError::conflict(
        step,
        format!(
            "principal '{}' on '{}' exists with role '{}', expected '{}'",
            existing.username, existing.database, existing.role, spec.role
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{AdminOp, GroupInitiation, InMemoryCluster};
    use crate::config::MemberSpec;

    fn group() -> ReplicaGroupSpec {
        ReplicaGroupSpec::config_server(
            "cfgrs",
            vec![
                MemberSpec::new(0, "cfgsvr1:27019", 2),
                MemberSpec::new(1, "cfgsvr2:27019", 1),
                MemberSpec::new(2, "cfgsvr3:27019", 1),
            ],
        )
    }

    async fn formed() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        for host in group().hosts() {
            cluster.add_node(host).await;
        }
        cluster.seed_group(&GroupInitiation::from_spec(&group())).await;
        cluster
    }

    fn admin_spec(role: &str) -> PrincipalSpec {
        PrincipalSpec::new("admin", "password1", "admin", role)
    }

    #[tokio::test]
    async fn test_provision_is_idempotent() {
        let cluster = formed().await;
        let provisioner = PrincipalProvisioner::new(Arc::new(cluster.clone()));

        let first = provisioner
            .provision("principal", &group(), &admin_spec("root"))
            .await
            .unwrap();
        let second = provisioner
            .provision("principal", &group(), &admin_spec("root"))
            .await
            .unwrap();

        assert_eq!(first, Convergence::Applied);
        assert_eq!(second, Convergence::AlreadySatisfied);
        assert_eq!(cluster.principals("cfgrs").await.len(), 1);
        assert_eq!(cluster.call_count(AdminOp::CreatePrincipal).await, 1);
        assert!(cluster.authenticate("cfgrs", "admin", "admin", "password1").await);
    }

    #[tokio::test]
    async fn test_conflicting_role_is_not_overwritten() {
        let cluster = formed().await;
        cluster.seed_principal("cfgrs", "admin", "admin", "readOnly").await;
        let provisioner = PrincipalProvisioner::new(Arc::new(cluster.clone()));

        let err = provisioner
            .provision("principal", &group(), &admin_spec("root"))
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::ConflictingState { .. }));
        assert!(!err.is_retryable());
        assert_eq!(cluster.principals("cfgrs").await[0].role, "readOnly");
        assert_eq!(cluster.call_count(AdminOp::CreatePrincipal).await, 0);
    }

    #[tokio::test]
    async fn test_no_primary_is_retryable() {
        let cluster = formed().await;
        for host in group().hosts() {
            cluster.set_node_up(&host, false).await;
        }
        let provisioner = PrincipalProvisioner::new(Arc::new(cluster.clone()));

        let err = provisioner
            .provision("principal", &group(), &admin_spec("root"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_targets_reelected_primary() {
        let cluster = formed().await;
        cluster.set_node_up("cfgsvr1:27019", false).await;
        let provisioner = PrincipalProvisioner::new(Arc::new(cluster.clone()));

        provisioner
            .provision("principal", &group(), &admin_spec("root"))
            .await
            .unwrap();
        assert_eq!(cluster.principals("cfgrs").await.len(), 1);
    }
}
