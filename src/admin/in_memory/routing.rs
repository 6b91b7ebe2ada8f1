impl SimState {
    /// Checks that `router` is reachable and can reach the config tier.
    fn router(&mut self, router: &str) -> AdminResult<()> {
        if !self.routers.get(router).copied().unwrap_or(false) {
            return Err(AdminError::Unreachable(router.to_string()));
        }
        if self.config_primary().is_none() {
            return Err(AdminError::OperationFailed(format!(
                "router '{}' cannot reach a config server primary",
                router
            )));
        }
        Ok(())
    }

    fn add_shard(&mut self, router: &str, group_id: &str, hosts: &[String]) -> AdminResult<()> {
        self.router(router)?;

        let group = self.groups.get(group_id).ok_or_else(|| {
            AdminError::OperationFailed(format!(
                "could not find a reachable host for replica group '{}'",
                group_id
            ))
        })?;
        if group.config_server {
            return Err(AdminError::Rejected(format!(
                "'{}' is a config server group and cannot be added as a shard",
                group_id
            )));
        }
        let declared = group
            .members
            .iter()
            .map(|m| m.host.as_str())
            .collect::<BTreeSet<_>>();
        let requested = hosts.iter().map(|h| h.as_str()).collect::<BTreeSet<_>>();
        if declared != requested {
            return Err(AdminError::Rejected(format!(
                "host list for '{}' does not match the replica group configuration",
                group_id
            )));
        }

        if let Some(existing) = self.shards.iter().find(|s| s.id == group_id) {
            let existing_hosts = existing
                .hosts
                .iter()
                .map(|h| h.as_str())
                .collect::<BTreeSet<_>>();
            if existing_hosts == requested {
                return Err(AdminError::AlreadyExists(format!("shard {}", group_id)));
            }
            return Err(AdminError::Rejected(format!(
                "shard '{}' is already registered with different hosts",
                group_id
            )));
        }

        if self.group_primary(group_id).is_none() {
            return Err(AdminError::OperationFailed(format!(
                "replica group '{}' has no primary yet",
                group_id
            )));
        }

        self.shards.push(RegisteredShard {
            id: group_id.to_string(),
            hosts: hosts.to_vec(),
        });
        Ok(())
    }

    fn balancer_start(&mut self, router: &str) -> AdminResult<()> {
        self.router(router)?;
        if !self.balancer.enabled {
            self.balancer.enabled = true;
            self.balancer_pending = true;
        }
        Ok(())
    }

    fn balancer_status(&mut self, router: &str) -> AdminResult<BalancerStatus> {
        self.router(router)?;
        let status = self.balancer;
        if self.balancer.enabled && self.balancer_pending && !self.balancer_stalled {
            self.balancer.running = true;
            self.balancer_pending = false;
        }
        Ok(status)
    }

    fn balancer_force_round(&mut self, router: &str) -> AdminResult<()> {
        self.router(router)?;
        if !self.balancer.enabled {
            return Err(AdminError::Rejected("balancer is disabled".to_string()));
        }
        self.balancer_rounds = self.balancer_rounds.saturating_add(1);
        Ok(())
    }
}
