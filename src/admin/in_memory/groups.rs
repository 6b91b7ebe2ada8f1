impl SimState {
    fn initiate(&mut self, seed: &str, request: &GroupInitiation) -> AdminResult<()> {
        let seed_node = self.node(seed)?;
        if !request.members.iter().any(|m| m.host == seed) {
            return Err(AdminError::Rejected(format!(
                "seed '{}' is not a member of replica group '{}'",
                seed, request.group_id
            )));
        }

        if let Some(existing) = seed_node.group.clone() {
            return match self.groups.get(&existing) {
                Some(group) if existing == request.group_id && same_hosts(&group.members, &request.members) => {
                    Err(AdminError::AlreadyInitialized(existing))
                }
                _ => Err(AdminError::Rejected(format!(
                    "node '{}' already belongs to replica group '{}' with a different configuration",
                    seed, existing
                ))),
            };
        }

        for member in &request.members {
            if let Some(other) = self.nodes.get(&member.host).and_then(|n| n.group.as_ref()) {
                return Err(AdminError::Rejected(format!(
                    "member '{}' already belongs to replica group '{}'",
                    member.host, other
                )));
            }
        }

        let reachable = request
            .members
            .iter()
            .filter(|m| self.is_up(&m.host))
            .count();
        let majority = request.members.len() / 2 + 1;
        if reachable < majority {
            return Err(AdminError::OperationFailed(format!(
                "quorum check failed for '{}': {} of {} members reachable",
                request.group_id,
                reachable,
                request.members.len()
            )));
        }

        self.form_group(request);
        Ok(())
    }

    fn form_group(&mut self, request: &GroupInitiation) {
        for member in &request.members {
            self.nodes
                .entry(member.host.clone())
                .or_insert_with(SimNode::up)
                .group = Some(request.group_id.clone());
        }
        self.groups.insert(
            request.group_id.clone(),
            SimGroup {
                config_server: request.config_server,
                members: request.members.clone(),
                primary: None,
                election_countdown: self.election_delay,
            },
        );
    }

    /// Advances the election state of a group by one observation.
    fn observe_group(&mut self, group_id: &str) {
        let up_hosts = self
            .nodes
            .iter()
            .filter(|(_, node)| node.up)
            .map(|(host, _)| host.clone())
            .collect::<BTreeSet<_>>();
        let election_delay = self.election_delay;
        let Some(group) = self.groups.get_mut(group_id) else {
            return;
        };

        if let Some(primary) = &group.primary {
            if up_hosts.contains(primary) {
                return;
            }
            group.primary = None;
            group.election_countdown = election_delay;
        }

        if group.election_countdown > 0 {
            group.election_countdown -= 1;
            return;
        }

        let mut candidates = group
            .members
            .iter()
            .filter(|m| m.priority > 0 && up_hosts.contains(&m.host))
            .collect::<Vec<_>>();
        candidates.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        group.primary = candidates.first().map(|m| m.host.clone());
    }

    fn group_status(&mut self, node: &str) -> AdminResult<GroupStatusReport> {
        let group_id = self.group_of(node)?;
        self.observe_group(&group_id);
        let group = self
            .groups
            .get(&group_id)
            .ok_or_else(|| AdminError::NotInitialized(node.to_string()))?;

        let members = group
            .members
            .iter()
            .map(|m| {
                let state = if !self.is_up(&m.host) {
                    MemberState::Unreachable
                } else if group.primary.as_deref() == Some(m.host.as_str()) {
                    MemberState::Primary
                } else if group.primary.is_some() {
                    MemberState::Secondary
                } else {
                    MemberState::Startup
                };
                MemberStatus {
                    host: m.host.clone(),
                    state,
                }
            })
            .collect();

        Ok(GroupStatusReport {
            group_id,
            config_server: group.config_server,
            members,
        })
    }

    fn node_role(&mut self, node: &str) -> AdminResult<NodeRole> {
        let group_id = self.node(node)?.group.clone();
        let is_primary = match &group_id {
            Some(id) => {
                self.observe_group(id);
                self.groups
                    .get(id)
                    .and_then(|g| g.primary.as_deref())
                    .map(|primary| primary == node)
                    .unwrap_or(false)
            }
            None => false,
        };
        Ok(NodeRole {
            host: node.to_string(),
            group_id,
            is_primary,
        })
    }

    /// Primary host of the config tier, if it has one right now.
    fn config_primary(&mut self) -> Option<String> {
        let config_id = self
            .groups
            .iter()
            .find(|(_, group)| group.config_server)
            .map(|(id, _)| id.clone())?;
        self.observe_group(&config_id);
        self.groups.get(&config_id).and_then(|g| g.primary.clone())
    }

    /// Primary host of a group, if it has one right now.
    fn group_primary(&mut self, group_id: &str) -> Option<String> {
        self.observe_group(group_id);
        self.groups.get(group_id).and_then(|g| g.primary.clone())
    }
}

fn same_hosts(left: &[InitiationMember], right: &[InitiationMember]) -> bool {
    let left = left.iter().map(|m| m.host.as_str()).collect::<BTreeSet<_>>();
    let right = right.iter().map(|m| m.host.as_str()).collect::<BTreeSet<_>>();
    left == right
}
