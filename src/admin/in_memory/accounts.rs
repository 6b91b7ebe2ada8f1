impl SimState {
    fn find_principal(
        &mut self,
        node: &str,
        database: &str,
        username: &str,
    ) -> AdminResult<Option<PrincipalRecord>> {
        let group_id = self.group_of(node)?;
        Ok(self
            .principals
            .get(&principal_key(&group_id, database, username))
            .map(|principal| principal.record.clone()))
    }

    fn create_principal(&mut self, node: &str, spec: &PrincipalSpec) -> AdminResult<()> {
        let group_id = self.group_of(node)?;
        if self.group_primary(&group_id).as_deref() != Some(node) {
            return Err(AdminError::NotPrimary(node.to_string()));
        }

        let key = principal_key(&group_id, &spec.database, &spec.username);
        if self.principals.contains_key(&key) {
            return Err(AdminError::AlreadyExists(format!(
                "{}@{}",
                spec.username, spec.database
            )));
        }

        let secret_hash = hash_secret(spec.secret.expose())?;
        self.principals.insert(
            key,
            SimPrincipal {
                record: PrincipalRecord {
                    username: spec.username.clone(),
                    database: spec.database.clone(),
                    role: spec.role.clone(),
                },
                secret_hash,
            },
        );
        Ok(())
    }
}
