impl SimState {
    fn create_collection(
        &mut self,
        router: &str,
        namespace: &str,
        validator: &Value,
    ) -> AdminResult<()> {
        self.router(router)?;
        if self.collections.contains_key(namespace) {
            return Err(AdminError::AlreadyExists(format!("collection {}", namespace)));
        }
        self.collections
            .insert(namespace.to_string(), SimCollection::new(validator.clone()));
        Ok(())
    }

    fn create_index(&mut self, router: &str, namespace: &str, index: &IndexSpec) -> AdminResult<()> {
        self.router(router)?;
        let collection = self
            .collections
            .get_mut(namespace)
            .ok_or_else(|| AdminError::Rejected(format!("namespace {} not found", namespace)))?;

        let name = index.effective_name();
        if let Some(existing) = collection.indexes.iter().find(|i| i.name == name) {
            if existing.keys == index.keys && existing.unique == index.unique {
                return Err(AdminError::AlreadyExists(format!("index {}", name)));
            }
            return Err(AdminError::Rejected(format!(
                "index '{}' already exists with a different key on {}",
                name, namespace
            )));
        }
        if collection.indexes.iter().any(|i| i.keys == index.keys) {
            return Err(AdminError::AlreadyExists(format!("index {}", name)));
        }

        collection.indexes.push(IndexInfo {
            name,
            keys: index.keys.clone(),
            unique: index.unique,
        });
        Ok(())
    }

    fn shard_collection(&mut self, router: &str, namespace: &str, key: &ShardKey) -> AdminResult<()> {
        self.router(router)?;
        let database = namespace.split('.').next().unwrap_or_default();
        if !self.sharded_databases.contains(database) {
            return Err(AdminError::Rejected(format!(
                "sharding is not enabled for database '{}'",
                database
            )));
        }
        if self.shards.is_empty() {
            return Err(AdminError::OperationFailed(
                "no shards are registered with the routing tier".to_string(),
            ));
        }

        let collection = self
            .collections
            .get_mut(namespace)
            .ok_or_else(|| AdminError::Rejected(format!("namespace {} not found", namespace)))?;
        if let Some(existing) = &collection.shard_key {
            if existing == key {
                return Err(AdminError::AlreadyExists(format!("sharded collection {}", namespace)));
            }
            return Err(AdminError::Rejected(format!(
                "{} is already sharded with a different key",
                namespace
            )));
        }
        if !collection.indexes.iter().any(|i| key.is_prefix_of(&i.keys)) {
            return Err(AdminError::Rejected(format!(
                "please create an index that starts with the shard key before sharding {}",
                namespace
            )));
        }

        collection.shard_key = Some(key.clone());
        Ok(())
    }
}
