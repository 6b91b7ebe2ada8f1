/// bcrypt cost for simulated accounts; production clusters hash on their side.
const SIMULATED_HASH_COST: u32 = 4;

/// A simulated data node.
#[derive(Debug, Clone)]
struct SimNode {
    up: bool,
    group: Option<String>,
}

impl SimNode {
    fn up() -> Self {
        Self {
            up: true,
            group: None,
        }
    }
}

#[derive(Debug, Clone)]
struct SimGroup {
    config_server: bool,
    members: Vec<InitiationMember>,
    primary: Option<String>,
    /// Status probes left before an election completes.
    election_countdown: u32,
}

#[derive(Debug, Clone)]
struct SimPrincipal {
    record: PrincipalRecord,
    secret_hash: String,
}

#[derive(Debug, Clone)]
struct SimCollection {
    validator: Value,
    indexes: Vec<IndexInfo>,
    shard_key: Option<ShardKey>,
}

impl SimCollection {
    fn new(validator: Value) -> Self {
        Self {
            validator,
            indexes: vec![IndexInfo {
                name: "_id_".to_string(),
                keys: vec![KeyPart::asc("_id")],
                unique: true,
            }],
            shard_key: None,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    nodes: HashMap<String, SimNode>,
    routers: HashMap<String, bool>,
    groups: BTreeMap<String, SimGroup>,
    principals: HashMap<(String, String, String), SimPrincipal>,
    shards: Vec<RegisteredShard>,
    sharded_databases: BTreeSet<String>,
    collections: BTreeMap<String, SimCollection>,
    balancer: BalancerStatus,
    balancer_pending: bool,
    balancer_stalled: bool,
    balancer_rounds: u32,
    election_delay: u32,
    faults: HashMap<AdminOp, u32>,
    calls: HashMap<AdminOp, u32>,
}

fn principal_key(group_id: &str, database: &str, username: &str) -> (String, String, String) {
    (
        group_id.to_string(),
        database.to_string(),
        username.to_string(),
    )
}

fn hash_secret(secret: &str) -> AdminResult<String> {
    bcrypt::hash(secret, SIMULATED_HASH_COST)
        .map_err(|err| AdminError::OperationFailed(format!("Failed to hash secret: {}", err)))
}

fn verify_secret(secret: &str, hash: &str) -> bool {
    bcrypt::verify(secret, hash).unwrap_or(false)
}

impl SimState {
    /// Looks up a reachable data node.
    fn node(&self, host: &str) -> AdminResult<&SimNode> {
        match self.nodes.get(host) {
            Some(node) if node.up => Ok(node),
            _ => Err(AdminError::Unreachable(host.to_string())),
        }
    }

    /// Group id of a reachable, initialized node.
    fn group_of(&self, host: &str) -> AdminResult<String> {
        self.node(host)?
            .group
            .clone()
            .ok_or_else(|| AdminError::NotInitialized(host.to_string()))
    }

    fn is_up(&self, host: &str) -> bool {
        self.nodes.get(host).map(|node| node.up).unwrap_or(false)
    }
}
