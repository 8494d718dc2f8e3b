use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Grace period a finished run stays queryable before it becomes eligible
/// for eviction.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_secs(2 * 60);

/// Upper bound on concurrently executing asynchronous runs.
pub const DEFAULT_WORKER_POOL_SIZE: usize = 8;

/// How long a cluster-wide fan-out waits for a candidate before giving up
/// on it.
pub const DEFAULT_FANOUT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address other nodes and clients use to reach this node. Also the
    /// key embedded in every status record's sub-resource paths.
    pub node_addr: String,
    /// Address the gRPC server binds to.
    pub listen_addr: SocketAddr,
    /// Directory script identifiers resolve against.
    pub scripts_root: PathBuf,
    /// Candidate set for cluster-wide requests. Empty means this node
    /// serves everything locally.
    pub peers: Vec<PeerConfig>,
    pub grace_window: Duration,
    pub worker_pool_size: usize,
    pub fanout_timeout: Duration,
}

/// One remote endpoint believed to offer the script service.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// host:port, supports both IP addresses and hostnames.
    pub addr: String,
    /// Target groups this peer serves. Empty means every group.
    pub groups: Vec<String>,
}

impl PeerConfig {
    pub fn serves_group(&self, group: Option<&str>) -> bool {
        match group {
            None => true,
            Some(g) => self.groups.is_empty() || self.groups.iter().any(|x| x == g),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            node_addr: "127.0.0.1:50051".to_string(),
            listen_addr: "127.0.0.1:50051"
                .parse()
                .expect("default listen address is valid"),
            scripts_root: PathBuf::from("scripts"),
            peers: Vec::new(),
            grace_window: DEFAULT_GRACE_WINDOW,
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            fanout_timeout: DEFAULT_FANOUT_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    pub fn new(node_addr: impl Into<String>, listen_addr: SocketAddr) -> Self {
        Self {
            node_addr: node_addr.into(),
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_peer(mut self, addr: impl Into<String>, groups: Vec<String>) -> Self {
        self.peers.push(PeerConfig {
            addr: addr.into(),
            groups,
        });
        self
    }

    /// Addresses of peers serving the given target group.
    pub fn candidates(&self, group: Option<&str>) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| p.serves_group(group))
            .map(|p| p.addr.clone())
            .collect()
    }
}
