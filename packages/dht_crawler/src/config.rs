use std::time::Duration;

use krpc_encoding::NodeID;

use crate::errors::{Error, ErrorKind};

/// Default periodic sweep interval for transaction GC, bucket refresh, and
/// peer-store GC (spec §6 `CleanupPeriod`).
pub const DEFAULT_CLEANUP_PERIOD: Duration = Duration::from_secs(60);

/// Outgoing token-bucket refill, packets/sec (spec §6 `RateLimit`).
pub const DEFAULT_RATE_LIMIT: usize = 100;

/// Default routing-table capacity ceiling (spec §3 invariant (c)).
pub const DEFAULT_MAX_NODES: usize = 4000;

/// Default target peer count per `get_peers` lookup before it's considered
/// satisfied (spec §6 `NumTargetPeers`). Zero means "no early cutoff".
pub const DEFAULT_NUM_TARGET_PEERS: usize = 0;

/// Default bound on the application command queue (spec §9 "Open question":
/// the zero-buffer channel in the source is a test-only knob).
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

/// Default bound on the `peers_request_results` delivery channel (spec §9
/// "Peer list delivery channel" redesign: bounded, not the source's
/// unbounded footgun).
pub const DEFAULT_RESULTS_BUFFER: usize = 256;

/// Grace period `Stop()` waits for the writer queue to drain (spec §5).
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Node construction parameters (spec §6 "Config").
///
/// Built via `Config::default()` plus explicit setters, not a struct a
/// persistence collaborator mutates in place before `New` — that coupling
/// is the thing spec.md §9 flags for redesign.
#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub node_id: Option<NodeID>,
    pub dht_routers: Vec<String>,
    pub max_nodes: usize,
    pub num_target_peers: usize,
    pub cleanup_period: Duration,
    pub rate_limit: usize,
    pub command_buffer: usize,
    pub results_buffer: usize,
    pub shutdown_grace: Duration,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            port: 0,
            node_id: None,
            dht_routers: Vec::new(),
            max_nodes: DEFAULT_MAX_NODES,
            num_target_peers: DEFAULT_NUM_TARGET_PEERS,
            cleanup_period: DEFAULT_CLEANUP_PERIOD,
            rate_limit: DEFAULT_RATE_LIMIT,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            results_buffer: DEFAULT_RESULTS_BUFFER,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl Config {
    pub fn with_port(mut self, port: u16) -> Config {
        self.port = port;
        self
    }

    pub fn with_node_id(mut self, id: NodeID) -> Config {
        self.node_id = Some(id);
        self
    }

    pub fn with_dht_routers(mut self, routers: Vec<String>) -> Config {
        self.dht_routers = routers;
        self
    }

    pub fn with_max_nodes(mut self, max_nodes: usize) -> Config {
        self.max_nodes = max_nodes;
        self
    }

    pub fn with_num_target_peers(mut self, n: usize) -> Config {
        self.num_target_peers = n;
        self
    }

    pub fn with_rate_limit(mut self, packets_per_sec: usize) -> Config {
        self.rate_limit = packets_per_sec;
        self
    }

    /// Bounds the application command queue. `0` forces synchronous
    /// admission, matching the source test file's `make(chan ihReq, 0)`
    /// workaround (spec.md §9) — intended for tests, not production.
    pub fn command_buffer(mut self, n: usize) -> Config {
        self.command_buffer = n;
        self
    }

    pub fn validate(&self) -> std::result::Result<(), Error> {
        if self.rate_limit == 0 {
            return Err(ErrorKind::InvalidConfig {
                reason: "rate_limit must be nonzero".into(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_ephemeral_port() {
        let cfg = Config::default();
        assert_eq!(cfg.port, 0);
        assert!(cfg.node_id.is_none());
    }

    #[test]
    fn builders_round_trip() {
        let id = NodeID::random();
        let cfg = Config::default()
            .with_port(6060)
            .with_node_id(id)
            .with_num_target_peers(10);
        assert_eq!(cfg.port, 6060);
        assert_eq!(cfg.node_id, Some(id));
        assert_eq!(cfg.num_target_peers, 10);
    }
}
