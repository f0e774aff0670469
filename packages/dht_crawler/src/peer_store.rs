use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use krpc_encoding::NodeID;

/// Per-infohash cap on stored peer hints (spec §4.4).
pub const MAX_PEERS_PER_INFOHASH: usize = 256;

/// Default eviction age for a peer hint with no re-announcement (spec §4.4
/// `T_peer_stale`).
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30 * 60);

struct StoredPeer {
    addr: SocketAddr,
    last_announced: Instant,
}

/// Ephemeral infohash → recently-announced peer set. Authoritative only for
/// peers that explicitly announced to this node (spec §4.4) — distinct from
/// the candidates a `get_peers` lookup gathers from other nodes' responses.
pub struct PeerStore {
    by_infohash: HashMap<NodeID, VecDeque<StoredPeer>>,
    cap: usize,
    stale_after: Duration,
}

impl PeerStore {
    pub fn new() -> PeerStore {
        PeerStore {
            by_infohash: HashMap::new(),
            cap: MAX_PEERS_PER_INFOHASH,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> PeerStore {
        self.stale_after = stale_after;
        self
    }

    /// Records an `announce_peer`. Re-announcing an already-stored peer
    /// refreshes its age rather than duplicating the entry.
    pub fn announce(&mut self, info_hash: NodeID, addr: SocketAddr) {
        let now = Instant::now();
        let peers = self.by_infohash.entry(info_hash).or_insert_with(VecDeque::new);

        if let Some(existing) = peers.iter_mut().find(|p| p.addr == addr) {
            existing.last_announced = now;
            return;
        }

        if peers.len() >= self.cap {
            peers.pop_front();
        }
        peers.push_back(StoredPeer {
            addr,
            last_announced: now,
        });
    }

    /// Peers on file for `info_hash`, most-recently-announced first.
    pub fn get(&self, info_hash: &NodeID) -> Vec<SocketAddr> {
        match self.by_infohash.get(info_hash) {
            Some(peers) => peers.iter().rev().map(|p| p.addr).collect(),
            None => Vec::new(),
        }
    }

    /// Drops peer hints older than `stale_after` and any infohash left with
    /// no peers (spec §4.4 stale-eviction sweep, driven by the event loop's
    /// `CleanupPeriod` timer).
    pub fn gc(&mut self) {
        let now = Instant::now();
        let stale_after = self.stale_after;
        self.by_infohash.retain(|_, peers| {
            peers.retain(|p| now.duration_since(p.last_announced) < stale_after);
            !peers.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.by_infohash.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PeerStore {
    fn default() -> PeerStore {
        PeerStore::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn announce_then_get_round_trips() {
        let mut store = PeerStore::new();
        let ih = NodeID::random();
        store.announce(ih, addr(6881));
        assert_eq!(store.get(&ih), vec![addr(6881)]);
    }

    #[test]
    fn reannouncing_does_not_duplicate() {
        let mut store = PeerStore::new();
        let ih = NodeID::random();
        store.announce(ih, addr(6881));
        store.announce(ih, addr(6881));
        assert_eq!(store.get(&ih).len(), 1);
    }

    #[test]
    fn fifo_eviction_past_cap() {
        let mut store = PeerStore::new();
        let ih = NodeID::random();
        for port in 0..(MAX_PEERS_PER_INFOHASH as u16 + 10) {
            store.announce(ih, addr(7000 + port));
        }
        assert_eq!(store.get(&ih).len(), MAX_PEERS_PER_INFOHASH);
        // the earliest announced peers were evicted first.
        assert!(!store.get(&ih).contains(&addr(7000)));
    }

    #[test]
    fn gc_drops_stale_entries() {
        let mut store = PeerStore::new().with_stale_after(Duration::from_millis(0));
        let ih = NodeID::random();
        store.announce(ih, addr(6881));
        std::thread::sleep(Duration::from_millis(5));
        store.gc();
        assert!(store.get(&ih).is_empty());
        assert!(store.is_empty());
    }
}
