use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters exported for observability (spec §6). Mirrors the
/// `get_stats()` snapshot shape used by other DHT crawlers in the reference
/// pack rather than anything the teacher repo had.
#[derive(Default)]
pub struct Counters {
    total_nodes_reached: AtomicU64,
    total_get_peers_dupes: AtomicU64,
    total_find_node_dupes: AtomicU64,
    total_peers: AtomicU64,
    total_sent_find_node: AtomicU64,
    total_sent_get_peers: AtomicU64,
}

/// Point-in-time snapshot of `Counters`, safe to hand to callers without
/// exposing the atomics themselves.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    pub total_nodes_reached: u64,
    pub total_get_peers_dupes: u64,
    pub total_find_node_dupes: u64,
    pub total_peers: u64,
    pub total_sent_find_node: u64,
    pub total_sent_get_peers: u64,
}

impl Counters {
    pub fn new() -> Counters {
        Counters::default()
    }

    pub fn node_reached(&self) {
        self.total_nodes_reached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_peers_dupe(&self) {
        self.total_get_peers_dupes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn find_node_dupe(&self) {
        self.total_find_node_dupes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn peer_delivered(&self) {
        self.total_peers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent_find_node(&self) {
        self.total_sent_find_node.fetch_add(1, Ordering::Relaxed);
    }

    pub fn sent_get_peers(&self) {
        self.total_sent_get_peers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> Stats {
        Stats {
            total_nodes_reached: self.total_nodes_reached.load(Ordering::Relaxed),
            total_get_peers_dupes: self.total_get_peers_dupes.load(Ordering::Relaxed),
            total_find_node_dupes: self.total_find_node_dupes.load(Ordering::Relaxed),
            total_peers: self.total_peers.load(Ordering::Relaxed),
            total_sent_find_node: self.total_sent_find_node.load(Ordering::Relaxed),
            total_sent_get_peers: self.total_sent_get_peers.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_into_snapshot() {
        let counters = Counters::new();
        counters.node_reached();
        counters.node_reached();
        counters.sent_get_peers();
        let snap = counters.snapshot();
        assert_eq!(snap.total_nodes_reached, 2);
        assert_eq!(snap.total_sent_get_peers, 1);
        assert_eq!(snap.total_peers, 0);
    }
}
