use std::net::SocketAddr;
use std::time::Duration;

use rand::Rng;

use krpc_encoding::NodeID;

use crate::bucket::{Bucket, K};
use crate::contact::Contact;
use crate::distance::Distance;

pub const NUM_BUCKETS: usize = 160;

/// Default freshness window after which a contact becomes `questionable`
/// with no traffic (spec §3 "Contact").
pub const DEFAULT_T_GOOD: Duration = Duration::from_secs(15 * 60);

/// Default bucket-refresh period (spec §4.3 "Refresh policy").
pub const DEFAULT_T_BUCKET: Duration = Duration::from_secs(15 * 60);

/// Outcome of `RoutingTable::insert`.
#[derive(Debug)]
pub enum InsertOutcome {
    /// The contact's id equals the local id; never stored (spec §3 invariant (a)).
    IsLocal,
    /// A contact with this id already existed; its freshness was refreshed.
    Refreshed,
    /// The bucket had room; the contact was appended.
    Added,
    /// The bucket was full but held a `bad` contact, which was replaced.
    ReplacedBad,
    /// The bucket is full of `good`/`questionable` contacts; the caller
    /// must ping `probe_addr` and report back via `RoutingTable::resolve_probe`.
    NeedsProbe {
        bucket_idx: usize,
        probe_idx: usize,
        probe_addr: SocketAddr,
        candidate: Contact,
    },
    /// The bucket is full of `good` contacts; the candidate is discarded
    /// (spec §4.3 step 3: no splitting).
    Discarded,
}

/// Fixed-depth, 160-bucket Kademlia routing table. Buckets are never split
/// (spec REDESIGN FLAG): the lookup layer compensates by sampling across
/// prefixes rather than the table growing unboundedly narrow.
pub struct RoutingTable {
    local_id: NodeID,
    buckets: Vec<Bucket>,
    t_good: Duration,
    t_bucket: Duration,
    max_nodes: usize,
}

impl RoutingTable {
    pub fn new(local_id: NodeID, max_nodes: usize) -> RoutingTable {
        let mut buckets = Vec::with_capacity(NUM_BUCKETS);
        buckets.resize_with(NUM_BUCKETS, Bucket::new);
        RoutingTable {
            local_id,
            buckets,
            t_good: DEFAULT_T_GOOD,
            t_bucket: DEFAULT_T_BUCKET,
            max_nodes,
        }
    }

    pub fn with_periods(mut self, t_good: Duration, t_bucket: Duration) -> RoutingTable {
        self.t_good = t_good;
        self.t_bucket = t_bucket;
        self
    }

    pub fn local_id(&self) -> NodeID {
        self.local_id
    }

    pub fn t_good(&self) -> Duration {
        self.t_good
    }

    /// Position (0..160) of the highest-order bit set in `id ^ local_id`.
    /// `None` when `id == local_id` (spec §3: "ids equal to local reside in
    /// no bucket").
    pub fn bucket_index(&self, id: &NodeID) -> Option<usize> {
        self.local_id.differing_bit(id)
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket(&self, idx: usize) -> &Bucket {
        &self.buckets[idx]
    }

    /// Inserts or refreshes a contact. The caller must follow up on
    /// `InsertOutcome::NeedsProbe` by pinging `probe_addr` and calling
    /// `resolve_probe`; this type has no I/O of its own.
    pub fn insert(&mut self, id: NodeID, addr: SocketAddr) -> InsertOutcome {
        let bucket_idx = match self.bucket_index(&id) {
            Some(idx) => idx,
            None => return InsertOutcome::IsLocal,
        };

        let bucket = &mut self.buckets[bucket_idx];

        if let Some(existing) = bucket.get_mut(&id) {
            existing.mark_responded();
            existing.addr = addr;
            return InsertOutcome::Refreshed;
        }

        // An address rebind (same ip:port, new id) replaces the stale entry
        // outright rather than competing for probe slots.
        if let Some(stale_idx) = bucket
            .contacts()
            .iter()
            .position(|c| c.addr == addr && c.id != id)
        {
            bucket.replace_at(stale_idx, Contact::new(id, addr));
            return InsertOutcome::Added;
        }

        if !bucket.is_full() {
            bucket.push(Contact::new(id, addr));
            return InsertOutcome::Added;
        }

        if let Some(idx) = bucket.least_recently_seen_bad(self.t_good) {
            bucket.replace_at(idx, Contact::new(id, addr));
            return InsertOutcome::ReplacedBad;
        }

        if let Some(idx) = bucket.least_recently_seen_questionable(self.t_good) {
            let probe_addr = bucket.contacts()[idx].addr;
            return InsertOutcome::NeedsProbe {
                bucket_idx,
                probe_idx: idx,
                probe_addr,
                candidate: Contact::new(id, addr),
            };
        }

        InsertOutcome::Discarded
    }

    /// Resolves an `InsertOutcome::NeedsProbe`: on probe success the
    /// incumbent is refreshed and the candidate discarded; on failure the
    /// incumbent is replaced.
    pub fn resolve_probe(
        &mut self,
        bucket_idx: usize,
        probe_idx: usize,
        success: bool,
        candidate: Contact,
    ) {
        let bucket = &mut self.buckets[bucket_idx];
        if probe_idx >= bucket.len() {
            return;
        }
        if success {
            if let Some(contact) = bucket.contacts_mut().get_mut(probe_idx) {
                contact.mark_responded();
            }
        } else {
            bucket.replace_at(probe_idx, candidate);
        }
    }

    /// Enforces the table-wide `MaxNodes` ceiling (spec §3 invariant (c)):
    /// evicts the least-recently-seen non-good contact in the most
    /// populated bucket.
    pub fn enforce_capacity(&mut self) {
        while self.len() > self.max_nodes {
            let (fullest_idx, _) = self
                .buckets
                .iter()
                .enumerate()
                .max_by_key(|(_, b)| b.len())
                .expect("routing table always has buckets");

            let evictable = self.buckets[fullest_idx].least_recently_seen_evictable(self.t_good);
            match evictable {
                Some(idx) => {
                    self.buckets[fullest_idx].remove_at(idx);
                }
                None => break, // every contact is good; nothing safe to evict.
            }
        }
    }

    pub fn mark_query_sent(&mut self, id: &NodeID) {
        if let Some(idx) = self.bucket_index(id) {
            if let Some(c) = self.buckets[idx].get_mut(id) {
                c.mark_query_sent();
            }
        }
    }

    pub fn mark_timeout(&mut self, id: &NodeID) {
        if let Some(idx) = self.bucket_index(id) {
            if let Some(c) = self.buckets[idx].get_mut(id) {
                c.mark_timeout();
            }
        }
    }

    pub fn mark_bad(&mut self, id: &NodeID) {
        if let Some(idx) = self.bucket_index(id) {
            if let Some(c) = self.buckets[idx].get_mut(id) {
                c.mark_bad();
            }
        }
    }

    /// The `k` contacts closest to `target`, merging buckets in order of
    /// bucket-index distance to the target's own bucket and breaking ties
    /// in XOR distance by lowest-ip-then-port (spec §4.3 "Lookup").
    pub fn find_closest(&self, target: &NodeID, k: usize) -> Vec<Contact> {
        let target_bucket = self.bucket_index(target).unwrap_or(NUM_BUCKETS - 1) as i64;
        let mut order: Vec<usize> = (0..NUM_BUCKETS).collect();
        order.sort_by_key(|&idx| (idx as i64 - target_bucket).abs());

        let mut collected: Vec<Contact> = Vec::with_capacity(k * 2);
        for idx in order {
            collected.extend(self.buckets[idx].contacts().iter().cloned());
            if collected.len() >= k {
                break;
            }
        }

        collected.sort_by(|a, b| {
            let da = Distance::between(target, &a.id);
            let db = Distance::between(target, &b.id);
            da.cmp(&db).then_with(|| addr_key(&a.addr).cmp(&addr_key(&b.addr)))
        });
        collected.truncate(k);
        collected
    }

    /// Bucket indices untouched for at least `t_bucket`.
    pub fn stale_buckets(&self) -> Vec<usize> {
        let now = chrono::Utc::now();
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| {
                now.signed_duration_since(b.last_changed())
                    .to_std()
                    .map(|age| age >= self.t_bucket)
                    .unwrap_or(false)
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn touch_bucket(&mut self, idx: usize) {
        self.buckets[idx].touch();
    }

    /// A random id whose path to the root differs from the local id at
    /// exactly bit `idx`, i.e. a valid refresh target for that bucket.
    pub fn random_id_for_bucket(&self, idx: usize) -> NodeID {
        let local = self.local_id.as_bytes();
        let mut out = [0u8; 20];
        let mut rng = rand::thread_rng();

        for bit_pos in 0..NUM_BUCKETS {
            let byte_idx = 19 - bit_pos / 8;
            let bit_in_byte = bit_pos % 8;
            let local_bit = (local[byte_idx] >> bit_in_byte) & 1;

            let bit_value = match bit_pos.cmp(&idx) {
                std::cmp::Ordering::Greater => local_bit,
                std::cmp::Ordering::Equal => 1 - local_bit,
                std::cmp::Ordering::Less => rng.gen_range(0..=1u8),
            };

            if bit_value == 1 {
                out[byte_idx] |= 1 << bit_in_byte;
            }
        }

        NodeID::new(out)
    }
}

fn addr_key(addr: &SocketAddr) -> (std::net::IpAddr, u16) {
    (addr.ip(), addr.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> RoutingTable {
        RoutingTable::new(NodeID::random(), 1000)
    }

    #[test]
    fn local_id_never_inserted() {
        let local = NodeID::random();
        let mut t = RoutingTable::new(local, 1000);
        let outcome = t.insert(local, "127.0.0.1:6881".parse().unwrap());
        assert!(matches!(outcome, InsertOutcome::IsLocal));
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn bucket_index_matches_differing_bit() {
        let t = table();
        let other = NodeID::random();
        assert_eq!(t.bucket_index(&other), t.local_id().differing_bit(&other));
    }

    #[test]
    fn inserted_contact_lands_in_its_own_bucket_index() {
        let mut t = table();
        let id = NodeID::random();
        let addr = "127.0.0.1:6881".parse().unwrap();
        t.insert(id, addr);
        let idx = t.bucket_index(&id).unwrap();
        assert!(t.bucket(idx).get(&id).is_some());
    }

    #[test]
    fn bucket_overflow_with_all_good_discards_candidate() {
        let local = NodeID::new([0u8; 20]);
        let mut t = RoutingTable::new(local, 1000);

        // Craft K ids that collide in the same bucket (bit 0 set, rest 0)
        // by toggling spare low bits that don't affect the differing-bit
        // position against an all-zero local id.
        let mut filled = Vec::new();
        for i in 0..K {
            let mut bytes = [0u8; 20];
            bytes[19] = 0b0000_0001 | ((i as u8) << 1);
            let id = NodeID::new(bytes);
            let addr: SocketAddr = format!("127.0.0.{}:6881", i + 1).parse().unwrap();
            t.insert(id, addr);
            filled.push(id);
        }

        let idx = t.bucket_index(&filled[0]).unwrap();
        assert_eq!(t.bucket(idx).len(), K);

        let mut extra_bytes = [0u8; 20];
        extra_bytes[19] = 0b0000_0001 | (200u8 << 1);
        let extra_id = NodeID::new(extra_bytes);
        let outcome = t.insert(extra_id, "127.0.0.200:6881".parse().unwrap());
        assert!(matches!(outcome, InsertOutcome::Discarded));
        assert_eq!(t.bucket(idx).len(), K);
    }

    #[test]
    fn find_closest_returns_sorted_by_distance() {
        let mut t = table();
        let target = NodeID::random();
        for i in 0..20u8 {
            let id = NodeID::random();
            let addr: SocketAddr = format!("127.0.0.1:{}", 7000 + i as u16).parse().unwrap();
            t.insert(id, addr);
        }
        let closest = t.find_closest(&target, 8);
        assert!(closest.len() <= 8);
        for pair in closest.windows(2) {
            let d0 = Distance::between(&target, &pair[0].id);
            let d1 = Distance::between(&target, &pair[1].id);
            assert!(d0 <= d1);
        }
    }
}
