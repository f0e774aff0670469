use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use krpc_encoding::NodeID;

use crate::contact::{Contact, Reachability};

/// Bucket width (K in the glossary).
pub const K: usize = 8;

/// An ordered list of up to `K` contacts sharing a common id-prefix with
/// the local id. Contacts are distinct by `(ip, port)` and by `NodeID`
/// (spec §3 "Bucket" invariant).
#[derive(Debug)]
pub struct Bucket {
    contacts: Vec<Contact>,
    last_changed: DateTime<Utc>,
}

impl Bucket {
    pub fn new() -> Bucket {
        Bucket {
            contacts: Vec::with_capacity(K),
            last_changed: Utc::now(),
        }
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.contacts.len() >= K
    }

    pub fn last_changed(&self) -> DateTime<Utc> {
        self.last_changed
    }

    pub fn touch(&mut self) {
        self.last_changed = Utc::now();
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn contacts_mut(&mut self) -> &mut [Contact] {
        &mut self.contacts
    }

    pub fn get(&self, id: &NodeID) -> Option<&Contact> {
        self.contacts.iter().find(|c| &c.id == id)
    }

    pub fn get_mut(&mut self, id: &NodeID) -> Option<&mut Contact> {
        self.contacts.iter_mut().find(|c| &c.id == id)
    }

    pub fn get_by_addr_mut(&mut self, addr: &SocketAddr) -> Option<&mut Contact> {
        self.contacts.iter_mut().find(|c| &c.addr == addr)
    }

    pub fn contains_addr(&self, addr: &SocketAddr) -> bool {
        self.contacts.iter().any(|c| &c.addr == addr)
    }

    /// Appends a contact to a bucket known to have room. Caller must have
    /// already checked `!is_full()` and de-duplicated by id/addr.
    pub fn push(&mut self, contact: Contact) {
        self.contacts.push(contact);
        self.touch();
    }

    /// Index of the least-recently-seen contact whose status is `Bad`.
    pub fn least_recently_seen_bad(&self, t_good: Duration) -> Option<usize> {
        self.contacts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status(t_good) == Reachability::Bad)
            .min_by_key(|(_, c)| c.last_seen())
            .map(|(idx, _)| idx)
    }

    /// Index of the least-recently-seen contact whose status is
    /// `Questionable`.
    pub fn least_recently_seen_questionable(&self, t_good: Duration) -> Option<usize> {
        self.contacts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status(t_good) == Reachability::Questionable)
            .min_by_key(|(_, c)| c.last_seen())
            .map(|(idx, _)| idx)
    }

    /// Replaces the contact at `idx` with `replacement`, keeping the
    /// bucket's length constant.
    pub fn replace_at(&mut self, idx: usize, replacement: Contact) {
        self.contacts[idx] = replacement;
        self.touch();
    }

    pub fn remove_at(&mut self, idx: usize) -> Contact {
        let contact = self.contacts.remove(idx);
        self.touch();
        contact
    }

    /// Least-recently-seen bad-or-questionable contact in the bucket, used
    /// by the table-wide eviction policy (spec §3 routing table invariant
    /// (c)).
    pub fn least_recently_seen_evictable(&self, t_good: Duration) -> Option<usize> {
        self.contacts
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status(t_good) != Reachability::Good)
            .min_by_key(|(_, c)| c.last_seen())
            .map(|(idx, _)| idx)
    }
}

impl Default for Bucket {
    fn default() -> Bucket {
        Bucket::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact() -> Contact {
        Contact::new(NodeID::random(), "127.0.0.1:6881".parse().unwrap())
    }

    #[test]
    fn fills_to_k() {
        let mut bucket = Bucket::new();
        for _ in 0..K {
            bucket.push(contact());
        }
        assert!(bucket.is_full());
    }

    #[test]
    fn no_bad_or_questionable_contacts_means_no_evictable() {
        let mut bucket = Bucket::new();
        for _ in 0..K {
            bucket.push(contact());
        }
        assert_eq!(
            bucket.least_recently_seen_evictable(Duration::from_secs(900)),
            None
        );
    }
}
