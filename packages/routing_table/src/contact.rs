use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};

use krpc_encoding::NodeID;

/// A contact's reachability, as judged from traffic recency and probe
/// outcomes (spec §3 "Contact").
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Reachability {
    Good,
    Questionable,
    Bad,
}

/// An observed remote node: id, address, freshness, and in-flight query
/// bookkeeping.
#[derive(Clone, Debug)]
pub struct Contact {
    pub id: NodeID,
    pub addr: SocketAddr,
    last_responded: Option<DateTime<Utc>>,
    last_seen: DateTime<Utc>,
    outstanding_queries: u32,
    forced_questionable: bool,
    probe_failed: bool,
}

impl Contact {
    /// Builds a contact freshly observed as the source or subject of a
    /// message; it starts out `good`.
    pub fn new(id: NodeID, addr: SocketAddr) -> Contact {
        let now = Utc::now();
        Contact {
            id,
            addr,
            last_responded: Some(now),
            last_seen: now,
            outstanding_queries: 0,
            forced_questionable: false,
            probe_failed: false,
        }
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    pub fn outstanding_queries(&self) -> u32 {
        self.outstanding_queries
    }

    pub fn status(&self, t_good: Duration) -> Reachability {
        if self.probe_failed {
            return Reachability::Bad;
        }
        if self.forced_questionable {
            return Reachability::Questionable;
        }
        match self.last_responded {
            Some(t) => {
                let age = Utc::now().signed_duration_since(t);
                if age.to_std().unwrap_or(Duration::MAX) < t_good {
                    Reachability::Good
                } else {
                    Reachability::Questionable
                }
            }
            None => Reachability::Questionable,
        }
    }

    /// Called when this contact answers a query (as responder) or issues a
    /// query to us (as sender) — either direction counts as traffic.
    pub fn mark_responded(&mut self) {
        let now = Utc::now();
        self.last_responded = Some(now);
        self.last_seen = now;
        self.outstanding_queries = 0;
        self.forced_questionable = false;
        self.probe_failed = false;
    }

    pub fn mark_query_sent(&mut self) {
        self.outstanding_queries += 1;
    }

    /// A lookup step against this contact timed out. The contact becomes
    /// `questionable` immediately rather than waiting out `t_good`.
    pub fn mark_timeout(&mut self) {
        self.outstanding_queries = self.outstanding_queries.saturating_sub(1);
        self.forced_questionable = true;
    }

    /// A direct `ping` probe (issued by the routing table when a bucket is
    /// full, spec §4.3 step 2) failed.
    pub fn mark_probe_failed(&mut self) {
        self.probe_failed = true;
    }

    /// Three consecutive malformed/protocol-error events demote a contact
    /// to `bad` per spec §7.
    pub fn mark_bad(&mut self) {
        self.probe_failed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_contact_is_good() {
        let c = Contact::new(NodeID::random(), "127.0.0.1:6881".parse().unwrap());
        assert_eq!(c.status(Duration::from_secs(900)), Reachability::Good);
    }

    #[test]
    fn timeout_forces_questionable() {
        let mut c = Contact::new(NodeID::random(), "127.0.0.1:6881".parse().unwrap());
        c.mark_timeout();
        assert_eq!(c.status(Duration::from_secs(900)), Reachability::Questionable);
    }

    #[test]
    fn failed_probe_after_questionable_is_bad() {
        let mut c = Contact::new(NodeID::random(), "127.0.0.1:6881".parse().unwrap());
        c.mark_timeout();
        c.mark_probe_failed();
        assert_eq!(c.status(Duration::from_secs(900)), Reachability::Bad);
    }

    #[test]
    fn responding_clears_bad_and_questionable() {
        let mut c = Contact::new(NodeID::random(), "127.0.0.1:6881".parse().unwrap());
        c.mark_timeout();
        c.mark_probe_failed();
        c.mark_responded();
        assert_eq!(c.status(Duration::from_secs(900)), Reachability::Good);
    }
}
