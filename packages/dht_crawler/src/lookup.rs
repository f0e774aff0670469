//! The iterative α-parallel lookup engine (spec §4.5).
//!
//! A `Lookup` is a pure consumer of a snapshot handed to it by the event
//! loop: it never touches the routing table directly. Everything it learns
//! about other nodes — a fresh contact, a timeout, a protocol error — is
//! reported back over `rt_events` so the loop remains the table's only
//! writer (spec §9 "Routing table shared with lookup engine").

use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{mpsc, Semaphore};

use krpc_encoding::{NodeID, Query, Response};
use routing_table::Distance;
use tokio_krpc::{ActiveTransactions, KrpcSocket};

use crate::stats::Counters;

/// Concurrency of an individual lookup (spec GLOSSARY "α").
pub const ALPHA: usize = 3;

/// Bucket width / lookup termination width (spec GLOSSARY "K").
pub const K: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupKind {
    FindNode,
    GetPeers,
}

/// Contact updates a lookup reports back to the event loop. The loop is the
/// only thing that ever calls `RoutingTable::insert`/`mark_timeout`/etc.
#[derive(Debug)]
pub enum RtEvent {
    Responded { id: NodeID, addr: SocketAddr },
    /// A query was just dispatched to a known contact. The loop bumps its
    /// outstanding-query count (spec's Contact tuple) so a contact with
    /// several queries in flight can be told apart from an idle one.
    QuerySent { id: NodeID, addr: SocketAddr },
    TimedOut { addr: SocketAddr },
    Protocol { addr: SocketAddr },
    /// A bucket-refresh `find_node` lookup finished; the loop should touch
    /// the bucket's last-changed timestamp so it isn't immediately
    /// rescheduled (spec §4.3 "Refresh policy").
    BucketRefreshed { bucket_idx: usize },
}

/// One contact the lookup either holds as a candidate or has already
/// queried, keyed by its XOR distance to the lookup's target (unique for a
/// fixed target, since XOR against a fixed value is injective).
struct Candidate {
    id: NodeID,
    addr: SocketAddr,
    queried: bool,
    responded: bool,
    token: Option<Vec<u8>>,
}

/// What the lookup produced once it terminated: the contacts that answered,
/// closest first, each with the token it returned (if any) — used by the
/// caller to send `announce_peer` when the request asked for it.
pub struct LookupOutcome {
    pub responders: Vec<(NodeID, SocketAddr, Option<Vec<u8>>)>,
    pub peers_delivered: usize,
}

struct QueryOutcome {
    addr: SocketAddr,
    result: tokio_krpc::Result<Response>,
}

/// Shared, cheaply-cloned handles a lookup needs to do its own I/O. Owned by
/// the event loop and handed to every spawned lookup task.
#[derive(Clone)]
pub struct LookupContext {
    pub socket: Arc<KrpcSocket>,
    pub transactions: Arc<ActiveTransactions>,
    pub local_id: NodeID,
    pub query_timeout: Duration,
    pub stats: Arc<Counters>,
    /// Bounds total in-flight queries across *all* concurrently running
    /// lookups, so one lookup's α cannot starve another's (spec §4.5
    /// "Concurrency bound").
    pub global_slots: Arc<Semaphore>,
    /// Flips to `true` when `Node::stop()` is called. In-flight and
    /// about-to-start queries observe it and resolve as `Cancelled` instead
    /// of running to their own timeout (spec §5 "Stop aborts pending
    /// lookups").
    pub shutdown: tokio::sync::watch::Receiver<bool>,
}

/// Runs one lookup to completion: seeds from `seed` (and `routers` if the
/// seed is too sparse), issues α-bounded rounds of queries, ingests
/// responses, and returns once the k closest known candidates have all
/// either responded or failed, or `deadline` passes.
pub async fn run(
    ctx: &LookupContext,
    kind: LookupKind,
    target: NodeID,
    seed: Vec<(NodeID, SocketAddr)>,
    routers: Vec<SocketAddr>,
    rt_events: mpsc::UnboundedSender<RtEvent>,
    peer_tx: Option<mpsc::Sender<(NodeID, SocketAddr)>>,
    num_target_peers: usize,
    deadline: Instant,
) -> LookupOutcome {
    let mut candidates: BTreeMap<Distance, Candidate> = BTreeMap::new();
    let mut known_ids: HashSet<NodeID> = HashSet::new();
    let mut queried_addrs: HashSet<SocketAddr> = HashSet::new();
    let mut peers_delivered = 0usize;
    let mut seen_peers: HashSet<SocketAddr> = HashSet::new();

    // Routers contribute traffic but never become part of the shortlist or
    // the routing table (spec §4.5 step 1); `ingest` consults this set to
    // suppress the `Responded` event for their addresses.
    let router_set: HashSet<SocketAddr> = routers.iter().copied().collect();

    for (id, addr) in seed {
        if known_ids.insert(id) {
            candidates.insert(Distance::between(&target, &id), Candidate::new(id, addr));
        }
    }

    // Bootstrap routers have no known id yet; query them directly (outside
    // the normal distance-ordered shortlist) only when the local table
    // couldn't seed enough candidates on its own (spec §4.5 step 1).
    if candidates.len() < ALPHA && !routers.is_empty() {
        let mut router_futs = FuturesUnordered::new();
        for addr in routers {
            if queried_addrs.insert(addr) {
                router_futs.push(query_one(ctx, kind, target, addr));
            }
        }
        while let Some(outcome) = router_futs.next().await {
            ingest(
                ctx,
                &mut candidates,
                &mut known_ids,
                &mut peers_delivered,
                &mut seen_peers,
                &peer_tx,
                &rt_events,
                target,
                outcome,
                &router_set,
            )
            .await;
        }
    }

    loop {
        if Instant::now() >= deadline || *ctx.shutdown.borrow() {
            break;
        }
        if kind == LookupKind::GetPeers && num_target_peers > 0 && peers_delivered >= num_target_peers {
            break;
        }
        // Step 5 (spec §4.5): stop once the k closest known contacts have
        // all either responded or been marked unreachable — regardless of
        // whether anything farther out remains un-queried.
        if shortlist_settled(&candidates, K) {
            break;
        }

        // Step 2's convergence bound: once k responders are known, never
        // query a contact whose distance isn't strictly closer than the
        // k-th one's — it cannot possibly make the final top-k.
        let bound = kth_responder_distance(&candidates, K);
        let round: Vec<(NodeID, SocketAddr)> = candidates
            .iter()
            .filter(|(dist, c)| !c.queried && bound.as_ref().map_or(true, |b| *dist < b))
            .take(ALPHA)
            .map(|(_, c)| (c.id, c.addr))
            .collect();

        if round.is_empty() {
            break;
        }

        for (id, addr) in &round {
            queried_addrs.insert(*addr);
            let _ = rt_events.send(RtEvent::QuerySent { id: *id, addr: *addr });
        }
        for (_, c) in candidates.iter_mut() {
            if round.iter().any(|(_, addr)| *addr == c.addr) {
                c.queried = true;
            }
        }

        let mut futs = FuturesUnordered::new();
        for (_, addr) in round {
            futs.push(query_one(ctx, kind, target, addr));
        }

        while let Some(outcome) = futs.next().await {
            ingest(
                ctx,
                &mut candidates,
                &mut known_ids,
                &mut peers_delivered,
                &mut seen_peers,
                &peer_tx,
                &rt_events,
                target,
                outcome,
                &router_set,
            )
            .await;
        }
    }

    let responders = candidates
        .into_values()
        .filter(|c| c.responded)
        .take(K)
        .map(|c| (c.id, c.addr, c.token))
        .collect();

    LookupOutcome {
        responders,
        peers_delivered,
    }
}

impl Candidate {
    fn new(id: NodeID, addr: SocketAddr) -> Candidate {
        Candidate {
            id,
            addr,
            queried: false,
            responded: false,
            token: None,
        }
    }
}

/// Distance of the k-th contact that has actually responded so far, or
/// `None` if fewer than `k` responders are known yet (spec §4.5 step 2).
fn kth_responder_distance(candidates: &BTreeMap<Distance, Candidate>, k: usize) -> Option<Distance> {
    candidates
        .iter()
        .filter(|(_, c)| c.responded)
        .nth(k.saturating_sub(1))
        .map(|(dist, _)| dist.clone())
}

/// True once the k closest known contacts (by distance, success or failure
/// alike) have all been queried — nothing left that could change the
/// lookup's final answer (spec §4.5 step 5).
fn shortlist_settled(candidates: &BTreeMap<Distance, Candidate>, k: usize) -> bool {
    let closest = candidates.values().take(k);
    let mut any = false;
    for c in closest {
        any = true;
        if !c.queried {
            return false;
        }
    }
    any
}

async fn query_one(ctx: &LookupContext, kind: LookupKind, target: NodeID, addr: SocketAddr) -> QueryOutcome {
    let mut shutdown = ctx.shutdown.clone();
    if *shutdown.borrow() {
        return QueryOutcome {
            addr,
            result: Err(tokio_krpc::ErrorKind::Cancelled.into()),
        };
    }

    let _permit = tokio::select! {
        permit = ctx.global_slots.acquire() => permit,
        _ = shutdown.changed() => {
            return QueryOutcome { addr, result: Err(tokio_krpc::ErrorKind::Cancelled.into()) };
        }
    };

    let query = match kind {
        LookupKind::FindNode => {
            ctx.stats.sent_find_node();
            Query::FindNode {
                id: ctx.local_id,
                target,
            }
        }
        LookupKind::GetPeers => {
            ctx.stats.sent_get_peers();
            Query::GetPeers {
                id: ctx.local_id,
                info_hash: target,
            }
        }
    };

    let result = tokio::select! {
        res = tokio_krpc::query(&ctx.socket, &ctx.transactions, addr, query, ctx.query_timeout) => res,
        _ = shutdown.changed() => Err(tokio_krpc::ErrorKind::Cancelled.into()),
    };
    QueryOutcome { addr, result }
}

#[allow(clippy::too_many_arguments)]
async fn ingest(
    ctx: &LookupContext,
    candidates: &mut BTreeMap<Distance, Candidate>,
    known_ids: &mut HashSet<NodeID>,
    peers_delivered: &mut usize,
    seen_peers: &mut HashSet<SocketAddr>,
    peer_tx: &Option<mpsc::Sender<(NodeID, SocketAddr)>>,
    rt_events: &mpsc::UnboundedSender<RtEvent>,
    target: NodeID,
    outcome: QueryOutcome,
    routers: &HashSet<SocketAddr>,
) {
    let response = match outcome.result {
        Ok(r) => r,
        Err(e) => {
            // The lookup cancelling its own in-flight queries on shutdown
            // isn't the contact's fault — leave its routing-table state
            // alone rather than marking it bad or questionable.
            if matches!(e.kind(), tokio_krpc::ErrorKind::Cancelled) {
                return;
            }
            // A reply that parsed as a KRPC message but had the wrong shape
            // (e.g. a query echoed back as a reply) demotes the contact
            // straight to `bad`; a timeout or remote error just makes it
            // questionable (spec §7).
            let event = match e.kind() {
                tokio_krpc::ErrorKind::MalformedMessage { .. } => RtEvent::Protocol { addr: outcome.addr },
                _ => RtEvent::TimedOut { addr: outcome.addr },
            };
            let _ = rt_events.send(event);
            mark_failed(candidates, outcome.addr);
            return;
        }
    };

    let responder_id = response.responder_id();
    // Routers contribute traffic but never enter the routing table (spec
    // §4.5 step 1); the rest of ingestion (nodes, tokens, peers) still runs
    // normally for a router's reply.
    if !routers.contains(&outcome.addr) {
        let _ = rt_events.send(RtEvent::Responded {
            id: responder_id,
            addr: outcome.addr,
        });
    }
    ctx.stats.node_reached();

    mark_responded(candidates, outcome.addr, responder_id);

    let (nodes, token, peers) = match response {
        Response::NextHop { token, nodes, .. } => (nodes, token, Vec::new()),
        Response::GetPeers { token, peers, .. } => (Vec::new(), token, peers),
        Response::OnlyID { .. } | Response::Samples { .. } => (Vec::new(), None, Vec::new()),
    };

    if let Some(dist_key) = find_key(candidates, outcome.addr) {
        if let Some(c) = candidates.get_mut(&dist_key) {
            c.token = token;
        }
    }

    for node in nodes {
        if node.id == ctx.local_id {
            continue;
        }
        if !known_ids.insert(node.id) {
            ctx.stats.find_node_dupe();
            continue;
        }
        let addr: SocketAddr = node.addr.into();
        candidates
            .entry(Distance::between(&target, &node.id))
            .or_insert_with(|| Candidate::new(node.id, addr));
    }

    for addr in peers {
        let addr: SocketAddr = addr.into();
        if !seen_peers.insert(addr) {
            ctx.stats.get_peers_dupe();
            continue;
        }
        *peers_delivered += 1;
        ctx.stats.peer_delivered();
        if let Some(tx) = peer_tx {
            let _ = tx.send((target, addr)).await;
        }
    }
}

fn find_key(candidates: &BTreeMap<Distance, Candidate>, addr: SocketAddr) -> Option<Distance> {
    candidates
        .iter()
        .find(|(_, c)| c.addr == addr)
        .map(|(d, _)| d.clone())
}

fn mark_responded(candidates: &mut BTreeMap<Distance, Candidate>, addr: SocketAddr, _id: NodeID) {
    if let Some(key) = find_key(candidates, addr) {
        if let Some(c) = candidates.get_mut(&key) {
            c.responded = true;
        }
    }
}

fn mark_failed(candidates: &mut BTreeMap<Distance, Candidate>, addr: SocketAddr) {
    if let Some(key) = find_key(candidates, addr) {
        if let Some(c) = candidates.get_mut(&key) {
            c.responded = false;
        }
    }
}
