//! The event loop (spec §4.6): the single task that owns the routing
//! table, peer store, transaction table, and the set of running lookups.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use krpc_encoding::{Addr, KRPCError, Message, MessageType, NodeID, Query, Response};
use routing_table::{Contact, InsertOutcome, RoutingTable, NUM_BUCKETS};
use tokio_krpc::{ActiveTransactions, KrpcSocket};

use crate::config::Config;
use crate::errors::{ErrorKind, Result};
use crate::lookup::{self, LookupContext, LookupKind, RtEvent, ALPHA, K};
use crate::peer_store::PeerStore;
use crate::stats::{Counters, Stats};
use crate::token::TokenManager;

/// Commands the application sends to the loop (spec §4.6, §6).
enum Command {
    PeersRequest {
        info_hash: NodeID,
        announce: bool,
    },
    AddNode {
        addr: SocketAddr,
        id: Option<NodeID>,
    },
    VisitNodes {
        callback: Box<dyn FnMut(SocketAddr, NodeID) + Send>,
    },
    Stop,
}

/// Outcome of a background probe ping, fed back to the loop so it stays the
/// table's only writer (mirrors `lookup::RtEvent`'s reasoning).
struct ProbeOutcome {
    bucket_idx: usize,
    probe_idx: usize,
    success: bool,
    candidate: Contact,
}

enum LoopEvent {
    Rt(RtEvent),
    Probe(ProbeOutcome),
}

/// A running Mainline DHT participant. Cheap to clone-share: the handle
/// only carries channels and a snapshot of immutable startup state, never
/// the routing table itself (spec §5: table is loop-private).
pub struct Node {
    cmd_tx: mpsc::Sender<Command>,
    peers_rx: StdMutex<Option<mpsc::Receiver<(NodeID, SocketAddr)>>>,
    local_addr: SocketAddr,
    stats: Arc<Counters>,
    handle: StdMutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Binds the UDP socket, derives or accepts the local id, and spawns
    /// the event loop. Mirrors spec §6 `New(Config)`.
    pub async fn new(config: Config) -> Result<Node> {
        config.validate()?;

        let local_id = config.node_id.unwrap_or_else(NodeID::random);
        let bind_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
        let socket = KrpcSocket::bind(bind_addr, config.rate_limit)
            .await
            .map_err(|cause| ErrorKind::BindFailed {
                port: config.port,
                cause: cause.to_string(),
            })?;
        let local_addr = socket.local_addr().map_err(|cause| ErrorKind::BindFailed {
            port: config.port,
            cause: cause.to_string(),
        })?;

        let mut routers = Vec::new();
        for host in &config.dht_routers {
            match tokio::net::lookup_host(host.as_str()).await {
                Ok(addrs) => routers.extend(addrs),
                Err(cause) => warn!(%host, %cause, "failed to resolve bootstrap router"),
            }
        }

        let socket = Arc::new(socket);
        let transactions = Arc::new(ActiveTransactions::new());
        let stats = Arc::new(Counters::new());

        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
        let (peers_tx, peers_rx) = mpsc::channel(config.results_buffer.max(1));

        let loop_state = LoopState {
            local_id,
            socket: Arc::clone(&socket),
            transactions: Arc::clone(&transactions),
            stats: Arc::clone(&stats),
            config: config.clone(),
            routers,
        };

        let handle = tokio::spawn(run_event_loop(loop_state, cmd_rx, peers_tx));

        info!(port = local_addr.port(), node_id = %local_id, "dht node listening");

        Ok(Node {
            cmd_tx,
            peers_rx: StdMutex::new(Some(peers_rx)),
            local_addr,
            stats,
            handle: StdMutex::new(Some(handle)),
        })
    }

    /// Runs until `Stop()` is called (spec §6 `Run()`).
    pub async fn run(&self) -> Result<()> {
        let handle = self.handle.lock().expect("handle mutex poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub async fn stop(&self) -> Result<()> {
        let _ = self.cmd_tx.send(Command::Stop).await;
        Ok(())
    }

    /// Enqueues a lookup; when `announce` is true, `announce_peer` is sent
    /// to the closest responders after the lookup completes (spec §6).
    pub async fn peers_request(&self, info_hash: NodeID, announce: bool) -> Result<()> {
        self.cmd_tx
            .send(Command::PeersRequest { info_hash, announce })
            .await
            .map_err(|_| ErrorKind::Stopped.into())
    }

    /// Injects a contact; if `id` is absent the node is pinged first to
    /// learn it (spec §6).
    pub async fn add_node(&self, addr: SocketAddr, id: Option<NodeID>) -> Result<()> {
        self.cmd_tx
            .send(Command::AddNode { addr, id })
            .await
            .map_err(|_| ErrorKind::Stopped.into())
    }

    /// Iterates all contacts synchronously inside the loop (spec §6).
    /// `callback` must not call back into `Node`, or it deadlocks.
    pub async fn visit_nodes<F>(&self, callback: F) -> Result<()>
    where
        F: FnMut(SocketAddr, NodeID) + Send + 'static,
    {
        self.cmd_tx
            .send(Command::VisitNodes {
                callback: Box::new(callback),
            })
            .await
            .map_err(|_| ErrorKind::Stopped.into())
    }

    /// Hands out the peer-delivery receiver. Callable once; subsequent
    /// calls panic, since there is exactly one consumer per process (spec
    /// §9 "Peer list delivery channel").
    pub fn peers_request_results(&self) -> mpsc::Receiver<(NodeID, SocketAddr)> {
        self.peers_rx
            .lock()
            .expect("peers_rx mutex poisoned")
            .take()
            .expect("peers_request_results already taken")
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }
}

/// Immutable-ish state handed into the loop; cloned once at spawn time.
struct LoopState {
    local_id: NodeID,
    socket: Arc<KrpcSocket>,
    transactions: Arc<ActiveTransactions>,
    stats: Arc<Counters>,
    config: Config,
    routers: Vec<SocketAddr>,
}

async fn run_event_loop(
    state: LoopState,
    mut cmd_rx: mpsc::Receiver<Command>,
    peers_tx: mpsc::Sender<(NodeID, SocketAddr)>,
) {
    let mut routing_table = RoutingTable::new(state.local_id, state.config.max_nodes);
    let mut peer_store = PeerStore::new();
    let mut token_mgr = TokenManager::new();
    let mut protocol_strikes: std::collections::HashMap<SocketAddr, u32> = std::collections::HashMap::new();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<LoopEvent>();
    let rt_tx = event_tx.clone();

    // Flips to `true` on `Command::Stop`; every running and future lookup
    // task shares this receiver and cancels its own in-flight queries
    // instead of running to its normal deadline (spec §5).
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let lctx = LookupContext {
        socket: Arc::clone(&state.socket),
        transactions: Arc::clone(&state.transactions),
        local_id: state.local_id,
        query_timeout: tokio_krpc::default_timeout(),
        stats: Arc::clone(&state.stats),
        global_slots: Arc::new(Semaphore::new(ALPHA * 4)),
        shutdown: shutdown_rx,
    };

    let mut cleanup = tokio::time::interval(state.config.cleanup_period);

    loop {
        tokio::select! {
            datagram = state.socket.recv() => {
                match datagram {
                    Ok((from, Ok(message))) => {
                        handle_datagram(
                            &state,
                            &mut routing_table,
                            &mut peer_store,
                            &mut token_mgr,
                            &mut protocol_strikes,
                            &event_tx,
                            from,
                            message,
                        );
                    }
                    Ok((from, Err(()))) => {
                        trace!(%from, "dropping malformed datagram");
                        strike(&mut routing_table, &mut protocol_strikes, from);
                    }
                    Err(cause) => {
                        warn!(%cause, "transport error reading datagram");
                    }
                }
            }

            Some(event) = event_rx.recv() => {
                apply_event(&mut routing_table, event);
            }

            Some(cmd) = cmd_rx.recv() => {
                // Stop is handled inline rather than through `handle_command`
                // since it needs to await the shutdown grace period (spec §5
                // (b) cancel pending lookups, (d) drain the writer queue).
                if matches!(cmd, Command::Stop) {
                    let _ = shutdown_tx.send(true);
                    debug!(grace = ?state.config.shutdown_grace, "stop requested, draining");
                    tokio::time::sleep(state.config.shutdown_grace).await;
                    break;
                }
                handle_command(&state, &mut routing_table, &lctx, &rt_tx, &peers_tx, cmd);
            }

            _ = cleanup.tick() => {
                state.transactions.expire(Instant::now());
                peer_store.gc();
                token_mgr.maybe_rotate();
                routing_table.enforce_capacity();

                for idx in routing_table.stale_buckets() {
                    let target = routing_table.random_id_for_bucket(idx);
                    spawn_refresh(&state, &routing_table, &lctx, &rt_tx, idx, target);
                }
            }
        }
    }

    debug!("event loop stopped");
}

fn handle_datagram(
    state: &LoopState,
    routing_table: &mut RoutingTable,
    peer_store: &mut PeerStore,
    token_mgr: &mut TokenManager,
    protocol_strikes: &mut std::collections::HashMap<SocketAddr, u32>,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    from: SocketAddr,
    message: Message,
) {
    // Branch on the variant without moving `message.message_type` yet —
    // the reply arm needs the whole `Message` intact to hand to the
    // transaction table.
    if matches!(message.message_type, MessageType::Query { .. }) {
        let transaction_id = message.transaction_id.clone();
        let query = match message.message_type {
            MessageType::Query { query } => query,
            _ => unreachable!("checked above"),
        };
        handle_query(state, routing_table, peer_store, token_mgr, event_tx, from, transaction_id, query);
    } else {
        let tid = message.transaction_id.clone();
        if tid.len() != 2 {
            strike(routing_table, protocol_strikes, from);
            return;
        }
        let id = BigEndian::read_u16(&tid);
        // Unsolicited or spoofed replies are dropped silently (spec §7
        // `NoSuchTransaction`, E4): no routing-table insert, no event.
        let _ = state.transactions.resolve(id, from, message);
    }
}

fn handle_query(
    state: &LoopState,
    routing_table: &mut RoutingTable,
    peer_store: &mut PeerStore,
    token_mgr: &mut TokenManager,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    from: SocketAddr,
    transaction_id: Vec<u8>,
    query: Query,
) {
    let sender_id = query.sender_id();
    handle_insert(state, routing_table, event_tx, sender_id, from);

    let reply = match query {
        Query::Ping { .. } => Message::response(transaction_id, Response::OnlyID { id: state.local_id }),

        Query::FindNode { target, .. } => {
            let nodes = routing_table
                .find_closest(&target, K)
                .into_iter()
                .map(|c| krpc_encoding::NodeInfo::new(c.id, Addr::new(c.addr)))
                .collect();
            Message::response(
                transaction_id,
                Response::NextHop {
                    id: state.local_id,
                    token: None,
                    nodes,
                },
            )
        }

        Query::GetPeers { info_hash, .. } => {
            let token = token_mgr.issue(from.ip());
            let peers = peer_store.get(&info_hash);
            if !peers.is_empty() {
                Message::response(
                    transaction_id,
                    Response::GetPeers {
                        id: state.local_id,
                        token: Some(token),
                        peers: peers.into_iter().map(Addr::new).collect(),
                    },
                )
            } else {
                let nodes = routing_table
                    .find_closest(&info_hash, K)
                    .into_iter()
                    .map(|c| krpc_encoding::NodeInfo::new(c.id, Addr::new(c.addr)))
                    .collect();
                Message::response(
                    transaction_id,
                    Response::NextHop {
                        id: state.local_id,
                        token: Some(token),
                        nodes,
                    },
                )
            }
        }

        Query::AnnouncePeer {
            implied_port,
            port,
            info_hash,
            token,
            ..
        } => {
            if token_mgr.accept(from.ip(), &token) {
                let announced_port = if implied_port { from.port() } else { port.unwrap_or(from.port()) };
                peer_store.announce(info_hash, SocketAddr::new(from.ip(), announced_port));
                Message::response(transaction_id, Response::OnlyID { id: state.local_id })
            } else {
                Message::error(transaction_id, KRPCError::protocol("invalid or expired token"))
            }
        }

        Query::SampleInfoHashes { .. } => {
            Message::error(transaction_id, KRPCError::unknown_method("sample_infohashes not supported"))
        }
    };

    let socket = Arc::clone(&state.socket);
    tokio::spawn(async move {
        if let Err(cause) = socket.send_reply(&reply, from).await {
            warn!(%from, %cause, "failed to send reply");
        }
    });
}

fn handle_insert(
    state: &LoopState,
    routing_table: &mut RoutingTable,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    id: NodeID,
    addr: SocketAddr,
) {
    state.stats.node_reached();
    match routing_table.insert(id, addr) {
        InsertOutcome::NeedsProbe {
            bucket_idx,
            probe_idx,
            probe_addr,
            candidate,
        } => {
            if let Some(incumbent) = routing_table.bucket(bucket_idx).contacts().get(probe_idx) {
                let incumbent_id = incumbent.id;
                routing_table.mark_query_sent(&incumbent_id);
            }
            let socket = Arc::clone(&state.socket);
            let transactions = Arc::clone(&state.transactions);
            let local_id = state.local_id;
            let timeout = tokio_krpc::default_timeout();
            let event_tx = event_tx.clone();
            tokio::spawn(async move {
                let success = tokio_krpc::query(&socket, &transactions, probe_addr, Query::Ping { id: local_id }, timeout)
                    .await
                    .is_ok();
                let _ = event_tx.send(LoopEvent::Probe(ProbeOutcome {
                    bucket_idx,
                    probe_idx,
                    success,
                    candidate,
                }));
            });
        }
        _ => {}
    }
}

/// Three consecutive malformed/protocol events from the same address demote
/// its contact to `bad`, if it has one (spec §7).
fn strike(routing_table: &mut RoutingTable, strikes: &mut std::collections::HashMap<SocketAddr, u32>, from: SocketAddr) {
    let count = strikes.entry(from).or_insert(0);
    *count += 1;
    if *count >= 3 {
        if let Some(id) = find_id_by_addr(routing_table, from) {
            routing_table.mark_bad(&id);
        }
        strikes.remove(&from);
    }
}

fn apply_event(routing_table: &mut RoutingTable, event: LoopEvent) {
    match event {
        LoopEvent::Rt(RtEvent::Responded { id, addr }) => {
            handle_insert_simple(routing_table, id, addr);
        }
        LoopEvent::Rt(RtEvent::QuerySent { id, .. }) => {
            routing_table.mark_query_sent(&id);
        }
        LoopEvent::Rt(RtEvent::TimedOut { addr }) => {
            if let Some(id) = find_id_by_addr(routing_table, addr) {
                routing_table.mark_timeout(&id);
            }
        }
        LoopEvent::Rt(RtEvent::Protocol { addr }) => {
            if let Some(id) = find_id_by_addr(routing_table, addr) {
                routing_table.mark_bad(&id);
            }
        }
        LoopEvent::Rt(RtEvent::BucketRefreshed { bucket_idx }) => {
            routing_table.touch_bucket(bucket_idx);
        }
        LoopEvent::Probe(outcome) => {
            routing_table.resolve_probe(outcome.bucket_idx, outcome.probe_idx, outcome.success, outcome.candidate);
        }
    }
}

/// A contact learned from a lookup response, rather than from a live
/// query we can answer with a probe right now. If the bucket is full this
/// simply discards the candidate; the next direct observation of a
/// questionable slot (a query from it, or another lookup response) is what
/// actually triggers a probe via `handle_insert`.
fn handle_insert_simple(routing_table: &mut RoutingTable, id: NodeID, addr: SocketAddr) {
    let _ = routing_table.insert(id, addr);
}

fn find_id_by_addr(routing_table: &RoutingTable, addr: SocketAddr) -> Option<NodeID> {
    for idx in 0..NUM_BUCKETS {
        if let Some(c) = routing_table.bucket(idx).contacts().iter().find(|c| c.addr == addr) {
            return Some(c.id);
        }
    }
    None
}

fn handle_command(
    state: &LoopState,
    routing_table: &mut RoutingTable,
    lctx: &LookupContext,
    rt_tx: &mpsc::UnboundedSender<LoopEvent>,
    peers_tx: &mpsc::Sender<(NodeID, SocketAddr)>,
    cmd: Command,
) {
    match cmd {
        Command::PeersRequest { info_hash, announce } => {
            let seed: Vec<(NodeID, SocketAddr)> = routing_table
                .find_closest(&info_hash, K)
                .into_iter()
                .map(|c| (c.id, c.addr))
                .collect();
            spawn_get_peers(state, lctx, rt_tx, peers_tx, info_hash, seed, announce);
        }
        Command::AddNode { addr, id } => match id {
            Some(id) => handle_insert(state, routing_table, rt_tx, id, addr),
            None => spawn_ping_probe(state, rt_tx, addr),
        },
        Command::VisitNodes { mut callback } => {
            for idx in 0..NUM_BUCKETS {
                for c in routing_table.bucket(idx).contacts() {
                    callback(c.addr, c.id);
                }
            }
        }
        Command::Stop => unreachable!("Stop is handled by the caller before reaching handle_command"),
    }
}

fn spawn_get_peers(
    state: &LoopState,
    lctx: &LookupContext,
    rt_tx: &mpsc::UnboundedSender<LoopEvent>,
    peers_tx: &mpsc::Sender<(NodeID, SocketAddr)>,
    info_hash: NodeID,
    seed: Vec<(NodeID, SocketAddr)>,
    announce: bool,
) {
    let lctx = lctx.clone();
    let routers = state.routers.clone();
    let (rt_events, mut rt_relay) = mpsc::unbounded_channel::<RtEvent>();
    let rt_tx = rt_tx.clone();
    tokio::spawn(async move {
        while let Some(ev) = rt_relay.recv().await {
            let _ = rt_tx.send(LoopEvent::Rt(ev));
        }
    });

    let peers_tx_clone = peers_tx.clone();
    let local_id = lctx.local_id;
    let socket = Arc::clone(&lctx.socket);
    let transactions = Arc::clone(&lctx.transactions);
    let timeout = lctx.query_timeout;
    let num_target_peers = state.config.num_target_peers;

    tokio::spawn(async move {
        let deadline = Instant::now() + Duration::from_secs(30);
        let outcome = lookup::run(
            &lctx,
            LookupKind::GetPeers,
            info_hash,
            seed,
            routers,
            rt_events,
            Some(peers_tx_clone),
            num_target_peers,
            deadline,
        )
        .await;

        if announce {
            for (_id, addr, token) in outcome.responders {
                if let Some(token) = token {
                    let _ = tokio_krpc::query(
                        &socket,
                        &transactions,
                        addr,
                        Query::AnnouncePeer {
                            id: local_id,
                            implied_port: true,
                            port: None,
                            info_hash,
                            token,
                        },
                        timeout,
                    )
                    .await;
                }
            }
        }
    });
}

fn spawn_ping_probe(state: &LoopState, rt_tx: &mpsc::UnboundedSender<LoopEvent>, addr: SocketAddr) {
    let socket = Arc::clone(&state.socket);
    let transactions = Arc::clone(&state.transactions);
    let local_id = state.local_id;
    let timeout = tokio_krpc::default_timeout();
    let rt_tx = rt_tx.clone();
    tokio::spawn(async move {
        if let Ok(response) = tokio_krpc::query(&socket, &transactions, addr, Query::Ping { id: local_id }, timeout).await {
            let _ = rt_tx.send(LoopEvent::Rt(RtEvent::Responded {
                id: response.responder_id(),
                addr,
            }));
        }
    });
}

fn spawn_refresh(
    state: &LoopState,
    routing_table: &RoutingTable,
    lctx: &LookupContext,
    rt_tx: &mpsc::UnboundedSender<LoopEvent>,
    bucket_idx: usize,
    target: NodeID,
) {
    let seed: Vec<(NodeID, SocketAddr)> = routing_table
        .find_closest(&target, ALPHA)
        .into_iter()
        .map(|c| (c.id, c.addr))
        .collect();
    let lctx = lctx.clone();
    let routers = state.routers.clone();
    let (rt_events, mut rt_relay) = mpsc::unbounded_channel::<RtEvent>();
    let rt_tx = rt_tx.clone();
    tokio::spawn(async move {
        while let Some(ev) = rt_relay.recv().await {
            let _ = rt_tx.send(LoopEvent::Rt(ev));
        }
        let _ = rt_tx.send(LoopEvent::Rt(RtEvent::BucketRefreshed { bucket_idx }));
    });
    tokio::spawn(async move {
        let deadline = Instant::now() + Duration::from_secs(10);
        let _ = lookup::run(&lctx, LookupKind::FindNode, target, seed, routers, rt_events, None, 0, deadline).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn node() -> Node {
        let config = Config::default().with_port(0).with_rate_limit(1000);
        Node::new(config).await.expect("node binds")
    }

    fn addr_of(n: &Node) -> SocketAddr {
        ([127, 0, 0, 1], n.port()).into()
    }

    #[tokio::test]
    async fn node_binds_to_ephemeral_port_and_reports_it() {
        let n = node().await;
        assert_ne!(n.port(), 0);
        n.stop().await.unwrap();
    }

    /// Spec E1: a node bootstrapped through a single common neighbor
    /// discovers the rest of a small swarm via iterative `get_peers`.
    #[tokio::test]
    async fn three_node_lookup_discovers_all_participants() {
        let a = node().await;
        let b = node().await;
        let c = node().await;
        let (a_addr, b_addr, c_addr) = (addr_of(&a), addr_of(&b), addr_of(&c));

        b.add_node(a_addr, None).await.unwrap();
        c.add_node(a_addr, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        a.add_node(b_addr, None).await.unwrap();
        a.add_node(c_addr, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        b.peers_request(NodeID::random(), false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        b.visit_nodes(move |addr, _id| seen_clone.lock().unwrap().push(addr))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = seen.lock().unwrap().clone();
        assert!(seen.contains(&a_addr), "expected B to have learned about A");
        assert!(seen.contains(&c_addr), "expected B's lookup to have discovered C via A");

        a.stop().await.unwrap();
        b.stop().await.unwrap();
        c.stop().await.unwrap();
    }

    /// Spec E4: a reply whose transaction id was never allocated is dropped
    /// without touching the routing table.
    #[tokio::test]
    async fn unsolicited_reply_is_dropped_without_inserting_contact() {
        let n = node().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let raw_addr = raw.local_addr().unwrap();

        let reply = Message::response(vec![0, 0], Response::OnlyID { id: NodeID::random() });
        let bytes = reply.encode().unwrap();
        raw.send_to(&bytes, addr_of(&n)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        n.visit_nodes(move |addr, _id| seen_clone.lock().unwrap().push(addr))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(seen.lock().unwrap().iter().all(|addr| *addr != raw_addr));
        n.stop().await.unwrap();
    }

    /// Spec E5: `announce_peer` with a token the node never issued is
    /// rejected with a KRPC protocol error, not silently dropped.
    #[tokio::test]
    async fn announce_peer_with_unknown_token_gets_protocol_error() {
        let n = node().await;
        let raw = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let query = Message::query(
            vec![1, 1],
            Query::AnnouncePeer {
                id: NodeID::random(),
                implied_port: true,
                port: None,
                info_hash: NodeID::random(),
                token: b"bogus".to_vec(),
            },
        );
        raw.send_to(&query.encode().unwrap(), addr_of(&n)).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let (len, _from) = tokio::time::timeout(Duration::from_secs(2), raw.recv_from(&mut buf))
            .await
            .expect("reply arrives before timeout")
            .unwrap();
        let reply = Message::decode(&buf[..len]).unwrap();
        match reply.message_type {
            MessageType::Error { error } => assert_eq!(error.0, 203),
            other => panic!("expected a protocol error, got {:?}", other),
        }

        n.stop().await.unwrap();
    }
}
