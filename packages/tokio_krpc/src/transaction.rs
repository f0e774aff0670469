use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use krpc_encoding::Message;

use crate::errors::{Error, ErrorKind, Result};

/// Short opaque id correlating a query to its reply (spec §3 "Transaction").
pub type TransactionId = u16;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

struct Pending {
    reply: oneshot::Sender<Message>,
    deadline: Instant,
}

/// Live transactions, keyed by `(TransactionId, SocketAddr)` so a reply
/// from an unexpected address can never resolve someone else's transaction
/// (spec §4.2 invariant).
pub struct ActiveTransactions {
    next_id: AtomicU16,
    inflight: Mutex<HashMap<(TransactionId, SocketAddr), Pending>>,
}

impl ActiveTransactions {
    pub fn new() -> ActiveTransactions {
        ActiveTransactions {
            next_id: AtomicU16::new(0),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates a fresh transaction id for `remote`, generation-wrapping
    /// past any id already in flight to that same address.
    pub fn allocate(
        &self,
        remote: SocketAddr,
        timeout: Duration,
    ) -> (TransactionId, oneshot::Receiver<Message>) {
        let mut map = self.inflight.lock().expect("transaction table poisoned");
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if map.contains_key(&(id, remote)) {
                continue;
            }
            let (tx, rx) = oneshot::channel();
            map.insert(
                (id, remote),
                Pending {
                    reply: tx,
                    deadline: Instant::now() + timeout,
                },
            );
            return (id, rx);
        }
    }

    /// Resolves a reply against its transaction. Returns `NoSuchTransaction`
    /// for unsolicited or spoofed replies, which the caller must drop.
    pub fn resolve(&self, id: TransactionId, remote: SocketAddr, message: Message) -> Result<()> {
        let pending = {
            let mut map = self.inflight.lock().expect("transaction table poisoned");
            map.remove(&(id, remote))
        };
        match pending {
            Some(pending) => {
                // The lookup step may have already dropped its receiver
                // (e.g. the lookup was cancelled); that's not an error here.
                let _ = pending.reply.send(message);
                Ok(())
            }
            None => Err(ErrorKind::NoSuchTransaction { from: remote }.into()),
        }
    }

    /// Drops a transaction without resolving it, e.g. when the waiting
    /// future itself was cancelled before a reply or timeout arrived.
    pub fn drop_transaction(&self, id: TransactionId, remote: SocketAddr) {
        let mut map = self.inflight.lock().expect("transaction table poisoned");
        map.remove(&(id, remote));
    }

    /// Periodic GC sweep (spec §4.6 "Transaction expiration" timer). Most
    /// transactions are cleaned up by their own per-call `tokio::time::timeout`;
    /// this is the backstop for anything that didn't get a chance to.
    pub fn expire(&self, now: Instant) -> usize {
        let mut map = self.inflight.lock().expect("transaction table poisoned");
        let expired: Vec<_> = map
            .iter()
            .filter(|(_, pending)| pending.deadline <= now)
            .map(|(key, _)| *key)
            .collect();
        for key in &expired {
            map.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.inflight.lock().expect("transaction table poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ActiveTransactions {
    fn default() -> ActiveTransactions {
        ActiveTransactions::new()
    }
}

/// Awaits a single transaction's reply, translating a timed-out channel
/// into [`ErrorKind::Timeout`] and cleaning up the transaction table either
/// way.
pub async fn await_reply(
    transactions: &ActiveTransactions,
    id: TransactionId,
    remote: SocketAddr,
    rx: oneshot::Receiver<Message>,
    timeout: Duration,
) -> Result<Message> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(message)) => Ok(message),
        Ok(Err(_recv_error)) => {
            // Sender dropped without sending: expired by the GC sweep.
            Err(ErrorKind::Timeout { to: remote }.into())
        }
        Err(_elapsed) => {
            transactions.drop_transaction(id, remote);
            Err(ErrorKind::Timeout { to: remote }.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::{KRPCError, NodeID, Query};

    #[tokio::test]
    async fn resolves_matching_reply() {
        let transactions = ActiveTransactions::new();
        let remote: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let (id, rx) = transactions.allocate(remote, DEFAULT_TIMEOUT);

        let msg = Message::query(vec![0, 0], Query::Ping { id: NodeID::random() });
        transactions.resolve(id, remote, msg).unwrap();

        let received = rx.await.unwrap();
        assert!(transactions.is_empty());
        let _ = received;
    }

    #[tokio::test]
    async fn rejects_reply_from_wrong_address() {
        let transactions = ActiveTransactions::new();
        let remote: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let spoofed: SocketAddr = "10.0.0.1:6881".parse().unwrap();
        let (id, _rx) = transactions.allocate(remote, DEFAULT_TIMEOUT);

        let msg = Message::error(vec![0, 0], KRPCError::generic("nope"));
        let result = transactions.resolve(id, spoofed, msg);
        assert!(result.is_err());
        assert_eq!(transactions.len(), 1);
    }

    #[tokio::test]
    async fn timeout_surfaces_as_error() {
        let transactions = ActiveTransactions::new();
        let remote: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let (id, rx) = transactions.allocate(remote, Duration::from_millis(10));

        let result = await_reply(&transactions, id, remote, rx, Duration::from_millis(10)).await;
        assert!(result.is_err());
        assert!(transactions.is_empty());
    }

    #[test]
    fn expire_sweeps_past_deadline() {
        let transactions = ActiveTransactions::new();
        let remote: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        let (_id, _rx) = transactions.allocate(remote, Duration::from_secs(0));
        std::thread::sleep(Duration::from_millis(5));
        let expired = transactions.expire(Instant::now());
        assert_eq!(expired, 1);
        assert!(transactions.is_empty());
    }
}
