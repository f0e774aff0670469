use std::net::SocketAddr;
use std::time::Duration;

use leaky_bucket::RateLimiter;
use tokio::net::UdpSocket;
use tracing::trace;

use krpc_encoding::Message;

use crate::errors::{ErrorKind, Result};

const MAX_DATAGRAM_SIZE: usize = 16 * 1024;

/// Thin async wrapper around a UDP socket that speaks KRPC messages and
/// applies §4.7's outgoing rate limit. Owns no transaction state: callers
/// (the transaction table, the event loop) decide what to do with what
/// comes back.
pub struct KrpcSocket {
    socket: UdpSocket,
    query_limiter: RateLimiter,
    reply_limiter: RateLimiter,
}

impl KrpcSocket {
    pub async fn bind(addr: SocketAddr, packets_per_sec: usize) -> Result<KrpcSocket> {
        let socket = UdpSocket::bind(addr).await.map_err(|cause| ErrorKind::SendError {
            to: addr,
            cause: cause.to_string(),
        })?;
        Ok(KrpcSocket::from_socket(socket, packets_per_sec))
    }

    pub fn from_socket(socket: UdpSocket, packets_per_sec: usize) -> KrpcSocket {
        let per_100ms = (packets_per_sec / 10).max(1);
        KrpcSocket {
            socket,
            query_limiter: RateLimiter::builder()
                .initial(per_100ms)
                .max(packets_per_sec.max(1))
                .interval(Duration::from_millis(100))
                .refill(per_100ms)
                .fair(false)
                .build(),
            // Replies bypass the outgoing limiter "to a small degree"
            // (spec §4.7) by drawing from a separate, more generous bucket,
            // while still being bounded overall.
            reply_limiter: RateLimiter::builder()
                .initial(per_100ms * 2)
                .max(packets_per_sec.max(1) * 2)
                .interval(Duration::from_millis(100))
                .refill(per_100ms * 2)
                .fair(false)
                .build(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|cause| ErrorKind::RecvError { cause: cause.to_string() }.into())
    }

    /// Sends a query, subject to the outgoing rate limit.
    pub async fn send_query(&self, message: &Message, to: SocketAddr) -> Result<()> {
        self.query_limiter.acquire_one().await;
        self.send_now(message, to).await
    }

    /// Sends a response or error, subject to the more generous reply limiter.
    pub async fn send_reply(&self, message: &Message, to: SocketAddr) -> Result<()> {
        self.reply_limiter.acquire_one().await;
        self.send_now(message, to).await
    }

    async fn send_now(&self, message: &Message, to: SocketAddr) -> Result<()> {
        let encoded = message
            .encode()
            .map_err(|_| ErrorKind::SendError { to, cause: "encode failed".into() })?;
        trace!(%to, bytes = encoded.len(), "sending KRPC message");
        self.socket
            .send_to(&encoded, to)
            .await
            .map_err(|cause| ErrorKind::SendError { to, cause: cause.to_string() })?;
        Ok(())
    }

    /// Receives and decodes one datagram. Decode failures are returned as
    /// `Ok` with `None` payload rather than an error, since a malformed
    /// datagram from the network is routine input, not a transport failure
    /// (spec §7: "never crash the event loop on peer-originated input").
    pub async fn recv(&self) -> Result<(SocketAddr, std::result::Result<Message, ()>)> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|cause| ErrorKind::RecvError { cause: cause.to_string() })?;
        match Message::decode(&buf[..len]) {
            Ok(message) => Ok((from, Ok(message))),
            Err(_) => Ok((from, Err(()))),
        }
    }
}
