use std::net::SocketAddr;
use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};

use krpc_encoding::{Message, MessageType, Query, Response};

use crate::errors::{ErrorKind, Result};
use crate::socket::KrpcSocket;
use crate::transaction::{self, ActiveTransactions, DEFAULT_TIMEOUT};

/// Sends a query and awaits its response, start to finish: allocates a
/// transaction, encodes and sends the request, waits (bounded by
/// `timeout`) for a matching reply, and surfaces protocol-level `KRPCError`s
/// as `Err`.
pub async fn query(
    socket: &KrpcSocket,
    transactions: &ActiveTransactions,
    to: SocketAddr,
    q: Query,
    timeout: Duration,
) -> Result<Response> {
    let (id, rx) = transactions.allocate(to, timeout);
    let mut tid_bytes = [0u8; 2];
    BigEndian::write_u16(&mut tid_bytes, id);

    let message = Message::query(tid_bytes.to_vec(), q);
    if let Err(e) = socket.send_query(&message, to).await {
        transactions.drop_transaction(id, to);
        return Err(e);
    }

    let reply = transaction::await_reply(transactions, id, to, rx, timeout).await?;
    match reply.message_type {
        MessageType::Response { response } => Ok(response),
        MessageType::Error { error } => Err(ErrorKind::RemoteError { from: to, error }.into()),
        MessageType::Query { .. } => Err(ErrorKind::MalformedMessage { from: to }.into()),
    }
}

pub fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}
