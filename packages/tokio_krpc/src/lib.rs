//! Async KRPC transport: a rate-limited UDP socket plus the transaction
//! table that correlates replies to outstanding requests.

pub mod errors;
mod querier;
mod socket;
mod transaction;

pub use errors::{Error, ErrorKind, Result};
pub use querier::{default_timeout, query};
pub use socket::KrpcSocket;
pub use transaction::{ActiveTransactions, TransactionId, DEFAULT_TIMEOUT};
