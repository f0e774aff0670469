//! Fixed-depth Kademlia routing table over a 160-bit id space.

mod bucket;
mod contact;
mod distance;
mod table;

pub use bucket::{Bucket, K};
pub use contact::{Contact, Reachability};
pub use distance::Distance;
pub use table::{InsertOutcome, RoutingTable, DEFAULT_T_BUCKET, DEFAULT_T_GOOD, NUM_BUCKETS};
