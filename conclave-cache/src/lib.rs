//! # conclave-cache
//!
//! The bounded, adaptive message cache of the conclave consensus core.
//!
//! Every consensus round that is in flight — or recently decided and
//! still useful for retransmission and catch-up — owns one
//! [`PaxMachine`](conclave_paxos::PaxMachine). This crate pools those
//! machines: it resolves a synode to its machine, bounds the memory the
//! pooled machines' payloads consume, and decides what history is safe
//! to forget.
//!
//! ## Structure
//!
//! ```text
//!            ┌───────────────────────────────────────────────┐
//!            │                 Cache                          │
//!            │                                               │
//!  synode ──>│ hash shards (newest→oldest by msgno range)    │
//!            │   shard: start_msgno, bucket chains            │
//!            │                                               │
//!            │ slot arena                                    │
//!            │   ┌─────────────┐  ┌──────────────────────┐   │
//!            │   │ probation   │  │ protected            │   │
//!            │   │ (free slots)│  │ (in use, MRU→LRU)    │   │
//!            │   └─────────────┘  └──────────────────────┘   │
//!            └───────────────────────────────────────────────┘
//! ```
//!
//! - Lookups walk the shard stack to the shard covering the synode's
//!   message number, then its bucket chain. Growth appends a shard for
//!   new high-numbered traffic instead of rehashing old entries; a fully
//!   vacated oldest shard is dropped whole.
//! - Misses take a slot from probation, or reclaim the least-recently
//!   used non-busy protected slot whose round is provably delivered
//!   everywhere.
//! - [`Cache::shrink`] enforces the byte limit; [`Cache::check_decrease`]
//!   gives back slot capacity after sustained low occupancy. The
//!   [`maintenance`] task alternates between them on a timer.
//!
//! ## Concurrency
//!
//! The cache assumes one cooperative context: operations are synchronous,
//! bounded, in-memory, and must not be interleaved. Share it as
//! `Rc<RefCell<Cache>>` within one task context (what
//! [`maintenance::run_maintenance`] expects), or put it behind your own
//! exclusive lock.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

mod cache;
mod config;
mod lru;
pub mod maintenance;
mod shard;

pub use cache::Cache;
pub use config::{CacheConfig, UNLIMITED};
