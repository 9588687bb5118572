//! # conclave-paxos
//!
//! The Paxos message and state-machine layer of the conclave
//! group-communication core.
//!
//! Each consensus round is addressed by a [`Synode`](conclave_core::Synode)
//! and runs the classic three-role protocol. One [`PaxMachine`] holds all
//! three roles' sub-state for one synode, because a node routinely plays
//! several roles in the same round:
//!
//! ```text
//!                  ┌──────────────────────────────────────┐
//!                  │          PaxMachine (one synode)      │
//!                  │                                      │
//!   Prepare ──────>│ Acceptor: promise ballot, accepted   │──> AckPrepare
//!   Accept  ──────>│           message                    │──> AckAccept
//!                  │                                      │
//!   acks ─────────>│ Proposer: ballot, prepare/accept     │──> Accept/Learn
//!                  │           ack node-sets              │
//!                  │                                      │
//!   Learn ────────>│ Learner:  decided message            │    (delivered)
//!                  └──────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! Messages are shared between a machine's roles, the cache, and in-flight
//! network buffers through [`MsgRef`] handles. Cloning a handle replaces
//! the manual "ref" of a hand-counted scheme; dropping the last handle
//! frees the message exactly once. Statically owned messages
//! ([`MsgRef::from_static`]) are never freed and their handles count
//! nothing.
//!
//! ## Crate Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`app_data`] | Client payload variants and the payload list |
//! | [`msg`] | Operation tags, the wire message, and `MsgRef` |
//! | [`machine`] | `PaxMachine`: per-synode role state, lock, reset |
//! | [`dispatch`] | Phase handlers driving machines from messages |

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]

pub mod app_data;
pub mod dispatch;
pub mod machine;
pub mod msg;

pub use app_data::{AppData, AppDataList, Payload};
pub use machine::{Acceptor, Learner, PaxMachine, PaxState, Proposer};
pub use msg::{MsgRef, MsgType, PaxMsg, PaxOp};
