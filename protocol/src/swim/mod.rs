//! # SWIM Failure Detector
//!
//! The gossip-based membership backend: Scalable Weakly-consistent
//! Infection-style process group Membership, adapted to provider-addressed
//! RPC.
//!
//! ```text
//! messages.rs — ping / ping_req / announce payload types
//! engine.rs   — the protocol engine: probe rounds, suspicion, refutation
//! ```
//!
//! Every protocol period the engine probes one peer, chosen by walking a
//! shuffled permutation of the view so a full cycle touches every member
//! exactly once. A peer that misses its direct ping gets k indirect
//! chances through randomly chosen helpers before being SUSPECTED; a
//! suspect that stays silent past the suspicion timeout is CONFIRMED dead
//! and removed. Every RPC piggybacks a handful of gossip entries, which is
//! the only dissemination mechanism — there is no broadcast anywhere in
//! the protocol.
//!
//! Contradictory claims about a member are ordered by that member's own
//! incarnation number: higher wins, and at equal incarnation ALIVE loses
//! to SUSPECT loses to CONFIRM. A member that hears itself suspected bumps
//! its incarnation and gossips ALIVE at the new value, which outranks the
//! stale suspicion everywhere it travels.

mod engine;
mod messages;

pub use engine::{MemberStatus, SwimBackend, SwimConfig};
pub use messages::{
    AnnounceRequest, PingRequest, PingReqRequest, PingReqResponse, PingResponse, ANNOUNCE_RPC,
    PING_REQ_RPC, PING_RPC,
};
