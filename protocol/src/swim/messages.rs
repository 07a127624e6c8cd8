//! # SWIM RPC Payloads
//!
//! The three SWIM RPCs and their JSON payloads. Every payload carries a
//! piggyback `gossip` field — dissemination rides on the probes, never on
//! dedicated traffic. The field defaults to empty on decode so a peer
//! with nothing to say sends nothing.

use serde::{Deserialize, Serialize};

use crate::gossip::{GossipEntry, GossipKind};

/// Direct probe RPC name.
pub const PING_RPC: &str = "roster_swim_ping";
/// Indirect probe RPC name.
pub const PING_REQ_RPC: &str = "roster_swim_ping_req";
/// Join/leave announcement RPC name.
pub const ANNOUNCE_RPC: &str = "roster_swim_announce";

/// Direct probe. Responding at all is the liveness proof; the payload
/// exists to exchange incarnations and gossip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest {
    /// The prober's own incarnation.
    pub sender_incarnation: u64,
    /// Piggybacked membership events.
    #[serde(default)]
    pub gossip: Vec<GossipEntry>,
}

/// Response to a direct probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingResponse {
    /// The responder's authoritative incarnation.
    pub responder_incarnation: u64,
    #[serde(default)]
    pub gossip: Vec<GossipEntry>,
}

/// Indirect probe: "please ping this target for me".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingReqRequest {
    /// Address of the member to probe.
    pub target_address: String,
    /// Provider id of the member to probe.
    pub target_provider_id: u16,
    /// The original prober's incarnation.
    pub sender_incarnation: u64,
    #[serde(default)]
    pub gossip: Vec<GossipEntry>,
}

/// What the helper learned. `target_incarnation` is only meaningful when
/// `target_responded` is true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingReqResponse {
    /// Whether the target answered the helper's ping.
    pub target_responded: bool,
    /// The target's incarnation, if it responded.
    pub target_incarnation: u64,
    #[serde(default)]
    pub gossip: Vec<GossipEntry>,
}

/// Join or leave announcement, sent by the subject itself to a bounded
/// sample of known peers. The receiver treats it as one extra gossip
/// entry; the response carries nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRequest {
    /// [`GossipKind::Join`] or [`GossipKind::Leave`].
    pub kind: GossipKind,
    /// The announcing member's address.
    pub address: String,
    /// The announcing member's provider id.
    pub provider_id: u16,
    /// The announcing member's incarnation.
    pub incarnation: u64,
    #[serde(default)]
    pub gossip: Vec<GossipEntry>,
}
