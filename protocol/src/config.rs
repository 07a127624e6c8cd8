//! # Protocol Configuration & Constants
//!
//! Every tunable default in Roster lives here. If you're hardcoding a
//! timeout somewhere else, you're doing it wrong and you owe the team
//! coffee.
//!
//! The SWIM timing knobs interact: a member is declared dead no earlier
//! than `suspicion_timeout` after its first failed probe round, and no
//! later than one extra protocol period past that. Detection latency and
//! false-positive rate trade off through these values — shrink them for
//! tests, keep the defaults for deployments.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// The protocol version string, assembled at compile time so we don't
/// allocate for something this trivial at runtime.
pub const PROTOCOL_VERSION: &str = "0.1.0";

// ---------------------------------------------------------------------------
// SWIM Defaults
// ---------------------------------------------------------------------------

/// Period of the SWIM protocol timer. One probe round per period.
pub const DEFAULT_PROTOCOL_PERIOD_MS: u64 = 1000;

/// Timeout on a direct ping. Well under the protocol period so a failed
/// direct probe still leaves room for the indirect round.
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 200;

/// Timeout on an indirect ping (the helper needs time for its own ping).
pub const DEFAULT_PING_REQ_TIMEOUT_MS: u64 = 500;

/// Number of helpers asked to probe on our behalf when a direct ping
/// times out. The SWIM paper calls this k.
pub const DEFAULT_PING_REQ_MEMBERS: usize = 3;

/// Grace period between SUSPECTED and CONFIRMED_DEAD.
pub const DEFAULT_SUSPICION_TIMEOUT_MS: u64 = 5000;

/// Maximum number of gossip entries piggybacked on any single RPC.
/// A performance knob, not a correctness property; must be at least 8.
pub const MAX_GOSSIP_ENTRIES: usize = 8;

/// Timeout on join/leave announcements. Announcements are best-effort —
/// the gossip stream repairs anything a lost announce would have told.
pub const ANNOUNCE_TIMEOUT: Duration = Duration::from_millis(1000);

// ---------------------------------------------------------------------------
// Centralized Defaults
// ---------------------------------------------------------------------------

/// Timeout on a primary-to-secondary ping.
pub const DEFAULT_CENTRALIZED_PING_TIMEOUT_MS: u64 = 1000;

/// Default ping interval for the centralized backend. Used for both ends
/// of the interval range when the configuration gives a single number.
pub const DEFAULT_CENTRALIZED_PING_INTERVAL_MS: u64 = 1000;

/// Consecutive ping timeouts before the primary declares a secondary dead.
pub const DEFAULT_PING_MAX_NUM_TIMEOUTS: u32 = 3;

// ---------------------------------------------------------------------------
// Reserved Metadata Keys
// ---------------------------------------------------------------------------

/// Reserved metadata key holding the backend identifier ("swim",
/// "centralized", "static"). Written by every backend at init.
pub const METADATA_TYPE_KEY: &str = "__type__";

/// Reserved metadata key holding the serialized backend configuration.
pub const METADATA_CONFIG_KEY: &str = "__config__";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_timeouts_fit_in_protocol_period() {
        // A direct probe plus an indirect round must fit into one period,
        // otherwise rounds pile up on a slow member.
        assert!(DEFAULT_PING_TIMEOUT_MS + DEFAULT_PING_REQ_TIMEOUT_MS <= DEFAULT_PROTOCOL_PERIOD_MS);
    }

    #[test]
    fn gossip_limit_meets_floor() {
        assert!(MAX_GOSSIP_ENTRIES >= 8);
    }
}
