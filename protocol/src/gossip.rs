//! # Gossip Buffer
//!
//! A bounded multiset of pending membership events awaiting piggyback
//! dissemination. Every probe and announcement carries up to
//! [`MAX_GOSSIP_ENTRIES`](crate::config::MAX_GOSSIP_ENTRIES) entries drawn
//! from this buffer; an entry rides along until it has been transmitted
//! `3·⌈log2(n)⌉` times, which disseminates it through a group of size n
//! with high probability while bounding per-event network cost.
//!
//! ## Merge rule
//!
//! The buffer holds at most one entry per member. Adding an entry for a
//! member that already has one *merges*: the claim with the higher
//! incarnation survives, and at equal incarnation the higher-priority kind
//! wins (Confirm beats Suspect beats Alive). A merge that upgrades the
//! stored claim resets its transmission count — newer news must be
//! re-disseminated. A duplicate add with identical kind and incarnation
//! changes nothing: duplicate gossip does not earn extra transmissions.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A membership event kind, ordered by merge priority.
///
/// The derived order matters: at equal incarnation, a higher variant
/// overrides a lower one in the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GossipKind {
    /// The member is alive at the given incarnation.
    Alive,
    /// The member is suspected of having failed.
    Suspect,
    /// The member's death has been confirmed.
    Confirm,
    /// The member joined the group.
    Join,
    /// The member left the group gracefully.
    Leave,
}

/// A single membership event queued for piggyback dissemination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GossipEntry {
    /// What happened.
    pub kind: GossipKind,
    /// Subject member's address.
    pub address: String,
    /// Subject member's provider id.
    pub provider_id: u16,
    /// The incarnation to which this claim pertains.
    pub incarnation: u64,
}

/// Transmission budget for one event in a group of `group_size` members:
/// `3·⌈log2(n)⌉`, with a floor of 1 for trivial groups.
pub fn compute_max_gossip(group_size: usize) -> u32 {
    if group_size <= 1 {
        return 1;
    }
    let ceil_log2 = usize::BITS - (group_size - 1).leading_zeros();
    ceil_log2 * 3
}

struct BufferedEntry {
    entry: GossipEntry,
    gossip_count: u32,
    max_gossip: u32,
}

struct BufferState {
    // Newest entries at the front; gather serves front-first so fresh
    // events (which have been transmitted least) go out first.
    entries: Vec<BufferedEntry>,
    group_size: usize,
}

/// Thread-safe buffer of pending gossip. All operations are atomic.
pub struct GossipBuffer {
    state: Mutex<BufferState>,
}

impl Default for GossipBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl GossipBuffer {
    /// Creates an empty buffer assuming a trivial group until
    /// [`set_group_size`](Self::set_group_size) says otherwise.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BufferState {
                entries: Vec::new(),
                group_size: 1,
            }),
        }
    }

    /// Adds an event, merging with any stored entry for the same member.
    pub fn add(&self, entry: GossipEntry) {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .entries
            .iter_mut()
            .find(|e| e.entry.address == entry.address && e.entry.provider_id == entry.provider_id)
        {
            let upgrades = entry.incarnation > existing.entry.incarnation
                || (entry.incarnation == existing.entry.incarnation
                    && entry.kind > existing.entry.kind);
            if upgrades {
                existing.entry.kind = entry.kind;
                existing.entry.incarnation = entry.incarnation;
                existing.gossip_count = 0;
            }
            return;
        }
        let max_gossip = compute_max_gossip(state.group_size);
        state.entries.insert(
            0,
            BufferedEntry {
                entry,
                gossip_count: 0,
                max_gossip,
            },
        );
    }

    /// Collects up to `limit` entries that still have transmission budget,
    /// charging one transmission to each returned entry.
    pub fn gather(&self, limit: usize) -> Vec<GossipEntry> {
        let mut state = self.state.lock();
        let mut out = Vec::with_capacity(limit.min(state.entries.len()));
        for buffered in state.entries.iter_mut() {
            if out.len() == limit {
                break;
            }
            if buffered.gossip_count < buffered.max_gossip {
                out.push(buffered.entry.clone());
                buffered.gossip_count += 1;
            }
        }
        out
    }

    /// Records the current group size, retuning every entry's transmission
    /// budget to match.
    pub fn set_group_size(&self, group_size: usize) {
        let mut state = self.state.lock();
        state.group_size = group_size;
        let max_gossip = compute_max_gossip(group_size);
        for buffered in state.entries.iter_mut() {
            buffered.max_gossip = max_gossip;
        }
    }

    /// Drops entries whose transmission budget is exhausted.
    pub fn cleanup(&self) {
        let mut state = self.state.lock();
        state
            .entries
            .retain(|e| e.gossip_count < e.max_gossip);
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True when no events are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(kind: GossipKind, address: &str, incarnation: u64) -> GossipEntry {
        GossipEntry {
            kind,
            address: address.to_string(),
            provider_id: 0,
            incarnation,
        }
    }

    #[test]
    fn max_gossip_follows_group_size() {
        assert_eq!(compute_max_gossip(0), 1);
        assert_eq!(compute_max_gossip(1), 1);
        assert_eq!(compute_max_gossip(2), 3);
        assert_eq!(compute_max_gossip(3), 6);
        assert_eq!(compute_max_gossip(4), 6);
        assert_eq!(compute_max_gossip(5), 9);
        assert_eq!(compute_max_gossip(1024), 30);
    }

    #[test]
    fn gather_charges_transmissions_until_budget_exhausted() {
        let buffer = GossipBuffer::new();
        buffer.set_group_size(2); // budget of 3 per entry
        buffer.add(entry(GossipKind::Alive, "a", 1));

        for _ in 0..3 {
            assert_eq!(buffer.gather(8).len(), 1);
        }
        // Budget exhausted: nothing left to piggyback.
        assert!(buffer.gather(8).is_empty());

        buffer.cleanup();
        assert!(buffer.is_empty());
    }

    #[test]
    fn gather_respects_limit() {
        let buffer = GossipBuffer::new();
        buffer.set_group_size(8);
        for i in 0..5 {
            buffer.add(entry(GossipKind::Alive, &format!("m{i}"), 1));
        }
        assert_eq!(buffer.gather(3).len(), 3);
    }

    #[test]
    fn higher_incarnation_wins_and_resets_count() {
        let buffer = GossipBuffer::new();
        buffer.set_group_size(2);
        buffer.add(entry(GossipKind::Alive, "a", 1));
        assert_eq!(buffer.gather(8).len(), 1); // count = 1

        buffer.add(entry(GossipKind::Alive, "a", 2));
        // The upgraded claim starts a fresh budget of 3.
        for _ in 0..3 {
            let gathered = buffer.gather(8);
            assert_eq!(gathered.len(), 1);
            assert_eq!(gathered[0].incarnation, 2);
        }
        assert!(buffer.gather(8).is_empty());
    }

    #[test]
    fn equal_incarnation_priority_upgrade() {
        let buffer = GossipBuffer::new();
        buffer.add(entry(GossipKind::Suspect, "a", 5));
        buffer.add(entry(GossipKind::Confirm, "a", 5));
        let gathered = buffer.gather(8);
        assert_eq!(gathered[0].kind, GossipKind::Confirm);

        // A downgrade at the same incarnation is ignored.
        buffer.add(entry(GossipKind::Alive, "a", 5));
        let gathered = buffer.gather(8);
        assert_eq!(gathered[0].kind, GossipKind::Confirm);
    }

    #[test]
    fn duplicate_add_does_not_reset_count() {
        let buffer = GossipBuffer::new();
        buffer.set_group_size(2); // budget 3
        buffer.add(entry(GossipKind::Suspect, "a", 7));
        buffer.gather(8);
        buffer.gather(8); // count = 2

        // Same kind, same incarnation: the stored count must survive.
        buffer.add(entry(GossipKind::Suspect, "a", 7));
        assert_eq!(buffer.gather(8).len(), 1); // count = 3, budget spent
        assert!(buffer.gather(8).is_empty());
    }

    #[test]
    fn one_entry_per_member() {
        let buffer = GossipBuffer::new();
        buffer.add(entry(GossipKind::Alive, "a", 1));
        buffer.add(entry(GossipKind::Suspect, "a", 1));
        buffer.add(entry(GossipKind::Alive, "b", 1));
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn shrinking_group_size_retires_entries_at_cleanup() {
        let buffer = GossipBuffer::new();
        buffer.set_group_size(1024); // budget 30
        buffer.add(entry(GossipKind::Alive, "a", 1));
        for _ in 0..5 {
            buffer.gather(8);
        }
        buffer.set_group_size(2); // budget drops to 3, below current count
        buffer.cleanup();
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_address_is_legal() {
        let buffer = GossipBuffer::new();
        buffer.add(entry(GossipKind::Alive, "", 1));
        assert_eq!(buffer.gather(8).len(), 1);
    }
}
