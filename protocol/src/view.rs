//! # Group View
//!
//! The local snapshot of one group: an ordered set of members plus an
//! ordered map of group-level metadata, stamped with a 64-bit digest that
//! changes on every mutation.
//!
//! Members are kept sorted by `(address, provider_id)` so lookups are
//! binary searches, scans stay cache-friendly, and serialization is
//! deterministic — two replicas holding identical content produce
//! identical bytes and identical digests.
//!
//! ## Per-member extra state
//!
//! The view is generic over a per-member payload `E` owned by the view.
//! Backends hang their bookkeeping off it (SWIM stores status, incarnation
//! and suspicion deadline there). The payload is dropped exactly once when
//! its member is removed or the view is cleared — `Drop` is the release
//! hook.
//!
//! ## Locking
//!
//! `GroupView` is not internally synchronized. Owners wrap it in a
//! `parking_lot::Mutex`; the digest is only meaningful while that lock is
//! held, so readers either copy under the lock or treat the digest as a
//! snapshot token.

/// One participating endpoint: a transport address plus a provider id
/// disambiguating multiple providers on the same endpoint.
///
/// Two members are equal iff both fields are equal. There is no notion of
/// rank in the core; positional indices are a backend-local concern.
#[derive(Debug)]
pub struct Member<E> {
    /// Opaque string identifying the transport endpoint.
    pub address: String,
    /// Disambiguates multiple providers per endpoint.
    pub provider_id: u16,
    /// Backend-owned state, dropped when the member leaves the view.
    pub extra: E,
}

impl<E> Member<E> {
    /// The member's identity as a borrowed key.
    pub fn key(&self) -> (&str, u16) {
        (&self.address, self.provider_id)
    }
}

/// The local snapshot of members and metadata for a group.
pub struct GroupView<E> {
    members: Vec<Member<E>>,
    metadata: Vec<(String, String)>,
    digest: u64,
}

impl<E> Default for GroupView<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> GroupView<E> {
    /// Creates an empty view with digest 0.
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            metadata: Vec::new(),
            digest: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    /// Adds a member, keeping the array sorted. If a member with the same
    /// `(address, provider_id)` already exists, the call is a no-op (the
    /// provided `extra` is dropped) and the existing entry is returned —
    /// contents and digest are unchanged.
    pub fn add_member(&mut self, address: &str, provider_id: u16, extra: E) -> &mut Member<E> {
        match self.member_index(address, provider_id) {
            Ok(idx) => &mut self.members[idx],
            Err(pos) => {
                self.members.insert(
                    pos,
                    Member {
                        address: address.to_string(),
                        provider_id,
                        extra,
                    },
                );
                self.digest ^= member_hash(address, provider_id);
                &mut self.members[pos]
            }
        }
    }

    /// Removes a member by key, dropping its extra state. Returns `true`
    /// on removal, `false` if no such member exists.
    pub fn remove_member(&mut self, address: &str, provider_id: u16) -> bool {
        match self.member_index(address, provider_id) {
            Ok(idx) => {
                self.members.remove(idx);
                self.digest ^= member_hash(address, provider_id);
                true
            }
            Err(_) => false,
        }
    }

    /// Finds a member by key.
    pub fn find_member(&self, address: &str, provider_id: u16) -> Option<&Member<E>> {
        self.member_index(address, provider_id)
            .ok()
            .map(|idx| &self.members[idx])
    }

    /// Finds a member by key, with mutable access to its extra state.
    /// Mutating `extra` does not affect the digest — only membership and
    /// metadata are content.
    pub fn find_member_mut(&mut self, address: &str, provider_id: u16) -> Option<&mut Member<E>> {
        match self.member_index(address, provider_id) {
            Ok(idx) => Some(&mut self.members[idx]),
            Err(_) => None,
        }
    }

    /// Returns the member at a positional index, if any.
    pub fn member_at(&self, index: usize) -> Option<&Member<E>> {
        self.members.get(index)
    }

    /// Mutable access by positional index.
    pub fn member_at_mut(&mut self, index: usize) -> Option<&mut Member<E>> {
        self.members.get_mut(index)
    }

    /// The sorted member slice.
    pub fn members(&self) -> &[Member<E>] {
        &self.members
    }

    /// Number of members in the view.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if the view holds no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Binary search for a member key. `Ok(idx)` when present, `Err(pos)`
    /// with the insertion position when absent.
    fn member_index(&self, address: &str, provider_id: u16) -> Result<usize, usize> {
        self.members
            .binary_search_by(|m| (m.address.as_str(), m.provider_id).cmp(&(address, provider_id)))
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Sets a metadata key, replacing any prior value.
    pub fn set_metadata(&mut self, key: &str, value: &str) {
        match self
            .metadata
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
        {
            Ok(idx) => {
                self.digest ^= metadata_hash(key, &self.metadata[idx].1);
                self.metadata[idx].1 = value.to_string();
            }
            Err(pos) => {
                self.metadata.insert(pos, (key.to_string(), value.to_string()));
            }
        }
        self.digest ^= metadata_hash(key, value);
    }

    /// Removes a metadata key. Returns `true` if the key existed.
    pub fn remove_metadata(&mut self, key: &str) -> bool {
        match self
            .metadata
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
        {
            Ok(idx) => {
                let (k, v) = self.metadata.remove(idx);
                self.digest ^= metadata_hash(&k, &v);
                true
            }
            Err(_) => false,
        }
    }

    /// Looks up a metadata value.
    pub fn find_metadata(&self, key: &str) -> Option<&str> {
        self.metadata
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .map(|idx| self.metadata[idx].1.as_str())
    }

    /// The sorted metadata entries.
    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    // -----------------------------------------------------------------------
    // Whole-view operations
    // -----------------------------------------------------------------------

    /// Empties members and metadata, dropping every member's extra state,
    /// and resets the digest to 0.
    pub fn clear(&mut self) {
        self.members.clear();
        self.metadata.clear();
        self.digest = 0;
    }

    /// The 64-bit change token for the current contents. Identical content
    /// yields an identical digest; any membership or metadata mutation
    /// flips it with overwhelming probability.
    pub fn digest(&self) -> u64 {
        self.digest
    }
}

/// Hash of one member entry, domain-separated from metadata hashes.
fn member_hash(address: &str, provider_id: u16) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"m");
    hasher.update(&(address.len() as u64).to_le_bytes());
    hasher.update(address.as_bytes());
    hasher.update(&provider_id.to_le_bytes());
    truncate_hash(hasher.finalize())
}

/// Hash of one metadata pair.
fn metadata_hash(key: &str, value: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"k");
    hasher.update(&(key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update(value.as_bytes());
    truncate_hash(hasher.finalize())
}

fn truncate_hash(hash: blake3::Hash) -> u64 {
    let bytes = hash.as_bytes();
    u64::from_le_bytes(bytes[..8].try_into().expect("blake3 output >= 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view_of(keys: &[(&str, u16)]) -> GroupView<()> {
        let mut view = GroupView::new();
        for (addr, pid) in keys {
            view.add_member(addr, *pid, ());
        }
        view
    }

    #[test]
    fn members_stay_sorted_and_unique() {
        let view = view_of(&[("c", 1), ("a", 2), ("b", 0), ("a", 1), ("a", 2)]);
        let keys: Vec<(&str, u16)> = view.members().iter().map(|m| m.key()).collect();
        assert_eq!(keys, vec![("a", 1), ("a", 2), ("b", 0), ("c", 1)]);
    }

    #[test]
    fn duplicate_add_is_a_noop() {
        let mut view = view_of(&[("a", 1), ("b", 2)]);
        let digest = view.digest();
        view.add_member("a", 1, ());
        assert_eq!(view.len(), 2);
        assert_eq!(view.digest(), digest);
    }

    #[test]
    fn remove_twice_returns_false_without_mutation() {
        let mut view = view_of(&[("a", 1), ("b", 2)]);
        assert!(view.remove_member("a", 1));
        let digest = view.digest();
        assert!(!view.remove_member("a", 1));
        assert_eq!(view.digest(), digest);
        assert_eq!(view.len(), 1);
    }

    #[test]
    fn digest_changes_on_every_mutation() {
        let mut view = GroupView::new();
        let d0 = view.digest();

        view.add_member("a", 1, ());
        let d1 = view.digest();
        assert_ne!(d0, d1);

        view.set_metadata("color", "green");
        let d2 = view.digest();
        assert_ne!(d1, d2);

        view.set_metadata("color", "blue");
        let d3 = view.digest();
        assert_ne!(d2, d3);

        view.remove_metadata("color");
        view.remove_member("a", 1);
        assert_eq!(view.digest(), d0);
    }

    #[test]
    fn identical_content_has_identical_digest() {
        let mut a = GroupView::new();
        let mut b = GroupView::new();
        // Different insertion orders, same content.
        a.add_member("x", 1, ());
        a.add_member("y", 2, ());
        a.set_metadata("k1", "v1");
        a.set_metadata("k2", "v2");
        b.set_metadata("k2", "v2");
        b.add_member("y", 2, ());
        b.set_metadata("k1", "v1");
        b.add_member("x", 1, ());
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn metadata_replaces_on_existing_key() {
        let mut view: GroupView<()> = GroupView::new();
        view.set_metadata("owner", "matthieu");
        view.set_metadata("owner", "shane");
        assert_eq!(view.find_metadata("owner"), Some("shane"));
        assert_eq!(view.metadata().len(), 1);
    }

    #[test]
    fn metadata_keys_stay_sorted() {
        let mut view: GroupView<()> = GroupView::new();
        view.set_metadata("zulu", "1");
        view.set_metadata("alpha", "2");
        view.set_metadata("mike", "3");
        let keys: Vec<&str> = view.metadata().iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["alpha", "mike", "zulu"]);
    }

    #[test]
    fn extra_state_dropped_exactly_once_on_removal() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct Tracker(Arc<AtomicUsize>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let mut view = GroupView::new();
        view.add_member("a", 1, Tracker(Arc::clone(&drops)));
        view.add_member("b", 2, Tracker(Arc::clone(&drops)));

        view.remove_member("a", 1);
        assert_eq!(drops.load(Ordering::SeqCst), 1);

        view.clear();
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn member_at_covers_bounds() {
        let view = view_of(&[("a", 1)]);
        assert!(view.member_at(0).is_some());
        assert!(view.member_at(1).is_none());
    }

    #[test]
    fn empty_metadata_value_is_legal() {
        let mut view: GroupView<()> = GroupView::new();
        view.set_metadata("empty", "");
        assert_eq!(view.find_metadata("empty"), Some(""));
    }
}
