//! # Observer Registry
//!
//! User-registered callbacks that are told about membership and metadata
//! changes. The registry is shared between the provider (which owns the
//! registration API) and the backend engine (which produces the events).
//!
//! Registrations are keyed by a caller-chosen token; registering under an
//! existing token replaces both callbacks. Dispatch holds the read lock,
//! so an observer may add or remove *other* observers only from a distinct
//! task. For a fixed member, notifications arrive in the order the local
//! engine transitioned that member's state.
//!
//! Observers run inline on the engine's task: keep them short, or hand the
//! event off to your own channel.

use std::sync::Arc;

use parking_lot::RwLock;

/// What happened to a member, from this provider's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipUpdate {
    /// A new member appeared in the view.
    Joined,
    /// A member left gracefully.
    Left,
    /// A member was declared dead by the failure detector.
    Died,
    /// A member changed address or provider id.
    Moved,
}

/// Callback for membership events: `(update, address, provider_id)`.
pub type MembershipCallback = Arc<dyn Fn(MembershipUpdate, &str, u16) + Send + Sync>;

/// Callback for metadata updates: `(key, value)`.
pub type MetadataCallback = Arc<dyn Fn(&str, &str) + Send + Sync>;

struct ObserverEntry {
    key: u64,
    membership: MembershipCallback,
    metadata: MetadataCallback,
}

/// The set of registered observers for one provider.
#[derive(Default)]
pub struct ObserverRegistry {
    entries: RwLock<Vec<ObserverEntry>>,
}

impl ObserverRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the observer under `key`.
    pub fn add_callbacks(
        &self,
        key: u64,
        membership: MembershipCallback,
        metadata: MetadataCallback,
    ) {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| e.key == key) {
            existing.membership = membership;
            existing.metadata = metadata;
            return;
        }
        entries.push(ObserverEntry {
            key,
            membership,
            metadata,
        });
    }

    /// Removes the observer under `key`. Returns `true` if it existed.
    pub fn remove_callbacks(&self, key: u64) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.key != key);
        entries.len() != before
    }

    /// Notifies every observer of a membership event.
    pub fn notify_membership(&self, update: MembershipUpdate, address: &str, provider_id: u16) {
        let entries = self.entries.read();
        for entry in entries.iter() {
            (entry.membership)(update, address, provider_id);
        }
    }

    /// Notifies every observer of a metadata update.
    pub fn notify_metadata(&self, key: &str, value: &str) {
        let entries = self.entries.read();
        for entry in entries.iter() {
            (entry.metadata)(key, value);
        }
    }

    /// Number of registered observers.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nobody is listening.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A metadata callback that ignores everything, for observers that only
/// care about membership.
pub fn noop_metadata() -> MetadataCallback {
    Arc::new(|_, _| {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[test]
    fn all_observers_are_notified() {
        let registry = ObserverRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        for key in 0..3 {
            let count = Arc::clone(&count);
            registry.add_callbacks(
                key,
                Arc::new(move |_, _, _| {
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                noop_metadata(),
            );
        }

        registry.notify_membership(MembershipUpdate::Joined, "a", 0);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn same_key_replaces() {
        let registry = ObserverRegistry::new();
        let hits_old = Arc::new(AtomicUsize::new(0));
        let hits_new = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&hits_old);
            registry.add_callbacks(
                7,
                Arc::new(move |_, _, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
                noop_metadata(),
            );
        }
        {
            let hits = Arc::clone(&hits_new);
            registry.add_callbacks(
                7,
                Arc::new(move |_, _, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
                noop_metadata(),
            );
        }

        registry.notify_membership(MembershipUpdate::Died, "a", 0);
        assert_eq!(registry.len(), 1);
        assert_eq!(hits_old.load(Ordering::SeqCst), 0);
        assert_eq!(hits_new.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_unregisters() {
        let registry = ObserverRegistry::new();
        registry.add_callbacks(1, Arc::new(|_, _, _| {}), noop_metadata());
        assert!(registry.remove_callbacks(1));
        assert!(!registry.remove_callbacks(1));
        assert!(registry.is_empty());
    }

    #[test]
    fn events_arrive_in_emission_order() {
        let registry = ObserverRegistry::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let log = Arc::clone(&log);
            registry.add_callbacks(
                1,
                Arc::new(move |update, _, _| {
                    log.lock().unwrap().push(update);
                }),
                noop_metadata(),
            );
        }

        registry.notify_membership(MembershipUpdate::Joined, "m", 0);
        registry.notify_membership(MembershipUpdate::Died, "m", 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec![MembershipUpdate::Joined, MembershipUpdate::Died]
        );
    }

    #[test]
    fn metadata_dispatch() {
        let registry = ObserverRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            registry.add_callbacks(
                1,
                Arc::new(|_, _, _| {}),
                Arc::new(move |k, v| {
                    seen.lock().unwrap().push((k.to_string(), v.to_string()));
                }),
            );
        }
        registry.notify_metadata("__type__", "swim");
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("__type__".to_string(), "swim".to_string())]
        );
    }
}
