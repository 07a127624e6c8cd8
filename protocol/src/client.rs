//! # Client & Group Handle
//!
//! The thin client side: a [`GroupHandle`] caches the view of one group,
//! refreshed on demand from any reachable provider. The cached digest
//! rides along on every refresh so an unchanged view costs one tiny RPC
//! and no payload.
//!
//! Handles are cheap to clone — clones share the cache — and the cache is
//! dropped with the last clone. A failed refresh leaves the cache exactly
//! as it was.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::GroupError;
use crate::provider::{GetViewRequest, GetViewResponse, GET_VIEW_RPC};
use crate::serialize::{WireMember, WireView};
use crate::transport::RpcTransport;

/// Timeout on a view refresh.
const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether creating a handle performs an immediate refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleMode {
    /// Seed the cache with just the provider's own entry; refresh later.
    Lazy,
    /// Fetch the live view before returning the handle.
    InitUpdate,
}

/// Factory for group handles over one transport.
pub struct GroupClient {
    transport: Arc<dyn RpcTransport>,
}

impl GroupClient {
    /// Creates a client on the given transport.
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// Creates a handle to the group served by the provider at
    /// `(address, provider_id)`.
    pub async fn group_handle(
        &self,
        address: &str,
        provider_id: u16,
        mode: HandleMode,
    ) -> Result<GroupHandle, GroupError> {
        let seed = WireView {
            members: vec![WireMember {
                address: address.to_string(),
                provider_id,
            }],
            metadata: Default::default(),
        };
        self.handle_from_seed(seed, mode).await
    }

    /// Creates a handle from a serialized view; the member at index 0 is
    /// the provider the handle talks to.
    pub async fn group_handle_from_serialized(
        &self,
        serialized: &str,
        mode: HandleMode,
    ) -> Result<GroupHandle, GroupError> {
        let seed = WireView::from_json(serialized)?;
        self.handle_from_seed(seed, mode).await
    }

    /// Creates a handle from a view file written by
    /// [`GroupHandle::serialize_to_file`] or the bootstrap tooling.
    pub async fn group_handle_from_file(
        &self,
        path: &Path,
        mode: HandleMode,
    ) -> Result<GroupHandle, GroupError> {
        let seed = WireView::read_from_file(path)?;
        self.handle_from_seed(seed, mode).await
    }

    async fn handle_from_seed(
        &self,
        seed: WireView,
        mode: HandleMode,
    ) -> Result<GroupHandle, GroupError> {
        let provider = seed.members[0].clone();
        let digest = seed.content_digest();
        let handle = GroupHandle {
            inner: Arc::new(HandleInner {
                transport: Arc::clone(&self.transport),
                provider_address: provider.address,
                provider_id: provider.provider_id,
                cache: Mutex::new(CachedView { view: seed, digest }),
            }),
        };
        if mode == HandleMode::InitUpdate {
            handle.update_view().await?;
        }
        Ok(handle)
    }
}

struct CachedView {
    view: WireView,
    digest: u64,
}

struct HandleInner {
    transport: Arc<dyn RpcTransport>,
    provider_address: String,
    provider_id: u16,
    cache: Mutex<CachedView>,
}

/// A cached view of one group, associated with one reachable provider.
#[derive(Clone)]
pub struct GroupHandle {
    inner: Arc<HandleInner>,
}

impl GroupHandle {
    /// Refreshes the cached view from the provider. If the provider's
    /// digest matches ours the cache is left alone; on any error the
    /// cache is left alone too.
    pub async fn update_view(&self) -> Result<(), GroupError> {
        let known_digest = self.inner.cache.lock().digest;
        let request = GetViewRequest { known_digest };
        let raw = self
            .inner
            .transport
            .call(
                &self.inner.provider_address,
                self.inner.provider_id,
                GET_VIEW_RPC,
                serde_json::to_vec(&request).expect("get_view request encodes"),
                UPDATE_TIMEOUT,
            )
            .await?;
        let response: GetViewResponse = serde_json::from_slice(&raw)?;

        if response.unchanged {
            debug!(digest = known_digest, "view cache is current");
            return Ok(());
        }
        let view = response
            .view
            .ok_or_else(|| GroupError::Other("provider sent neither view nor unchanged".into()))?;
        *self.inner.cache.lock() = CachedView {
            view,
            digest: response.digest,
        };
        Ok(())
    }

    /// A deep copy of the cached view.
    pub fn view(&self) -> WireView {
        self.inner.cache.lock().view.clone()
    }

    /// The cached digest token.
    pub fn digest(&self) -> u64 {
        self.inner.cache.lock().digest
    }

    /// Number of members in the cached view.
    pub fn live_member_count(&self) -> usize {
        self.inner.cache.lock().view.members.len()
    }

    /// A metadata value from the cached view.
    pub fn find_metadata(&self, key: &str) -> Option<String> {
        self.inner.cache.lock().view.metadata.get(key).cloned()
    }

    /// The cached view in canonical JSON.
    pub fn serialize(&self) -> String {
        self.inner.cache.lock().view.to_json()
    }

    /// Writes the cached view to a file, atomically.
    pub fn serialize_to_file(&self, path: &Path) -> Result<(), GroupError> {
        self.inner.cache.lock().view.write_to_file(path)
    }

    /// The provider this handle talks to.
    pub fn provider(&self) -> (&str, u16) {
        (&self.inner.provider_address, self.inner.provider_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{Provider, ProviderArgs};
    use crate::transport::MemoryNetwork;
    use serde_json::json;

    async fn static_provider(
        network: &Arc<MemoryNetwork>,
        address: &str,
    ) -> Arc<Provider> {
        Provider::start(ProviderArgs {
            transport: network.endpoint(address),
            provider_id: 0,
            config: json!({"group": {"type": "static"}, "bootstrap": "self"}),
            backend: None,
            observers: None,
            initial_view: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn init_update_fetches_the_live_view() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let client = GroupClient::new(network.endpoint("mem://c"));
        let handle = client
            .group_handle("mem://p", 0, HandleMode::InitUpdate)
            .await
            .unwrap();

        assert_eq!(handle.live_member_count(), 1);
        assert_eq!(handle.find_metadata("__type__").unwrap(), "static");
        assert_ne!(handle.digest(), 0);

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn lazy_handle_holds_only_the_seed() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let client = GroupClient::new(network.endpoint("mem://c"));
        let handle = client
            .group_handle("mem://p", 0, HandleMode::Lazy)
            .await
            .unwrap();
        assert!(handle.find_metadata("__type__").is_none());

        handle.update_view().await.unwrap();
        assert_eq!(handle.find_metadata("__type__").unwrap(), "static");

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn matching_digest_skips_the_payload() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let client = GroupClient::new(network.endpoint("mem://c"));
        let handle = client
            .group_handle("mem://p", 0, HandleMode::InitUpdate)
            .await
            .unwrap();
        let digest = handle.digest();

        // Second refresh with a current cache is a no-op.
        handle.update_view().await.unwrap();
        assert_eq!(handle.digest(), digest);

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn failed_update_leaves_cache_untouched() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let client = GroupClient::new(network.endpoint("mem://c"));
        let handle = client
            .group_handle("mem://p", 0, HandleMode::InitUpdate)
            .await
            .unwrap();
        let view_before = handle.view();

        provider.shutdown().await;
        network.kill("mem://p");

        assert!(handle.update_view().await.is_err());
        assert_eq!(handle.view(), view_before);
    }

    #[tokio::test]
    async fn serialized_round_trip_creates_equivalent_handle() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let client = GroupClient::new(network.endpoint("mem://c"));
        let handle = client
            .group_handle("mem://p", 0, HandleMode::InitUpdate)
            .await
            .unwrap();

        let serialized = handle.serialize();
        let restored = client
            .group_handle_from_serialized(&serialized, HandleMode::Lazy)
            .await
            .unwrap();
        assert_eq!(restored.view(), handle.view());
        assert_eq!(restored.digest(), handle.digest());
        assert_eq!(restored.provider().0, "mem://p");

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn clones_share_the_cache() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let client = GroupClient::new(network.endpoint("mem://c"));
        let handle = client
            .group_handle("mem://p", 0, HandleMode::Lazy)
            .await
            .unwrap();
        let clone = handle.clone();

        handle.update_view().await.unwrap();
        assert_eq!(clone.digest(), handle.digest());

        provider.shutdown().await;
    }
}
