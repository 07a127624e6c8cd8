//! # Backend Contract
//!
//! A backend is a pluggable implementation of membership tracking. The
//! provider owns exactly one; SWIM and centralized are the two real
//! detectors, and the static backend freezes whatever bootstrap produced.
//!
//! Backends are passed to the provider *by value* — construct one and hand
//! it over. The name-keyed [`start_backend`] registry exists for
//! configuration-driven selection (`"group": {"type": "swim"}`) and maps
//! the three built-in names.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::centralized::CentralizedBackend;
use crate::config::{METADATA_CONFIG_KEY, METADATA_TYPE_KEY};
use crate::error::GroupError;
use crate::observer::ObserverRegistry;
use crate::serialize::WireView;
use crate::swim::SwimBackend;
use crate::transport::RpcTransport;
use crate::view::GroupView;

/// Everything a backend needs to come up.
pub struct BackendArgs {
    /// The ambient RPC runtime.
    pub transport: Arc<dyn RpcTransport>,
    /// Provider id this backend serves under.
    pub provider_id: u16,
    /// Backend-specific JSON configuration (may be `Value::Null`).
    pub config: Value,
    /// The bootstrap view, moved into the backend.
    pub initial_view: WireView,
    /// True when this process joins a group that is already running, in
    /// which case the backend announces itself to the existing members.
    pub join: bool,
    /// Observer dispatch shared with the owning provider.
    pub observers: Arc<ObserverRegistry>,
}

/// The backend-agnostic interface the provider drives.
#[async_trait]
pub trait GroupBackend: Send + Sync {
    /// The backend identifier ("swim", "centralized", "static").
    fn kind(&self) -> &'static str;

    /// The effective backend configuration, defaults filled in.
    fn config(&self) -> Value;

    /// A copy of the current view, taken under the view lock.
    fn view_snapshot(&self) -> WireView;

    /// The current view digest.
    fn digest(&self) -> u64;

    /// Adds or replaces a metadata entry. Detector backends refuse: their
    /// metadata is fixed at init and owned by the protocol.
    async fn add_metadata(&self, _key: &str, _value: &str) -> Result<(), GroupError> {
        Err(GroupError::Unsupported(self.kind()))
    }

    /// Removes a metadata entry.
    async fn remove_metadata(&self, _key: &str) -> Result<(), GroupError> {
        Err(GroupError::Unsupported(self.kind()))
    }

    /// Adds a member from outside the protocol. The failure detectors own
    /// membership, so both refuse; only externally-driven backends would
    /// implement this.
    async fn add_member(&self, _address: &str, _provider_id: u16) -> Result<(), GroupError> {
        Err(GroupError::Unsupported(self.kind()))
    }

    /// Removes a member from outside the protocol.
    async fn remove_member(&self, _address: &str, _provider_id: u16) -> Result<(), GroupError> {
        Err(GroupError::Unsupported(self.kind()))
    }

    /// Tears the backend down: announce departure where the protocol has
    /// one, stop timers (waiting for any in-flight tick), deregister RPCs,
    /// clear the view.
    async fn shutdown(&self);
}

/// Instantiates a built-in backend by name.
pub async fn start_backend(
    name: &str,
    args: BackendArgs,
) -> Result<Arc<dyn GroupBackend>, GroupError> {
    match name {
        "swim" => Ok(SwimBackend::start(args).await?),
        "centralized" => Ok(CentralizedBackend::start(args).await?),
        "static" => Ok(StaticBackend::new(args)?),
        other => Err(GroupError::InvalidConfig(format!(
            "unknown backend type \"{other}\""
        ))),
    }
}

// ---------------------------------------------------------------------------
// Static Backend
// ---------------------------------------------------------------------------

/// The trivial backend: the view is whatever bootstrap said, forever.
/// Useful for fixed deployments and as the provider's test double.
pub struct StaticBackend {
    view: Mutex<GroupView<()>>,
    config: Value,
}

impl StaticBackend {
    /// Builds the backend from the bootstrap view.
    pub fn new(args: BackendArgs) -> Result<Arc<Self>, GroupError> {
        if args.initial_view.members.is_empty() {
            return Err(GroupError::InvalidArgument(
                "static backend needs a non-empty initial view".into(),
            ));
        }
        let config = if args.config.is_null() {
            serde_json::json!({})
        } else {
            args.config
        };
        let mut view = GroupView::from_wire(&args.initial_view, |_, _| ());
        view.set_metadata(METADATA_TYPE_KEY, "static");
        view.set_metadata(METADATA_CONFIG_KEY, &config.to_string());
        Ok(Arc::new(Self {
            view: Mutex::new(view),
            config,
        }))
    }
}

#[async_trait]
impl GroupBackend for StaticBackend {
    fn kind(&self) -> &'static str {
        "static"
    }

    fn config(&self) -> Value {
        self.config.clone()
    }

    fn view_snapshot(&self) -> WireView {
        self.view.lock().to_wire()
    }

    fn digest(&self) -> u64 {
        self.view.lock().digest()
    }

    async fn shutdown(&self) {
        self.view.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::WireMember;
    use crate::transport::MemoryNetwork;

    fn args(view: WireView) -> BackendArgs {
        let network = MemoryNetwork::new();
        BackendArgs {
            transport: network.endpoint("mem://static-test"),
            provider_id: 0,
            config: Value::Null,
            initial_view: view,
            join: false,
            observers: Arc::new(ObserverRegistry::new()),
        }
    }

    fn singleton_view() -> WireView {
        WireView {
            members: vec![WireMember {
                address: "mem://static-test".into(),
                provider_id: 0,
            }],
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn static_backend_freezes_the_bootstrap_view() {
        let backend = StaticBackend::new(args(singleton_view())).unwrap();
        let snapshot = backend.view_snapshot();
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(snapshot.metadata.get(METADATA_TYPE_KEY).unwrap(), "static");
        assert!(snapshot.metadata.contains_key(METADATA_CONFIG_KEY));
    }

    #[tokio::test]
    async fn static_backend_refuses_mutation() {
        let backend = StaticBackend::new(args(singleton_view())).unwrap();
        assert!(matches!(
            backend.add_metadata("k", "v").await,
            Err(GroupError::Unsupported("static"))
        ));
        assert!(matches!(
            backend.remove_metadata("k").await,
            Err(GroupError::Unsupported("static"))
        ));
    }

    #[tokio::test]
    async fn empty_view_is_rejected() {
        let result = StaticBackend::new(args(WireView::default()));
        assert!(matches!(result, Err(GroupError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn unknown_backend_name_is_invalid_config() {
        let result = start_backend("raft", args(singleton_view())).await;
        assert!(matches!(result, Err(GroupError::InvalidConfig(_))));
    }
}
