//! # Provider
//!
//! The dispatch layer each process hosts: it owns exactly one backend
//! engine, keeps the observer list, and serves the client-facing
//! `get_view` RPC.
//!
//! The provider does not interpret membership itself — the backend is the
//! source of truth — but every engine-emitted event flows through the
//! provider's observer registry to whoever registered callbacks.
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "group": { "type": "swim" | "centralized" | "static", "config": { ... } },
//!   "bootstrap": "self" | "view" | "join" | "file" | "mpi",
//!   "file": "<path>"
//! }
//! ```
//!
//! A backend instance passed by value takes precedence over the
//! configured `type`; the name registry only runs when no instance was
//! supplied.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::backend::{start_backend, BackendArgs, GroupBackend};
use crate::bootstrap;
use crate::error::GroupError;
use crate::observer::{MembershipCallback, MetadataCallback, ObserverRegistry};
use crate::serialize::WireView;
use crate::transport::{handler, RpcTransport};

/// Client-facing view fetch.
pub const GET_VIEW_RPC: &str = "roster_get_view";

/// Request for [`GET_VIEW_RPC`]. `known_digest` is the caller's cached
/// digest; 0 means "no cache, send everything".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetViewRequest {
    #[serde(default)]
    pub known_digest: u64,
}

/// Response to [`GET_VIEW_RPC`]. When `unchanged` is true the caller's
/// cache is current and `view` is omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetViewResponse {
    pub digest: u64,
    pub unchanged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<WireView>,
}

/// Everything needed to start a provider.
pub struct ProviderArgs {
    /// The ambient RPC runtime.
    pub transport: Arc<dyn RpcTransport>,
    /// Provider id to register under.
    pub provider_id: u16,
    /// Provider configuration (see module docs). `Value::Null` means all
    /// defaults, which requires a `backend` instance.
    pub config: Value,
    /// Pre-built backend, overriding the configured `type`.
    pub backend: Option<Arc<dyn GroupBackend>>,
    /// Observer registry to dispatch through. Supplying one lets callers
    /// register callbacks before the backend starts, so bootstrap joins
    /// are observed too. `None` creates a fresh empty registry.
    pub observers: Option<Arc<ObserverRegistry>>,
    /// Initial view for `"bootstrap": "view"`.
    pub initial_view: Option<WireView>,
}

/// A running provider.
pub struct Provider {
    transport: Arc<dyn RpcTransport>,
    provider_id: u16,
    backend: Arc<dyn GroupBackend>,
    observers: Arc<ObserverRegistry>,
}

impl Provider {
    /// Parses the configuration, bootstraps the initial view, starts the
    /// backend, and registers the client RPC. On error nothing is left
    /// behind: the backend either never started or is shut down again.
    pub async fn start(args: ProviderArgs) -> Result<Arc<Self>, GroupError> {
        let config = match &args.config {
            Value::Null => json!({}),
            Value::Object(_) => args.config.clone(),
            _ => {
                return Err(GroupError::InvalidConfig(
                    "provider configuration should be a JSON object".into(),
                ))
            }
        };

        let group = match config.get("group") {
            None => None,
            Some(Value::Object(group)) => Some(group),
            Some(_) => {
                return Err(GroupError::InvalidConfig(
                    "\"group\" field should be an object".into(),
                ))
            }
        };
        let group_type = match group.and_then(|g| g.get("type")) {
            None => None,
            Some(Value::String(name)) => Some(name.clone()),
            Some(_) => {
                return Err(GroupError::InvalidConfig(
                    "\"type\" field in group configuration should be a string".into(),
                ))
            }
        };
        let group_config = group
            .and_then(|g| g.get("config"))
            .cloned()
            .unwrap_or(Value::Null);

        let bootstrap_method = match config.get("bootstrap") {
            None => "self",
            Some(Value::String(method)) => method.as_str(),
            Some(_) => {
                return Err(GroupError::InvalidConfig(
                    "\"bootstrap\" field should be a string".into(),
                ))
            }
        };
        let file = config.get("file").and_then(|f| f.as_str());

        let observers = args
            .observers
            .unwrap_or_else(|| Arc::new(ObserverRegistry::new()));

        let backend: Arc<dyn GroupBackend> = match args.backend {
            Some(backend) => {
                if group_type.is_some() {
                    warn!("\"type\" field ignored because a backend instance was provided");
                }
                backend
            }
            None => {
                let name = group_type.ok_or_else(|| {
                    GroupError::InvalidConfig("no backend configured for the group".into())
                })?;
                let (initial_view, join) = bootstrap::initial_view(
                    bootstrap_method,
                    &args.transport,
                    args.provider_id,
                    file,
                    args.initial_view,
                )
                .await?;
                start_backend(
                    &name,
                    BackendArgs {
                        transport: Arc::clone(&args.transport),
                        provider_id: args.provider_id,
                        config: group_config,
                        initial_view,
                        join,
                        observers: Arc::clone(&observers),
                    },
                )
                .await?
            }
        };

        let provider = Arc::new(Self {
            transport: args.transport,
            provider_id: args.provider_id,
            backend,
            observers,
        });

        let handle = Arc::clone(&provider);
        if let Err(e) = provider.transport.register(
            provider.provider_id,
            GET_VIEW_RPC,
            handler(move |body| {
                let provider = Arc::clone(&handle);
                async move { provider.handle_get_view(body) }
            }),
        ) {
            // A half-started provider must not leak a running engine.
            provider.backend.shutdown().await;
            return Err(e.into());
        }

        info!(
            provider_id = provider.provider_id,
            backend = provider.backend.kind(),
            "provider registered"
        );
        Ok(provider)
    }

    fn handle_get_view(&self, body: Vec<u8>) -> Vec<u8> {
        let request: GetViewRequest = serde_json::from_slice(&body).unwrap_or_else(|e| {
            debug!(error = %e, "bad get_view request, treating as uncached");
            GetViewRequest::default()
        });

        let view = self.backend.view_snapshot();
        let digest = view.content_digest();
        let response = if request.known_digest == digest && digest != 0 {
            GetViewResponse {
                digest,
                unchanged: true,
                view: None,
            }
        } else {
            GetViewResponse {
                digest,
                unchanged: false,
                view: Some(view),
            }
        };
        serde_json::to_vec(&response).expect("get_view response encodes")
    }

    /// Registers (or replaces) observer callbacks under `key`.
    pub fn add_callbacks(
        &self,
        key: u64,
        membership: MembershipCallback,
        metadata: MetadataCallback,
    ) {
        self.observers.add_callbacks(key, membership, metadata);
    }

    /// Removes the observer registered under `key`.
    pub fn remove_callbacks(&self, key: u64) -> bool {
        self.observers.remove_callbacks(key)
    }

    /// The observer registry, shared with the backend.
    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// The backend this provider runs.
    pub fn backend(&self) -> &Arc<dyn GroupBackend> {
        &self.backend
    }

    /// Provider id this provider serves under.
    pub fn provider_id(&self) -> u16 {
        self.provider_id
    }

    /// A snapshot of the current view.
    pub fn view_snapshot(&self) -> WireView {
        self.backend.view_snapshot()
    }

    /// The current view digest.
    pub fn digest(&self) -> u64 {
        self.backend.digest()
    }

    /// The combined provider configuration: backend type plus the
    /// backend's effective config.
    pub fn config_json(&self) -> Value {
        json!({
            "group": {
                "type": self.backend.kind(),
                "config": self.backend.config(),
            }
        })
    }

    /// Deregisters the client RPC, then tears the backend down.
    pub async fn shutdown(&self) {
        self.transport.deregister(self.provider_id, GET_VIEW_RPC);
        self.backend.shutdown().await;
        info!(provider_id = self.provider_id, "provider shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::noop_metadata;
    use crate::transport::MemoryNetwork;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn static_provider(
        network: &Arc<MemoryNetwork>,
        address: &str,
    ) -> Arc<Provider> {
        Provider::start(ProviderArgs {
            transport: network.endpoint(address),
            provider_id: 0,
            config: json!({
                "group": { "type": "static" },
                "bootstrap": "self",
            }),
            backend: None,
            observers: None,
            initial_view: None,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn get_view_serves_snapshot_and_digest_token() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;
        let client = network.endpoint("mem://c");

        let raw = client
            .call(
                "mem://p",
                0,
                GET_VIEW_RPC,
                serde_json::to_vec(&GetViewRequest { known_digest: 0 }).unwrap(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        let response: GetViewResponse = serde_json::from_slice(&raw).unwrap();
        assert!(!response.unchanged);
        let view = response.view.unwrap();
        assert_eq!(view.members.len(), 1);

        // Asking again with the fresh digest short-circuits.
        let raw = client
            .call(
                "mem://p",
                0,
                GET_VIEW_RPC,
                serde_json::to_vec(&GetViewRequest {
                    known_digest: response.digest,
                })
                .unwrap(),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        let response: GetViewResponse = serde_json::from_slice(&raw).unwrap();
        assert!(response.unchanged);
        assert!(response.view.is_none());

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn config_json_names_the_backend() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;

        let config = provider.config_json();
        assert_eq!(config["group"]["type"], "static");
        assert!(config["group"]["config"].is_object());

        provider.shutdown().await;
    }

    #[tokio::test]
    async fn bad_configs_are_rejected() {
        let network = MemoryNetwork::new();

        let result = Provider::start(ProviderArgs {
            transport: network.endpoint("mem://p1"),
            provider_id: 0,
            config: json!({"group": {"type": 42}}),
            backend: None,
            observers: None,
            initial_view: None,
        })
        .await;
        assert!(matches!(result, Err(GroupError::InvalidConfig(_))));

        // No backend at all.
        let result = Provider::start(ProviderArgs {
            transport: network.endpoint("mem://p2"),
            provider_id: 0,
            config: Value::Null,
            backend: None,
            observers: None,
            initial_view: None,
        })
        .await;
        assert!(matches!(result, Err(GroupError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn callbacks_are_keyed_and_replaceable() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let hits = Arc::clone(&hits);
            provider.add_callbacks(
                1,
                Arc::new(move |_, _, _| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
                noop_metadata(),
            );
        }
        provider.observers().notify_membership(
            crate::observer::MembershipUpdate::Joined,
            "mem://x",
            0,
        );
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(provider.remove_callbacks(1));
        assert!(!provider.remove_callbacks(1));
        provider.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_deregisters_the_client_rpc() {
        let network = MemoryNetwork::new();
        let provider = static_provider(&network, "mem://p").await;
        let client = network.endpoint("mem://c");

        provider.shutdown().await;

        let err = client
            .call(
                "mem://p",
                0,
                GET_VIEW_RPC,
                b"{}".to_vec(),
                Duration::from_secs(1),
            )
            .await;
        assert!(err.is_err());
    }
}
