//! # Bootstrap Helpers
//!
//! Building the *initial* view a backend starts from. Four methods,
//! selected by the provider configuration's `"bootstrap"` field:
//!
//! - `self` — a singleton view containing only the local endpoint. The
//!   seed member of a new group.
//! - `view` — a caller-supplied view (the deployment tool knows the full
//!   roster up front).
//! - `file` — deserialize a view previously written with
//!   [`WireView::write_to_file`].
//! - `join` — read a file naming at least one live member, fetch the
//!   current view from it, and tell the backend to announce itself.
//!
//! `mpi` appears in configurations written for deployments with a
//! launcher-provided communicator; this stack has no MPI binding, so the
//! method is recognized and refused.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::GroupError;
use crate::provider::{GetViewRequest, GetViewResponse, GET_VIEW_RPC};
use crate::serialize::{WireMember, WireView};
use crate::transport::RpcTransport;

/// Timeout on the view fetch performed by the `join` method.
const JOIN_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves a bootstrap method to `(initial_view, join)`, where `join`
/// tells the backend whether to announce itself to an existing group.
pub async fn initial_view(
    method: &str,
    transport: &Arc<dyn RpcTransport>,
    provider_id: u16,
    file: Option<&str>,
    supplied: Option<WireView>,
) -> Result<(WireView, bool), GroupError> {
    match method {
        "self" => {
            let view = WireView {
                members: vec![WireMember {
                    address: transport.local_address().to_string(),
                    provider_id,
                }],
                metadata: Default::default(),
            };
            Ok((view, false))
        }
        "view" => {
            let view = supplied.ok_or_else(|| {
                GroupError::InvalidArgument(
                    "bootstrap method \"view\" requires an initial view".into(),
                )
            })?;
            if view.members.is_empty() {
                return Err(GroupError::InvalidArgument(
                    "bootstrap view has no members".into(),
                ));
            }
            Ok((view, false))
        }
        "file" => {
            let path = require_file(method, file)?;
            Ok((WireView::read_from_file(path.as_ref())?, false))
        }
        "join" => {
            let path = require_file(method, file)?;
            let seed = WireView::read_from_file(path.as_ref())?;
            let peer = &seed.members[0];
            debug!(peer = %peer.address, provider_id = peer.provider_id, "joining via peer");
            let view = fetch_view_from(transport, &peer.address, peer.provider_id).await?;
            Ok((view, true))
        }
        "mpi" => Err(GroupError::Unsupported("mpi bootstrap")),
        other => Err(GroupError::InvalidArgument(format!(
            "unknown bootstrap method \"{other}\""
        ))),
    }
}

/// Fetches the live view from a running provider.
pub async fn fetch_view_from(
    transport: &Arc<dyn RpcTransport>,
    address: &str,
    provider_id: u16,
) -> Result<WireView, GroupError> {
    let request = GetViewRequest { known_digest: 0 };
    let raw = transport
        .call(
            address,
            provider_id,
            GET_VIEW_RPC,
            serde_json::to_vec(&request).expect("get_view request encodes"),
            JOIN_FETCH_TIMEOUT,
        )
        .await?;
    let response: GetViewResponse = serde_json::from_slice(&raw)?;
    response.view.ok_or_else(|| {
        GroupError::Other("peer answered get_view without a view".into())
    })
}

fn require_file<'a>(method: &str, file: Option<&'a str>) -> Result<&'a str, GroupError> {
    file.ok_or_else(|| {
        GroupError::InvalidArgument(format!(
            "bootstrap method \"{method}\" requires a \"file\" field"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryNetwork;

    #[tokio::test]
    async fn self_bootstrap_is_a_singleton() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn RpcTransport> = network.endpoint("mem://me");
        let (view, join) = initial_view("self", &transport, 7, None, None)
            .await
            .unwrap();
        assert!(!join);
        assert_eq!(view.members.len(), 1);
        assert_eq!(view.members[0].address, "mem://me");
        assert_eq!(view.members[0].provider_id, 7);
    }

    #[tokio::test]
    async fn view_bootstrap_requires_members() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn RpcTransport> = network.endpoint("mem://me");

        assert!(initial_view("view", &transport, 0, None, None).await.is_err());
        assert!(
            initial_view("view", &transport, 0, None, Some(WireView::default()))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn file_bootstrap_round_trip() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn RpcTransport> = network.endpoint("mem://me");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("group.json");
        let view = WireView {
            members: vec![WireMember {
                address: "mem://seed".into(),
                provider_id: 0,
            }],
            metadata: Default::default(),
        };
        view.write_to_file(&path).unwrap();

        let (read, join) = initial_view(
            "file",
            &transport,
            0,
            Some(path.to_str().unwrap()),
            None,
        )
        .await
        .unwrap();
        assert!(!join);
        assert_eq!(read, view);
    }

    #[tokio::test]
    async fn unknown_and_unsupported_methods() {
        let network = MemoryNetwork::new();
        let transport: Arc<dyn RpcTransport> = network.endpoint("mem://me");

        assert!(matches!(
            initial_view("mpi", &transport, 0, None, None).await,
            Err(GroupError::Unsupported(_))
        ));
        assert!(matches!(
            initial_view("gossip", &transport, 0, None, None).await,
            Err(GroupError::InvalidArgument(_))
        ));
        assert!(matches!(
            initial_view("file", &transport, 0, None, None).await,
            Err(GroupError::InvalidArgument(_))
        ));
    }
}
