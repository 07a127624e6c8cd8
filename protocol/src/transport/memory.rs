//! # In-Process Loopback Transport
//!
//! A whole cluster inside one process: every endpoint is a row in a shared
//! routing table, and a call is a direct async invocation of the callee's
//! handler. Used by the integration tests and the demo so that multi-member
//! scenarios run deterministically under a paused tokio clock, with no
//! sockets involved.
//!
//! [`MemoryNetwork::kill`] removes an endpoint abruptly — registered
//! handlers and all — which is exactly what a crashed process looks like
//! to its peers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{RpcHandler, RpcTransport, TransportError};

type HandlerTable = Arc<DashMap<(u16, String), RpcHandler>>;
type RoutingTable = Arc<DashMap<String, HandlerTable>>;

/// Shared routing table for a set of in-process endpoints.
#[derive(Default)]
pub struct MemoryNetwork {
    endpoints: RoutingTable,
}

impl MemoryNetwork {
    /// Creates an empty network.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates (or re-attaches) the endpoint with the given address.
    pub fn endpoint(&self, address: &str) -> Arc<MemoryTransport> {
        let handlers = self
            .endpoints
            .entry(address.to_string())
            .or_default()
            .clone();
        Arc::new(MemoryTransport {
            address: address.to_string(),
            endpoints: Arc::clone(&self.endpoints),
            handlers,
        })
    }

    /// Simulates an abrupt crash: the endpoint vanishes from the routing
    /// table without any goodbye. Its calls fail in both directions from
    /// now on.
    pub fn kill(&self, address: &str) {
        self.endpoints.remove(address);
    }
}

/// One endpoint of a [`MemoryNetwork`].
pub struct MemoryTransport {
    address: String,
    endpoints: RoutingTable,
    handlers: HandlerTable,
}

#[async_trait]
impl RpcTransport for MemoryTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    fn register(
        &self,
        provider_id: u16,
        rpc: &str,
        handler: RpcHandler,
    ) -> Result<(), TransportError> {
        let key = (provider_id, rpc.to_string());
        if self.handlers.contains_key(&key) {
            return Err(TransportError::AlreadyRegistered {
                provider_id,
                rpc: rpc.to_string(),
            });
        }
        self.handlers.insert(key, handler);
        Ok(())
    }

    fn deregister(&self, provider_id: u16, rpc: &str) {
        self.handlers.remove(&(provider_id, rpc.to_string()));
    }

    async fn call(
        &self,
        address: &str,
        provider_id: u16,
        rpc: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let unreachable = || TransportError::Unreachable {
            address: address.to_string(),
            provider_id,
            rpc: rpc.to_string(),
        };

        // A killed endpoint is dead in both directions: no inbound
        // handlers, no outbound calls.
        if !self.endpoints.contains_key(&self.address) {
            return Err(TransportError::Io(format!(
                "local endpoint {} is down",
                self.address
            )));
        }

        // Grab the handler without holding any map guard across the await.
        let handler = self
            .endpoints
            .get(address)
            .ok_or_else(unreachable)?
            .get(&(provider_id, rpc.to_string()))
            .ok_or_else(unreachable)?
            .clone();

        tokio::time::timeout(timeout, handler(body))
            .await
            .map_err(|_| TransportError::Timeout(rpc.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::handler;

    #[tokio::test]
    async fn call_round_trip() {
        let network = MemoryNetwork::new();
        let server = network.endpoint("mem://a");
        let client = network.endpoint("mem://b");

        server
            .register(
                3,
                "echo",
                handler(|body| async move {
                    let mut out = b"re: ".to_vec();
                    out.extend_from_slice(&body);
                    out
                }),
            )
            .unwrap();

        let reply = client
            .call("mem://a", 3, "echo", b"hello".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"re: hello");
    }

    #[tokio::test]
    async fn unknown_targets_are_unreachable() {
        let network = MemoryNetwork::new();
        let client = network.endpoint("mem://b");

        let err = client
            .call("mem://nope", 0, "echo", vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn killed_endpoint_stops_answering() {
        let network = MemoryNetwork::new();
        let server = network.endpoint("mem://a");
        let client = network.endpoint("mem://b");
        server
            .register(0, "ping", handler(|_| async { vec![] }))
            .unwrap();

        client
            .call("mem://a", 0, "ping", vec![], Duration::from_secs(1))
            .await
            .unwrap();

        network.kill("mem://a");
        let err = client
            .call("mem://a", 0, "ping", vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn killed_endpoint_cannot_send_either() {
        let network = MemoryNetwork::new();
        let a = network.endpoint("mem://a");
        let b = network.endpoint("mem://b");
        b.register(0, "ping", handler(|_| async { vec![] }))
            .unwrap();

        network.kill("mem://a");
        let err = a
            .call("mem://b", 0, "ping", vec![], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
    }

    #[tokio::test]
    async fn double_registration_is_rejected() {
        let network = MemoryNetwork::new();
        let server = network.endpoint("mem://a");
        server
            .register(0, "ping", handler(|_| async { vec![] }))
            .unwrap();
        let err = server
            .register(0, "ping", handler(|_| async { vec![] }))
            .unwrap_err();
        assert!(matches!(err, TransportError::AlreadyRegistered { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let network = MemoryNetwork::new();
        let server = network.endpoint("mem://a");
        let client = network.endpoint("mem://b");
        server
            .register(
                0,
                "slow",
                handler(|_| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    vec![]
                }),
            )
            .unwrap();

        let err = client
            .call("mem://a", 0, "slow", vec![], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Timeout(_)));
    }
}
