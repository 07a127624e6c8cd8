//! # RPC Transport Abstraction
//!
//! The membership engines need exactly three things from an RPC runtime:
//! addressable providers, handler registration keyed by
//! `(provider_id, rpc name)`, and timed request/response with cancellation.
//! This module fixes that seam as a trait so the engines stay
//! transport-agnostic — the same SWIM code runs over a real TCP socket in
//! the daemon and over an in-process loopback in tests and demos.
//!
//! Payload bytes are opaque to the transport; every Roster RPC encodes its
//! payload as JSON via serde. A call that outlives its timeout is
//! cancelled by dropping the future — no unbounded waits, ever.

mod memory;
mod tcp;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use tcp::TcpTransport;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Future returned by an RPC handler, resolving to the response payload.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Vec<u8>> + Send>>;

/// A registered RPC handler. Handlers run as short tasks on the runtime
/// and must not block; anything heavy belongs on a separate task.
pub type RpcHandler = Arc<dyn Fn(Vec<u8>) -> HandlerFuture + Send + Sync>;

/// Errors produced by the RPC runtime.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// No endpoint, provider, or handler answers at the target.
    #[error("no handler for rpc \"{rpc}\" at ({address}, {provider_id})")]
    Unreachable {
        address: String,
        provider_id: u16,
        rpc: String,
    },

    /// The call did not complete within its timeout.
    #[error("rpc \"{0}\" timed out")]
    Timeout(String),

    /// A handler is already registered under this `(provider_id, rpc)`.
    #[error("rpc \"{rpc}\" already registered for provider {provider_id}")]
    AlreadyRegistered { provider_id: u16, rpc: String },

    /// The peer spoke something that is not the Roster frame protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Socket-level failure.
    #[error("i/o error: {0}")]
    Io(String),
}

/// The ambient RPC runtime contract.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// The address under which peers can reach this endpoint.
    fn local_address(&self) -> &str;

    /// Registers a handler under `(provider_id, rpc)`.
    fn register(
        &self,
        provider_id: u16,
        rpc: &str,
        handler: RpcHandler,
    ) -> Result<(), TransportError>;

    /// Removes a handler. Unknown names are ignored; deregistration is
    /// how an engine guarantees no new handler invocations during
    /// teardown.
    fn deregister(&self, provider_id: u16, rpc: &str);

    /// Sends `body` to the named RPC of a provider at `address` and waits
    /// for the response, at most `timeout`.
    async fn call(
        &self,
        address: &str,
        provider_id: u16,
        rpc: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}

/// Wraps an async closure into an [`RpcHandler`].
pub fn handler<F, Fut>(f: F) -> RpcHandler
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Vec<u8>> + Send + 'static,
{
    Arc::new(move |body| Box::pin(f(body)) as HandlerFuture)
}
