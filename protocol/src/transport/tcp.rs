//! # TCP Transport
//!
//! The production transport: one length-prefixed JSON frame per request,
//! one per response, one connection per call. Addresses look like
//! `tcp://host:port`. Connection setup, the exchange, and teardown all
//! happen inside the caller's timeout, so a dead peer costs exactly one
//! timeout and nothing more.
//!
//! Resolved socket addresses are memoized per target address, so repeated
//! probes to the same peer skip host lookup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{RpcHandler, RpcTransport, TransportError};

/// Upper bound on a single frame. Views and gossip payloads are tiny;
/// anything near this size is a protocol violation, not a big message.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
struct RequestFrame {
    provider_id: u16,
    rpc: String,
    body: String,
}

#[derive(Serialize, Deserialize)]
struct ResponseFrame {
    body: Option<String>,
    error: Option<String>,
}

type HandlerTable = Arc<DashMap<(u16, String), RpcHandler>>;

/// A TCP endpoint hosting RPC handlers and issuing timed calls.
pub struct TcpTransport {
    local_address: String,
    handlers: HandlerTable,
    resolved: DashMap<String, SocketAddr>,
    accept_task: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TcpTransport {
    /// Binds a listener and starts accepting request frames.
    ///
    /// `bind_addr` is a plain `host:port`; the advertised local address
    /// (what peers dial) is `tcp://<resolved host:port>`.
    pub async fn bind(bind_addr: &str) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| TransportError::Io(format!("bind {bind_addr}: {e}")))?;
        let local = listener
            .local_addr()
            .map_err(|e| TransportError::Io(e.to_string()))?;

        let handlers: HandlerTable = Arc::new(DashMap::new());
        let transport = Arc::new(Self {
            local_address: format!("tcp://{local}"),
            handlers: Arc::clone(&handlers),
            resolved: DashMap::new(),
            accept_task: parking_lot::Mutex::new(None),
        });

        let task = tokio::spawn(accept_loop(listener, handlers));
        *transport.accept_task.lock() = Some(task);

        debug!(address = %transport.local_address, "tcp transport listening");
        Ok(transport)
    }

    /// Stops accepting new connections. In-flight handler tasks finish on
    /// their own; callers see connection resets as timeouts.
    pub fn stop(&self) {
        if let Some(task) = self.accept_task.lock().take() {
            task.abort();
        }
    }

    async fn resolve(&self, address: &str) -> Result<SocketAddr, TransportError> {
        if let Some(found) = self.resolved.get(address) {
            return Ok(*found);
        }
        let host_port = address.strip_prefix("tcp://").unwrap_or(address);
        let resolved = tokio::net::lookup_host(host_port)
            .await
            .map_err(|e| TransportError::Io(format!("resolve {address}: {e}")))?
            .next()
            .ok_or_else(|| TransportError::Io(format!("no socket address for {address}")))?;
        self.resolved.insert(address.to_string(), resolved);
        Ok(resolved)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl RpcTransport for TcpTransport {
    fn local_address(&self) -> &str {
        &self.local_address
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
        let exchange = async {
            let target = self.resolve(address).await?;
            let mut stream = TcpStream::connect(target).await.map_err(|_| {
                TransportError::Unreachable {
                    address: address.to_string(),
                    provider_id,
                    rpc: rpc.to_string(),
                }
            })?;

            let request = RequestFrame {
                provider_id,
                rpc: rpc.to_string(),
                body: String::from_utf8(body)
                    .map_err(|_| TransportError::Protocol("rpc body is not UTF-8".into()))?,
            };
            write_frame(&mut stream, &serde_json::to_vec(&request).expect("frame encodes"))
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;

            let raw = read_frame(&mut stream)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
            let response: ResponseFrame = serde_json::from_slice(&raw)
                .map_err(|e| TransportError::Protocol(format!("bad response frame: {e}")))?;

            match (response.body, response.error) {
                (Some(body), _) => Ok(body.into_bytes()),
                (None, Some(error)) => Err(TransportError::Unreachable {
                    address: address.to_string(),
                    provider_id,
                    rpc: error,
                }),
                (None, None) => Err(TransportError::Protocol("empty response frame".into())),
            }
        };

        tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::Timeout(rpc.to_string()))?
    }
}

async fn accept_loop(listener: TcpListener, handlers: HandlerTable) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let handlers = Arc::clone(&handlers);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, handlers).await {
                        debug!(%peer, error = %e, "rpc connection ended with error");
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn serve_connection(mut stream: TcpStream, handlers: HandlerTable) -> std::io::Result<()> {
    let raw = read_frame(&mut stream).await?;

    let response = match serde_json::from_slice::<RequestFrame>(&raw) {
        Ok(request) => {
            let key = (request.provider_id, request.rpc.clone());
            match handlers.get(&key).map(|h| h.clone()) {
                Some(handler) => {
                    let out = handler(request.body.into_bytes()).await;
                    ResponseFrame {
                        body: Some(String::from_utf8_lossy(&out).into_owned()),
                        error: None,
                    }
                }
                None => ResponseFrame {
                    body: None,
                    error: Some(format!(
                        "no handler for rpc \"{}\" at provider {}",
                        request.rpc, request.provider_id
                    )),
                },
            }
        }
        Err(e) => ResponseFrame {
            body: None,
            error: Some(format!("bad request frame: {e}")),
        },
    };

    write_frame(
        &mut stream,
        &serde_json::to_vec(&response).expect("frame encodes"),
    )
    .await
}

async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32().await?;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds limit"),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<()> {
    stream.write_u32(frame.len() as u32).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::handler;

    #[tokio::test]
    async fn call_round_trip_over_loopback() {
        let server = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = TcpTransport::bind("127.0.0.1:0").await.unwrap();

        server
            .register(
                1,
                "echo",
                handler(|body| async move { body }),
            )
            .unwrap();

        let reply = client
            .call(
                server.local_address(),
                1,
                "echo",
                br#"{"x":1}"#.to_vec(),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(reply, br#"{"x":1}"#);
    }

    #[tokio::test]
    async fn missing_handler_reports_unreachable() {
        let server = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = TcpTransport::bind("127.0.0.1:0").await.unwrap();

        let err = client
            .call(
                server.local_address(),
                9,
                "nothing",
                vec![],
                Duration::from_secs(5),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Unreachable { .. }));
    }

    #[tokio::test]
    async fn stopped_listener_makes_calls_fail() {
        let server = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let address = server.local_address().to_string();

        server.stop();
        drop(server);

        let err = client
            .call(&address, 0, "ping", vec![], Duration::from_millis(500))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn resolution_is_cached() {
        let server = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        let client = TcpTransport::bind("127.0.0.1:0").await.unwrap();
        server
            .register(0, "noop", handler(|_| async { b"{}".to_vec() }))
            .unwrap();

        for _ in 0..3 {
            client
                .call(server.local_address(), 0, "noop", vec![], Duration::from_secs(5))
                .await
                .unwrap();
        }
        assert_eq!(client.resolved.len(), 1);
    }
}
