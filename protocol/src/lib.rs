// Copyright (c) 2026 Roster Contributors. MIT License.
// See LICENSE for details.

//! # Roster Protocol — Core Library
//!
//! Decentralized group membership for clusters of RPC-capable processes.
//! Each process hosts a *provider* participating in one logical group; the
//! provider exposes a consistent view of which peers are currently live
//! plus a small set of group-level key/value metadata. The hard part —
//! noticing that a peer crashed and getting everyone to eventually agree —
//! is the job of the pluggable failure-detection backends.
//!
//! ## Architecture
//!
//! The modules mirror the actual concerns of a membership service:
//!
//! - **view** — The group view: sorted members, sorted metadata, change
//!   digest. The data structure everything else mutates.
//! - **gossip** — The bounded buffer of pending membership events that
//!   piggyback on protocol traffic.
//! - **swim** — The SWIM failure detector: randomized round-robin probes,
//!   indirect probing, suspicion with refutation, epidemic dissemination.
//! - **centralized** — The simple alternative: one primary pings everyone.
//! - **backend** — The contract both detectors implement, plus the static
//!   backend and the name registry.
//! - **provider** — The dispatch layer: one backend, the observer list,
//!   the client-facing `get_view` RPC.
//! - **client** — Group handles with digest-checked cached views.
//! - **bootstrap** — Building the initial view (self, view, file, join).
//! - **transport** — The RPC runtime seam: in-process loopback for tests,
//!   TCP frames for deployments.
//! - **serialize** — The canonical JSON form of a view.
//! - **config** — Constants and tunable defaults.
//! - **error** — The crate-wide error type.
//!
//! ## Consistency model
//!
//! Views converge *eventually*. There is no quorum, no linearizable
//! membership change, and a partitioned minority may well declare the
//! majority dead. What you get in exchange is constant per-member network
//! load and detection latency that scales with log(n), which is the trade
//! SWIM was designed to make.

pub mod backend;
pub mod bootstrap;
pub mod centralized;
pub mod client;
pub mod config;
pub mod error;
pub mod gossip;
pub mod observer;
pub mod provider;
pub mod serialize;
pub mod swim;
pub mod transport;
pub mod view;

pub use backend::{start_backend, BackendArgs, GroupBackend, StaticBackend};
pub use centralized::{CentralizedBackend, CentralizedConfig};
pub use client::{GroupClient, GroupHandle, HandleMode};
pub use error::GroupError;
pub use gossip::{compute_max_gossip, GossipBuffer, GossipEntry, GossipKind};
pub use observer::{MembershipUpdate, ObserverRegistry};
pub use provider::{Provider, ProviderArgs};
pub use serialize::{WireMember, WireView};
pub use swim::{MemberStatus, SwimBackend, SwimConfig};
pub use transport::{MemoryNetwork, MemoryTransport, RpcTransport, TcpTransport, TransportError};
pub use view::{GroupView, Member};
